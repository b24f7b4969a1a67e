//! Index and service configuration (C10): what the original source
//! hard-codes, exposed here as CLI-overridable defaults, plus an optional
//! JSON config file layered underneath the CLI flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DRIVE_LETTER: char = 'C';
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SNAPSHOT_INTERVAL_POLLS: u32 = 60;

/// `records_not_in_use_count` threshold that triggers a prune, expressed
/// as a fraction of live records with a floor so small volumes still
/// reclaim tombstones in bounded time.
pub const PRUNE_FRACTION: f64 = 0.25;
pub const PRUNE_MINIMUM: u32 = 4096;

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub drive_letter: char,
    pub snapshot_path: PathBuf,
    pub poll_interval: Duration,
    pub snapshot_interval_polls: u32,
    pub prune_threshold: u32,
}

impl IndexConfig {
    /// Builds config from CLI overrides layered onto a config file (if
    /// present) layered onto documented defaults. `snapshot_path` defaults
    /// to `quickfind.db` under the platform's per-machine application-data
    /// directory.
    pub fn new(drive_letter: Option<char>, snapshot_path: Option<PathBuf>) -> IndexConfig {
        let file = ConfigFile::load(&default_config_file_path()).unwrap_or_default();

        IndexConfig {
            drive_letter: drive_letter.or(file.drive_letter).unwrap_or(DEFAULT_DRIVE_LETTER),
            snapshot_path: snapshot_path.or(file.snapshot_path).unwrap_or_else(default_snapshot_path),
            poll_interval: file
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            snapshot_interval_polls: file.snapshot_interval_polls.unwrap_or(DEFAULT_SNAPSHOT_INTERVAL_POLLS),
            prune_threshold: PRUNE_MINIMUM,
        }
    }

    /// Recomputes `prune_threshold` from the current live record count,
    /// per the 25%-of-live-records-or-4096-minimum policy.
    pub fn refresh_prune_threshold(&mut self, live_record_count: usize) {
        let scaled = (live_record_count as f64 * PRUNE_FRACTION) as u32;
        self.prune_threshold = scaled.max(PRUNE_MINIMUM);
    }
}

/// On-disk config shape, every field optional so a partial file only
/// overrides what it sets. Lives under the same application-data
/// directory as the snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    drive_letter: Option<char>,
    snapshot_path: Option<PathBuf>,
    poll_interval_secs: Option<u64>,
    snapshot_interval_polls: Option<u32>,
}

impl ConfigFile {
    fn load(path: &Path) -> Option<ConfigFile> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

fn default_config_file_path() -> PathBuf {
    app_data_dir().join("config.json")
}

fn default_snapshot_path() -> PathBuf {
    app_data_dir().join("quickfind.db")
}

fn app_data_dir() -> PathBuf {
    std::env::var_os("ProgramData")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("quickfind")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = IndexConfig::new(None, None);
        assert_eq!(cfg.drive_letter, 'C');
        assert_eq!(cfg.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(cfg.prune_threshold, PRUNE_MINIMUM);
    }

    #[test]
    fn overrides_take_precedence() {
        let cfg = IndexConfig::new(Some('D'), Some(PathBuf::from("custom.db")));
        assert_eq!(cfg.drive_letter, 'D');
        assert_eq!(cfg.snapshot_path, PathBuf::from("custom.db"));
    }

    #[test]
    fn prune_threshold_scales_with_live_count_above_minimum() {
        let mut cfg = IndexConfig::new(None, None);
        cfg.refresh_prune_threshold(1_000_000);
        assert_eq!(cfg.prune_threshold, 250_000);
    }

    #[test]
    fn prune_threshold_floors_at_minimum_for_small_indexes() {
        let mut cfg = IndexConfig::new(None, None);
        cfg.refresh_prune_threshold(100);
        assert_eq!(cfg.prune_threshold, PRUNE_MINIMUM);
    }

    #[test]
    fn config_file_partial_override_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"drive_letter": "D", "poll_interval_secs": 5}"#).unwrap();

        let file = ConfigFile::load(&path).unwrap();
        assert_eq!(file.drive_letter, Some('D'));
        assert_eq!(file.poll_interval_secs, Some(5));
        assert_eq!(file.snapshot_path, None);
    }

    #[test]
    fn missing_config_file_yields_none() {
        assert!(ConfigFile::load(Path::new("does-not-exist.json")).is_none());
    }
}
