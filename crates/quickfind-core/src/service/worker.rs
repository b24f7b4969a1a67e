//! Worker loop (C8): build-or-restore on startup, then poll/apply/snapshot/
//! prune on a fixed cadence until shutdown is requested.

use super::ServiceContext;
use crate::index::snapshot;
use crate::ntfs::MftIterator;
use crate::usn::{self, UsnJournal};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often the shutdown flag is rechecked while waiting out a poll
/// interval, so a shutdown request is never stalled behind a long sleep.
const SHUTDOWN_POLL_GRANULARITY: Duration = Duration::from_millis(200);

pub fn run_worker_loop(mut ctx: ServiceContext) {
    let (mut latest_journal_id, mut latest_usn) = match restore_or_build(&ctx) {
        Ok(cursor) => cursor,
        Err(err) => {
            error!("worker: failed to initialize index: {err}");
            return;
        }
    };

    info!(
        "worker: index ready, journal_id={} latest_usn={}",
        latest_journal_id, latest_usn
    );
    ctx.database_initialized.store(true, Ordering::Release);

    let mut polls_since_snapshot = 0u32;

    while !ctx.is_shutting_down() {
        sleep_respecting_shutdown(&ctx, ctx.config.poll_interval);
        if ctx.is_shutting_down() {
            break;
        }

        let journal = UsnJournal::open(ctx.config.drive_letter, latest_journal_id);
        let changes = match journal.read_changes(latest_usn) {
            Ok(changes) => changes,
            Err(err) => {
                warn!("worker: USN read failed, will retry next cycle: {err}");
                continue;
            }
        };

        if !changes.is_empty() {
            let mut index = ctx.index.write();
            usn::apply_changes(&mut index, &changes);
            latest_usn = index.latest_usn;
            index.latest_journal_id = latest_journal_id;
            debug!("worker: applied {} changes, latest_usn={}", changes.len(), latest_usn);

            ctx.config.refresh_prune_threshold(index.record_count());
            if index.records_not_in_use_count > ctx.config.prune_threshold {
                info!(
                    "worker: pruning, {} tombstones over threshold {}",
                    index.records_not_in_use_count, ctx.config.prune_threshold
                );
                index.prune();
            }
        } else {
            latest_journal_id = match UsnJournal::query(ctx.config.drive_letter) {
                Ok((id, _next_usn)) => id,
                Err(_) => latest_journal_id,
            };
        }

        polls_since_snapshot += 1;
        if polls_since_snapshot >= ctx.config.snapshot_interval_polls {
            polls_since_snapshot = 0;
            let index = ctx.index.read();
            if let Err(err) = snapshot::write_to_file(&index, &ctx.config.snapshot_path) {
                warn!("worker: snapshot write failed, continuing to serve in-memory state: {err}");
            } else {
                debug!("worker: snapshot written to {:?}", ctx.config.snapshot_path);
            }
        }
    }

    info!("worker: shutdown observed, exiting");
}

/// Restores a prior snapshot if present and valid, otherwise builds the
/// index from scratch by iterating the MFT. Returns the journal cursor
/// the USN poll loop should resume from.
fn restore_or_build(ctx: &ServiceContext) -> Result<(u64, i64), String> {
    if let Ok(restored) = snapshot::read_from_file(&ctx.config.snapshot_path) {
        info!("worker: restored snapshot from {:?}", ctx.config.snapshot_path);
        let journal_id = restored.latest_journal_id;
        let latest_usn = restored.latest_usn;
        *ctx.index.write() = restored;

        // A journal reset between runs invalidates the stored cursor; fall
        // through to a full rebuild in that case.
        match UsnJournal::query(ctx.config.drive_letter) {
            Ok((current_id, _)) if current_id == journal_id => return Ok((journal_id, latest_usn)),
            Ok((current_id, next_usn)) => {
                warn!("worker: journal id changed since snapshot, rebuilding");
                return build_index(ctx, current_id, next_usn);
            }
            Err(err) => return Err(err.to_string()),
        }
    }

    let (journal_id, next_usn) =
        UsnJournal::query(ctx.config.drive_letter).map_err(|e| e.to_string())?;
    build_index(ctx, journal_id, next_usn)
}

fn build_index(ctx: &ServiceContext, journal_id: u64, next_usn: i64) -> Result<(u64, i64), String> {
    info!("worker: building index from MFT scan on drive {}:", ctx.config.drive_letter);
    let mut iterator = MftIterator::open(ctx.config.drive_letter, 64 * 1024).map_err(|e| e.to_string())?;

    let mut index = ctx.index.write();
    let mut scanned = 0u64;
    let mut skipped = 0u64;
    while let Some(result) = iterator.advance() {
        match result {
            Ok(record) => {
                index.insert(record.id, record.parent_id, record.attributes, &record.name);
                scanned += 1;
            }
            Err(_) => skipped += 1,
        }
    }
    index.latest_journal_id = journal_id;
    index.latest_usn = next_usn;
    info!("worker: scan complete, {scanned} records indexed, {skipped} records skipped");

    Ok((journal_id, next_usn))
}

fn sleep_respecting_shutdown(ctx: &ServiceContext, total: Duration) {
    let mut waited = Duration::ZERO;
    while waited < total {
        if ctx.is_shutting_down() {
            return;
        }
        let chunk = SHUTDOWN_POLL_GRANULARITY.min(total - waited);
        std::thread::sleep(chunk);
        waited += chunk;
    }
}
