//! Quickfind — an always-on local file-name search index for NTFS volumes.
//!
//! Thin binary entry point: CLI parsing and logging bootstrap live here,
//! everything else lives in `quickfind-core`.

use clap::{Parser, Subcommand};
use quickfind_core::config::IndexConfig;
use quickfind_core::service::ServiceContext;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quickfind", about = "Always-on local file-name search index")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Drive letter to index, e.g. "C".
    #[arg(long, global = true)]
    drive: Option<char>,

    /// Override the snapshot file path.
    #[arg(long, global = true)]
    snapshot_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the service in the foreground: build/restore the index, then
    /// poll the change journal and answer queries until terminated.
    Server,
    /// Register quickfind with the platform service manager.
    Install,
    /// Deregister quickfind from the platform service manager.
    Uninstall,
    /// Build (or restore) an index and run a timed query microbenchmark.
    Bench {
        /// Substring to search for.
        query: String,
        /// Number of times to repeat the query.
        #[arg(long, default_value_t = 1000)]
        iterations: u32,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    if !quickfind_core::platform::is_elevated() {
        tracing::warn!("quickfind is not running elevated; raw volume access will likely fail");
    }

    let cli = Cli::parse();
    let config = IndexConfig::new(cli.drive, cli.snapshot_path);

    match cli.command {
        None => {
            tracing::info!("no subcommand given, running as a foreground service (SCM integration is out of scope)");
            run_server(config);
        }
        Some(Command::Server) => run_server(config),
        Some(Command::Install) => {
            tracing::info!("install requested (service registration is out of scope, logging intent only)");
        }
        Some(Command::Uninstall) => {
            tracing::info!("uninstall requested (service deregistration is out of scope, logging intent only)");
        }
        Some(Command::Bench { query, iterations }) => run_bench(config, &query, iterations)?,
    }

    Ok(())
}

fn run_server(config: IndexConfig) {
    tracing::info!("quickfind server starting on drive {}:", config.drive_letter);
    let ctx = ServiceContext::new(config);
    quickfind_core::service::run(ctx);
}

fn run_bench(config: IndexConfig, query: &str, iterations: u32) -> anyhow::Result<()> {
    use quickfind_core::ntfs::MftIterator;
    use quickfind_core::query::{run_query, QueryFlags, QueryParams};
    use std::time::Instant;

    tracing::info!("bench: building index on drive {}:", config.drive_letter);
    let mut index = quickfind_core::index::IndexStore::new();
    let mut iterator = MftIterator::open(config.drive_letter, 64 * 1024)
        .map_err(|e| anyhow::anyhow!("failed to open MFT iterator: {e}"))?;
    while let Some(result) = iterator.advance() {
        if let Ok(record) = result {
            index.insert(record.id, record.parent_id, record.attributes, &record.name);
        }
    }
    tracing::info!("bench: indexed {} records", index.record_count());

    let params = QueryParams {
        text: query.to_owned(),
        flags: QueryFlags::NORMAL,
        skip_count: 0,
        return_count: 20,
        stop_count: 0,
    };

    let start = Instant::now();
    let mut total_found = 0u64;
    for _ in 0..iterations {
        let result = run_query(&params, &index, config.drive_letter);
        total_found += result.found_count;
    }
    let elapsed = start.elapsed();

    println!(
        "{iterations} queries for {query:?} in {elapsed:?} ({:.3} ms/query, {total_found} total matches per run)",
        elapsed.as_secs_f64() * 1000.0 / iterations as f64
    );

    Ok(())
}
