//! Service core (C8): the worker loop that keeps the index current and the
//! IPC connection loop that answers queries against it.
//!
//! Global mutable state is avoided — everything a long-running service
//! needs is threaded through an explicit [`ServiceContext`] rather than
//! process-wide singletons.

pub mod ipc;
pub mod worker;

use crate::config::IndexConfig;
use crate::index::IndexStore;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared state handed to both the worker thread and the connection thread.
///
/// `index` uses a genuine shared-read `RwLock`: concurrent queries run
/// without serializing against each other, only against the worker's
/// writes.
#[derive(Clone)]
pub struct ServiceContext {
    pub config: IndexConfig,
    pub index: Arc<RwLock<IndexStore>>,
    pub database_initialized: Arc<AtomicBool>,
    pub shutdown: Arc<AtomicBool>,
}

impl ServiceContext {
    pub fn new(config: IndexConfig) -> ServiceContext {
        ServiceContext {
            config,
            index: Arc::new(RwLock::new(IndexStore::new())),
            database_initialized: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.database_initialized.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Runs the worker and connection loops on the calling thread and a spawned
/// thread respectively, blocking until shutdown is requested. This is the
/// entry point `server` mode (C10) drives.
pub fn run(ctx: ServiceContext) {
    let worker_ctx = ctx.clone();
    let worker_handle = std::thread::Builder::new()
        .name("quickfind-worker".to_owned())
        .spawn(move || worker::run_worker_loop(worker_ctx))
        .expect("failed to spawn worker thread");

    ipc::run_connection_loop(ctx);

    let _ = worker_handle.join();
}
