//! Tokio runtime owned by a connection manager
//!
//! The manager's operations block the calling thread. The async driver code
//! runs on this runtime's worker threads via `block_on`.

use mongoz_core::{MongozError, Result};
use tokio::runtime::Runtime;

const WORKER_THREADS: usize = 2;

/// Build the multi-threaded runtime a manager drives its work on.
pub(crate) fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(WORKER_THREADS)
        .enable_all()
        .thread_name("mongoz-runtime")
        .build()
        .map_err(|e| {
            tracing::error!(error = %e, "failed to create Tokio runtime");
            MongozError::Configuration(format!("Failed to create Tokio runtime: {}", e))
        })
}
