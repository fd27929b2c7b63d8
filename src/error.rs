use std::io;

use log::error;
use thiserror::Error;

/// Error type for thread pool operations.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool was configured with unusable parameters.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Work was submitted after shutdown began.
    #[error("thread pool is closed")]
    PoolClosed,

    /// The task's callable failed; the payload describes the original failure.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// The task was discarded before it ever ran.
    #[error("task was cancelled before it ran")]
    TaskCancelled,

    /// A worker thread could not be spawned.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for thread pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Terminates the process after the pool's own shared state is found corrupted.
///
/// Task failures never come here; they are delivered through their handles.
pub(crate) fn bookkeeping_fault(what: &str) -> ! {
    error!("thread pool bookkeeping fault: {}", what);
    std::process::abort()
}
