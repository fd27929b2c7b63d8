#![deny(missing_docs)]

//! A fixed-size worker thread pool for CPU-bound simulation work.
//!
//! Callers submit independent closures and get back a [`Handle`] per
//! task. Workers pull tasks from one shared FIFO queue, run them, and
//! deliver either the value or the failure to the handle. Panics inside a
//! task never take a worker down.
//!
//! ```
//! use forcepool::ThreadPool;
//!
//! let pool = ThreadPool::new(4)?;
//! let handles: Vec<_> = (0..8u64)
//!     .map(|i| pool.submit(move || i * i))
//!     .collect::<forcepool::Result<_>>()?;
//! let sum: u64 = handles
//!     .into_iter()
//!     .map(|h| h.join())
//!     .sum::<forcepool::Result<u64>>()?;
//! assert_eq!(sum, 140);
//! pool.shutdown();
//! # Ok::<(), forcepool::PoolError>(())
//! ```

mod config;
mod error;
/// Pool controller, task queue, tasks and result handles.
pub mod thread_pool;

pub use config::{PoolConfig, PoolConfigBuilder, MAX_THREADS};
pub use error::{PoolError, Result};
pub use thread_pool::{
    make_fallible_task, make_task, Handle, Outcome, PoolState, PoolStats, Task, TaskId,
    TaskQueue, TaskStatus, ThreadPool,
};
