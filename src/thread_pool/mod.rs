use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};

use log::{error, info, warn};

use crate::config::PoolConfig;
use crate::error::bookkeeping_fault;
use crate::Result;

mod handle;
mod queue;
mod task;
mod worker;

pub use self::handle::{Handle, Outcome};
pub use self::queue::TaskQueue;
pub use self::task::{make_fallible_task, make_task, Task, TaskId, TaskStatus};

use self::worker::Worker;

/// Lifecycle of a [`ThreadPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting submissions.
    Running,
    /// Submissions are refused; queued tasks are still being served.
    Draining,
    /// Every worker has exited and been joined.
    Stopped,
}

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub num_threads: usize,
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Tasks accepted by `submit`.
    pub submitted: usize,
    /// Tasks whose callable returned a value.
    pub succeeded: usize,
    /// Tasks whose callable failed or panicked.
    pub failed: usize,
    /// Tasks discarded by `shutdown_now` before running.
    pub cancelled: usize,
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) submitted: AtomicUsize,
    pub(crate) succeeded: AtomicUsize,
    pub(crate) failed: AtomicUsize,
    pub(crate) cancelled: AtomicUsize,
}

struct WorkerHandle {
    id: usize,
    thread: JoinHandle<()>,
}

struct Lifecycle {
    state: PoolState,
    workers: Vec<WorkerHandle>,
}

/// A fixed-size pool of worker threads fed by one shared FIFO queue.
///
/// The pool is `Sync`: any number of threads may submit through a shared
/// reference. Dropping it drains the queue and joins every worker.
///
/// The queue lock and the lifecycle lock are never held at the same time.
pub struct ThreadPool {
    queue: Arc<TaskQueue>,
    counters: Arc<PoolCounters>,
    lifecycle: Mutex<Lifecycle>,
    stopped: Condvar,
    worker_threads: Vec<ThreadId>,
    num_threads: usize,
}

impl ThreadPool {
    /// Creates a pool with `threads` workers and default settings otherwise.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `threads` is 0, before any thread is spawned.
    pub fn new(threads: usize) -> Result<Self> {
        Self::with_config(PoolConfig::builder().num_threads(threads).build()?)
    }

    /// Creates a pool from a full configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an invalid configuration and `Io` if a
    /// worker thread cannot be spawned. On spawn failure the workers
    /// already started are shut down before returning.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(match config.queue_capacity {
            Some(capacity) => TaskQueue::bounded(capacity),
            None => TaskQueue::unbounded(),
        });
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(config.num_threads);
        for id in 0..config.num_threads {
            let worker = Worker::new(id, queue.clone(), counters.clone());
            match worker.spawn(&config) {
                Ok(thread) => workers.push(WorkerHandle { id, thread }),
                Err(e) => {
                    error!("Failed to spawn worker {}: {}", id, e);
                    queue.close();
                    join_workers(workers);
                    return Err(e.into());
                }
            }
        }

        info!(
            "Thread pool started with {} workers ({})",
            config.num_threads,
            match config.queue_capacity {
                Some(capacity) => format!("queue capacity {capacity}"),
                None => "unbounded queue".to_string(),
            }
        );

        let worker_threads = workers.iter().map(|w| w.thread.thread().id()).collect();

        Ok(ThreadPool {
            queue,
            counters,
            lifecycle: Mutex::new(Lifecycle {
                state: PoolState::Running,
                workers,
            }),
            stopped: Condvar::new(),
            worker_threads,
            num_threads: config.num_threads,
        })
    }

    /// Queues `f` for execution and returns the handle to its result.
    ///
    /// With a bounded queue this blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `PoolClosed` once shutdown has begun; nothing is queued.
    pub fn submit<F, R>(&self, f: F) -> Result<Handle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, handle) = make_task(f);
        self.enqueue(task)?;
        Ok(handle)
    }

    /// Like [`submit`](ThreadPool::submit), for callables that return a `Result`.
    ///
    /// An `Err(e)` from `f` resolves the handle to `TaskFailed(e.to_string())`.
    pub fn submit_fallible<F, R, E>(&self, f: F) -> Result<Handle<R>>
    where
        F: FnOnce() -> std::result::Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: fmt::Display + 'static,
    {
        let (task, handle) = make_fallible_task(f);
        self.enqueue(task)?;
        Ok(handle)
    }

    /// Queues a task built elsewhere with [`make_task`].
    pub fn submit_task(&self, task: Task) -> Result<()> {
        self.enqueue(task)
    }

    fn enqueue(&self, task: Task) -> Result<()> {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.queue.push(task) {
            self.counters.submitted.fetch_sub(1, Ordering::Relaxed);
            return Err(e);
        }
        Ok(())
    }

    /// Stops accepting work without waiting.
    ///
    /// Queued tasks keep running; workers are joined by a later
    /// [`shutdown`](ThreadPool::shutdown) or when the pool is dropped.
    pub fn close(&self) {
        if self.queue.close() {
            info!(
                "Thread pool draining, {} task(s) still queued",
                self.queue.len()
            );
        }
        let mut lifecycle = self.lifecycle();
        if lifecycle.state == PoolState::Running {
            lifecycle.state = PoolState::Draining;
        }
    }

    /// Stops accepting work, lets every queued task finish, and joins all workers.
    ///
    /// Calling it again is a no-op. A call racing with another thread's
    /// shutdown waits until that thread has joined every worker, except
    /// when made from inside one of the pool's own tasks.
    pub fn shutdown(&self) {
        self.close();
        self.join();
    }

    /// Stops accepting work, cancels every task queued at the time of the
    /// call, and joins all workers. Tasks already running are allowed to
    /// finish.
    ///
    /// With a bounded queue, a `submit` that was blocked on a full queue
    /// before the call may still deliver its task afterwards; such a task
    /// runs rather than being cancelled.
    ///
    /// Returns the number of cancelled tasks.
    pub fn shutdown_now(&self) -> usize {
        self.close();
        let cancelled = self.queue.cancel_pending();
        if cancelled > 0 {
            self.counters
                .cancelled
                .fetch_add(cancelled, Ordering::Relaxed);
            info!("Cancelled {} queued task(s)", cancelled);
        }
        self.join();
        cancelled
    }

    fn join(&self) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.state == PoolState::Stopped {
            return;
        }
        if lifecycle.workers.is_empty() {
            // Another caller owns the join. A task waiting here would wait
            // for its own worker to exit.
            if !self.on_worker_thread() {
                let _stopped = self
                    .stopped
                    .wait_while(lifecycle, |lc| lc.state != PoolState::Stopped)
                    .unwrap_or_else(|_| bookkeeping_fault("pool lifecycle lock poisoned"));
            }
            return;
        }

        // Workers are joined outside the lock so running tasks can still
        // query the pool.
        let workers = std::mem::take(&mut lifecycle.workers);
        drop(lifecycle);
        join_workers(workers);

        self.lifecycle().state = PoolState::Stopped;
        self.stopped.notify_all();
        info!("Thread pool stopped");
    }

    fn on_worker_thread(&self) -> bool {
        self.worker_threads.contains(&thread::current().id())
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|_| bookkeeping_fault("pool lifecycle lock poisoned"))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        self.lifecycle().state
    }

    /// Number of worker threads, fixed at construction.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Returns a snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            num_threads: self.num_threads,
            queued: self.queue.len(),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }
}

fn join_workers(workers: Vec<WorkerHandle>) {
    let current = thread::current().id();
    for worker in workers {
        // A task that drops the last reference to its own pool runs on a
        // worker; that worker exits by itself once the queue drains.
        if worker.thread.thread().id() == current {
            warn!("Worker {} cannot join itself; leaving it to exit", worker.id);
            continue;
        }
        if worker.thread.join().is_err() {
            bookkeeping_fault(&format!("worker {} terminated abnormally", worker.id));
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.num_threads)
            .field("state", &self.state())
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
