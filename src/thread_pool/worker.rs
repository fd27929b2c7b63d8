use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use super::queue::TaskQueue;
use super::task::TaskStatus;
use super::PoolCounters;
use crate::config::PoolConfig;

/// A pool thread that runs dequeued tasks until the queue is closed and empty.
pub(crate) struct Worker {
    id: usize,
    queue: Arc<TaskQueue>,
    counters: Arc<PoolCounters>,
}

impl Worker {
    pub(crate) fn new(id: usize, queue: Arc<TaskQueue>, counters: Arc<PoolCounters>) -> Self {
        Worker {
            id,
            queue,
            counters,
        }
    }

    /// Starts the worker on its own named OS thread.
    pub(crate) fn spawn(self, config: &PoolConfig) -> io::Result<JoinHandle<()>> {
        let mut builder =
            thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, self.id));
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        builder.spawn(move || self.run())
    }

    fn run(self) {
        let id = self.id;
        debug!("Worker {id} started");

        // At most one task is held per iteration; the queue lock is never
        // held while it runs.
        while let Some(task) = self.queue.pop() {
            let task_id = task.id();
            debug!("Worker {id} executing task {task_id}");
            match task.run() {
                TaskStatus::Succeeded => {
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                }
                TaskStatus::Failed => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Worker {id}: task {task_id} failed");
                }
            }
        }

        debug!("Worker {id}: queue closed and drained, shutting down");
    }
}
