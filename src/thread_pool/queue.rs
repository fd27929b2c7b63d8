use std::sync::{Mutex, MutexGuard};

use crossbeam::channel::{self, Receiver, Sender};

use super::task::Task;
use crate::error::bookkeeping_fault;
use crate::{PoolError, Result};

/// FIFO queue of pending tasks shared by producers and workers.
///
/// The queue is a crossbeam channel whose only long-lived sender sits
/// behind a mutex. Closing takes that sender away; a `push` that cloned
/// it before the close still lands, and `pop` only reports the end of
/// work once every sender clone is gone and the channel is empty.
#[derive(Debug)]
pub struct TaskQueue {
    tx: Mutex<Option<Sender<Task>>>,
    rx: Receiver<Task>,
}

impl TaskQueue {
    /// Creates a queue with no capacity limit.
    pub fn unbounded() -> Self {
        let (tx, rx) = channel::unbounded();
        Self::from_channel(tx, rx)
    }

    /// Creates a queue holding at most `capacity` tasks; `push` blocks while full.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Self::from_channel(tx, rx)
    }

    fn from_channel(tx: Sender<Task>, rx: Receiver<Task>) -> Self {
        TaskQueue {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<Sender<Task>>> {
        self.tx
            .lock()
            .unwrap_or_else(|_| bookkeeping_fault("task queue lock poisoned"))
    }

    /// Appends a task.
    ///
    /// # Errors
    ///
    /// Returns `PoolClosed` once [`close`](TaskQueue::close) has been called.
    /// The rejected task is dropped, which cancels its handle.
    pub fn push(&self, task: Task) -> Result<()> {
        // Clone under the lock, send outside it so a full bounded queue
        // never blocks `close`.
        let tx = match self.sender().as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(PoolError::PoolClosed),
        };
        if tx.send(task).is_err() {
            bookkeeping_fault("task queue lost its receiver");
        }
        Ok(())
    }

    /// Takes the next task, blocking while the queue is open and empty.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub fn pop(&self) -> Option<Task> {
        self.rx.recv().ok()
    }

    /// Stops accepting tasks. Returns `true` if this call closed the queue.
    pub fn close(&self) -> bool {
        self.sender().take().is_some()
    }

    /// Returns `true` once the queue refuses new tasks.
    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    /// Removes and drops every task not yet taken by a worker.
    ///
    /// Each dropped task resolves its handle to `TaskCancelled`. Returns
    /// the number of tasks removed.
    pub fn cancel_pending(&self) -> usize {
        self.rx.try_iter().count()
    }

    /// Number of tasks waiting in the queue.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true` if no task is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// The capacity limit, or `None` for an unbounded queue.
    pub fn capacity(&self) -> Option<usize> {
        self.rx.capacity()
    }
}
