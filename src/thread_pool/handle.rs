use crossbeam::channel::{Receiver, TryRecvError};

use super::task::TaskId;
use crate::{PoolError, Result};

/// Terminal result of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<R> {
    /// The callable returned normally.
    Succeeded(R),
    /// The callable failed; the string describes the failure.
    Failed(String),
    /// The task was dropped without ever running.
    Cancelled,
}

impl<R> Outcome<R> {
    /// Borrows the value, or converts the failure into a `PoolError`.
    pub fn as_result(&self) -> Result<&R> {
        match self {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Failed(cause) => Err(PoolError::TaskFailed(cause.clone())),
            Outcome::Cancelled => Err(PoolError::TaskCancelled),
        }
    }

    /// Consumes the outcome, converting the failure into a `PoolError`.
    pub fn into_result(self) -> Result<R> {
        match self {
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Failed(cause) => Err(PoolError::TaskFailed(cause)),
            Outcome::Cancelled => Err(PoolError::TaskCancelled),
        }
    }

    /// Returns `true` for `Succeeded`.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }
}

/// The caller's end of a task's one-shot result channel.
///
/// The first successful read caches the outcome inside the handle, so
/// later calls to [`get`](Handle::get) replay it without blocking.
#[derive(Debug)]
pub struct Handle<R> {
    id: TaskId,
    rx: Receiver<Outcome<R>>,
    outcome: Option<Outcome<R>>,
}

impl<R> Handle<R> {
    pub(crate) fn new(id: TaskId, rx: Receiver<Outcome<R>>) -> Self {
        Handle {
            id,
            rx,
            outcome: None,
        }
    }

    /// Identifier of the task this handle belongs to.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Blocks until the task has an outcome and returns it.
    pub fn wait(&mut self) -> &Outcome<R> {
        let rx = &self.rx;
        // A disconnected channel means the sending task was dropped unrun.
        self.outcome
            .get_or_insert_with(|| rx.recv().unwrap_or(Outcome::Cancelled))
    }

    /// Blocks until the task finishes and borrows its value.
    ///
    /// # Errors
    ///
    /// Returns `TaskFailed` if the callable failed or panicked, and
    /// `TaskCancelled` if the task was discarded before it ran.
    pub fn get(&mut self) -> Result<&R> {
        self.wait().as_result()
    }

    /// Returns the outcome if it is already available, without blocking.
    pub fn try_get(&mut self) -> Option<Result<&R>> {
        if self.outcome.is_none() {
            let outcome = match self.rx.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Disconnected) => Outcome::Cancelled,
                Err(TryRecvError::Empty) => return None,
            };
            self.outcome = Some(outcome);
        }
        self.outcome.as_ref().map(Outcome::as_result)
    }

    /// Returns `true` once the task has reached a terminal outcome.
    pub fn is_ready(&mut self) -> bool {
        self.try_get().is_some()
    }

    /// Blocks until the task finishes and takes ownership of its value.
    pub fn join(self) -> Result<R> {
        match self.outcome {
            Some(outcome) => outcome.into_result(),
            None => self.rx.recv().unwrap_or(Outcome::Cancelled).into_result(),
        }
    }
}
