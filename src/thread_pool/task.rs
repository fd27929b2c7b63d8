use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::channel;

use super::handle::{Handle, Outcome};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier shared by a task and its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a task ended, as reported to whoever ran it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The outcome delivered to the handle is a value.
    Succeeded,
    /// The outcome delivered to the handle is a failure.
    Failed,
}

/// A single-invocation unit of work linked to a [`Handle`].
///
/// Dropping a task without calling [`run`](Task::run) resolves its
/// handle to `TaskCancelled`.
pub struct Task {
    id: TaskId,
    job: Box<dyn FnOnce() -> TaskStatus + Send + 'static>,
}

impl Task {
    /// Identifier of this task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Runs the callable and delivers its outcome to the handle.
    ///
    /// Panics raised by the callable are caught and delivered as failures.
    pub fn run(self) -> TaskStatus {
        (self.job)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id).finish()
    }
}

/// Wraps an infallible callable into a task and the handle for its result.
///
/// A panic inside `f` becomes `TaskFailed` carrying the panic message.
pub fn make_task<F, R>(f: F) -> (Task, Handle<R>)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    make_fallible_task(move || Ok::<R, Infallible>(f()))
}

/// Wraps a fallible callable into a task and the handle for its result.
///
/// `Err(e)` becomes `TaskFailed(e.to_string())`; panics are handled as in
/// [`make_task`].
pub fn make_fallible_task<F, R, E>(f: F) -> (Task, Handle<R>)
where
    F: FnOnce() -> std::result::Result<R, E> + Send + 'static,
    R: Send + 'static,
    E: fmt::Display + 'static,
{
    let id = TaskId::next();
    let (tx, rx) = channel::bounded(1);

    let job = move || {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            f().map_err(|e| e.to_string())
        })) {
            Ok(Ok(value)) => Outcome::Succeeded(value),
            Ok(Err(cause)) => Outcome::Failed(cause),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                contain(move || drop(payload));
                Outcome::Failed(message)
            }
        };
        let status = if outcome.is_success() {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Failed
        };
        // With the handle gone the outcome is dropped here, running user
        // destructors on the worker.
        contain(move || {
            let _ = tx.send(outcome);
        });
        status
    };

    let task = Task {
        id,
        job: Box::new(job),
    };
    (task, Handle::new(id, rx))
}

/// Runs `f`, swallowing any panic it raises. The nested payload is leaked
/// since dropping it could panic again.
fn contain<F: FnOnce()>(f: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        mem::forget(payload);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked with a non-string payload".to_string()
    }
}
