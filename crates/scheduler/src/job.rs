//! Job identity, the task contract, and terminal outcomes.

use crate::CancellationToken;
use std::fmt;

/// Unique job identifier, assigned in submission order starting at 1
pub type JobId = u64;

/// What a running task sees of its job
#[derive(Debug, Clone)]
pub struct JobContext {
    pub id: JobId,
    pub token: CancellationToken,
}

/// A unit of background work executed by a [`JobManager`](crate::JobManager) worker
///
/// Tasks must poll `ctx.token` between their blocking steps and return early
/// once it is cancelled. Whatever they return after that point is reported
/// as [`JobOutcome::Cancelled`].
pub trait Task: Send + 'static {
    type Output: Send + 'static;
    type Error: fmt::Display + Send + 'static;

    fn run(self, ctx: &JobContext) -> Result<Self::Output, Self::Error>;
}

/// Terminal state of a job, delivered exactly once to its completion callback
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<O, E> {
    Completed(O),
    Cancelled,
    Failed(E),
    /// The task panicked; the payload message if it was a string.
    Panicked(String),
}

impl<O, E> JobOutcome<O, E> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn completed(self) -> Option<O> {
        match self {
            Self::Completed(output) => Some(output),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
            Self::Panicked(_) => "panicked",
        }
    }
}

/// Outcome type for a given task
pub type TaskOutcome<T> = JobOutcome<<T as Task>::Output, <T as Task>::Error>;

/// Completion callback, owned by whichever code path finishes the job
pub type FinishCallback<T> = Box<dyn FnOnce(JobId, TaskOutcome<T>) + Send>;

/// Where a live job currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
}

/// A submitted job waiting for a worker
pub(crate) struct QueuedJob<T: Task> {
    pub(crate) id: JobId,
    pub(crate) task: T,
    pub(crate) token: CancellationToken,
    pub(crate) on_finish: FinishCallback<T>,
}

impl<T: Task> QueuedJob<T> {
    /// Consumes the job without running it.
    pub(crate) fn discard(self) {
        self.token.cancel();
        (self.on_finish)(self.id, JobOutcome::Cancelled);
    }
}
