//! Extraction worker threads.
//!
//! Each worker blocks on the manager's condition variable, pops the oldest
//! pending job, runs it outside the lock, and then delivers its outcome.

use crate::job::{JobContext, JobOutcome, QueuedJob, Task};
use crate::manager::Shared;
use crate::ConcurrencyPolicy;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Configuration for the job manager and its worker pool.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Number of worker threads, i.e. jobs allowed to run at once.
    /// Default: 1.
    pub max_concurrent_jobs: usize,

    /// Policy applied by [`JobManager::submit`](crate::JobManager::submit).
    /// Default: [`ConcurrencyPolicy::Queue`].
    pub policy: ConcurrencyPolicy,

    /// Maximum time an idle worker waits before re-checking for shutdown.
    /// Default: 100ms.
    pub poll_interval: Duration,

    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            policy: ConcurrencyPolicy::Queue,
            poll_interval: Duration::from_millis(100),
            thread_name: "zonemark-extract".to_owned(),
        }
    }
}

impl ManagerConfig {
    pub fn new(max_concurrent_jobs: usize) -> Self {
        Self { max_concurrent_jobs: max_concurrent_jobs.max(1), ..Self::default() }
    }

    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

pub(crate) fn spawn<T: Task>(
    index: usize,
    shared: Arc<Shared<T>>,
    config: &ManagerConfig,
) -> JoinHandle<()> {
    let poll_interval = config.poll_interval;
    thread::Builder::new()
        .name(format!("{}-{}", config.thread_name, index))
        .spawn(move || run(shared, poll_interval))
        .expect("Failed to spawn worker thread")
}

fn run<T: Task>(shared: Arc<Shared<T>>, poll_interval: Duration) {
    while let Some(job) = next_job(&shared, poll_interval) {
        execute(&shared, job);
    }
}

/// Blocks until a job is available; `None` once the manager shuts down.
fn next_job<T: Task>(shared: &Shared<T>, poll_interval: Duration) -> Option<QueuedJob<T>> {
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.shutdown {
            return None;
        }
        if let Some(job) = state.pending.pop_front() {
            state.running.insert(job.id, job.token.clone());
            return Some(job);
        }
        state = shared.work_ready.wait_timeout(state, poll_interval).unwrap().0;
    }
}

fn execute<T: Task>(shared: &Shared<T>, job: QueuedJob<T>) {
    let QueuedJob { id, task, token, on_finish } = job;
    let ctx = JobContext { id, token };
    let started = Instant::now();

    let outcome = if ctx.token.is_cancelled() {
        JobOutcome::Cancelled
    } else {
        debug!(job_id = id, "job started");
        match panic::catch_unwind(AssertUnwindSafe(|| task.run(&ctx))) {
            Ok(_) if ctx.token.is_cancelled() => JobOutcome::Cancelled,
            Ok(Ok(output)) => JobOutcome::Completed(output),
            Ok(Err(err)) => JobOutcome::Failed(err),
            Err(payload) => JobOutcome::Panicked(panic_message(payload.as_ref())),
        }
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        JobOutcome::Completed(_) => info!(job_id = id, elapsed_ms, "job completed"),
        JobOutcome::Cancelled => info!(job_id = id, elapsed_ms, "job cancelled"),
        JobOutcome::Failed(err) => warn!(job_id = id, elapsed_ms, error = %err, "job failed"),
        JobOutcome::Panicked(message) => error!(job_id = id, %message, "job panicked"),
    }

    shared.state.lock().unwrap().stats.record(&outcome);

    // a panicking callback must not take the worker down with the job still running
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| on_finish(id, outcome))) {
        error!(job_id = id, message = %panic_message(payload.as_ref()), "completion callback panicked");
    }

    let mut state = shared.state.lock().unwrap();
    state.running.remove(&id);
    if state.is_idle() {
        shared.idle.notify_all();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_owned()
    }
}
