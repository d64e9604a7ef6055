//! Extraction job manager
//!
//! Owns a FIFO queue of pending jobs and a bounded pool of workers. The
//! concurrency policy is evaluated at submission time inside the same lock
//! that guards the queue, so "inspect, decide, enqueue" is atomic with
//! respect to workers and other submitters.

use crate::cancel::CancellationToken;
use crate::job::{JobId, JobOutcome, JobStatus, QueuedJob, Task, TaskOutcome};
use crate::worker::{self, ManagerConfig};
use crate::ConcurrencyPolicy;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Job manager statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Total jobs submitted
    pub jobs_submitted: u64,

    /// Jobs that ran to completion
    pub jobs_completed: u64,

    /// Jobs cancelled while pending or running
    pub jobs_cancelled: u64,

    /// Jobs whose task returned an error or panicked
    pub jobs_failed: u64,

    /// Jobs waiting for a worker
    pub pending: usize,

    /// Jobs currently owned by a worker
    pub running: usize,
}

impl ManagerStats {
    pub(crate) fn record<O, E>(&mut self, outcome: &JobOutcome<O, E>) {
        match outcome {
            JobOutcome::Completed(_) => self.jobs_completed += 1,
            JobOutcome::Cancelled => self.jobs_cancelled += 1,
            JobOutcome::Failed(_) | JobOutcome::Panicked(_) => self.jobs_failed += 1,
        }
    }

    /// Jobs submitted but not yet finished
    pub fn unfinished(&self) -> u64 {
        self.jobs_submitted - self.jobs_completed - self.jobs_cancelled - self.jobs_failed
    }
}

pub(crate) struct ManagerState<T: Task> {
    pub(crate) pending: VecDeque<QueuedJob<T>>,
    pub(crate) running: HashMap<JobId, CancellationToken>,
    pub(crate) next_id: JobId,
    pub(crate) stats: ManagerStats,
    pub(crate) shutdown: bool,
}

impl<T: Task> ManagerState<T> {
    pub(crate) fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }
}

pub(crate) struct Shared<T: Task> {
    pub(crate) state: Mutex<ManagerState<T>>,
    pub(crate) work_ready: Condvar,
    pub(crate) idle: Condvar,
}

/// Background job manager
///
/// Every submitted job reaches exactly one terminal [`JobOutcome`], and its
/// completion callback is invoked exactly once. The callback is owned by the
/// queued job itself, so whichever path removes the job from the queue
/// (a worker, `cancel`, a discarding policy, or shutdown) is the only one that
/// can call it. Callbacks always run outside the manager's lock.
///
/// # Example
///
/// ```
/// use zonemark_scheduler::{JobContext, JobManager, ManagerConfig, Task};
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// struct Double(u32);
///
/// impl Task for Double {
///     type Output = u32;
///     type Error = String;
///
///     fn run(self, _ctx: &JobContext) -> Result<u32, String> {
///         Ok(self.0 * 2)
///     }
/// }
///
/// let manager = JobManager::new(ManagerConfig::default());
/// let (tx, rx) = mpsc::channel();
///
/// manager.submit(Double(21), move |_id, outcome| {
///     tx.send(outcome.completed()).unwrap();
/// });
///
/// assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(42));
/// manager.shutdown();
/// ```
pub struct JobManager<T: Task> {
    shared: Arc<Shared<T>>,
    workers: Vec<JoinHandle<()>>,
    config: ManagerConfig,
}

impl<T: Task> JobManager<T> {
    /// Create a manager and start its workers
    pub fn new(config: ManagerConfig) -> Self {
        let config =
            ManagerConfig { max_concurrent_jobs: config.max_concurrent_jobs.max(1), ..config };
        let shared = Arc::new(Shared {
            state: Mutex::new(ManagerState {
                pending: VecDeque::new(),
                running: HashMap::new(),
                next_id: 1,
                stats: ManagerStats::default(),
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
        });

        let workers = (0..config.max_concurrent_jobs)
            .map(|index| worker::spawn(index, shared.clone(), &config))
            .collect();

        Self { shared, workers, config }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Submit a job under the configured policy
    pub fn submit<F>(&self, task: T, on_finish: F) -> JobId
    where
        F: FnOnce(JobId, TaskOutcome<T>) + Send + 'static,
    {
        self.submit_with_policy(task, self.config.policy, on_finish)
    }

    /// Submit a job, applying `policy` to the jobs already in flight
    ///
    /// Jobs discarded by the policy have their callbacks invoked with
    /// [`JobOutcome::Cancelled`] before this returns. Running jobs cancelled
    /// by [`ConcurrencyPolicy::Replace`] report through their worker once
    /// they observe the token.
    pub fn submit_with_policy<F>(&self, task: T, policy: ConcurrencyPolicy, on_finish: F) -> JobId
    where
        F: FnOnce(JobId, TaskOutcome<T>) + Send + 'static,
    {
        let token = CancellationToken::new();
        let mut rejected = None;

        let (id, discarded) = {
            let mut state = self.shared.state.lock().unwrap();
            let id = state.next_id;
            state.next_id += 1;
            state.stats.jobs_submitted += 1;

            let job = QueuedJob { id, task, token, on_finish: Box::new(on_finish) };

            if state.shutdown {
                state.stats.jobs_cancelled += 1;
                rejected = Some(job);
                (id, Vec::new())
            } else {
                if policy.cancels_running() {
                    for (running_id, running_token) in &state.running {
                        debug!(job_id = running_id, "cancelling running job");
                        running_token.cancel();
                    }
                }

                let discarded: Vec<QueuedJob<T>> = if policy.discards_pending() {
                    state.pending.drain(..).collect()
                } else {
                    Vec::new()
                };
                state.stats.jobs_cancelled += discarded.len() as u64;

                state.pending.push_back(job);
                self.shared.work_ready.notify_one();
                (id, discarded)
            }
        };

        info!(job_id = id, %policy, discarded = discarded.len(), "job submitted");

        for job in discarded {
            debug!(job_id = job.id, "discarding pending job");
            job.discard();
        }
        if let Some(job) = rejected {
            debug!(job_id = id, "manager is shut down, job rejected");
            job.discard();
        }

        id
    }

    /// Cancel a job by id
    ///
    /// A pending job is removed and its callback invoked with
    /// [`JobOutcome::Cancelled`] immediately; a running job has its token
    /// set and reports through its worker. Returns whether the job was found.
    pub fn cancel(&self, id: JobId) -> bool {
        let removed = {
            let mut state = self.shared.state.lock().unwrap();
            if let Some(token) = state.running.get(&id) {
                token.cancel();
                info!(job_id = id, "running job cancelled");
                return true;
            }

            let position = state.pending.iter().position(|job| job.id == id);
            let removed = position.and_then(|index| state.pending.remove(index));
            if removed.is_some() {
                state.stats.jobs_cancelled += 1;
                if state.is_idle() {
                    self.shared.idle.notify_all();
                }
            }
            removed
        };

        match removed {
            Some(job) => {
                info!(job_id = id, "pending job cancelled");
                job.discard();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending and running job, returning how many were found
    pub fn cancel_all(&self) -> usize {
        let (discarded, running) = {
            let mut state = self.shared.state.lock().unwrap();
            for token in state.running.values() {
                token.cancel();
            }
            let discarded: Vec<QueuedJob<T>> = state.pending.drain(..).collect();
            state.stats.jobs_cancelled += discarded.len() as u64;
            if state.is_idle() {
                self.shared.idle.notify_all();
            }
            (discarded, state.running.len())
        };

        let count = discarded.len() + running;
        if count > 0 {
            info!(jobs = count, "cancelling all jobs");
        }
        for job in discarded {
            job.discard();
        }
        count
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        let state = self.shared.state.lock().unwrap();
        if state.running.contains_key(&id) {
            Some(JobStatus::Running)
        } else if state.pending.iter().any(|job| job.id == id) {
            Some(JobStatus::Pending)
        } else {
            None
        }
    }

    pub fn stats(&self) -> ManagerStats {
        let state = self.shared.state.lock().unwrap();
        ManagerStats {
            pending: state.pending.len(),
            running: state.running.len(),
            ..state.stats.clone()
        }
    }

    /// Block until no job is pending or running, or `timeout` elapses
    ///
    /// Returns `true` if the manager became idle. Completion callbacks of
    /// finished jobs have all returned by then.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        while !state.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self.shared.idle.wait_timeout(state, deadline - now).unwrap().0;
        }
        true
    }

    /// Cancel outstanding work and join the workers
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        let discarded: Vec<QueuedJob<T>> = {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
            for token in state.running.values() {
                token.cancel();
            }
            let discarded: Vec<QueuedJob<T>> = state.pending.drain(..).collect();
            state.stats.jobs_cancelled += discarded.len() as u64;
            discarded
        };
        self.shared.work_ready.notify_all();

        for job in discarded {
            job.discard();
        }

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("extraction worker panicked during shutdown");
            }
        }
        self.shared.idle.notify_all();
    }
}

impl<T: Task> Drop for JobManager<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
