//! Zonemark Scheduler Library
//!
//! Background job manager for zone extraction.
//!
//! Jobs wait in a FIFO queue and are drained by a bounded pool of worker
//! threads (one by default). When a new job arrives while others are in
//! flight, a [`ConcurrencyPolicy`] decides whether it queues behind them,
//! replaces them, or drops the older pending ones. Cancellation is
//! cooperative through [`CancellationToken`], and every job's completion
//! callback fires exactly once with its [`JobOutcome`].
//!
//! # Example
//!
//! ```
//! use zonemark_scheduler::{
//!     ConcurrencyPolicy, JobContext, JobManager, JobOutcome, ManagerConfig, Task,
//! };
//! use std::time::Duration;
//!
//! struct Extract {
//!     pages: u32,
//! }
//!
//! impl Task for Extract {
//!     type Output = u32;
//!     type Error = String;
//!
//!     fn run(self, ctx: &JobContext) -> Result<u32, String> {
//!         let mut done = 0;
//!         for _ in 0..self.pages {
//!             if ctx.token.is_cancelled() {
//!                 break;
//!             }
//!             done += 1;
//!         }
//!         Ok(done)
//!     }
//! }
//!
//! let manager = JobManager::new(ManagerConfig::default().with_policy(ConcurrencyPolicy::DropOld));
//! let job_id = manager.submit(Extract { pages: 5 }, |id, outcome| {
//!     if let JobOutcome::Completed(pages) = outcome {
//!         println!("job {id} extracted {pages} pages");
//!     }
//! });
//!
//! assert!(manager.wait_idle(Duration::from_secs(5)));
//! assert!(!manager.cancel(job_id));
//! ```

mod cancel;
mod job;
mod manager;
mod policy;
mod worker;

// Re-export public API
pub use cancel::{Cancelled, CancellationToken};
pub use job::{FinishCallback, JobContext, JobId, JobOutcome, JobStatus, Task, TaskOutcome};
pub use manager::{JobManager, ManagerStats};
pub use policy::{ConcurrencyPolicy, UnknownPolicy};
pub use worker::ManagerConfig;
