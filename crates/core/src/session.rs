//! Document session
//!
//! [`ZoneSession`] owns the zone store and is driven from a single thread.
//! Extraction runs on the job manager's workers, which never touch the store:
//! they post [`SessionEvent`]s to a channel that [`ZoneSession::pump`] drains
//! and applies on the owning thread.

use crate::config::{ConfigError, ZonemarkConfig};
use crate::detector::DetectorHandle;
use crate::persistence::{self, PersistenceError};
use crate::pipeline::{
    EngineFactory, ExtractionJob, ExtractionPipeline, ExtractionReport, ExtractionTask, PageSink,
};
use crate::store::{BatchOutcome, StoreError, ZoneStore};
use crate::text_index::DocumentTextIndex;
use crate::zone::Zone;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use zonemark_engine::{OpenSource, PdfEngineError};
use zonemark_scheduler::{
    ConcurrencyPolicy, JobId, JobManager, JobOutcome, ManagerConfig, ManagerStats, TaskOutcome,
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: PdfEngineError,
    },
    #[error("no document is open")]
    NoDocument,
    #[error("extraction jobs still running after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Posted by extraction workers
pub enum SessionEvent {
    PageExtracted { job_id: JobId, page: u32, zones: Vec<Zone> },
    JobFinished { job_id: JobId, outcome: TaskOutcome<ExtractionTask> },
}

/// What [`ZoneSession::pump`] did with the events it drained
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    PageApplied { job_id: JobId, page: u32, zones: usize },
    /// The page already had interactive edits, so the batch was dropped
    PageKeptUserEdits { job_id: JobId, page: u32 },
    PageRejected { job_id: JobId, page: u32, error: StoreError },
    /// The batch came from a job that is no longer current
    StaleBatchDiscarded { job_id: JobId, page: u32 },
    JobCompleted { job_id: JobId, report: ExtractionReport },
    JobCancelled { job_id: JobId },
    JobFailed { job_id: JobId, message: String },
}

/// Where the zones of a freshly opened document come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutSource {
    SavedLayout { zones: usize },
    Extraction { jobs: Vec<JobId> },
}

#[derive(Debug, Clone)]
struct OpenDocument {
    path: PathBuf,
    page_count: u32,
}

pub struct ZoneSession {
    config: ZonemarkConfig,
    store: ZoneStore,
    engines: EngineFactory,
    pipeline: Arc<ExtractionPipeline>,
    manager: JobManager<ExtractionTask>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    live_jobs: BTreeSet<JobId>,
    document: Option<OpenDocument>,
}

impl ZoneSession {
    pub fn new(
        config: ZonemarkConfig,
        detector: DetectorHandle,
        engines: EngineFactory,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let zone_types = Arc::new(config.registry());
        let store = ZoneStore::new(zone_types.clone(), config.reading_order);
        let pipeline = Arc::new(ExtractionPipeline::new(engines.clone(), detector, zone_types));
        let manager = JobManager::new(
            ManagerConfig::new(config.extraction.max_concurrent_jobs)
                .with_policy(config.extraction.concurrency_policy),
        );
        let (events_tx, events_rx) = mpsc::channel();

        Ok(Self {
            config,
            store,
            engines,
            pipeline,
            manager,
            events_tx,
            events_rx,
            live_jobs: BTreeSet::new(),
            document: None,
        })
    }

    pub fn config(&self) -> &ZonemarkConfig {
        &self.config
    }

    pub fn store(&self) -> &ZoneStore {
        &self.store
    }

    /// Interactive edits go straight to the store
    pub fn store_mut(&mut self) -> &mut ZoneStore {
        &mut self.store
    }

    pub fn document_path(&self) -> Option<&Path> {
        self.document.as_ref().map(|doc| doc.path.as_path())
    }

    pub fn page_count(&self) -> Option<u32> {
        self.document.as_ref().map(|doc| doc.page_count)
    }

    /// Jobs whose results are still accepted
    pub fn live_jobs(&self) -> impl Iterator<Item = JobId> + '_ {
        self.live_jobs.iter().copied()
    }

    pub fn job_stats(&self) -> ManagerStats {
        self.manager.stats()
    }

    /// Open `path`, loading its saved layout or starting extraction
    pub fn open_document(&mut self, path: impl Into<PathBuf>) -> Result<LayoutSource, SessionError> {
        let path = path.into();
        self.attach(&path)?;

        let saved = match persistence::load_layout_for(&path) {
            Ok(saved) => saved,
            Err(err) => {
                self.close_document();
                return Err(err.into());
            }
        };

        match saved {
            Some(zones) => {
                let count = zones.len();
                if let Err(err) = self.store.load(zones) {
                    self.close_document();
                    return Err(err.into());
                }
                info!(zones = count, "saved layout loaded");
                Ok(LayoutSource::SavedLayout { zones: count })
            }
            None => Ok(LayoutSource::Extraction { jobs: self.extract_document()? }),
        }
    }

    /// Open `path` and extract it, ignoring any saved layout
    pub fn open_for_extraction(&mut self, path: impl Into<PathBuf>) -> Result<Vec<JobId>, SessionError> {
        self.attach(&path.into())?;
        self.extract_document()
    }

    fn attach(&mut self, path: &Path) -> Result<(), SessionError> {
        self.close_document();

        let mut engine = (self.engines)();
        let handle = engine
            .open(OpenSource::from(path))
            .map_err(|source| SessionError::Open { path: path.to_owned(), source })?;
        let page_count = engine
            .page_count(handle)
            .map_err(|source| SessionError::Open { path: path.to_owned(), source })?;

        self.store.set_text_source(Box::new(DocumentTextIndex::new(
            engine,
            handle,
            self.config.extraction.overlap_iou_threshold,
        )));
        self.document = Some(OpenDocument { path: path.to_owned(), page_count });
        info!(path = %path.display(), page_count, "document opened");
        Ok(())
    }

    /// Submit extraction for the whole open document
    ///
    /// The document is split into jobs of `pages_per_job` pages. Only the
    /// first job is submitted with the configured policy so the others do not
    /// displace their siblings.
    pub fn extract_document(&mut self) -> Result<Vec<JobId>, SessionError> {
        let document = self.document.clone().ok_or(SessionError::NoDocument)?;
        let settings = &self.config.extraction;
        let policy = settings.concurrency_policy;

        if policy.cancels_running() {
            // replaced jobs may still post pages; drop them from here on
            self.live_jobs.clear();
        }

        let jobs = ExtractionJob::split(&document.path, document.page_count, settings);
        let mut ids = Vec::with_capacity(jobs.len());
        for (index, job) in jobs.into_iter().enumerate() {
            let policy = if index == 0 { policy } else { ConcurrencyPolicy::Queue };
            ids.push(self.submit(job, policy));
        }

        info!(jobs = ids.len(), %policy, "extraction submitted");
        Ok(ids)
    }

    fn submit(&mut self, job: ExtractionJob, policy: ConcurrencyPolicy) -> JobId {
        let pages_tx = self.events_tx.clone();
        let sink: PageSink = Box::new(move |job_id, page, zones| {
            // receiver gone means the session was dropped
            let _ = pages_tx.send(SessionEvent::PageExtracted { job_id, page, zones });
        });

        let finish_tx = self.events_tx.clone();
        let task = ExtractionTask::new(self.pipeline.clone(), job, sink);
        let id = self.manager.submit_with_policy(task, policy, move |job_id, outcome| {
            let _ = finish_tx.send(SessionEvent::JobFinished { job_id, outcome });
        });

        self.live_jobs.insert(id);
        id
    }

    /// Apply every pending event to the store
    pub fn pump(&mut self) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            notices.push(self.apply(event));
        }
        notices
    }

    fn apply(&mut self, event: SessionEvent) -> SessionNotice {
        match event {
            SessionEvent::PageExtracted { job_id, page, zones } => {
                if !self.live_jobs.contains(&job_id) {
                    warn!(job_id, page, "discarding page from stale job");
                    return SessionNotice::StaleBatchDiscarded { job_id, page };
                }
                match self.store.insert_page_batch(page, zones) {
                    Ok(BatchOutcome::Applied(zones)) => {
                        debug!(job_id, page, zones, "page applied");
                        SessionNotice::PageApplied { job_id, page, zones }
                    }
                    Ok(BatchOutcome::KeptUserEdits) => {
                        info!(job_id, page, "kept user edits over extracted page");
                        SessionNotice::PageKeptUserEdits { job_id, page }
                    }
                    Err(error) => {
                        warn!(job_id, page, %error, "page batch rejected");
                        SessionNotice::PageRejected { job_id, page, error }
                    }
                }
            }
            SessionEvent::JobFinished { job_id, outcome } => {
                self.live_jobs.remove(&job_id);
                match outcome {
                    JobOutcome::Completed(report) => SessionNotice::JobCompleted { job_id, report },
                    JobOutcome::Cancelled => SessionNotice::JobCancelled { job_id },
                    JobOutcome::Failed(err) => {
                        error!(job_id, error = %err, "extraction failed");
                        SessionNotice::JobFailed { job_id, message: err.to_string() }
                    }
                    JobOutcome::Panicked(message) => SessionNotice::JobFailed { job_id, message },
                }
            }
        }
    }

    /// Block until every job has finished, then pump
    pub fn wait_for_jobs(&mut self, timeout: Duration) -> Result<Vec<SessionNotice>, SessionError> {
        if !self.manager.wait_idle(timeout) {
            return Err(SessionError::Timeout(timeout));
        }
        Ok(self.pump())
    }

    pub fn cancel_job(&mut self, id: JobId) -> bool {
        self.live_jobs.remove(&id);
        self.manager.cancel(id)
    }

    /// Save the layout next to the open document
    pub fn save(&self) -> Result<PathBuf, SessionError> {
        let document = self.document.as_ref().ok_or(SessionError::NoDocument)?;
        let path = persistence::layout_path(&document.path);
        self.save_as(&path)?;
        Ok(path)
    }

    pub fn save_as(&self, path: &Path) -> Result<(), SessionError> {
        persistence::save_layout(path, self.store.zones())?;
        info!(path = %path.display(), zones = self.store.zone_count(), "layout saved");
        Ok(())
    }

    /// Cancel outstanding extraction and forget the document
    pub fn close_document(&mut self) {
        for id in std::mem::take(&mut self.live_jobs) {
            self.manager.cancel(id);
        }
        self.store.clear();
        self.store.clear_text_source();
        if let Some(document) = self.document.take() {
            info!(path = %document.path.display(), "document closed");
        }
    }
}
