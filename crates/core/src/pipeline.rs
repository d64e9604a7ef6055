//! Extraction pipeline
//!
//! Pages are processed in micro-batches: every page of a batch is rasterized,
//! the detector is called once for the whole batch, and each page's boxes are
//! then ordered, mapped into document space, filled with text from the page
//! text index, numbered, and emitted before the next page is looked at.

use crate::config::{ExtractionSettings, ZoneTypeRegistry};
use crate::detector::{DetectedBox, Detection, DetectorHandle, PageImage};
use crate::geometry::{to_document_space, ImageSize, PageDimensions};
use crate::text_index::PageTextIndex;
use crate::zone::{DetectionMeta, Zone, ZoneKind};
use image::DynamicImage;
use serde::Serialize;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zonemark_engine::{DocumentHandle, LopdfEngine, OpenSource, PdfEngine, RenderRequest};
use zonemark_scheduler::{CancellationToken, Cancelled, JobContext, JobId, Task};

/// Boxes without an explicit position sort after every positioned box.
const UNPOSITIONED: u64 = 1_000_000_000;

/// Creates a fresh engine for each job, on the worker thread that runs it
pub type EngineFactory = Arc<dyn Fn() -> Box<dyn PdfEngine> + Send + Sync>;

pub fn lopdf_engines() -> EngineFactory {
    Arc::new(|| Box::new(LopdfEngine::new()) as Box<dyn PdfEngine>)
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to open {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },
    #[error("page range {start}..{end} is outside the document ({page_count} pages)")]
    InvalidPageRange { start: u32, end: u32, page_count: u32 },
    #[error("all {count} pages failed; first error: {first}")]
    AllPagesFailed { count: usize, first: String },
}

/// One extraction request
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub path: PathBuf,
    /// Added to every emitted page number
    pub page_offset: u32,
    /// Pages of the file to process; all pages when `None`
    pub pages: Option<Range<u32>>,
    pub settings: ExtractionSettings,
}

impl ExtractionJob {
    pub fn new(path: impl Into<PathBuf>, settings: ExtractionSettings) -> Self {
        Self { path: path.into(), page_offset: 0, pages: None, settings }
    }

    pub fn with_pages(mut self, pages: Range<u32>) -> Self {
        self.pages = Some(pages);
        self
    }

    pub fn with_page_offset(mut self, page_offset: u32) -> Self {
        self.page_offset = page_offset;
        self
    }

    /// Split a document into jobs of `settings.pages_per_job` pages each
    ///
    /// A value of 0 yields a single job covering the whole document.
    pub fn split(path: impl Into<PathBuf>, page_count: u32, settings: &ExtractionSettings) -> Vec<Self> {
        let path = path.into();
        let step = settings.pages_per_job;
        if step == 0 || step >= page_count {
            return vec![Self::new(path, settings.clone())];
        }

        (0..page_count)
            .step_by(step as usize)
            .map(|start| {
                Self::new(path.clone(), settings.clone())
                    .with_pages(start..(start + step).min(page_count))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedPage {
    pub page: u32,
    pub reason: String,
}

/// Summary handed to the completion callback
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionReport {
    /// Pages emitted, in emission order
    pub pages: Vec<u32>,
    pub skipped: Vec<SkippedPage>,
    pub zones: usize,
    pub detector_calls: usize,
    pub cancelled: bool,
}

impl ExtractionReport {
    fn skip(&mut self, page: u32, reason: impl ToString) {
        let reason = reason.to_string();
        warn!(page, %reason, "skipping page");
        self.skipped.push(SkippedPage { page, reason });
    }
}

/// Prepared input for one page of a micro-batch
struct RasterizedPage {
    local: u32,
    page: u32,
    dimensions: PageDimensions,
    image_size: ImageSize,
}

pub struct ExtractionPipeline {
    engines: EngineFactory,
    detector: DetectorHandle,
    zone_types: Arc<ZoneTypeRegistry>,
}

impl ExtractionPipeline {
    pub fn new(
        engines: EngineFactory,
        detector: DetectorHandle,
        zone_types: Arc<ZoneTypeRegistry>,
    ) -> Self {
        Self { engines, detector, zone_types }
    }

    pub fn detector(&self) -> &DetectorHandle {
        &self.detector
    }

    /// Run `job`, calling `on_page` once per finished page in increasing order
    ///
    /// Pages that fail to rasterize, detect or extract are skipped and listed
    /// in the report. Cancellation stops emission and returns the partial
    /// report with `cancelled` set.
    pub fn run(
        &self,
        job: &ExtractionJob,
        token: &CancellationToken,
        on_page: &mut dyn FnMut(u32, Vec<Zone>),
    ) -> Result<ExtractionReport, PipelineError> {
        let mut engine = (self.engines)();
        let handle = engine
            .open(OpenSource::from(job.path.as_path()))
            .map_err(|err| PipelineError::Open { path: job.path.clone(), reason: err.to_string() })?;

        let result = self.run_document(engine.as_ref(), handle, job, token, on_page);

        if let Err(err) = engine.close(handle) {
            debug!(error = %err, "failed to close document");
        }
        result
    }

    fn run_document(
        &self,
        engine: &dyn PdfEngine,
        handle: DocumentHandle,
        job: &ExtractionJob,
        token: &CancellationToken,
        on_page: &mut dyn FnMut(u32, Vec<Zone>),
    ) -> Result<ExtractionReport, PipelineError> {
        let page_count = engine
            .page_count(handle)
            .map_err(|err| PipelineError::Open { path: job.path.clone(), reason: err.to_string() })?;

        let range = job.pages.clone().unwrap_or(0..page_count);
        if range.start > range.end || range.end > page_count {
            return Err(PipelineError::InvalidPageRange {
                start: range.start,
                end: range.end,
                page_count,
            });
        }

        let settings = &job.settings;
        let local_pages: Vec<u32> = range.collect();
        let mut report = ExtractionReport::default();

        info!(
            path = %job.path.display(),
            pages = local_pages.len(),
            batch_size = settings.batch_size,
            dpi = settings.dpi,
            "extraction started"
        );

        if let Err(Cancelled) =
            self.extract_pages(engine, handle, job, &local_pages, token, on_page, &mut report)
        {
            report.cancelled = true;
        }

        if !report.cancelled && report.pages.is_empty() && !report.skipped.is_empty() {
            return Err(PipelineError::AllPagesFailed {
                count: report.skipped.len(),
                first: report.skipped[0].reason.clone(),
            });
        }

        info!(
            pages = report.pages.len(),
            skipped = report.skipped.len(),
            zones = report.zones,
            cancelled = report.cancelled,
            "extraction finished"
        );
        Ok(report)
    }

    /// Runs the micro-batches over `pages`, stopping at the first
    /// cancellation check that fails.
    #[allow(clippy::too_many_arguments)]
    fn extract_pages(
        &self,
        engine: &dyn PdfEngine,
        handle: DocumentHandle,
        job: &ExtractionJob,
        pages: &[u32],
        token: &CancellationToken,
        on_page: &mut dyn FnMut(u32, Vec<Zone>),
        report: &mut ExtractionReport,
    ) -> Result<(), Cancelled> {
        let settings = &job.settings;
        for batch in pages.chunks(settings.batch_size.max(1)) {
            token.check()?;

            let mut images = Vec::with_capacity(batch.len());
            let mut prepared = Vec::with_capacity(batch.len());
            for &local in batch {
                let page = job.page_offset + local;
                match rasterize(engine, handle, local, settings.dpi) {
                    Ok((image, dimensions)) => {
                        let image_size = ImageSize { width: image.width(), height: image.height() };
                        images.push(PageImage { page, image });
                        prepared.push(RasterizedPage { local, page, dimensions, image_size });
                    }
                    Err(err) => report.skip(page, format!("rasterization failed: {err}")),
                }
            }

            if images.is_empty() {
                continue;
            }

            let detections = match self.detector.detect(&images) {
                Ok(detections) => detections,
                Err(err) => {
                    for page in &prepared {
                        report.skip(page.page, format!("detection failed: {err}"));
                    }
                    continue;
                }
            };
            report.detector_calls += 1;
            drop(images);

            for (page, detection) in prepared.into_iter().zip(detections) {
                token.check()?;

                let zones = match self.build_zones(engine, handle, &page, detection, settings) {
                    Ok(zones) => zones,
                    Err(err) => {
                        report.skip(page.page, format!("text extraction failed: {err}"));
                        continue;
                    }
                };

                token.check()?;

                debug!(page = page.page, zones = zones.len(), "page extracted");
                report.pages.push(page.page);
                report.zones += zones.len();
                on_page(page.page, zones);
            }
        }
        Ok(())
    }

    fn build_zones(
        &self,
        engine: &dyn PdfEngine,
        handle: DocumentHandle,
        page: &RasterizedPage,
        detection: Detection,
        settings: &ExtractionSettings,
    ) -> Result<Vec<Zone>, zonemark_engine::PdfEngineError> {
        let index = PageTextIndex::build(engine, handle, page.local)?;
        let boxes = reading_order(detection.boxes);

        Ok(boxes
            .into_iter()
            .zip(1u32..)
            .map(|(detected, sequence)| {
                let rect = to_document_space(detected.rect, page.image_size, page.dimensions);
                let kind = ZoneKind::parse(&detected.label);
                let color = self.zone_types.color_for(&kind).to_owned();

                let mut zone = Zone::new(page.page, sequence, rect, kind).with_color(color);
                zone.detection = Some(DetectionMeta {
                    confidence: detected.confidence,
                    position: detected.position,
                });
                zone.label = Some(detected.label);
                zone.apply_region_text(index.query(&rect, settings.overlap_iou_threshold));
                zone
            })
            .collect())
    }
}

fn rasterize(
    engine: &dyn PdfEngine,
    handle: DocumentHandle,
    local: u32,
    dpi: u32,
) -> Result<(image::RgbImage, PageDimensions), zonemark_engine::PdfEngineError> {
    let dimensions = PageDimensions::from(engine.page_size(handle, local)?);
    let rendered = engine.render_page(handle, RenderRequest::at_dpi(local, dpi))?;
    Ok((DynamicImage::ImageRgba8(rendered).to_rgb8(), dimensions))
}

/// Order by explicit position, then by top edge
pub fn reading_order(mut boxes: Vec<DetectedBox>) -> Vec<DetectedBox> {
    boxes.sort_by(|a, b| {
        let key_a = a.position.map_or(UNPOSITIONED, u64::from);
        let key_b = b.position.map_or(UNPOSITIONED, u64::from);
        key_a.cmp(&key_b).then(a.rect.y.total_cmp(&b.rect.y))
    });
    boxes
}

/// Receives each finished page of a job
pub type PageSink = Box<dyn FnMut(JobId, u32, Vec<Zone>) + Send>;

/// A pipeline run scheduled on the job manager
pub struct ExtractionTask {
    pipeline: Arc<ExtractionPipeline>,
    job: ExtractionJob,
    sink: PageSink,
}

impl ExtractionTask {
    pub fn new(pipeline: Arc<ExtractionPipeline>, job: ExtractionJob, sink: PageSink) -> Self {
        Self { pipeline, job, sink }
    }
}

impl Task for ExtractionTask {
    type Output = ExtractionReport;
    type Error = PipelineError;

    fn run(self, ctx: &JobContext) -> Result<ExtractionReport, PipelineError> {
        let ExtractionTask { pipeline, job, mut sink } = self;
        let job_id = ctx.id;
        pipeline.run(&job, &ctx.token, &mut |page, zones| sink(job_id, page, zones))
    }
}
