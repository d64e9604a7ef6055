//! Zonemark Core Library
//!
//! Zone extraction and reconciliation: detections are mapped from page images
//! into document space, filled with text from the PDF text layer, numbered in
//! reading order, and merged into a per-document zone store that interactive
//! edits share.

pub mod config;
pub mod detector;
pub mod geometry;
pub mod persistence;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod text_index;
pub mod zone;

pub use config::{
    ConfigError, ExtractionSettings, ReadingOrderSettings, ZoneTypeEntry, ZoneTypeRegistry,
    ZonemarkConfig,
};
pub use detector::{
    CommandDetector, DetectedBox, Detection, DetectorError, DetectorHandle, LayoutDetector,
    PageImage, ReplayDetector,
};
pub use geometry::{ImageSize, PageDimensions, Rect, ScreenTransform};
pub use persistence::{PersistenceError, PersistenceResult};
pub use pipeline::{
    lopdf_engines, EngineFactory, ExtractionJob, ExtractionPipeline, ExtractionReport,
    ExtractionTask, PipelineError, SkippedPage,
};
pub use session::{LayoutSource, SessionError, SessionEvent, SessionNotice, ZoneSession};
pub use store::{BatchOutcome, StoreError, ZoneObserver, ZoneStore};
pub use text_index::{DocumentTextIndex, PageTextIndex, PageTextSource, RegionText};
pub use zone::{SizeClass, Zone, ZoneFeats, ZoneKind, ZoneLifecycle, ZoneOrigin, ZoneUid};
