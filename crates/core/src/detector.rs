//! Layout detector adapters
//!
//! A detector takes a micro-batch of rasterized pages and returns, for each
//! image in order, the candidate regions it found. Models are expensive to
//! load and are not assumed to be thread-safe, so a detector is built once
//! and shared behind a [`DetectorHandle`] that serializes calls.

use crate::geometry::Rect;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid detection JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode page image: {0}")]
    Image(#[from] image::ImageError),
    #[error("detector command {program} exited with {status}: {stderr}")]
    Command { program: String, status: String, stderr: String },
    #[error("detector returned {actual} results for {expected} images")]
    ResultCount { expected: usize, actual: usize },
    #[error("detector is unavailable after a previous panic")]
    Poisoned,
    #[error("detector failed: {0}")]
    Model(String),
}

/// One rasterized page handed to the detector
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Absolute page index in the document
    pub page: u32,
    pub image: RgbImage,
}

/// A candidate region in image pixels
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedBox {
    pub rect: Rect,
    pub label: String,
    pub position: Option<u32>,
    pub confidence: Option<f64>,
}

/// Boxes found on one image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub boxes: Vec<DetectedBox>,
}

pub trait LayoutDetector: Send {
    fn name(&self) -> &str;

    /// One result per image, in input order
    fn detect(&mut self, images: &[PageImage]) -> Result<Vec<Detection>, DetectorError>;
}

/// Process-wide shared detector
#[derive(Clone)]
pub struct DetectorHandle {
    inner: Arc<Mutex<Box<dyn LayoutDetector>>>,
}

impl DetectorHandle {
    pub fn new<D: LayoutDetector + 'static>(detector: D) -> Self {
        Self { inner: Arc::new(Mutex::new(Box::new(detector))) }
    }

    pub fn name(&self) -> String {
        match self.inner.lock() {
            Ok(detector) => detector.name().to_owned(),
            Err(_) => "poisoned".to_owned(),
        }
    }

    /// Run one batched call, holding the detector for its whole duration
    pub fn detect(&self, images: &[PageImage]) -> Result<Vec<Detection>, DetectorError> {
        let mut detector = self.inner.lock().map_err(|_| DetectorError::Poisoned)?;
        let results = detector.detect(images)?;
        if results.len() != images.len() {
            return Err(DetectorError::ResultCount { expected: images.len(), actual: results.len() });
        }
        Ok(results)
    }
}

impl std::fmt::Debug for DetectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorHandle").field("name", &self.name()).finish()
    }
}

/// Box as exchanged with external models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBox {
    /// `[x1, y1, x2, y2]` in image pixels
    pub bbox: [f64; 4],
    pub label: String,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl From<WireBox> for DetectedBox {
    fn from(wire: WireBox) -> Self {
        let [x1, y1, x2, y2] = wire.bbox;
        Self {
            rect: Rect::from_corners(x1, y1, x2, y2),
            label: wire.label,
            position: wire.position,
            confidence: wire.confidence,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePage {
    pub page: u32,
    #[serde(default)]
    pub boxes: Vec<WireBox>,
}

/// Serves detections exported earlier by an external model
///
/// Pages absent from the export have no boxes.
#[derive(Debug, Clone, Default)]
pub struct ReplayDetector {
    pages: HashMap<u32, Vec<DetectedBox>>,
}

impl ReplayDetector {
    pub fn from_pages(pages: Vec<WirePage>) -> Self {
        let mut by_page: HashMap<u32, Vec<DetectedBox>> = HashMap::new();
        for page in pages {
            by_page
                .entry(page.page)
                .or_default()
                .extend(page.boxes.into_iter().map(DetectedBox::from));
        }
        Self { pages: by_page }
    }

    pub fn from_json(json: &str) -> Result<Self, DetectorError> {
        Ok(Self::from_pages(serde_json::from_str(json)?))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DetectorError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

impl LayoutDetector for ReplayDetector {
    fn name(&self) -> &str {
        "replay"
    }

    fn detect(&mut self, images: &[PageImage]) -> Result<Vec<Detection>, DetectorError> {
        Ok(images
            .iter()
            .map(|image| Detection { boxes: self.pages.get(&image.page).cloned().unwrap_or_default() })
            .collect())
    }
}

/// Runs an external model process per micro-batch
///
/// The batch is written as `page-<n>.png` files into a temporary directory
/// and their paths are appended to the command line. The process must print
/// a JSON array with one array of [`WireBox`] per image, in argument order.
#[derive(Debug, Clone)]
pub struct CommandDetector {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandDetector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl LayoutDetector for CommandDetector {
    fn name(&self) -> &str {
        "command"
    }

    fn detect(&mut self, images: &[PageImage]) -> Result<Vec<Detection>, DetectorError> {
        let workdir = tempfile::tempdir()?;
        let mut paths = Vec::with_capacity(images.len());
        for image in images {
            let path = workdir.path().join(format!("page-{}.png", image.page));
            image.image.save(&path)?;
            paths.push(path);
        }

        let output = Command::new(&self.program).args(&self.args).args(&paths).output()?;
        if !output.status.success() {
            return Err(DetectorError::Command {
                program: self.program.display().to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let pages: Vec<Vec<WireBox>> = serde_json::from_slice(&output.stdout)?;
        Ok(pages
            .into_iter()
            .map(|boxes| Detection { boxes: boxes.into_iter().map(DetectedBox::from).collect() })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(page: u32) -> PageImage {
        PageImage { page, image: RgbImage::new(4, 4) }
    }

    struct Miscounting;

    impl LayoutDetector for Miscounting {
        fn name(&self) -> &str {
            "miscounting"
        }

        fn detect(&mut self, _images: &[PageImage]) -> Result<Vec<Detection>, DetectorError> {
            Ok(vec![Detection::default()])
        }
    }

    #[test]
    fn replay_serves_boxes_by_page() {
        let detector = ReplayDetector::from_json(
            r#"[
                {"page": 1, "boxes": [
                    {"bbox": [10, 20, 110, 40], "label": "Title", "position": 0, "confidence": 0.9}
                ]}
            ]"#,
        )
        .unwrap();
        let handle = DetectorHandle::new(detector);

        let results = handle.detect(&[blank(0), blank(1)]).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].boxes.is_empty());
        assert_eq!(
            results[1].boxes,
            vec![DetectedBox {
                rect: Rect::new(10.0, 20.0, 100.0, 20.0),
                label: "Title".to_owned(),
                position: Some(0),
                confidence: Some(0.9),
            }]
        );
    }

    #[test]
    fn wire_boxes_accept_reversed_corners() {
        let wire: WireBox =
            serde_json::from_str(r#"{"bbox": [50, 60, 10, 20], "label": "Text"}"#).unwrap();
        let detected = DetectedBox::from(wire);
        assert_eq!(detected.rect, Rect::new(10.0, 20.0, 40.0, 40.0));
        assert_eq!(detected.position, None);
    }

    #[test]
    fn handle_rejects_result_count_mismatch() {
        let handle = DetectorHandle::new(Miscounting);
        let err = handle.detect(&[blank(0), blank(1)]).unwrap_err();
        assert!(matches!(err, DetectorError::ResultCount { expected: 2, actual: 1 }));
    }

    #[test]
    fn handle_reports_detector_name() {
        assert_eq!(DetectorHandle::new(ReplayDetector::default()).name(), "replay");
    }

    #[test]
    fn command_detector_reports_missing_program() {
        let mut detector = CommandDetector::new("/nonexistent/zonemark-model");
        assert!(matches!(detector.detect(&[blank(0)]), Err(DetectorError::Io(_))));
    }
}
