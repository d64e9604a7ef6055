//! Zone records
//!
//! A zone is one rectangular, classified region of a page. Geometry is held
//! as a [`Rect`] and the persisted `bbox` is derived from it on every
//! serialization, so the two can never disagree.

use crate::geometry::Rect;
use crate::text_index::RegionText;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Tolerance used when validating a persisted `bbox` against its geometry.
const BBOX_TOLERANCE: f64 = 1e-6;

/// `pz{page+1}-{sequence}`
pub fn block_id(page: u32, sequence: u32) -> String {
    format!("pz{}-{}", page + 1, sequence)
}

/// `z{page+1}-{sequence}`
pub fn span_id(page: u32, sequence: u32) -> String {
    format!("z{}-{}", page + 1, sequence)
}

/// Stable zone identity, never reused within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneUid(Uuid);

impl ZoneUid {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ZoneUid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ZoneUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Zone classification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ZoneKind {
    Paragraph,
    Title,
    SectionHeader,
    Table,
    Image,
    ListItem,
    Caption,
    Footnote,
    Formula,
    PageHeader,
    PageFooter,
    Other(String),
}

impl ZoneKind {
    pub const KNOWN: [ZoneKind; 11] = [
        ZoneKind::Paragraph,
        ZoneKind::Title,
        ZoneKind::SectionHeader,
        ZoneKind::Table,
        ZoneKind::Image,
        ZoneKind::ListItem,
        ZoneKind::Caption,
        ZoneKind::Footnote,
        ZoneKind::Formula,
        ZoneKind::PageHeader,
        ZoneKind::PageFooter,
    ];

    /// Normalize a detector label or user-entered type name
    ///
    /// Case, `_` and `-` are ignored, so `"List-item"` and `"list_item"` both
    /// become [`ZoneKind::ListItem`]. Unrecognized names are kept verbatim.
    pub fn parse(name: &str) -> Self {
        let normalized = name
            .trim()
            .to_lowercase()
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        match normalized.as_str() {
            "paragraph" | "text" | "plain text" => Self::Paragraph,
            "title" => Self::Title,
            "section header" | "heading" => Self::SectionHeader,
            "table" => Self::Table,
            "image" | "picture" | "figure" => Self::Image,
            "list item" | "list" => Self::ListItem,
            "caption" => Self::Caption,
            "footnote" => Self::Footnote,
            "formula" | "equation" => Self::Formula,
            "page header" => Self::PageHeader,
            "page footer" => Self::PageFooter,
            _ => Self::Other(name.trim().to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Title => "title",
            Self::SectionHeader => "section header",
            Self::Table => "table",
            Self::Image => "image",
            Self::ListItem => "list item",
            Self::Caption => "caption",
            Self::Footnote => "footnote",
            Self::Formula => "formula",
            Self::PageHeader => "page header",
            Self::PageFooter => "page footer",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ZoneKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for ZoneKind {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<ZoneKind> for String {
    fn from(kind: ZoneKind) -> Self {
        kind.as_str().to_owned()
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse font-size bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Large,
    Medium,
    Small,
    Tiny,
    #[default]
    Unknown,
}

impl SizeClass {
    pub fn from_font_size(size: Option<f64>) -> Self {
        match size {
            Some(size) if size >= 18.0 => Self::Large,
            Some(size) if size >= 12.0 => Self::Medium,
            Some(size) if size >= 8.0 => Self::Small,
            Some(_) => Self::Tiny,
            None => Self::Unknown,
        }
    }
}

/// Style flags derived from the dominant font
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneFeats {
    pub bold: bool,
    pub italic: bool,
    pub font_name: String,
}

impl ZoneFeats {
    pub fn from_font_name(font_name: &str) -> Self {
        let lower = font_name.to_lowercase();
        Self {
            bold: ["bold", "black", "heavy"].iter().any(|marker| lower.contains(marker)),
            italic: ["italic", "oblique"].iter().any(|marker| lower.contains(marker)),
            font_name: font_name.to_owned(),
        }
    }
}

/// What the detector said about the box a zone came from
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionMeta {
    pub confidence: Option<f64>,
    pub position: Option<u32>,
}

/// How a zone came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZoneOrigin {
    #[default]
    #[serde(rename = "self")]
    Extracted,
    #[serde(rename = "new_zone")]
    Interactive,
}

/// Lifecycle of a zone identity within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneLifecycle {
    /// Produced by the pipeline but not shown, e.g. a batch held back by user edits
    Proposed,
    /// In the store and shown
    Active,
    /// Geometry, type or text changed by the user
    Modified,
    /// Absorbed into another zone by a merge
    MergedAway,
    Deleted,
}

impl ZoneLifecycle {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::MergedAway | Self::Deleted)
    }
}

/// One region on one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ZoneRecord", try_from = "ZoneRecord")]
pub struct Zone {
    pub block_id: String,
    pub span_id: String,
    pub uid: ZoneUid,
    page: u32,
    rect: Rect,
    pub kind: ZoneKind,
    pub zone_color: String,
    pub text: String,
    pub feats: ZoneFeats,
    pub font_size: Option<f64>,
    pub sequence_number: u32,
    pub parent_zone: Option<String>,
    pub label: Option<String>,
    pub line_count: u32,
    pub size_class: SizeClass,
    pub detection: Option<DetectionMeta>,
    pub origin: ZoneOrigin,
}

impl Zone {
    /// A zone numbered `sequence` on `page`, with empty content
    pub fn new(page: u32, sequence: u32, rect: Rect, kind: ZoneKind) -> Self {
        Self {
            block_id: block_id(page, sequence),
            span_id: span_id(page, sequence),
            uid: ZoneUid::new(),
            page,
            rect,
            kind,
            zone_color: String::new(),
            text: String::new(),
            feats: ZoneFeats::default(),
            font_size: None,
            sequence_number: sequence,
            parent_zone: None,
            label: None,
            line_count: 0,
            size_class: SizeClass::Unknown,
            detection: None,
            origin: ZoneOrigin::Extracted,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.zone_color = color.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_origin(mut self, origin: ZoneOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn bbox(&self) -> [f64; 4] {
        self.rect.bbox()
    }

    pub fn set_rect(&mut self, rect: Rect) {
        self.rect = rect;
    }

    /// Set the sequence number and the identifiers derived from it
    pub fn renumber(&mut self, sequence: u32) {
        self.sequence_number = sequence;
        self.block_id = block_id(self.page, sequence);
        self.span_id = span_id(self.page, sequence);
    }

    /// Replace text and font metadata with a text-index lookup result
    pub fn apply_region_text(&mut self, region: RegionText) {
        self.feats = ZoneFeats::from_font_name(&region.font_name);
        self.font_size = region.font_size;
        self.size_class = SizeClass::from_font_size(region.font_size);
        self.line_count = region.line_count;
        self.text = region.text;
    }
}

/// Flat persisted form of a [`Zone`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ZoneRecord {
    block_id: String,
    span_id: String,
    #[serde(default)]
    uid: ZoneUid,
    page: u32,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    #[serde(default)]
    bbox: Option<[f64; 4]>,
    #[serde(rename = "type")]
    kind: ZoneKind,
    #[serde(default)]
    zone_color: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    feats: ZoneFeats,
    #[serde(default)]
    font_size: Option<f64>,
    sequence_number: u32,
    #[serde(default)]
    parent_zone: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    line_count: u32,
    #[serde(default)]
    size_class: SizeClass,
    #[serde(default)]
    detection: Option<DetectionMeta>,
    #[serde(default)]
    action_type: ZoneOrigin,
}

impl From<Zone> for ZoneRecord {
    fn from(zone: Zone) -> Self {
        Self {
            bbox: Some(zone.bbox()),
            block_id: zone.block_id,
            span_id: zone.span_id,
            uid: zone.uid,
            page: zone.page,
            x: zone.rect.x,
            y: zone.rect.y,
            width: zone.rect.width,
            height: zone.rect.height,
            kind: zone.kind,
            zone_color: zone.zone_color,
            text: zone.text,
            feats: zone.feats,
            font_size: zone.font_size,
            sequence_number: zone.sequence_number,
            parent_zone: zone.parent_zone,
            label: zone.label,
            line_count: zone.line_count,
            size_class: zone.size_class,
            detection: zone.detection,
            action_type: zone.origin,
        }
    }
}

impl TryFrom<ZoneRecord> for Zone {
    type Error = String;

    fn try_from(record: ZoneRecord) -> Result<Self, Self::Error> {
        let rect = Rect::new(record.x, record.y, record.width, record.height);
        if !rect.is_finite() {
            return Err(format!("zone {} has non-finite geometry", record.block_id));
        }
        if let Some(bbox) = record.bbox {
            let consistent =
                rect.bbox().iter().zip(bbox).all(|(a, b)| (a - b).abs() <= BBOX_TOLERANCE);
            if !consistent {
                return Err(format!("zone {} has a bbox that does not match its geometry", record.block_id));
            }
        }

        Ok(Zone {
            block_id: record.block_id,
            span_id: record.span_id,
            uid: record.uid,
            page: record.page,
            rect,
            kind: record.kind,
            zone_color: record.zone_color,
            text: record.text,
            feats: record.feats,
            font_size: record.font_size,
            sequence_number: record.sequence_number,
            parent_zone: record.parent_zone,
            label: record.label,
            line_count: record.line_count,
            size_class: record.size_class,
            detection: record.detection,
            origin: record.action_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_use_one_based_page_numbers() {
        assert_eq!(block_id(0, 3), "pz1-3");
        assert_eq!(span_id(4, 1), "z5-1");

        let mut zone = Zone::new(2, 1, Rect::new(0.0, 0.0, 1.0, 1.0), ZoneKind::Title);
        zone.renumber(7);
        assert_eq!(zone.block_id, "pz3-7");
        assert_eq!(zone.span_id, "z3-7");
        assert_eq!(zone.sequence_number, 7);
    }

    #[test]
    fn kind_parse_normalizes_detector_labels() {
        assert_eq!(ZoneKind::parse("List-item"), ZoneKind::ListItem);
        assert_eq!(ZoneKind::parse("Section_header"), ZoneKind::SectionHeader);
        assert_eq!(ZoneKind::parse("Picture"), ZoneKind::Image);
        assert_eq!(ZoneKind::parse("Text"), ZoneKind::Paragraph);
        assert_eq!(ZoneKind::parse("Handwriting"), ZoneKind::Other("Handwriting".to_owned()));
    }

    #[test]
    fn known_kinds_round_trip_through_strings() {
        for kind in ZoneKind::KNOWN {
            assert_eq!(ZoneKind::parse(kind.as_str()), kind);
        }
    }

    #[test]
    fn size_class_thresholds() {
        assert_eq!(SizeClass::from_font_size(Some(18.0)), SizeClass::Large);
        assert_eq!(SizeClass::from_font_size(Some(12.0)), SizeClass::Medium);
        assert_eq!(SizeClass::from_font_size(Some(8.0)), SizeClass::Small);
        assert_eq!(SizeClass::from_font_size(Some(7.9)), SizeClass::Tiny);
        assert_eq!(SizeClass::from_font_size(None), SizeClass::Unknown);
    }

    #[test]
    fn feats_detect_bold_and_italic() {
        let feats = ZoneFeats::from_font_name("Helvetica-BoldOblique");
        assert!(feats.bold);
        assert!(feats.italic);
        assert!(!ZoneFeats::from_font_name("Times-Roman").bold);
    }

    #[test]
    fn serializes_flat_record_with_derived_bbox() {
        let zone = Zone::new(0, 1, Rect::new(10.0, 20.0, 30.0, 40.0), ZoneKind::ListItem)
            .with_color("#ff7f0e")
            .with_text("first item");
        let value = serde_json::to_value(&zone).unwrap();

        assert_eq!(value["block_id"], "pz1-1");
        assert_eq!(value["type"], "list item");
        assert_eq!(value["bbox"], json!([10.0, 20.0, 40.0, 60.0]));
        assert_eq!(value["action_type"], "self");
        assert_eq!(value["size_class"], "unknown");
    }

    #[test]
    fn rejects_bbox_that_disagrees_with_geometry() {
        let zone = Zone::new(0, 1, Rect::new(10.0, 20.0, 30.0, 40.0), ZoneKind::Title);
        let mut value = serde_json::to_value(&zone).unwrap();
        value["bbox"] = json!([0.0, 0.0, 1.0, 1.0]);

        let err = serde_json::from_value::<Zone>(value).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn lifecycle_terminal_states() {
        assert!(ZoneLifecycle::Deleted.is_terminal());
        assert!(ZoneLifecycle::MergedAway.is_terminal());
        assert!(!ZoneLifecycle::Modified.is_terminal());
    }
}
