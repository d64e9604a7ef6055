//! Page text index
//!
//! Text spans are pulled from the document engine once per page and then
//! matched against zone rectangles by intersection-over-union.

use crate::geometry::Rect;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use zonemark_engine::{DocumentHandle, PdfEngine, PdfEngineError, TextSpan};

/// Y-origins further apart than this start a new line.
pub const LINE_GAP: f64 = 2.0;

/// A text run in document space
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedSpan {
    pub text: String,
    pub rect: Rect,
    pub font_name: String,
    pub font_size: f64,
}

impl From<TextSpan> for IndexedSpan {
    fn from(span: TextSpan) -> Self {
        Self {
            rect: Rect::from_corners(
                span.rect.x0 as f64,
                span.rect.y0 as f64,
                span.rect.x1 as f64,
                span.rect.y1 as f64,
            ),
            text: span.text,
            font_name: span.font_name,
            font_size: span.font_size as f64,
        }
    }
}

/// Text and font metadata found inside a region
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegionText {
    pub text: String,
    /// Mean size of the matched spans, rounded to one decimal
    pub font_size: Option<f64>,
    /// Most frequent font among the matched spans
    pub font_name: String,
    pub line_count: u32,
}

impl RegionText {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Immutable span list for one page
#[derive(Debug, Clone, Default)]
pub struct PageTextIndex {
    page: u32,
    spans: Vec<IndexedSpan>,
}

impl PageTextIndex {
    pub fn build(
        engine: &dyn PdfEngine,
        handle: DocumentHandle,
        page: u32,
    ) -> Result<Self, PdfEngineError> {
        let spans = engine.text_spans(handle, page)?;
        tracing::trace!(page, spans = spans.len(), "built page text index");
        Ok(Self::from_spans(page, spans.into_iter().map(IndexedSpan::from).collect()))
    }

    pub fn from_spans(page: u32, spans: Vec<IndexedSpan>) -> Self {
        Self { page, spans }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn spans(&self) -> &[IndexedSpan] {
        &self.spans
    }

    /// `false` for pages without a text layer, such as scans
    pub fn has_text(&self) -> bool {
        self.spans.iter().any(|span| !span.text.trim().is_empty())
    }

    pub fn query(&self, region: &Rect, iou_threshold: f64) -> RegionText {
        query(&self.spans, region, iou_threshold)
    }
}

/// Collect the spans overlapping `region` with IoU at or above `iou_threshold`
///
/// Matched spans are grouped into lines by their y-origin, read line by line
/// and left-to-right within a line, and joined with single spaces. A region
/// with no qualifying spans yields an empty result.
pub fn query(spans: &[IndexedSpan], region: &Rect, iou_threshold: f64) -> RegionText {
    let mut kept: Vec<&IndexedSpan> = spans
        .iter()
        .filter(|span| span.rect.intersection(region).is_some())
        .filter(|span| span.rect.iou(region) >= iou_threshold)
        .collect();

    if kept.is_empty() {
        return RegionText::default();
    }

    kept.sort_by(|a, b| a.rect.y.total_cmp(&b.rect.y));
    let lines = line_numbers(&kept);
    let mut ordered: Vec<(u32, &IndexedSpan)> = lines.into_iter().zip(kept).collect();
    ordered.sort_by(|(line_a, a), (line_b, b)| line_a.cmp(line_b).then(a.rect.x.total_cmp(&b.rect.x)));
    let kept: Vec<&IndexedSpan> = ordered.into_iter().map(|(_, span)| span).collect();

    let joined = kept.iter().map(|span| span.text.as_str()).collect::<Vec<_>>().join(" ");
    let text = joined.split_whitespace().collect::<Vec<_>>().join(" ");

    let sizes: Vec<f64> =
        kept.iter().map(|span| span.font_size).filter(|size| *size > 0.0).collect();
    let font_size = if sizes.is_empty() {
        None
    } else {
        let mean = sizes.iter().sum::<f64>() / sizes.len() as f64;
        Some((mean * 10.0).round() / 10.0)
    };

    RegionText {
        text,
        font_size,
        font_name: dominant_font(&kept),
        line_count: estimate_lines(&kept),
    }
}

/// Most frequent non-empty font name; ties go to the one seen first.
fn dominant_font(spans: &[&IndexedSpan]) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for span in spans {
        if span.font_name.is_empty() {
            continue;
        }
        match counts.iter_mut().find(|(name, _)| *name == span.font_name) {
            Some((_, count)) => *count += 1,
            None => counts.push((&span.font_name, 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (name, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((name, count));
        }
    }
    best.map(|(name, _)| name.to_owned()).unwrap_or_default()
}

/// Line index of each span; `spans` must be sorted by y-origin.
fn line_numbers(spans: &[&IndexedSpan]) -> Vec<u32> {
    let mut line = 0;
    let mut previous: Option<f64> = None;
    spans
        .iter()
        .map(|span| {
            if previous.is_some_and(|y| span.rect.y - y > LINE_GAP) {
                line += 1;
            }
            previous = Some(span.rect.y);
            line
        })
        .collect()
}

fn estimate_lines(spans: &[&IndexedSpan]) -> u32 {
    let mut sorted = spans.to_vec();
    sorted.sort_by(|a, b| a.rect.y.total_cmp(&b.rect.y));
    line_numbers(&sorted).last().map_or(0, |line| line + 1)
}

/// Text lookup used to refresh a zone after its geometry changes
///
/// `None` means the page text is unavailable (unknown page, failed
/// extraction or no text layer), so callers keep the text they have.
pub trait PageTextSource {
    fn region_text(&self, page: u32, region: &Rect) -> Option<RegionText>;
}

/// Prebuilt indexes for a fixed set of pages
#[derive(Debug, Clone, Default)]
pub struct IndexedPages {
    pages: HashMap<u32, PageTextIndex>,
    iou_threshold: f64,
}

impl IndexedPages {
    pub fn new(iou_threshold: f64) -> Self {
        Self { pages: HashMap::new(), iou_threshold }
    }

    pub fn with_page(mut self, index: PageTextIndex) -> Self {
        self.pages.insert(index.page(), index);
        self
    }
}

impl PageTextSource for IndexedPages {
    fn region_text(&self, page: u32, region: &Rect) -> Option<RegionText> {
        self.pages
            .get(&page)
            .filter(|index| index.has_text())
            .map(|index| index.query(region, self.iou_threshold))
    }
}

/// Lazily indexed pages of an open document
///
/// Each page is extracted at most once; pages that fail to extract are
/// logged and yield no text.
pub struct DocumentTextIndex {
    engine: Box<dyn PdfEngine>,
    handle: DocumentHandle,
    iou_threshold: f64,
    pages: RefCell<HashMap<u32, Rc<PageTextIndex>>>,
}

impl DocumentTextIndex {
    pub fn new(engine: Box<dyn PdfEngine>, handle: DocumentHandle, iou_threshold: f64) -> Self {
        Self { engine, handle, iou_threshold, pages: RefCell::new(HashMap::new()) }
    }

    pub fn page(&self, page: u32) -> Option<Rc<PageTextIndex>> {
        if let Some(index) = self.pages.borrow().get(&page) {
            return Some(index.clone());
        }

        match PageTextIndex::build(self.engine.as_ref(), self.handle, page) {
            Ok(index) => {
                let index = Rc::new(index);
                self.pages.borrow_mut().insert(page, index.clone());
                Some(index)
            }
            Err(err) => {
                tracing::warn!(page, error = %err, "text extraction failed");
                None
            }
        }
    }
}

impl PageTextSource for DocumentTextIndex {
    fn region_text(&self, page: u32, region: &Rect) -> Option<RegionText> {
        self.page(page)
            .filter(|index| index.has_text())
            .map(|index| index.query(region, self.iou_threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, x: f64, y: f64, width: f64, font: &str, size: f64) -> IndexedSpan {
        IndexedSpan {
            text: text.to_owned(),
            rect: Rect::new(x, y, width, size),
            font_name: font.to_owned(),
            font_size: size,
        }
    }

    fn sample() -> Vec<IndexedSpan> {
        vec![
            span("world", 60.0, 100.0, 40.0, "Helvetica", 12.0),
            span("Hello", 10.0, 100.5, 40.0, "Helvetica", 12.0),
            span("second   line", 10.0, 115.0, 90.0, "Helvetica-Bold", 11.0),
            span("far away", 400.0, 600.0, 50.0, "Times", 9.0),
        ]
    }

    #[test]
    fn empty_region_returns_empty_fields() {
        let result = query(&sample(), &Rect::new(300.0, 300.0, 10.0, 10.0), 0.0);
        assert_eq!(result, RegionText::default());
        assert_eq!(result.text, "");
        assert_eq!(result.font_size, None);
        assert_eq!(result.font_name, "");
        assert_eq!(result.line_count, 0);
    }

    #[test]
    fn joins_spans_in_reading_order_and_collapses_whitespace() {
        let result = query(&sample(), &Rect::new(0.0, 90.0, 200.0, 50.0), 0.0);

        assert_eq!(result.text, "Hello world second line");
        assert_eq!(result.line_count, 2);
        assert_eq!(result.font_name, "Helvetica");
        assert_eq!(result.font_size, Some(11.7));
    }

    #[test]
    fn same_line_spans_sort_left_to_right() {
        let spans = vec![
            span("B", 60.0, 100.0, 40.0, "F", 10.0),
            span("A", 10.0, 100.0, 40.0, "F", 10.0),
        ];
        assert_eq!(query(&spans, &Rect::new(0.0, 0.0, 200.0, 200.0), 0.0).text, "A B");
    }

    #[test]
    fn iou_threshold_filters_small_overlaps() {
        let spans = vec![span("word", 0.0, 0.0, 10.0, "F", 10.0)];
        let region = Rect::new(0.0, 0.0, 100.0, 100.0);

        assert_eq!(query(&spans, &region, 0.0).text, "word");
        assert_eq!(query(&spans, &region, 0.5).text, "");
    }

    #[test]
    fn touching_spans_are_not_matched() {
        let spans = vec![span("edge", 100.0, 0.0, 10.0, "F", 10.0)];
        assert!(query(&spans, &Rect::new(0.0, 0.0, 100.0, 100.0), 0.0).is_empty());
    }

    #[test]
    fn dominant_font_tie_goes_to_first_in_reading_order() {
        let spans = vec![
            span("one", 10.0, 10.0, 10.0, "Courier", 10.0),
            span("two", 10.0, 30.0, 10.0, "Times", 10.0),
        ];
        assert_eq!(query(&spans, &Rect::new(0.0, 0.0, 100.0, 100.0), 0.0).font_name, "Courier");
    }

    #[test]
    fn indexed_pages_answer_by_page() {
        let source = IndexedPages::new(0.0).with_page(PageTextIndex::from_spans(2, sample()));

        let hit = source.region_text(2, &Rect::new(0.0, 90.0, 200.0, 20.0)).unwrap();
        assert_eq!(hit.text, "Hello world");
        assert!(source.region_text(0, &Rect::new(0.0, 0.0, 10.0, 10.0)).is_none());
    }

    #[test]
    fn spans_within_line_gap_read_left_to_right() {
        let spans = vec![
            span("right", 60.0, 100.0, 40.0, "F", 10.0),
            span("left", 10.0, 101.5, 40.0, "F", 10.0),
            span("below", 10.0, 104.0, 40.0, "F", 10.0),
        ];
        let result = query(&spans, &Rect::new(0.0, 0.0, 200.0, 200.0), 0.0);

        assert_eq!(result.text, "left right below");
        assert_eq!(result.line_count, 2);
    }

    #[test]
    fn page_without_text_layer_has_no_region_text() {
        let source = IndexedPages::new(0.0).with_page(PageTextIndex::from_spans(0, vec![]));

        assert!(!PageTextIndex::from_spans(0, vec![]).has_text());
        assert!(source.region_text(0, &Rect::new(0.0, 0.0, 100.0, 100.0)).is_none());
    }
}
