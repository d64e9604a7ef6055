use image::{ImageBuffer, Rgba};
use lopdf::{Document, Object, ObjectId};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

mod text;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Points per inch; render scales are expressed relative to this.
pub const POINTS_PER_INCH: f32 = 72.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_pt: f32,
    pub height_pt: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: u32,
    pub scale: f32,
}

impl RenderRequest {
    pub fn at_dpi(page_index: u32, dpi: u32) -> Self {
        Self { page_index, scale: dpi as f32 / POINTS_PER_INCH }
    }
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self { page_index: 0, scale: 1.0 }
    }
}

/// Rectangle of a text run in page points, origin at the top-left corner of
/// the page with y growing downward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl SpanRect {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub rect: SpanRect,
    pub font_name: String,
    pub font_size: f32,
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("backend error: {0}")]
    Backend(String),
}

pub trait PdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError>;
    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;
    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError>;
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError>;

    /// Every text run on the page, in content-stream order.
    fn text_spans(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<Vec<TextSpan>, PdfEngineError>;

    /// Text of the runs whose centre falls inside `rect`.
    fn text_in_rect(
        &self,
        handle: DocumentHandle,
        page_index: u32,
        rect: SpanRect,
    ) -> Result<String, PdfEngineError> {
        let spans = self.text_spans(handle, page_index)?;
        let words: Vec<&str> = spans
            .iter()
            .filter(|span| {
                let (cx, cy) = span.rect.center();
                rect.contains_point(cx, cy)
            })
            .map(|span| span.text.trim())
            .filter(|text| !text.is_empty())
            .collect();

        Ok(words.join(" "))
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;
}

#[derive(Debug, Clone, Copy)]
struct PageGeometry {
    object_id: ObjectId,
    origin_x: f32,
    origin_y: f32,
    size: PageSize,
}

#[derive(Debug)]
struct DocumentRecord {
    document: Document,
    pages: Vec<PageGeometry>,
}

#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(bytes: &[u8]) -> Result<DocumentRecord, PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let document = Document::load_mem(bytes)?;
        let mut pages = Vec::new();

        for (_, object_id) in document.get_pages() {
            let geometry = text::inherited(&document, object_id, b"MediaBox")
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| media_box(array))
                .unwrap_or((0.0, 0.0, PageSize { width_pt: 612.0, height_pt: 792.0 }));

            let (origin_x, origin_y, size) = geometry;
            pages.push(PageGeometry { object_id, origin_x, origin_y, size });
        }

        if pages.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok(DocumentRecord { document, pages })
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }

    fn page(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<(&DocumentRecord, PageGeometry), PdfEngineError> {
        let record = self.record(handle)?;
        let page = record.pages.get(page_index as usize).copied().ok_or(
            PdfEngineError::PageOutOfRange {
                page: page_index,
                page_count: record.pages.len() as u32,
            },
        )?;

        Ok((record, page))
    }
}

fn media_box(array: &[Object]) -> Option<(f32, f32, PageSize)> {
    if array.len() != 4 {
        return None;
    }
    let x0 = array[0].as_float().ok()?;
    let y0 = array[1].as_float().ok()?;
    let x1 = array[2].as_float().ok()?;
    let y1 = array[3].as_float().ok()?;

    Some((
        x0.min(x1),
        y0.min(y1),
        PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() },
    ))
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let record = Self::parse(&bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        tracing::debug!(handle = handle.raw(), pages = record.pages.len(), "opened document");
        self.docs.insert(handle, record);

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.pages.len() as u32)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        Ok(self.page(handle, page_index)?.1.size)
    }

    /// Produces a blank canvas with the page's pixel dimensions. Content is
    /// not painted; the `pdfium` backend renders real pixels.
    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let page_size = self.page_size(handle, request.page_index)?;
        let scale = if request.scale <= 0.0 { 1.0 } else { request.scale };

        let width = (page_size.width_pt * scale).round().max(1.0) as u32;
        let height = (page_size.height_pt * scale).round().max(1.0) as u32;

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, Rgba([220, 220, 220, 255]));
                image.put_pixel(x, height - 1, Rgba([220, 220, 220, 255]));
            }
            for y in 0..height {
                image.put_pixel(0, y, Rgba([220, 220, 220, 255]));
                image.put_pixel(width - 1, y, Rgba([220, 220, 220, 255]));
            }
        }

        Ok(image)
    }

    fn text_spans(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<Vec<TextSpan>, PdfEngineError> {
        let (record, page) = self.page(handle, page_index)?;
        text::extract_spans(&record.document, page.object_id, page.origin_x, page.origin_y, page.size)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend;

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}

#[cfg(test)]
mod tests {
    use super::fixtures::{build_pdf, FixturePage};
    use super::*;

    fn sample_pdf_bytes() -> Vec<u8> {
        build_pdf(&[
            FixturePage::new(612, 792)
                .text("Quarterly Report", 72, 72, 24)
                .text("Revenue grew in every region.", 72, 120, 12),
            FixturePage::new(400, 600).bold_text("Appendix", 50, 50, 18),
        ])
        .expect("fixture should build")
    }

    fn open_sample(engine: &mut LopdfEngine) -> DocumentHandle {
        engine.open(OpenSource::Bytes(sample_pdf_bytes())).expect("open should succeed")
    }

    #[test]
    fn opens_pdf_and_reads_page_count() {
        let mut engine = LopdfEngine::new();
        let handle = open_sample(&mut engine);

        assert_eq!(engine.page_count(handle).expect("count should succeed"), 2);
    }

    #[test]
    fn reads_per_page_media_box() {
        let mut engine = LopdfEngine::new();
        let handle = open_sample(&mut engine);

        let second = engine.page_size(handle, 1).expect("size should succeed");
        assert_eq!(second, PageSize { width_pt: 400.0, height_pt: 600.0 });
    }

    #[test]
    fn render_at_dpi_scales_pixel_dimensions() {
        let mut engine = LopdfEngine::new();
        let handle = open_sample(&mut engine);

        let image = engine
            .render_page(handle, RenderRequest::at_dpi(0, 144))
            .expect("render should succeed");

        assert_eq!(image.width(), 1224);
        assert_eq!(image.height(), 1584);
    }

    #[test]
    fn text_spans_use_top_left_origin() {
        let mut engine = LopdfEngine::new();
        let handle = open_sample(&mut engine);

        let spans = engine.text_spans(handle, 0).expect("spans should extract");
        assert_eq!(spans.len(), 2);

        let title = &spans[0];
        assert_eq!(title.text, "Quarterly Report");
        assert_eq!(title.font_name, "Helvetica");
        assert!((title.font_size - 24.0).abs() < 1e-3);
        assert!((title.rect.x0 - 72.0).abs() < 1e-3);
        assert!((title.rect.y0 - 72.0).abs() < 1e-3);
        assert!((title.rect.y1 - 96.0).abs() < 1e-3);
        assert!(title.rect.x1 > title.rect.x0);
    }

    #[test]
    fn text_spans_resolve_bold_font_name() {
        let mut engine = LopdfEngine::new();
        let handle = open_sample(&mut engine);

        let spans = engine.text_spans(handle, 1).expect("spans should extract");
        assert_eq!(spans[0].font_name, "Helvetica-Bold");
    }

    #[test]
    fn text_in_rect_selects_by_span_centre() {
        let mut engine = LopdfEngine::new();
        let handle = open_sample(&mut engine);

        let text = engine
            .text_in_rect(handle, 0, SpanRect { x0: 0.0, y0: 100.0, x1: 612.0, y1: 200.0 })
            .expect("text should extract");

        assert_eq!(text, "Revenue grew in every region.");
    }

    #[test]
    fn page_out_of_range_is_reported() {
        let mut engine = LopdfEngine::new();
        let handle = open_sample(&mut engine);

        let err = engine.text_spans(handle, 9).expect_err("page 9 does not exist");
        assert!(matches!(err, PdfEngineError::PageOutOfRange { page: 9, page_count: 2 }));
    }

    #[test]
    fn encrypted_marker_is_rejected() {
        let mut bytes = sample_pdf_bytes();
        bytes.extend_from_slice(b"\n% /Encrypt\n");

        let mut engine = LopdfEngine::new();
        let err = engine.open(OpenSource::Bytes(bytes)).expect_err("encrypted should fail");
        assert!(matches!(err, PdfEngineError::EncryptedUnsupported));
    }

    #[test]
    fn invalid_handle_returns_error() {
        let engine = LopdfEngine::new();
        let err =
            engine.page_count(DocumentHandle(999)).expect_err("should fail for unknown handle");

        assert!(matches!(err, PdfEngineError::InvalidHandle(999)));
    }
}
