//! PDFium backend: real rasterization and text objects.

use crate::{
    DocumentHandle, OpenSource, PageSize, PdfEngine, PdfEngineError, RenderRequest, RgbaImage,
    SpanRect, TextSpan,
};
use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::fs;

pub struct PdfiumEngine {
    pdfium: &'static Pdfium,
    next_handle: u64,
    docs: HashMap<DocumentHandle, PdfDocument<'static>>,
}

fn backend_error(context: &str, err: impl std::fmt::Display) -> PdfEngineError {
    PdfEngineError::Backend(format!("{context}: {err}"))
}

impl PdfiumEngine {
    /// Binds PDFium from the executable's directory, the working directory,
    /// or the system library path, in that order.
    pub fn from_system_library() -> Result<Self, PdfEngineError> {
        let exe_dir =
            std::env::current_exe().ok().and_then(|path| path.parent().map(|p| p.to_path_buf()));

        let bindings = exe_dir
            .and_then(|dir| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)).ok()
            })
            .map(Ok)
            .unwrap_or_else(|| {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                    .or_else(|_| Pdfium::bind_to_system_library())
            })
            .map_err(|err| backend_error("failed to bind pdfium library", err))?;

        Ok(Self {
            pdfium: Box::leak(Box::new(Pdfium::new(bindings))),
            next_handle: 0,
            docs: HashMap::new(),
        })
    }

    fn document(&self, handle: DocumentHandle) -> Result<&PdfDocument<'static>, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }

    fn page(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PdfPage<'_>, PdfEngineError> {
        let document = self.document(handle)?;
        let page_count = document.pages().len() as u32;
        if page_index >= page_count {
            return Err(PdfEngineError::PageOutOfRange { page: page_index, page_count });
        }
        document
            .pages()
            .get(page_index as u16)
            .map_err(|err| backend_error("failed to load page", err))
    }
}

impl PdfEngine for PdfiumEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };
        let data: &'static [u8] = Box::leak(bytes.into_boxed_slice());

        let document = self
            .pdfium
            .load_pdf_from_byte_slice(data, None)
            .map_err(|err| backend_error("failed to load document", err))?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        self.docs.insert(handle, document);
        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.document(handle)?.pages().len() as u32)
    }

    fn page_size(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<PageSize, PdfEngineError> {
        let page = self.page(handle, page_index)?;
        Ok(PageSize { width_pt: page.width().value, height_pt: page.height().value })
    }

    fn render_page(
        &self,
        handle: DocumentHandle,
        request: RenderRequest,
    ) -> Result<RgbaImage, PdfEngineError> {
        let page = self.page(handle, request.page_index)?;
        let scale = if request.scale <= 0.0 { 1.0 } else { request.scale };
        let width = (page.width().value * scale).round().max(1.0) as u32;
        let height = (page.height().value * scale).round().max(1.0) as u32;

        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_target_height(height as i32);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|err| backend_error("failed to render page", err))?;

        RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes().to_vec())
            .ok_or_else(|| PdfEngineError::Backend("bitmap size mismatch".to_owned()))
    }

    fn text_spans(
        &self,
        handle: DocumentHandle,
        page_index: u32,
    ) -> Result<Vec<TextSpan>, PdfEngineError> {
        let page = self.page(handle, page_index)?;
        let page_height = page.height().value;
        let mut spans = Vec::new();

        for object in page.objects().iter() {
            let PdfPageObject::Text(ref text_object) = object else {
                continue;
            };

            let text = text_object.text();
            if text.trim().is_empty() {
                continue;
            }

            let bounds =
                object.bounds().map_err(|err| backend_error("failed to read bounds", err))?;
            let left = bounds.left().value;
            let bottom = bounds.bottom().value;
            let width = bounds.width().value;
            let height = bounds.height().value;

            spans.push(TextSpan {
                text,
                rect: SpanRect {
                    x0: left,
                    y0: page_height - bottom - height,
                    x1: left + width,
                    y1: page_height - bottom,
                },
                font_name: text_object.font().name(),
                font_size: height,
            });
        }

        Ok(spans)
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}
