//! Text-run extraction from page content streams.
//!
//! Positions come from the text and graphics state matrices. Glyph advance is
//! approximated at half an em per character since font metrics are not read.

use crate::{PageSize, PdfEngineError, SpanRect, TextSpan};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId};
use std::collections::HashMap;

const AVERAGE_GLYPH_WIDTH_EM: f32 = 0.5;
/// TJ adjustments below this (in thousandths of an em) are read as a space.
const TJ_SPACE_THRESHOLD: f32 = -200.0;
const MAX_PARENT_DEPTH: usize = 32;

pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Looks up a page attribute, walking the page tree for inherited values.
pub(crate) fn inherited<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Ok(value) = current.get(key) {
            return resolve(doc, value);
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn page_fonts(doc: &Document, page_id: ObjectId) -> HashMap<Vec<u8>, String> {
    let mut fonts = HashMap::new();
    let Some(table) = inherited(doc, page_id, b"Resources")
        .and_then(|resources| resources.as_dict().ok())
        .and_then(|resources| resources.get(b"Font").ok())
        .and_then(|font| resolve(doc, font))
        .and_then(|font| font.as_dict().ok())
    else {
        return fonts;
    };

    for (resource_name, value) in table.iter() {
        let base_font = resolve(doc, value)
            .and_then(|font| font.as_dict().ok())
            .and_then(|font| font.get(b"BaseFont").ok())
            .and_then(|name| name.as_name().ok())
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .unwrap_or_else(|| String::from_utf8_lossy(resource_name).into_owned());

        fonts.insert(resource_name.clone(), strip_subset_prefix(&base_font).to_owned());
    }

    fonts
}

/// Embedded subsets are named `ABCDEF+RealName`.
fn strip_subset_prefix(name: &str) -> &str {
    match name.split_once('+') {
        Some((prefix, rest))
            if prefix.len() == 6 && prefix.chars().all(|c| c.is_ascii_uppercase()) =>
        {
            rest
        }
        _ => name,
    }
}

fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }

    bytes.iter().map(|&byte| byte as char).collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Matrix {
    const IDENTITY: Matrix = Matrix { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix { e: tx, f: ty, ..Self::IDENTITY }
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() != 6 {
            return None;
        }
        let n = |i: usize| operands[i].as_float().ok();
        Some(Matrix { a: n(0)?, b: n(1)?, c: n(2)?, d: n(3)?, e: n(4)?, f: n(5)? })
    }

    /// `self × other` in PDF row-vector convention.
    fn then(self, other: Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    fn vertical_scale(&self) -> f32 {
        self.c.hypot(self.d)
    }
}

#[derive(Debug, Clone)]
struct TextState {
    font: Vec<u8>,
    size: f32,
    leading: f32,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: Vec::new(),
            size: 0.0,
            leading: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
        }
    }
}

struct Interpreter<'a> {
    fonts: &'a HashMap<Vec<u8>, String>,
    ctm: Matrix,
    state: TextState,
    saved: Vec<(Matrix, TextState)>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    origin_x: f32,
    origin_y: f32,
    page_height: f32,
    spans: Vec<TextSpan>,
}

impl Interpreter<'_> {
    fn number(operation: &Operation, index: usize) -> Option<f32> {
        operation.operands.get(index).and_then(|operand| operand.as_float().ok())
    }

    fn apply(&mut self, operation: &Operation) {
        match operation.operator.as_str() {
            "q" => self.saved.push((self.ctm, self.state.clone())),
            "Q" => {
                if let Some((ctm, state)) = self.saved.pop() {
                    self.ctm = ctm;
                    self.state = state;
                }
            }
            "cm" => {
                if let Some(matrix) = Matrix::from_operands(&operation.operands) {
                    self.ctm = matrix.then(self.ctm);
                }
            }
            "BT" => {
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(Object::Name(name)) = operation.operands.first() {
                    self.state.font = name.clone();
                }
                if let Some(size) = Self::number(operation, 1) {
                    self.state.size = size;
                }
            }
            "TL" => self.state.leading = Self::number(operation, 0).unwrap_or(0.0),
            "Tc" => self.state.char_spacing = Self::number(operation, 0).unwrap_or(0.0),
            "Tw" => self.state.word_spacing = Self::number(operation, 0).unwrap_or(0.0),
            "Tz" => self.state.horizontal_scale = Self::number(operation, 0).unwrap_or(100.0) / 100.0,
            "Td" => {
                let tx = Self::number(operation, 0).unwrap_or(0.0);
                let ty = Self::number(operation, 1).unwrap_or(0.0);
                self.move_line(tx, ty);
            }
            "TD" => {
                let tx = Self::number(operation, 0).unwrap_or(0.0);
                let ty = Self::number(operation, 1).unwrap_or(0.0);
                self.state.leading = -ty;
                self.move_line(tx, ty);
            }
            "Tm" => {
                if let Some(matrix) = Matrix::from_operands(&operation.operands) {
                    self.text_matrix = matrix;
                    self.line_matrix = matrix;
                }
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operation.operands.first() {
                    self.show(&[Object::String(bytes.clone(), lopdf::StringFormat::Literal)]);
                }
            }
            "'" => {
                self.next_line();
                if let Some(Object::String(bytes, _)) = operation.operands.first() {
                    self.show(&[Object::String(bytes.clone(), lopdf::StringFormat::Literal)]);
                }
            }
            "\"" => {
                self.state.word_spacing = Self::number(operation, 0).unwrap_or(0.0);
                self.state.char_spacing = Self::number(operation, 1).unwrap_or(0.0);
                self.next_line();
                if let Some(Object::String(bytes, _)) = operation.operands.get(2) {
                    self.show(&[Object::String(bytes.clone(), lopdf::StringFormat::Literal)]);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operation.operands.first() {
                    self.show(items);
                }
            }
            _ => {}
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = Matrix::translate(tx, ty).then(self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.state.leading);
    }

    fn advance(&mut self, text: &str) {
        let glyphs = text.chars().count() as f32;
        let spaces = text.chars().filter(|c| *c == ' ').count() as f32;
        let width = (glyphs * AVERAGE_GLYPH_WIDTH_EM * self.state.size
            + glyphs * self.state.char_spacing
            + spaces * self.state.word_spacing)
            * self.state.horizontal_scale;
        self.text_matrix = Matrix::translate(width, 0.0).then(self.text_matrix);
    }

    /// Shows a TJ-style sequence of strings and kerning adjustments as one run.
    fn show(&mut self, items: &[Object]) {
        let start = self.text_matrix.then(self.ctm);
        let mut text = String::new();

        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let piece = decode_pdf_string(bytes);
                    self.advance(&piece);
                    text.push_str(&piece);
                }
                other => {
                    if let Ok(adjustment) = other.as_float() {
                        let shift = -adjustment / 1000.0
                            * self.state.size
                            * self.state.horizontal_scale;
                        self.text_matrix = Matrix::translate(shift, 0.0).then(self.text_matrix);
                        if adjustment < TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                            text.push(' ');
                        }
                    }
                }
            }
        }

        if text.trim().is_empty() {
            return;
        }

        let end = self.text_matrix.then(self.ctm);
        let font_size = self.state.size * start.vertical_scale();
        let baseline = start.f - self.origin_y;
        let left = start.e.min(end.e) - self.origin_x;
        let right = start.e.max(end.e) - self.origin_x;

        let font_name = self
            .fonts
            .get(&self.state.font)
            .cloned()
            .unwrap_or_else(|| String::from_utf8_lossy(&self.state.font).into_owned());

        self.spans.push(TextSpan {
            text,
            rect: SpanRect {
                x0: left,
                y0: self.page_height - baseline - font_size,
                x1: right,
                y1: self.page_height - baseline,
            },
            font_name,
            font_size,
        });
    }
}

pub(crate) fn extract_spans(
    doc: &Document,
    page_id: ObjectId,
    origin_x: f32,
    origin_y: f32,
    size: PageSize,
) -> Result<Vec<TextSpan>, PdfEngineError> {
    let data = doc.get_page_content(page_id)?;
    let content = Content::decode(&data)?;
    let fonts = page_fonts(doc, page_id);

    let mut interpreter = Interpreter {
        fonts: &fonts,
        ctm: Matrix::IDENTITY,
        state: TextState::default(),
        saved: Vec::new(),
        text_matrix: Matrix::IDENTITY,
        line_matrix: Matrix::IDENTITY,
        origin_x,
        origin_y,
        page_height: size.height_pt,
        spans: Vec::new(),
    };

    for operation in &content.operations {
        interpreter.apply(operation);
    }

    tracing::trace!(spans = interpreter.spans.len(), "extracted text spans");
    Ok(interpreter.spans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_then_composes_translations() {
        let combined = Matrix::translate(10.0, 5.0).then(Matrix::translate(2.0, 3.0));
        assert_eq!(combined, Matrix::translate(12.0, 8.0));
    }

    #[test]
    fn matrix_then_applies_scale_before_translation() {
        let scale = Matrix { a: 2.0, d: 2.0, ..Matrix::IDENTITY };
        let combined = Matrix::translate(10.0, 0.0).then(scale);
        assert_eq!(combined.e, 20.0);
        assert_eq!(combined.vertical_scale(), 2.0);
    }

    #[test]
    fn utf16_strings_are_decoded() {
        let bytes = [0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69];
        assert_eq!(decode_pdf_string(&bytes), "Hi");
    }

    #[test]
    fn latin1_strings_are_decoded() {
        assert_eq!(decode_pdf_string(b"caf\xe9"), "café");
    }

    #[test]
    fn subset_prefix_is_removed() {
        assert_eq!(strip_subset_prefix("ABCDEF+Times-Bold"), "Times-Bold");
        assert_eq!(strip_subset_prefix("Helvetica"), "Helvetica");
        assert_eq!(strip_subset_prefix("abc+Helvetica"), "abc+Helvetica");
    }

    #[test]
    fn tj_arrays_join_pieces_and_read_wide_gaps_as_spaces() {
        let fonts = HashMap::new();
        let mut interpreter = Interpreter {
            fonts: &fonts,
            ctm: Matrix::IDENTITY,
            state: TextState { size: 10.0, ..TextState::default() },
            saved: Vec::new(),
            text_matrix: Matrix::translate(100.0, 700.0),
            line_matrix: Matrix::translate(100.0, 700.0),
            origin_x: 0.0,
            origin_y: 0.0,
            page_height: 800.0,
            spans: Vec::new(),
        };

        interpreter.show(&[
            Object::string_literal("Hel"),
            Object::Integer(-20),
            Object::string_literal("lo"),
            Object::Integer(-400),
            Object::string_literal("world"),
        ]);

        assert_eq!(interpreter.spans.len(), 1);
        let span = &interpreter.spans[0];
        assert_eq!(span.text, "Hello world");
        assert_eq!(span.rect.x0, 100.0);
        assert_eq!(span.rect.y0, 90.0);
        assert_eq!(span.rect.y1, 100.0);
    }
}
