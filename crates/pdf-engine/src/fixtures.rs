//! Small text-only PDFs built in memory for tests.

use crate::PdfEngineError;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::Path;

const REGULAR_FONT: &str = "F1";
const BOLD_FONT: &str = "F2";

#[derive(Debug, Clone)]
pub struct FixtureText {
    pub text: String,
    pub x: i64,
    /// Distance from the top of the page to the top of the run.
    pub top: i64,
    pub size: i64,
    pub bold: bool,
}

#[derive(Debug, Clone)]
pub struct FixturePage {
    pub width: i64,
    pub height: i64,
    pub texts: Vec<FixtureText>,
}

impl FixturePage {
    pub fn new(width: i64, height: i64) -> Self {
        Self { width, height, texts: Vec::new() }
    }

    pub fn text(mut self, text: &str, x: i64, top: i64, size: i64) -> Self {
        self.texts.push(FixtureText { text: text.to_owned(), x, top, size, bold: false });
        self
    }

    pub fn bold_text(mut self, text: &str, x: i64, top: i64, size: i64) -> Self {
        self.texts.push(FixtureText { text: text.to_owned(), x, top, size, bold: true });
        self
    }

    fn operations(&self) -> Vec<Operation> {
        let mut operations = Vec::new();
        for run in &self.texts {
            let font = if run.bold { BOLD_FONT } else { REGULAR_FONT };
            let baseline = self.height - run.top - run.size;
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec![font.into(), run.size.into()]));
            operations.push(Operation::new("Td", vec![run.x.into(), baseline.into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(run.text.as_str())]));
            operations.push(Operation::new("ET", vec![]));
        }
        operations
    }
}

pub fn build_pdf(pages: &[FixturePage]) -> Result<Vec<u8>, PdfEngineError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            REGULAR_FONT => regular_id,
            BOLD_FONT => bold_id,
        },
    });

    let mut kids = Vec::with_capacity(pages.len());
    for page in pages {
        let content = Content { operations: page.operations() };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), page.width.into(), page.height.into()],
        });
        kids.push(Object::from(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

pub fn write_pdf(path: &Path, pages: &[FixturePage]) -> Result<(), PdfEngineError> {
    std::fs::write(path, build_pdf(pages)?)?;
    Ok(())
}
