//! Rectangles and coordinate mapping
//!
//! Document space is PDF points with the origin at the top-left corner of the
//! page and y growing downward. Detector images and extracted text spans both
//! use this orientation, so mapping a detection into document space is a pure
//! per-axis scale with no flip.
//!
//! Interactive edits arrive from a zoomed display whose y axis grows upward
//! from the bottom of the page. [`ScreenTransform`] converts between that
//! display and document space with a Y-flip against the page height. The two
//! paths therefore differ on purpose: image mapping never flips, screen
//! mapping always does.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle stored as origin plus extent
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Build from two corners given in any order
    pub fn from_corners(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        let (left, right) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        let (top, bottom) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
        Self { x: left, y: top, width: right - left, height: bottom - top }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// `(x, y, x + width, y + height)`
    pub fn bbox(&self) -> [f64; 4] {
        [self.x, self.y, self.right(), self.bottom()]
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// Overlapping region, or `None` if the rectangles only touch or are apart
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right > left && bottom > top {
            Some(Rect::from_corners(left, top, right, bottom))
        } else {
            None
        }
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Intersection area over union area; 0.0 when disjoint
    pub fn iou(&self, other: &Rect) -> f64 {
        let Some(intersection) = self.intersection(other) else {
            return 0.0;
        };
        let overlap = intersection.area();
        let union = self.area() + other.area() - overlap;
        if union <= 0.0 {
            0.0
        } else {
            overlap / union
        }
    }

    /// Component-wise comparison of the bounding boxes within `tolerance`
    pub fn approx_eq(&self, other: &Rect, tolerance: f64) -> bool {
        self.bbox().iter().zip(other.bbox()).all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

/// Union of every rectangle, `None` for an empty input
pub fn union_all<I: IntoIterator<Item = Rect>>(rects: I) -> Option<Rect> {
    rects.into_iter().reduce(|acc, rect| acc.union(&rect))
}

/// Pixel dimensions of a rasterized page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Page dimensions in PDF points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageDimensions {
    pub width: f64,
    pub height: f64,
}

impl From<zonemark_engine::PageSize> for PageDimensions {
    fn from(size: zonemark_engine::PageSize) -> Self {
        Self { width: size.width_pt as f64, height: size.height_pt as f64 }
    }
}

fn scale_factors(image: ImageSize, page: PageDimensions) -> (f64, f64) {
    let sx = if image.width == 0 { 1.0 } else { page.width / image.width as f64 };
    let sy = if image.height == 0 { 1.0 } else { page.height / image.height as f64 };
    (sx, sy)
}

/// Map a detector box from image pixels to document space
///
/// Each axis is scaled independently by `page / image`; no flip is applied.
pub fn to_document_space(image_box: Rect, image: ImageSize, page: PageDimensions) -> Rect {
    let (sx, sy) = scale_factors(image, page);
    Rect::new(image_box.x * sx, image_box.y * sy, image_box.width * sx, image_box.height * sy)
}

/// Inverse of [`to_document_space`]
pub fn to_image_space(document_box: Rect, image: ImageSize, page: PageDimensions) -> Rect {
    let (sx, sy) = scale_factors(image, page);
    Rect::new(
        document_box.x / sx,
        document_box.y / sy,
        document_box.width / sx,
        document_box.height / sy,
    )
}

/// Conversion between the zoomed, bottom-left-origin display and document space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenTransform {
    pub zoom: f64,
    pub page_height: f64,
}

impl ScreenTransform {
    pub fn new(zoom: f64, page_height: f64) -> Self {
        Self { zoom, page_height }
    }

    fn effective_zoom(&self) -> f64 {
        if self.zoom > 0.0 {
            self.zoom
        } else {
            1.0
        }
    }

    /// `y = page_height - screen_y / zoom - height / zoom`
    pub fn to_document(&self, screen: Rect) -> Rect {
        let zoom = self.effective_zoom();
        let width = screen.width / zoom;
        let height = screen.height / zoom;
        Rect::new(screen.x / zoom, self.page_height - screen.y / zoom - height, width, height)
    }

    pub fn to_screen(&self, document: Rect) -> Rect {
        let zoom = self.effective_zoom();
        Rect::new(
            document.x * zoom,
            (self.page_height - document.y - document.height) * zoom,
            document.width * zoom,
            document.height * zoom,
        )
    }
}
