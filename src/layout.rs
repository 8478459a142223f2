//! Page geometry and marker placement

use crate::error::{Error, Result};

/// Simple length type in millimeters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Length(pub f64);

impl Length {
    /// Create a length from millimeters
    pub fn from_mm(mm: f64) -> Self {
        Length(mm)
    }

    /// Create a length from points (1/72 inch)
    pub fn from_pt(pt: f64) -> Self {
        Length(pt * 25.4 / 72.0)
    }

    /// Get the value in millimeters
    pub fn mm(&self) -> f64 {
        self.0
    }

    /// Get the value in points (1/72 inch)
    pub fn pt(&self) -> f64 {
        self.0 * 72.0 / 25.4
    }
}

/// A page's visible area in PDF user space (points, origin bottom-left)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

impl PageBox {
    /// US Letter, used when a page declares no MediaBox
    pub fn letter() -> Self {
        Self::from_array([0.0, 0.0, 612.0, 792.0])
    }

    /// Build from a PDF rectangle `[llx lly urx ury]`, normalising corner order
    pub fn from_array(rect: [f32; 4]) -> Self {
        Self {
            left: rect[0].min(rect[2]),
            bottom: rect[1].min(rect[3]),
            right: rect[0].max(rect[2]),
            top: rect[1].max(rect[3]),
        }
    }

    pub fn width(&self) -> Length {
        Length::from_pt((self.right - self.left) as f64)
    }

    pub fn height(&self) -> Length {
        Length::from_pt((self.top - self.bottom) as f64)
    }
}

/// Square area a marker occupies on the page
///
/// `x`/`y` locate the bottom-left corner of the square in page coordinates,
/// `size` is its edge length in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerBox {
    size: f32,
    x: f32,
    y: f32,
}

impl MarkerBox {
    pub fn new(size: f32, x: f32, y: f32) -> Result<Self> {
        if !size.is_finite() || size < 0.0 {
            return Err(Error::Config(format!("marker size must be a non-negative number, got {}", size)));
        }
        if !x.is_finite() || !y.is_finite() {
            return Err(Error::Config(format!("marker position ({}, {}) is not finite", x, y)));
        }
        Ok(Self { size, x, y })
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    /// Whether the whole square lies on the page
    pub fn fits_within(&self, page: &PageBox) -> bool {
        self.x >= page.left
            && self.y >= page.bottom
            && self.x + self.size <= page.right
            && self.y + self.size <= page.top
    }

    /// `cm` operands mapping the image unit square onto this box
    pub fn image_matrix(&self) -> String {
        format!("{} 0 0 {} {} {}", self.size, self.size, self.x, self.y)
    }
}
