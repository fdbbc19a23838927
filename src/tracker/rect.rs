//! Bounding boxes and overlap.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates, stored top-left + size (TLWH).
///
/// Detectors usually speak TLBR (two corners); the motion model works in
/// XYAH (center, aspect ratio `w / h`, height).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box spanning the corners `(x1, y1)` and `(x2, y2)`.
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    #[inline]
    pub fn from_xyah(cx: f32, cy: f32, aspect_ratio: f32, height: f32) -> Self {
        let width = aspect_ratio * height;
        Self::new(cx - 0.5 * width, cy - 0.5 * height, width, height)
    }

    #[inline]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.right(), self.bottom()]
    }

    #[inline]
    pub fn to_tlwh(&self) -> [f32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    /// Center, aspect ratio and height. A flat box reports aspect ratio 0.
    #[inline]
    pub fn to_xyah(&self) -> [f32; 4] {
        let (cx, cy) = self.center();
        let aspect_ratio = if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        };
        [cx, cy, aspect_ratio, self.height]
    }

    #[inline]
    pub(crate) fn to_xyah_f64(&self) -> [f64; 4] {
        self.to_xyah().map(f64::from)
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (self.x + 0.5 * self.width, self.y + 0.5 * self.height)
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Finite coordinates and a positive extent.
    pub fn is_valid(&self) -> bool {
        self.to_tlwh().iter().all(|v| v.is_finite()) && self.width > 0.0 && self.height > 0.0
    }

    /// Area shared with `other`, zero when they do not touch.
    pub fn intersection(&self, other: &Rect) -> f32 {
        let w = self.right().min(other.right()) - self.x.max(other.x);
        let h = self.bottom().min(other.bottom()) - self.y.max(other.y);
        w.max(0.0) * h.max(0.0)
    }

    /// Intersection over union, in `[0, 1]`.
    pub fn iou(&self, other: &Rect) -> f32 {
        let shared = self.intersection(other);
        let union = self.area() + other.area() - shared;
        if union > 0.0 { shared / union } else { 0.0 }
    }
}

/// IoU of every pair, rows from `rows` and columns from `cols`.
pub fn iou_batch(rows: &[Rect], cols: &[Rect]) -> Array2<f32> {
    Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| rows[i].iou(&cols[j]))
}
