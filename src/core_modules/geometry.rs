// THEORY:
// The `geometry` module holds the value types every other layer speaks in: integer
// pixel points and rectangles produced by the frame processor, floating point boxes
// used by the motion model and the association engine, and the region of interest
// that bounds the coordinate space of a processing cycle.
//
// Key architectural principles:
// 1.  **Plain Values**: Everything here is `Copy` (except polygons) and carries no
//     behaviour beyond arithmetic on itself.
// 2.  **Two Box Flavours**: `PixelRect` is what the image pipeline measures, `BBox` is
//     what the tracker estimates. Conversions between them are explicit.
// 3.  **ROI Clamping**: A `Roi` can be built from per-edge crop amounts. The crops are
//     clamped so the remaining region is never empty.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};

/// Smallest edge length a crop-derived ROI may shrink to.
const MIN_ROI_EDGE: u32 = 10;

/// An integer pixel coordinate, used for polygon vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A sub-pixel position, used for centroids.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Centroid {
    pub x: f64,
    pub y: f64,
}

impl Centroid {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Centroid) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// A closed polygon; the last vertex connects back to the first.
pub type Polygon = Vec<Point>;

/// An axis-aligned rectangle in integer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn to_bbox(&self) -> BBox {
        BBox::new(self.x as f64, self.y as f64, self.w as f64, self.h as f64)
    }
}

/// An axis-aligned rectangle in continuous coordinates (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Builds a box from the motion model's `[cx, cy, aspect, height]` measurement.
    pub fn from_xyah(cx: f64, cy: f64, aspect: f64, height: f64) -> Self {
        let w = aspect * height;
        Self::new(cx - w / 2.0, cy - height / 2.0, w, height)
    }

    /// Returns `[cx, cy, aspect, height]` with `aspect = w / h`.
    pub fn to_xyah(&self) -> [f64; 4] {
        let (cx, cy) = self.center();
        let aspect = if self.h > 0.0 { self.w / self.h } else { 0.0 };
        [cx, cy, aspect, self.h]
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn intersection_area(&self, other: &BBox) -> f64 {
        let l = self.x.max(other.x);
        let r = (self.x + self.w).min(other.x + other.w);
        let t = self.y.max(other.y);
        let b = (self.y + self.h).min(other.y + other.h);
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    /// Intersection-over-Union. Two empty boxes have an IOU of zero.
    pub fn iou(&self, other: &BBox) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= f64::EPSILON {
            return 0.0;
        }
        inter / union
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
    }

    /// Rounds to the nearest pixel rectangle. Negative extents collapse to zero.
    pub fn to_pixel_rect(&self) -> PixelRect {
        PixelRect {
            x: self.x.round() as i32,
            y: self.y.round() as i32,
            w: self.w.max(0.0).round() as u32,
            h: self.h.max(0.0).round() as u32,
        }
    }
}

/// Pixels removed from each edge of the frame to derive a ROI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiCrop {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// The rectangular sub-area of the source frame subject to processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    /// A locked ROI ignores crop edits.
    pub locked: bool,
}

impl Default for Roi {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            w: 640,
            h: 480,
            locked: false,
        }
    }
}

impl Roi {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Result<Self> {
        let roi = Self {
            x,
            y,
            w,
            h,
            locked: false,
        };
        roi.validate()?;
        Ok(roi)
    }

    /// A ROI covering the whole frame.
    pub fn full_frame(frame_width: u32, frame_height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            w: frame_width,
            h: frame_height,
            locked: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.w == 0 || self.h == 0 {
            return Err(TrackingError::InvalidRoi {
                x: self.x,
                y: self.y,
                w: self.w,
                h: self.h,
            });
        }
        Ok(())
    }

    pub fn diagonal(&self) -> f64 {
        ((self.w as f64).powi(2) + (self.h as f64).powi(2)).sqrt()
    }

    /// Derives a ROI from edge crops, clamping so at least `min(10, frame edge)` pixels
    /// remain in each direction and the region stays inside the frame.
    pub fn from_crop(crop: RoiCrop, frame_width: u32, frame_height: u32) -> Self {
        let (x, w) = clamp_span(crop.left, crop.right, frame_width);
        let (y, h) = clamp_span(crop.top, crop.bottom, frame_height);
        Self {
            x,
            y,
            w,
            h,
            locked: false,
        }
    }

    /// Applies new edge crops unless the ROI is locked. Returns whether it changed.
    pub fn set_crop(&mut self, crop: RoiCrop, frame_width: u32, frame_height: u32) -> bool {
        if self.locked {
            return false;
        }
        let next = Self::from_crop(crop, frame_width, frame_height);
        let changed = next != *self;
        *self = next;
        changed
    }

    /// The crop amounts that reproduce this ROI inside a frame of the given size.
    pub fn crop(&self, frame_width: u32, frame_height: u32) -> RoiCrop {
        RoiCrop {
            left: self.x,
            top: self.y,
            right: frame_width.saturating_sub(self.x.saturating_add(self.w)),
            bottom: frame_height.saturating_sub(self.y.saturating_add(self.h)),
        }
    }

    /// Clips the ROI to the frame. `None` when nothing of it lies inside the frame.
    pub fn constrain_to(&self, frame_width: u32, frame_height: u32) -> Option<Roi> {
        if self.x >= frame_width || self.y >= frame_height {
            return None;
        }
        let w = self.w.min(frame_width - self.x);
        let h = self.h.min(frame_height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Roi {
            x: self.x,
            y: self.y,
            w,
            h,
            locked: self.locked,
        })
    }
}

/// Returns `(offset, length)` for one axis after clamping both edge crops.
fn clamp_span(near: u32, far: u32, extent: u32) -> (u32, u32) {
    if extent == 0 {
        return (0, 0);
    }
    let min_edge = MIN_ROI_EDGE.min(extent);
    let offset = near.min(extent - min_edge);
    let far_edge = extent.saturating_sub(far);
    let length = far_edge.saturating_sub(offset).max(min_edge).min(extent - offset);
    (offset, length)
}
