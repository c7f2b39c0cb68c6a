// THEORY:
// A `Blob` is one foreground region detected in one frame. It is a "dumb" data
// container: the frame processor creates it, the trackers read it, and nobody
// mutates it. A `TrackedBlob` is the record handed to downstream collaborators: the
// same geometric fields, plus the persistent identity a tracker attached to them.

use serde::{Deserialize, Serialize};

use crate::core_modules::geometry::{Centroid, PixelRect, Polygon};

/// Lifecycle of a track inside the predictive tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    /// Spawned this cycle and not yet confirmed by an association.
    Tentative,
    /// Matched on the most recent cycle.
    Confirmed,
    /// Unmatched, but still inside the track buffer.
    Lost,
}

/// A single foreground region detected in one frame, in ROI-local pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub bbox: PixelRect,
    /// Centroid from the region's spatial moments, not the box midpoint.
    pub centroid: Centroid,
    /// Number of foreground pixels in the region.
    pub area: u32,
    /// `min(1, area / max_area)`.
    pub confidence: f32,
    /// Simplified outer contour.
    pub polygon: Polygon,
}

/// A detection carrying a persistent identity, as emitted once per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedBlob {
    pub id: u64,
    pub bbox: PixelRect,
    pub centroid: Centroid,
    pub area: u32,
    pub polygon: Polygon,
    pub confidence: f32,
    pub state: TrackState,
    /// Consecutive cycles without a matching detection; zero when freshly observed.
    pub frames_since_seen: u32,
    /// Cycles since the track was created; zero on the cycle it appears.
    pub age: u32,
}

impl TrackedBlob {
    /// Wraps a freshly observed blob.
    pub fn observed(id: u64, blob: &Blob) -> Self {
        Self {
            id,
            bbox: blob.bbox,
            centroid: blob.centroid,
            area: blob.area,
            polygon: blob.polygon.clone(),
            confidence: blob.confidence,
            state: TrackState::Confirmed,
            frames_since_seen: 0,
            age: 0,
        }
    }

    /// Centre normalized to `[0, 1]` of the ROI, rounded to three decimals.
    pub fn center_normalized(&self, roi_width: u32, roi_height: u32) -> (f64, f64) {
        (
            normalize(self.centroid.x, roi_width),
            normalize(self.centroid.y, roi_height),
        )
    }

    /// Bounding box `(x, y, w, h)` normalized to `[0, 1]` of the ROI.
    pub fn bbox_normalized(&self, roi_width: u32, roi_height: u32) -> (f64, f64, f64, f64) {
        (
            normalize(self.bbox.x as f64, roi_width),
            normalize(self.bbox.y as f64, roi_height),
            normalize(self.bbox.w as f64, roi_width),
            normalize(self.bbox.h as f64, roi_height),
        )
    }
}

fn normalize(value: f64, extent: u32) -> f64 {
    if extent == 0 {
        return 0.0;
    }
    (value / extent as f64 * 1000.0).round() / 1000.0
}
