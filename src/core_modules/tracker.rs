// THEORY:
// The `tracker` module holds the fallback tracker: nearest-centroid association with
// no motion model and no memory beyond the previous cycle. It is what runs when the
// predictive tracker is not selected or cannot be built.
//
// Key architectural principles:
// 1.  **Greedy Nearest Match**: Detections are visited in order. Each one takes the
//     closest still-unclaimed previous track, if that track lies within the gate.
// 2.  **Gate from the ROI**: The gate is a fixed fraction of the ROI diagonal, so it
//     scales with the processed region and is not user-configurable.
// 3.  **No Grace Period**: A previous track that no detection claims is dropped at
//     once. Occlusion tolerance belongs to the predictive tracker.

use crate::config::TrackingConfig;
use crate::core_modules::blob::{Blob, TrackedBlob};
use crate::core_modules::geometry::{Centroid, Roi};
use crate::core_modules::tracking::{BlobTracker, TrackCounts};

/// Gate as a fraction of the ROI diagonal. 50 px on a 640x480 region.
const GATING_FRACTION: f64 = 0.0625;

/// Identity and last position of one track.
#[derive(Debug, Clone, Copy)]
struct PreviousTrack {
    id: u64,
    centroid: Centroid,
    age: u32,
}

#[derive(Debug, Default)]
pub struct SimpleTracker {
    /// Tracks emitted on the previous cycle.
    previous: Vec<PreviousTrack>,
    /// A counter to ensure each new object gets a unique ID.
    next_id: u64,
}

impl SimpleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum centroid displacement accepted between cycles for this ROI.
    pub fn gating_distance(roi: &Roi) -> f64 {
        roi.diagonal() * GATING_FRACTION
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl BlobTracker for SimpleTracker {
    fn predict_and_update(
        &mut self,
        detections: &[Blob],
        _config: &TrackingConfig,
        roi: &Roi,
    ) -> Vec<TrackedBlob> {
        let gate = Self::gating_distance(roi);
        let mut claimed = vec![false; self.previous.len()];
        let mut output = Vec::with_capacity(detections.len());

        for blob in detections {
            // --- 1. Nearest unclaimed previous track within the gate ---
            let mut best: Option<(usize, f64)> = None;
            for (i, track) in self.previous.iter().enumerate() {
                if claimed[i] {
                    continue;
                }
                let dist = track.centroid.distance(&blob.centroid);
                if dist <= gate && best.is_none_or(|(_, d)| dist < d) {
                    best = Some((i, dist));
                }
            }

            // --- 2. Inherit or allocate an identity ---
            let (id, age) = match best {
                Some((i, _)) => {
                    claimed[i] = true;
                    let track = &self.previous[i];
                    (track.id, track.age.saturating_add(1))
                }
                None => (self.allocate_id(), 0),
            };
            let mut tracked = TrackedBlob::observed(id, blob);
            tracked.age = age;
            output.push(tracked);
        }

        // --- 3. Unclaimed previous tracks are forgotten ---
        self.previous = output
            .iter()
            .map(|t| PreviousTrack {
                id: t.id,
                centroid: t.centroid,
                age: t.age,
            })
            .collect();
        output
    }

    fn clear_ids(&mut self) {
        self.previous.clear();
        self.next_id = 0;
    }

    fn counts(&self) -> TrackCounts {
        TrackCounts {
            active: self.previous.len(),
            lost: 0,
            next_id: self.next_id,
        }
    }
}
