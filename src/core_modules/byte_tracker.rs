// THEORY:
// The `byte_tracker` module is the primary tracker. It adds object permanence on top of
// the per-frame detections: every track carries a Kalman motion state, so it can be
// followed through crossings and kept alive through short occlusions.
//
// Key architectural principles:
// 1.  **Predict First**: Every track is advanced one step before any detection is looked
//     at. Association compares detections against where tracks *should* be now.
// 2.  **Two Confidence Tiers**: High-confidence detections are matched first against all
//     tracks. Tracks left over get a second chance against low-confidence detections,
//     which can keep an identity alive but never create one.
// 3.  **Lifecycle**:
//     - **Birth**: An unmatched high-confidence detection spawns a `Tentative` track,
//       promoted to `Confirmed` on the spot when `confirm_new_tracks` is set.
//     - **Tracking**: A matched track is `Confirmed` and its counter resets.
//     - **Occlusion**: An unmatched track becomes `Lost` and is still reported, at its
//       predicted position, until its counter exceeds `track_buffer`.
//     - **Death**: Lost tracks past the buffer and tentative tracks that miss a single
//       cycle are removed.
// 4.  **Arena Storage**: Tracks live in a slot vector with a free list. A sorted map
//     from identity to slot gives deterministic iteration order.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::config::{KalmanConfig, TrackingConfig};
use crate::core_modules::association::match_boxes;
use crate::core_modules::blob::{Blob, TrackState, TrackedBlob};
use crate::core_modules::geometry::{BBox, Centroid, Roi};
use crate::core_modules::kalman::{KalmanState, MotionModel};
use crate::core_modules::tracking::{BlobTracker, TrackCounts};
use crate::error::Result;

/// One row of the track table.
#[derive(Debug, Clone)]
struct Track {
    id: u64,
    kalman: KalmanState,
    state: TrackState,
    /// Consecutive cycles without a match.
    frames_since_seen: u32,
    /// Cycles since birth, matched or not.
    age: u32,
    /// The most recent detection associated with this track.
    last: Blob,
}

impl Track {
    fn observe(&mut self, model: &MotionModel, blob: &Blob) {
        model.update(&mut self.kalman, &blob.bbox.to_bbox());
        self.state = TrackState::Confirmed;
        self.frames_since_seen = 0;
        self.last = blob.clone();
    }

    fn to_tracked_blob(&self) -> TrackedBlob {
        if self.state != TrackState::Lost {
            let mut tracked = TrackedBlob::observed(self.id, &self.last);
            tracked.state = self.state;
            tracked.age = self.age;
            return tracked;
        }
        let predicted = self.kalman.bbox();
        let (cx, cy) = predicted.center();
        TrackedBlob {
            id: self.id,
            bbox: predicted.to_pixel_rect(),
            centroid: Centroid::new(cx, cy),
            area: self.last.area,
            polygon: self.last.polygon.clone(),
            confidence: self.last.confidence,
            state: TrackState::Lost,
            frames_since_seen: self.frames_since_seen,
            age: self.age,
        }
    }
}

/// Slots of unmatched tracks and indices of unmatched detections after one pass.
struct PassResult {
    unmatched_tracks: Vec<usize>,
    unmatched_detections: Vec<usize>,
}

pub struct ByteTracker {
    model: MotionModel,
    slots: Vec<Option<Track>>,
    free: Vec<usize>,
    /// Identity -> slot, iterated in identity order.
    by_id: BTreeMap<u64, usize>,
    next_id: u64,
}

impl ByteTracker {
    /// Fails if the noise model is unusable.
    pub fn new(kalman: &KalmanConfig) -> Result<Self> {
        Ok(Self {
            model: MotionModel::new(kalman)?,
            slots: Vec::new(),
            free: Vec::new(),
            by_id: BTreeMap::new(),
            next_id: 0,
        })
    }

    /// Replaces the noise model. Existing tracks keep their state.
    pub fn retune(&mut self, kalman: &KalmanConfig) -> Result<()> {
        self.model = MotionModel::new(kalman)?;
        Ok(())
    }

    fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.by_id
            .values()
            .filter_map(|&slot| self.slots[slot].as_ref())
    }

    /// Slots of the tracks matching `keep`, in identity order.
    fn pool(&self, keep: impl Fn(&Track) -> bool) -> Vec<usize> {
        self.by_id
            .values()
            .copied()
            .filter(|&slot| self.slots[slot].as_ref().is_some_and(&keep))
            .collect()
    }

    fn spawn(&mut self, blob: &Blob, confirm: bool) {
        let id = self.next_id;
        self.next_id += 1;
        let track = Track {
            id,
            kalman: self.model.initiate(&blob.bbox.to_bbox()),
            state: if confirm {
                TrackState::Confirmed
            } else {
                TrackState::Tentative
            },
            frames_since_seen: 0,
            age: 0,
            last: blob.clone(),
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(track);
                slot
            }
            None => {
                self.slots.push(Some(track));
                self.slots.len() - 1
            }
        };
        self.by_id.insert(id, slot);
        debug!(id, "track born");
    }

    fn remove_slot(&mut self, slot: usize) {
        if let Some(track) = self.slots[slot].take() {
            self.by_id.remove(&track.id);
            self.free.push(slot);
            debug!(id = track.id, "track removed");
        }
    }

    /// Associates the tracks in `pool` with `candidates` (indices into `detections`)
    /// and applies the matches.
    fn associate(
        &mut self,
        pool: &[usize],
        candidates: &[usize],
        detections: &[Blob],
        threshold: f64,
    ) -> PassResult {
        let predicted: Vec<BBox> = pool
            .iter()
            .map(|&slot| {
                self.slots[slot]
                    .as_ref()
                    .map_or_else(BBox::default, |t| t.kalman.bbox())
            })
            .collect();
        let observed: Vec<BBox> = candidates
            .iter()
            .map(|&i| detections[i].bbox.to_bbox())
            .collect();

        let matching = match_boxes(&predicted, &observed, threshold);
        trace!(
            tracks = pool.len(),
            detections = candidates.len(),
            matched = matching.matches.len(),
            "association pass"
        );

        for &(a, b) in &matching.matches {
            if let Some(track) = self.slots[pool[a]].as_mut() {
                track.observe(&self.model, &detections[candidates[b]]);
            }
        }

        PassResult {
            unmatched_tracks: matching.unmatched_a.iter().map(|&a| pool[a]).collect(),
            unmatched_detections: matching.unmatched_b.iter().map(|&b| candidates[b]).collect(),
        }
    }
}

impl BlobTracker for ByteTracker {
    fn predict_and_update(
        &mut self,
        detections: &[Blob],
        config: &TrackingConfig,
        _roi: &Roi,
    ) -> Vec<TrackedBlob> {
        // --- 1. Predict ---
        for track in self.slots.iter_mut().flatten() {
            if track.state != TrackState::Confirmed {
                track.kalman.freeze_height_velocity();
            }
            self.model.predict(&mut track.kalman);
            track.age = track.age.saturating_add(1);
        }
        let degenerate = self.pool(|t| !t.kalman.bbox().is_finite());
        for slot in degenerate {
            trace!("dropping track with non-finite state");
            self.remove_slot(slot);
        }

        // --- 2. Tier split ---
        let mut high = Vec::new();
        let mut low = Vec::new();
        for (i, blob) in detections.iter().enumerate() {
            if (blob.bbox.area() as f64) < config.min_box_area {
                continue;
            }
            if blob.confidence >= config.high_threshold {
                high.push(i);
            } else if blob.confidence >= config.low_threshold {
                low.push(i);
            }
        }

        // --- 3. First association: every established track vs high confidence ---
        let established = self.pool(|t| t.state != TrackState::Tentative);
        let first = self.associate(&established, &high, detections, config.match_threshold);

        // --- 4. Second association: leftovers vs low confidence ---
        let second = self.associate(
            &first.unmatched_tracks,
            &low,
            detections,
            config.low_match_threshold,
        );

        // --- 5. Unconfirmed tracks get the remaining high confidence detections ---
        let tentative = self.pool(|t| t.state == TrackState::Tentative);
        let third = self.associate(
            &tentative,
            &first.unmatched_detections,
            detections,
            config.match_threshold,
        );

        // --- 6. Bookkeeping ---
        for slot in second.unmatched_tracks {
            let expired = match self.slots[slot].as_mut() {
                Some(track) => {
                    track.frames_since_seen += 1;
                    track.state = TrackState::Lost;
                    track.frames_since_seen > config.track_buffer
                }
                None => false,
            };
            if expired {
                self.remove_slot(slot);
            }
        }
        for slot in third.unmatched_tracks {
            self.remove_slot(slot);
        }

        // --- 7. Birth ---
        for i in third.unmatched_detections {
            self.spawn(&detections[i], config.confirm_new_tracks);
        }

        // --- 8. Emit ---
        self.tracks()
            .filter(|t| t.state != TrackState::Tentative)
            .map(Track::to_tracked_blob)
            .collect()
    }

    fn clear_ids(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.by_id.clear();
        self.next_id = 0;
    }

    fn counts(&self) -> TrackCounts {
        let lost = self
            .tracks()
            .filter(|t| t.state == TrackState::Lost)
            .count();
        TrackCounts {
            active: self.by_id.len() - lost,
            lost,
            next_id: self.next_id,
        }
    }
}
