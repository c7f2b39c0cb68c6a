// THEORY:
// Both trackers expose one capability: take this cycle's detections and return the
// persistent tracked blobs. `TrackerEngine` is the closed set of implementations the
// pipeline can hold, selected from configuration and dispatched with a plain `match`.
//
// Key architectural principles:
// 1.  **One Interface**: `BlobTracker` is the only surface the pipeline talks to.
// 2.  **Graceful Degradation**: If the predictive tracker cannot be built from the
//     configured noise model, the engine comes up as the simple tracker instead.

use tracing::{info, warn};

use crate::config::{KalmanConfig, TrackerKind, TrackingConfig};
use crate::core_modules::blob::{Blob, TrackedBlob};
use crate::core_modules::byte_tracker::ByteTracker;
use crate::core_modules::geometry::Roi;
use crate::core_modules::tracker::SimpleTracker;

/// Track table occupancy reported by a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackCounts {
    /// Tracks matched on the most recent cycle (plus unconfirmed ones).
    pub active: usize,
    /// Tracks kept alive inside the buffer without a match.
    pub lost: usize,
    /// The identity the next new track will receive.
    pub next_id: u64,
}

pub trait BlobTracker {
    /// Runs one tracking cycle. `roi` is the region the detections were measured in.
    fn predict_and_update(
        &mut self,
        detections: &[Blob],
        config: &TrackingConfig,
        roi: &Roi,
    ) -> Vec<TrackedBlob>;

    /// Forgets every track and restarts identity allocation at zero.
    fn clear_ids(&mut self);

    fn counts(&self) -> TrackCounts;
}

pub enum TrackerEngine {
    Simple(SimpleTracker),
    Predictive(ByteTracker),
}

impl TrackerEngine {
    /// Builds the engine requested by `config.tracker`.
    pub fn new(config: &TrackingConfig) -> Self {
        match config.tracker {
            TrackerKind::Simple => TrackerEngine::Simple(SimpleTracker::new()),
            TrackerKind::Predictive => match ByteTracker::new(&config.kalman) {
                Ok(tracker) => TrackerEngine::Predictive(tracker),
                Err(e) => {
                    warn!(error = %e, "predictive tracker unavailable, using simple tracker");
                    TrackerEngine::Simple(SimpleTracker::new())
                }
            },
        }
    }

    /// The implementation actually running, which may differ from the requested one.
    pub fn kind(&self) -> TrackerKind {
        match self {
            TrackerEngine::Simple(_) => TrackerKind::Simple,
            TrackerEngine::Predictive(_) => TrackerKind::Predictive,
        }
    }

    /// Swaps the noise model of a running predictive tracker, keeping its tracks. An
    /// invalid model is ignored and the previous one stays in use.
    pub fn retune(&mut self, kalman: &KalmanConfig) {
        if let TrackerEngine::Predictive(tracker) = self {
            match tracker.retune(kalman) {
                Ok(()) => info!("kalman noise model updated"),
                Err(e) => warn!(error = %e, "kalman noise model rejected, keeping previous"),
            }
        }
    }
}

impl BlobTracker for TrackerEngine {
    fn predict_and_update(
        &mut self,
        detections: &[Blob],
        config: &TrackingConfig,
        roi: &Roi,
    ) -> Vec<TrackedBlob> {
        match self {
            TrackerEngine::Simple(t) => t.predict_and_update(detections, config, roi),
            TrackerEngine::Predictive(t) => t.predict_and_update(detections, config, roi),
        }
    }

    fn clear_ids(&mut self) {
        match self {
            TrackerEngine::Simple(t) => t.clear_ids(),
            TrackerEngine::Predictive(t) => t.clear_ids(),
        }
    }

    fn counts(&self) -> TrackCounts {
        match self {
            TrackerEngine::Simple(t) => t.counts(),
            TrackerEngine::Predictive(t) => t.counts(),
        }
    }
}
