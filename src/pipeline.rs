// THEORY:
// The `pipeline` module is the top-level API for one tracking session. It owns the
// configuration snapshot, the selected tracker and the cycle counter, and it drives one
// cycle per frame: frame processor, then tracker, then an immutable output record.
//
// Key architectural principles:
// 1.  **One Cycle at a Time**: Every entry point takes `&mut self`, so a cycle, a
//     configuration swap and an identity clear can never interleave.
// 2.  **Validated Swaps**: A new configuration is checked before it replaces the old one.
//     A rejected configuration leaves the running one untouched.
// 3.  **Missing Frames Age Tracks**: A cycle without a frame still runs the tracker with
//     no detections, so predictions advance and occlusion counters grow.

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, TrackerKind};
use crate::core_modules::blob::{Blob, TrackedBlob};
use crate::core_modules::blob_detector;
use crate::core_modules::geometry::Roi;
use crate::core_modules::tracking::{BlobTracker, TrackerEngine};
use crate::error::Result;

/// The result of one pipeline cycle.
#[derive(Debug, Clone)]
pub struct CycleOutput {
    /// Zero-based index of the cycle, counting frameless cycles too.
    pub frame_index: u64,
    /// The region the blobs are expressed in, after clipping to the frame.
    pub roi: Roi,
    pub blobs: Vec<TrackedBlob>,
    /// Binary foreground mask of the ROI. `None` for a cycle without a frame.
    pub mask: Option<GrayImage>,
}

/// Counters describing the tracker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    /// The tracker asked for by the configuration.
    pub requested: TrackerKind,
    /// The tracker actually running.
    pub running: TrackerKind,
    pub active_tracks: usize,
    pub lost_tracks: usize,
    pub next_id: u64,
    pub cycles: u64,
    /// Frames replaced before they were processed. Only a session drops frames.
    pub dropped_frames: u64,
}

pub struct TrackingPipeline {
    config: PipelineConfig,
    engine: TrackerEngine,
    cycles: u64,
    /// ROI of the last cycle that had a frame, clipped to that frame.
    last_roi: Roi,
}

impl TrackingPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let engine = TrackerEngine::new(&config.tracking);
        info!(
            requested = ?config.tracking.tracker,
            running = ?engine.kind(),
            "tracking pipeline created"
        );
        Ok(Self {
            last_roi: config.roi,
            config,
            engine,
            cycles: 0,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tracker_kind(&self) -> TrackerKind {
        self.engine.kind()
    }

    /// Detects blobs in `frame` and associates them with the existing tracks.
    pub fn process_frame(&mut self, frame: &DynamicImage) -> CycleOutput {
        let roi = self
            .config
            .roi
            .constrain_to(frame.width(), frame.height())
            .unwrap_or(self.config.roi);
        self.last_roi = roi;
        let processed = blob_detector::process_frame(frame, &roi, &self.config.processing);
        let blobs = self.track(&processed.blobs, &roi);
        self.finish(roi, blobs, Some(processed.mask), processed.blobs.len())
    }

    /// Runs a cycle for which no frame was available. The ROI is the one used by the
    /// last frame, so the tracker gate stays the same.
    pub fn skip_frame(&mut self) -> CycleOutput {
        let roi = self.last_roi;
        let blobs = self.track(&[], &roi);
        self.finish(roi, blobs, None, 0)
    }

    fn track(&mut self, detections: &[Blob], roi: &Roi) -> Vec<TrackedBlob> {
        if !self.config.tracking.track_ids {
            return detections
                .iter()
                .enumerate()
                .map(|(i, blob)| TrackedBlob::observed(i as u64, blob))
                .collect();
        }
        self.engine
            .predict_and_update(detections, &self.config.tracking, roi)
    }

    fn finish(
        &mut self,
        roi: Roi,
        blobs: Vec<TrackedBlob>,
        mask: Option<GrayImage>,
        detections: usize,
    ) -> CycleOutput {
        let frame_index = self.cycles;
        self.cycles += 1;
        debug!(
            frame_index,
            detections,
            tracks = blobs.len(),
            has_frame = mask.is_some(),
            "cycle complete"
        );
        CycleOutput {
            frame_index,
            roi,
            blobs,
            mask,
        }
    }

    /// Replaces the configuration. A change of tracker kind rebuilds the tracker with a
    /// fresh identity space; a new noise model is applied to the running tracker.
    pub fn update_config(&mut self, config: PipelineConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "configuration rejected, keeping previous");
            return Err(e);
        }

        if config.tracking.tracker != self.config.tracking.tracker {
            self.engine = TrackerEngine::new(&config.tracking);
            info!(
                requested = ?config.tracking.tracker,
                running = ?self.engine.kind(),
                "tracker switched"
            );
        } else if config.tracking.kalman != self.config.tracking.kalman {
            self.engine.retune(&config.tracking.kalman);
        }

        // Tracks are not advanced while identities are off, so they would resume stale.
        if self.config.tracking.track_ids && !config.tracking.track_ids {
            self.engine.clear_ids();
            info!("identity tracking disabled, tracks dropped");
        }
        if config.roi != self.config.roi {
            self.last_roi = config.roi;
        }

        self.config = config;
        info!("configuration updated");
        Ok(())
    }

    /// Forgets every track. The next new track gets identity 0.
    pub fn clear_ids(&mut self) {
        self.engine.clear_ids();
        info!("track identities cleared");
    }

    pub fn stats(&self) -> TrackerStats {
        let counts = self.engine.counts();
        TrackerStats {
            requested: self.config.tracking.tracker,
            running: self.engine.kind(),
            active_tracks: counts.active,
            lost_tracks: counts.lost,
            next_id: counts.next_id,
            cycles: self.cycles,
            dropped_frames: 0,
        }
    }
}
