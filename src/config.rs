// THEORY:
// Configuration is split the same way the pipeline is: a region of interest, the
// image processing parameters that turn a frame into blobs, and the tracking
// parameters that turn blobs into persistent tracks. A `PipelineConfig` is a
// snapshot; the pipeline re-reads it every cycle and only swaps it in after
// `validate` has accepted it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core_modules::geometry::Roi;
use crate::error::{Result, TrackingError};

/// Largest accepted morphological kernel size.
pub const MAX_MORPH_KERNEL: u8 = 10;

/// Largest accepted blur radius.
pub const MAX_BLUR_RADIUS: u32 = 50;

/// Which single channel of the frame is thresholded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Gray,
    Red,
    Green,
    Blue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMode {
    #[default]
    Global,
    Adaptive,
}

/// Neighbourhood weighting for adaptive thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdaptiveMethod {
    Mean,
    #[default]
    Gaussian,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub method: AdaptiveMethod,
    /// Neighbourhood edge length. Even values are rounded up; the minimum is 3.
    pub block_size: u32,
    /// Constant subtracted from the local mean.
    pub c: f32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            method: AdaptiveMethod::Gaussian,
            block_size: 11,
            c: 2.0,
        }
    }
}

impl AdaptiveConfig {
    /// The odd block size actually used, at least 3.
    pub fn effective_block_size(&self) -> u32 {
        let size = if self.block_size % 2 == 0 {
            self.block_size + 1
        } else {
            self.block_size
        };
        size.max(3)
    }
}

/// Parameters of the frame processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub channel: Channel,
    /// Gaussian blur radius in pixels, at most 50; 0 disables blurring.
    pub blur_radius: u32,
    pub threshold_mode: ThresholdMode,
    /// Global threshold cutoff; pixels strictly above it become foreground.
    pub threshold_value: u8,
    pub invert: bool,
    pub adaptive: AdaptiveConfig,
    /// Opening kernel size in `[0, 10]`; 0 disables.
    pub morphological_open: u8,
    /// Closing kernel size in `[0, 10]`; 0 disables.
    pub morphological_close: u8,
    /// Inclusive lower bound on blob pixel area.
    pub min_area: u32,
    /// Inclusive upper bound on blob pixel area.
    pub max_area: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            channel: Channel::Gray,
            blur_radius: 1,
            threshold_mode: ThresholdMode::Global,
            threshold_value: 127,
            invert: false,
            adaptive: AdaptiveConfig::default(),
            morphological_open: 0,
            morphological_close: 0,
            min_area: 200,
            max_area: 20000,
        }
    }
}

impl ProcessingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_area > self.max_area {
            return Err(TrackingError::InvalidAreaBounds {
                min_area: self.min_area,
                max_area: self.max_area,
            });
        }
        if self.blur_radius > MAX_BLUR_RADIUS {
            return Err(TrackingError::parameter(
                "blur_radius",
                format!("{} exceeds {}", self.blur_radius, MAX_BLUR_RADIUS),
            ));
        }
        if self.morphological_open > MAX_MORPH_KERNEL {
            return Err(TrackingError::parameter(
                "morphological_open",
                format!("{} exceeds {}", self.morphological_open, MAX_MORPH_KERNEL),
            ));
        }
        if self.morphological_close > MAX_MORPH_KERNEL {
            return Err(TrackingError::parameter(
                "morphological_close",
                format!("{} exceeds {}", self.morphological_close, MAX_MORPH_KERNEL),
            ));
        }
        if !self.adaptive.c.is_finite() {
            return Err(TrackingError::parameter("adaptive.c", "must be finite"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    Simple,
    #[default]
    Predictive,
}

/// Fixed noise model of the constant-velocity Kalman filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Process noise on centre and height, pixels per step.
    pub position_std: f64,
    /// Process noise on velocities, pixels per step squared.
    pub velocity_std: f64,
    /// Process noise on the aspect ratio.
    pub aspect_std: f64,
    /// Measurement noise on centre and height, pixels.
    pub measurement_std: f64,
    /// Measurement noise on the aspect ratio.
    pub aspect_measurement_std: f64,
    /// Initial uncertainty of an unobserved velocity.
    pub initial_velocity_std: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            position_std: 1.0,
            velocity_std: 0.1,
            aspect_std: 0.01,
            measurement_std: 1.0,
            aspect_measurement_std: 0.1,
            initial_velocity_std: 10.0,
        }
    }
}

impl KalmanConfig {
    pub fn validate(&self) -> Result<()> {
        let values = [
            ("position_std", self.position_std),
            ("velocity_std", self.velocity_std),
            ("aspect_std", self.aspect_std),
            ("measurement_std", self.measurement_std),
            ("aspect_measurement_std", self.aspect_measurement_std),
            ("initial_velocity_std", self.initial_velocity_std),
        ];
        for (name, value) in values {
            if !value.is_finite() || value <= 0.0 {
                return Err(TrackingError::TrackerInit(format!(
                    "kalman.{name} must be finite and positive, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Thresholds shared by both trackers. Snapshotted once per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub tracker: TrackerKind,
    /// When false, blobs are numbered 0..n in discovery order every cycle.
    pub track_ids: bool,
    /// Detections at or above this confidence take part in the first association pass.
    pub high_threshold: f32,
    /// Detections below `high_threshold` but at or above this floor take part in the second.
    pub low_threshold: f32,
    /// Minimum IOU for a pairing in the first pass.
    pub match_threshold: f64,
    /// Minimum IOU for a pairing in the second pass.
    pub low_match_threshold: f64,
    /// Consecutive unmatched cycles a lost track survives.
    pub track_buffer: u32,
    /// Detections with a smaller bounding box area are not tracked.
    pub min_box_area: f64,
    /// Promote newly spawned tracks to confirmed on the cycle they appear.
    pub confirm_new_tracks: bool,
    pub kalman: KalmanConfig,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerKind::Predictive,
            track_ids: true,
            // 200 / 20000: the smallest blob the default area window admits.
            high_threshold: 0.01,
            low_threshold: 0.0,
            match_threshold: 0.2,
            low_match_threshold: 0.15,
            track_buffer: 30,
            min_box_area: 10.0,
            confirm_new_tracks: true,
            kalman: KalmanConfig::default(),
        }
    }
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("high_threshold", self.high_threshold as f64),
            ("low_threshold", self.low_threshold as f64),
            ("match_threshold", self.match_threshold),
            ("low_match_threshold", self.low_match_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(TrackingError::parameter(
                    name,
                    format!("{value} is outside [0, 1]"),
                ));
            }
        }
        if self.low_threshold > self.high_threshold {
            return Err(TrackingError::parameter(
                "low_threshold",
                "must not exceed high_threshold",
            ));
        }
        if !self.min_box_area.is_finite() || self.min_box_area < 0.0 {
            return Err(TrackingError::parameter(
                "min_box_area",
                "must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// The full configuration snapshot consumed by a pipeline cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub roi: Roi,
    pub processing: ProcessingConfig,
    pub tracking: TrackingConfig,
}

impl PipelineConfig {
    /// Checks every bound that must hold before a cycle may run. Kalman noise is
    /// checked by the predictive tracker itself so a bad noise model degrades to the
    /// simple tracker instead of rejecting the whole configuration.
    pub fn validate(&self) -> Result<()> {
        self.roi.validate()?;
        self.processing.validate()?;
        self.tracking.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
