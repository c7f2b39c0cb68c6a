// THEORY:
// This file is the main entry point for the `blob_tracker` library crate. It turns a
// stream of camera frames into a stream of persistently identified foreground blobs.
//
// The public surface is deliberately small:
// - `TrackingPipeline` runs one synchronous cycle per frame.
// - `TrackingSession` runs a pipeline as a tokio task behind a drop-stale frame slot.
// - `PipelineConfig` and its parts describe the ROI, the image processing and the
//   tracking parameters.
// The building blocks in `core_modules` stay public for callers that want a single
// stage, e.g. the frame processor alone.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod session;

pub use config::{
    AdaptiveConfig, AdaptiveMethod, Channel, KalmanConfig, PipelineConfig, ProcessingConfig,
    ThresholdMode, TrackerKind, TrackingConfig,
};
pub use core_modules::blob::{Blob, TrackState, TrackedBlob};
pub use core_modules::geometry::{BBox, Centroid, PixelRect, Point, Polygon, Roi, RoiCrop};
pub use error::{Result, TrackingError};
pub use pipeline::{CycleOutput, TrackerStats, TrackingPipeline};
pub use session::{FrameProducer, TrackingSession};
