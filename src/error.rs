use thiserror::Error;

/// Errors surfaced by the detection and tracking pipeline.
///
/// Configuration errors are raised before a cycle runs; the previously accepted
/// configuration stays in effect. Numeric problems inside the Kalman filter are
/// recovered locally and never reach this type.
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Invalid ROI {w}x{h} at ({x}, {y}): width and height must be positive")]
    InvalidRoi { x: u32, y: u32, w: u32, h: u32 },

    #[error("Invalid area bounds: min_area {min_area} exceeds max_area {max_area}")]
    InvalidAreaBounds { min_area: u32, max_area: u32 },

    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Predictive tracker initialisation failed: {0}")]
    TrackerInit(String),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tracking session is closed")]
    SessionClosed,
}

impl TrackingError {
    pub(crate) fn parameter(name: &'static str, reason: impl Into<String>) -> Self {
        TrackingError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Result type for tracking operations.
pub type Result<T> = std::result::Result<T, TrackingError>;
