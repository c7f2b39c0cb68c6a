// THEORY:
// The motion model is a constant-velocity Kalman filter over the box state
// `[cx, cy, aspect, height, vcx, vcy, vaspect, vheight]`, observed through the first
// four components. The noise model is fixed for the lifetime of a tracker, so it is
// held once in a `MotionModel` while every track only owns its `KalmanState`
// (mean and covariance). This keeps per-track storage small and flat.
//
// Key architectural principles:
// 1.  **Fixed Sizes**: All matrices are `nalgebra` static matrices; no allocation per step.
// 2.  **Degeneracy is Local**: A singular or non-finite innovation covariance skips the
//     update and keeps the prediction. It is never reported as an error.

use nalgebra::{SMatrix, SVector};
use tracing::trace;

use crate::config::KalmanConfig;
use crate::core_modules::geometry::BBox;
use crate::error::Result;

const STATE_DIM: usize = 8;
const MEASURE_DIM: usize = 4;

type StateVector = SVector<f64, STATE_DIM>;
type StateMatrix = SMatrix<f64, STATE_DIM, STATE_DIM>;
type MeasureVector = SVector<f64, MEASURE_DIM>;
type MeasureMatrix = SMatrix<f64, MEASURE_DIM, MEASURE_DIM>;
type ObservationMatrix = SMatrix<f64, MEASURE_DIM, STATE_DIM>;

/// Per-track filter state.
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanState {
    pub mean: StateVector,
    pub covariance: StateMatrix,
}

impl KalmanState {
    /// The box described by the position part of the mean.
    pub fn bbox(&self) -> BBox {
        BBox::from_xyah(self.mean[0], self.mean[1], self.mean[2], self.mean[3])
    }

    /// Stops the height from drifting while the track is not observed.
    pub fn freeze_height_velocity(&mut self) {
        self.mean[7] = 0.0;
    }
}

/// Shared transition, observation and noise matrices.
#[derive(Debug, Clone)]
pub struct MotionModel {
    transition: StateMatrix,
    observation: ObservationMatrix,
    process_noise: StateMatrix,
    measurement_noise: MeasureMatrix,
    initial_velocity_var: f64,
    initial_aspect_velocity_var: f64,
}

impl MotionModel {
    /// Builds the model, rejecting non-finite or non-positive noise values.
    pub fn new(config: &KalmanConfig) -> Result<Self> {
        config.validate()?;

        let mut transition = StateMatrix::identity();
        for i in 0..MEASURE_DIM {
            transition[(i, i + MEASURE_DIM)] = 1.0;
        }
        let observation = ObservationMatrix::identity();

        let pos = config.position_std.powi(2);
        let vel = config.velocity_std.powi(2);
        let aspect = config.aspect_std.powi(2);
        let process_noise = StateMatrix::from_diagonal(&StateVector::from_column_slice(&[
            pos, pos, aspect, pos, vel, vel, aspect, vel,
        ]));

        let meas = config.measurement_std.powi(2);
        let meas_aspect = config.aspect_measurement_std.powi(2);
        let measurement_noise = MeasureMatrix::from_diagonal(&MeasureVector::new(
            meas,
            meas,
            meas_aspect,
            meas,
        ));

        Ok(Self {
            transition,
            observation,
            process_noise,
            measurement_noise,
            initial_velocity_var: config.initial_velocity_std.powi(2),
            initial_aspect_velocity_var: aspect,
        })
    }

    /// Starts a track at the measured box with zero velocity.
    pub fn initiate(&self, bbox: &BBox) -> KalmanState {
        let z = MeasureVector::from(bbox.to_xyah());
        let mut mean = StateVector::zeros();
        mean.fixed_rows_mut::<MEASURE_DIM>(0).copy_from(&z);

        let mut covariance = StateMatrix::zeros();
        for i in 0..MEASURE_DIM {
            covariance[(i, i)] = self.measurement_noise[(i, i)];
        }
        for i in MEASURE_DIM..STATE_DIM {
            covariance[(i, i)] = self.initial_velocity_var;
        }
        covariance[(6, 6)] = self.initial_aspect_velocity_var;

        KalmanState { mean, covariance }
    }

    /// Advances the state one step.
    pub fn predict(&self, state: &mut KalmanState) {
        state.mean = self.transition * state.mean;
        state.covariance =
            self.transition * state.covariance * self.transition.transpose() + self.process_noise;
    }

    /// Corrects the state with a measured box. Returns `false` and leaves the state
    /// untouched when the innovation covariance cannot be inverted.
    pub fn update(&self, state: &mut KalmanState, bbox: &BBox) -> bool {
        let z = MeasureVector::from(bbox.to_xyah());
        if !z.iter().all(|v| v.is_finite()) {
            trace!("kalman update skipped: non-finite measurement");
            return false;
        }

        let innovation = z - self.observation * state.mean;
        let s = self.observation * state.covariance * self.observation.transpose()
            + self.measurement_noise;
        let Some(s_inv) = s.try_inverse() else {
            trace!("kalman update skipped: singular innovation covariance");
            return false;
        };
        let gain = state.covariance * self.observation.transpose() * s_inv;

        let mean = state.mean + gain * innovation;
        let covariance = (StateMatrix::identity() - gain * self.observation) * state.covariance;
        if !mean.iter().chain(covariance.iter()).all(|v| v.is_finite()) {
            trace!("kalman update skipped: non-finite posterior");
            return false;
        }

        state.mean = mean;
        state.covariance = covariance;
        true
    }
}
