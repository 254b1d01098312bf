//! Kalman filter over bounding boxes: predict and update steps.
//!
//! ## State vector
//! x = [cx, cy, w, h, vcx, vcy, vw, vh]ᵀ  (8-dimensional, pixels and pixels/cycle)
//!
//! ## CV Transition model
//! F = I₈ + [[0₄ I₄]; [0₄ 0₄]]   (one cycle per step)
//!
//! ## Observation
//! z = [cx, cy, w, h], H = [I₄ 0₄]
//!
//! Noise is scaled by the current box height so the filter behaves the same for
//! near and far objects.

use crate::types::BBox;
use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

/// 8-state box vector
pub type BoxState = SVector<f64, 8>;
/// 8×8 state covariance
pub type BoxCov = SMatrix<f64, 8, 8>;
/// 4-dim box observation [cx, cy, w, h]
pub type BoxObs = SVector<f64, 4>;

type ObsMatrix = SMatrix<f64, 4, 8>;

/// Configuration for the box Kalman filter.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxKfConfig {
    /// Position noise std, as a fraction of box height
    pub std_position: f64,
    /// Velocity noise std, as a fraction of box height
    pub std_velocity: f64,
    /// Measurement noise std, as a fraction of box height
    pub std_measurement: f64,
}

impl Default for BoxKfConfig {
    fn default() -> Self {
        Self {
            std_position: 1.0 / 20.0,
            std_velocity: 1.0 / 160.0,
            std_measurement: 1.0 / 20.0,
        }
    }
}

/// Constant-velocity Kalman filter on box center and size.
#[derive(Clone, Debug)]
pub struct BoxKalmanFilter {
    pub config: BoxKfConfig,
}

/// Convert a box to its observation vector.
pub fn observe(bbox: &BBox) -> BoxObs {
    let (cx, cy) = bbox.center();
    BoxObs::new(cx, cy, bbox.w, bbox.h)
}

/// Read the box encoded in a state vector.
pub fn state_to_bbox(state: &BoxState) -> BBox {
    BBox::from_center(state[0], state[1], state[2].max(0.0), state[3].max(0.0))
}

fn observation_matrix() -> ObsMatrix {
    let mut h = ObsMatrix::zeros();
    for i in 0..4 {
        h[(i, i)] = 1.0;
    }
    h
}

impl BoxKalmanFilter {
    pub fn new(config: BoxKfConfig) -> Self {
        Self { config }
    }

    /// Initial state and covariance for a freshly observed box.
    pub fn initiate(&self, bbox: &BBox) -> (BoxState, BoxCov) {
        let z = observe(bbox);
        let mut state = BoxState::zeros();
        state.fixed_rows_mut::<4>(0).copy_from(&z);

        let h = bbox.h.max(1.0);
        let sp = 2.0 * self.config.std_position * h;
        let sv = 10.0 * self.config.std_velocity * h;
        let diag = BoxState::from_column_slice(&[
            sp * sp,
            sp * sp,
            sp * sp,
            sp * sp,
            sv * sv,
            sv * sv,
            sv * sv,
            sv * sv,
        ]);
        (state, BoxCov::from_diagonal(&diag))
    }

    /// Build state transition matrix F for one cycle.
    pub fn transition_matrix() -> BoxCov {
        let mut f = BoxCov::identity();
        for i in 0..4 {
            f[(i, i + 4)] = 1.0;
        }
        f
    }

    fn process_noise(&self, state: &BoxState) -> BoxCov {
        let h = state[3].abs().max(1.0);
        let sp = self.config.std_position * h;
        let sv = self.config.std_velocity * h;
        let diag = BoxState::from_column_slice(&[
            sp * sp,
            sp * sp,
            sp * sp,
            sp * sp,
            sv * sv,
            sv * sv,
            sv * sv,
            sv * sv,
        ]);
        BoxCov::from_diagonal(&diag)
    }

    /// Predict one cycle ahead.
    pub fn predict(&self, state: &BoxState, cov: &BoxCov) -> (BoxState, BoxCov) {
        let f = Self::transition_matrix();
        let q = self.process_noise(state);
        (f * state, f * cov * f.transpose() + q)
    }

    /// Fuse an observed box. A singular innovation covariance leaves the
    /// prediction untouched apart from snapping the box to the observation.
    pub fn update(&self, state: &BoxState, cov: &BoxCov, bbox: &BBox) -> (BoxState, BoxCov) {
        let z = observe(bbox);
        let h = observation_matrix();
        let sm = self.config.std_measurement * state[3].abs().max(1.0);
        let r = SMatrix::<f64, 4, 4>::identity() * (sm * sm);

        // Innovation ν = z − H·x, S = H·P·Hᵀ + R
        let innovation = z - h * state;
        let s = h * cov * h.transpose() + r;

        match s.try_inverse() {
            Some(s_inv) => {
                let k = cov * h.transpose() * s_inv;
                let new_state = state + k * innovation;
                // Joseph form P' = (I−KH)·P·(I−KH)ᵀ + K·R·Kᵀ
                let i_kh = BoxCov::identity() - k * h;
                let new_cov = i_kh * cov * i_kh.transpose() + k * r * k.transpose();
                (new_state, new_cov)
            }
            None => {
                let mut snapped = *state;
                snapped.fixed_rows_mut::<4>(0).copy_from(&z);
                (snapped, *cov)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn predict_constant_velocity() {
        let kf = BoxKalmanFilter::new(BoxKfConfig::default());
        let mut state = BoxState::zeros();
        state[0] = 100.0;
        state[1] = 50.0;
        state[2] = 20.0;
        state[3] = 40.0;
        state[4] = 5.0; // vcx

        let (pred, _) = kf.predict(&state, &BoxCov::identity());
        assert_abs_diff_eq!(pred[0], 105.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pred[1], 50.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pred[4], 5.0, epsilon = 1e-9);
    }

    #[test]
    fn initiate_matches_box() {
        let kf = BoxKalmanFilter::new(BoxKfConfig::default());
        let bbox = BBox::new(10.0, 20.0, 30.0, 60.0);
        let (state, cov) = kf.initiate(&bbox);
        let back = state_to_bbox(&state);
        assert_abs_diff_eq!(back.x, 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(back.h, 60.0, epsilon = 1e-9);
        assert!(cov[(0, 0)] > 0.0);
    }

    #[test]
    fn update_reduces_uncertainty_and_moves_toward_observation() {
        let kf = BoxKalmanFilter::new(BoxKfConfig::default());
        let (state, cov) = kf.initiate(&BBox::new(0.0, 0.0, 20.0, 40.0));
        let (state, cov) = kf.predict(&state, &cov);
        let obs = BBox::new(4.0, 0.0, 20.0, 40.0);
        let (upd, upd_cov) = kf.update(&state, &cov, &obs);

        assert!(upd[0] > state[0] && upd[0] <= 14.0 + 1e-9);
        let prior: f64 = (0..8).map(|i| cov[(i, i)]).sum();
        let post: f64 = (0..8).map(|i| upd_cov[(i, i)]).sum();
        assert!(post < prior, "Update should reduce uncertainty");
    }
}
