//! Constant-velocity Kalman filter over XYAH boxes.
//!
//! State is `[cx, cy, a, h, vx, vy, va, vh]`; state algebra runs on `ndarray`
//! and the 4x4 innovation inverse goes through `nalgebra`.

use ndarray::{Array1, Array2};

use crate::tracker::rect::Rect;

/// Mean and covariance of one track's motion state.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionState {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
}

impl MotionState {
    /// Box at the current state estimate.
    pub fn rect(&self) -> Rect {
        Rect::from_xyah(
            self.mean[0] as f32,
            self.mean[1] as f32,
            self.mean[2] as f32,
            self.mean[3] as f32,
        )
    }
}

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    /// Constant-velocity transition, 8x8
    motion_mat: Array2<f64>,
    /// Observes the first four state components, 4x8
    update_mat: Array2<f64>,
    /// Noise scales relative to the box height
    position_noise: f64,
    velocity_noise: f64,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl KalmanFilter {
    pub fn new() -> Self {
        Self {
            motion_mat: Array2::from_shape_fn((8, 8), |(i, j)| {
                if i == j || j == i + 4 { 1.0 } else { 0.0 }
            }),
            update_mat: Array2::from_shape_fn((4, 8), |(i, j)| if i == j { 1.0 } else { 0.0 }),
            position_noise: 1.0 / 20.0,
            velocity_noise: 1.0 / 160.0,
        }
    }

    fn diagonal(std: &[f64]) -> Array2<f64> {
        let mut cov = Array2::zeros((std.len(), std.len()));
        for (i, s) in std.iter().enumerate() {
            cov[[i, i]] = s * s;
        }
        cov
    }

    pub fn initiate(&self, measurement: [f64; 4]) -> MotionState {
        let mut mean = Array1::zeros(8);
        for (i, m) in measurement.iter().enumerate() {
            mean[i] = *m;
        }

        let h = measurement[3];
        let pos = 2.0 * self.position_noise * h;
        let vel = 10.0 * self.velocity_noise * h;
        let covariance = Self::diagonal(&[pos, pos, 1e-2, pos, vel, vel, 1e-5, vel]);

        MotionState { mean, covariance }
    }

    /// Project the state one frame ahead. With `freeze_height` set the
    /// height velocity is zeroed first, as for tracks that missed a frame.
    pub fn predict(&self, state: &MotionState, freeze_height: bool) -> MotionState {
        let mut mean = state.mean.clone();
        if freeze_height {
            mean[7] = 0.0;
        }

        let h = mean[3];
        let pos = self.position_noise * h;
        let vel = self.velocity_noise * h;
        let motion_cov = Self::diagonal(&[pos, pos, 1e-2, pos, vel, vel, 1e-5, vel]);

        MotionState {
            mean: self.motion_mat.dot(&mean),
            covariance: self
                .motion_mat
                .dot(&state.covariance)
                .dot(&self.motion_mat.t())
                + motion_cov,
        }
    }

    fn project(&self, state: &MotionState) -> (Array1<f64>, Array2<f64>) {
        let h = state.mean[3];
        let pos = self.position_noise * h;
        let innovation_cov = Self::diagonal(&[pos, pos, 1e-1, pos]);

        let mean_proj = self.update_mat.dot(&state.mean);
        let covariance_proj =
            self.update_mat.dot(&state.covariance).dot(&self.update_mat.t()) + innovation_cov;

        (mean_proj, covariance_proj)
    }

    /// Correct the state with a measurement.
    ///
    /// Returns `None` when the innovation covariance is singular; callers
    /// re-initiate from the measurement in that case.
    pub fn update(&self, state: &MotionState, measurement: [f64; 4]) -> Option<MotionState> {
        let (projected_mean, projected_cov) = self.project(state);
        let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;

        // K = P * H^T * S^-1, with H = [I 0] so P * H^T is the left 8x4 block of P.
        let s_inv = invert_4x4(&projected_cov)?;
        let kalman_gain = state.covariance.dot(&self.update_mat.t()).dot(&s_inv);

        Some(MotionState {
            mean: &state.mean + &kalman_gain.dot(&innovation),
            covariance: &state.covariance
                - &kalman_gain.dot(&projected_cov).dot(&kalman_gain.t()),
        })
    }
}

fn invert_4x4(m: &Array2<f64>) -> Option<Array2<f64>> {
    let nm = nalgebra::Matrix4::from_fn(|i, j| m[[i, j]]);
    let inv = nm.try_inverse()?;
    Some(Array2::from_shape_fn((4, 4), |(i, j)| inv[(i, j)]))
}
