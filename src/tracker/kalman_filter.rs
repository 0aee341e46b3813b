//! Constant-velocity Kalman filter over the XYAH box measurement.
//!
//! State is `[cx, cy, a, h, vx, vy, va, vh]`. Noise scales with box height
//! so that large and small objects get comparable relative uncertainty.

use ndarray::{Array1, Array2};

/// Kalman mean and covariance of one track.
pub type KalmanState = (Array1<f64>, Array2<f64>);

const NDIM: usize = 4;

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: Array2<f64>,
    update_mat: Array2<f64>,
    std_weight_position: f64,
    std_weight_velocity: f64,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn diag_squared(std: &[f64]) -> Array2<f64> {
    Array2::from_diag(&Array1::from_iter(std.iter().map(|s| s * s)))
}

impl KalmanFilter {
    pub fn new() -> Self {
        let mut motion_mat = Array2::eye(2 * NDIM);
        for i in 0..NDIM {
            motion_mat[[i, NDIM + i]] = 1.0;
        }

        let mut update_mat = Array2::zeros((NDIM, 2 * NDIM));
        for i in 0..NDIM {
            update_mat[[i, i]] = 1.0;
        }

        Self {
            motion_mat,
            update_mat,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }

    /// Start a track from an unassociated measurement; velocities start at zero.
    pub fn initiate(&self, measurement: [f64; 4]) -> KalmanState {
        let mut mean = Array1::zeros(2 * NDIM);
        for (i, v) in measurement.iter().enumerate() {
            mean[i] = *v;
        }

        let h = measurement[3];
        let pos = 2.0 * self.std_weight_position * h;
        let vel = 10.0 * self.std_weight_velocity * h;
        let cov = diag_squared(&[pos, pos, 1e-2, pos, vel, vel, 1e-5, vel]);

        (mean, cov)
    }

    pub fn predict(&self, mean: &Array1<f64>, covariance: &Array2<f64>) -> KalmanState {
        let h = mean[3];
        let pos = self.std_weight_position * h;
        let vel = self.std_weight_velocity * h;
        let motion_cov = diag_squared(&[pos, pos, 1e-2, pos, vel, vel, 1e-5, vel]);

        let new_mean = self.motion_mat.dot(mean);
        let new_covariance =
            self.motion_mat.dot(covariance).dot(&self.motion_mat.t()) + motion_cov;

        (new_mean, new_covariance)
    }

    /// Project the state distribution into measurement space.
    pub fn project(&self, mean: &Array1<f64>, covariance: &Array2<f64>) -> KalmanState {
        let h = mean[3];
        let pos = self.std_weight_position * h;
        let innovation_cov = diag_squared(&[pos, pos, 1e-1, pos]);

        let mean_proj = self.update_mat.dot(mean);
        let covariance_proj =
            self.update_mat.dot(covariance).dot(&self.update_mat.t()) + innovation_cov;

        (mean_proj, covariance_proj)
    }

    /// Correct the state with a measurement.
    ///
    /// Returns `None` when the innovation covariance is singular, which only
    /// happens for degenerate (zero-height) boxes; callers keep the predicted
    /// state in that case.
    pub fn update(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        measurement: [f64; 4],
    ) -> Option<KalmanState> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);
        let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;

        let s_inv = invert_4x4(&projected_cov)?;
        // K = P * H^T * S^-1; H = [I 0] so P * H^T is the left 8x4 block of P.
        let kalman_gain = covariance.dot(&self.update_mat.t()).dot(&s_inv);

        let new_mean = mean + &kalman_gain.dot(&innovation);
        let new_covariance = covariance - &kalman_gain.dot(&projected_cov).dot(&kalman_gain.t());

        Some((new_mean, new_covariance))
    }
}

/// Invert the 4x4 innovation covariance with nalgebra, no BLAS needed.
fn invert_4x4(m: &Array2<f64>) -> Option<Array2<f64>> {
    let nm = nalgebra::Matrix4::from_fn(|i, j| m[[i, j]]);
    let inv = nm.try_inverse()?;
    Some(Array2::from_shape_fn((NDIM, NDIM), |(i, j)| inv[(i, j)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiate_copies_measurement() {
        let kf = KalmanFilter::new();
        let (mean, cov) = kf.initiate([100.0, 200.0, 0.5, 50.0]);
        assert_eq!(mean[0], 100.0);
        assert_eq!(mean[3], 50.0);
        assert_eq!(mean[4], 0.0);
        assert!(cov[[0, 0]] > 0.0);
    }

    #[test]
    fn test_predict_applies_velocity() {
        let kf = KalmanFilter::new();
        let (mut mean, cov) = kf.initiate([100.0, 200.0, 0.5, 50.0]);
        mean[4] = 3.0;
        let (predicted, _) = kf.predict(&mean, &cov);
        assert!((predicted[0] - 103.0).abs() < 1e-9);
    }

    #[test]
    fn test_update_moves_toward_measurement() {
        let kf = KalmanFilter::new();
        let (mean, cov) = kf.initiate([100.0, 200.0, 0.5, 50.0]);
        let (mean, cov) = kf.predict(&mean, &cov);
        let (updated, _) = kf.update(&mean, &cov, [110.0, 200.0, 0.5, 50.0]).unwrap();
        assert!(updated[0] > 100.0 && updated[0] < 110.0);
    }

    #[test]
    fn test_singular_covariance_is_reported() {
        let zeros = Array2::zeros((4, 4));
        assert!(invert_4x4(&zeros).is_none());
    }
}
