//! Zero-velocity update gate.
//!
//! Timing/bookkeeping pattern (trailing buffer, disparity check,
//! "has moved since last zupt" latch) lifted from the teacher's
//! `sensor_fusion.rs` ZUPT tracking fields, generalized to operate on the
//! sliding-window `State` instead of a flat filter state vector.

use crate::state::State;
use crate::types::ImuData;
use nalgebra::{DMatrix, DVector, Vector3};

pub struct ZuptConfig {
    pub max_velocity: f64,
    pub noise_multiplier: f64,
    pub max_disparity: f64,
    pub only_at_beginning: bool,
}

pub struct ZuptGate {
    cfg: ZuptConfig,
    buffer: Vec<ImuData>,
    has_moved_since_zupt: bool,
}

impl ZuptGate {
    pub fn new(cfg: ZuptConfig) -> Self {
        Self {
            cfg,
            buffer: Vec::new(),
            has_moved_since_zupt: false,
        }
    }

    pub fn feed_imu(&mut self, sample: ImuData) {
        self.buffer.push(sample);
        if self.buffer.len() > 400 {
            self.buffer.remove(0);
        }
    }

    pub fn mark_moved(&mut self) {
        self.has_moved_since_zupt = true;
    }

    fn gyro_disparity(&self) -> f64 {
        if self.buffer.len() < 2 {
            return f64::INFINITY;
        }
        let mean = self.buffer.iter().fold(Vector3::zeros(), |a, s| a + s.wm) / self.buffer.len() as f64;
        self.buffer.iter().map(|s| (s.wm - mean).norm()).fold(0.0, f64::max)
    }

    /// Attempt a zero-velocity update at `t`. Applies a 3-dof velocity
    /// pseudo-measurement (v = 0) and returns whether it was applied.
    pub fn try_update(&mut self, state: &mut State, t: f64, is_initialized: bool) -> bool {
        if state.timestamp == t {
            return false;
        }
        if is_initialized && self.cfg.only_at_beginning && self.has_moved_since_zupt {
            return false;
        }
        if self.gyro_disparity() > self.cfg.max_disparity {
            return false;
        }
        if state.imu.vel.norm() > self.cfg.max_velocity * 4.0 {
            return false;
        }

        let n = state.max_covariance_size();
        let io = state.imu_index.offset;
        let mut h = DMatrix::<f64>::zeros(3, n);
        h.view_mut((0, io + 6), (3, 3)).copy_from(&DMatrix::identity(3, 3));
        let r = DVector::from_vec(vec![state.imu.vel.x, state.imu.vel.y, state.imu.vel.z]);
        let var = (self.cfg.max_velocity * self.cfg.noise_multiplier).powi(2).max(1e-6);
        let r_noise = DMatrix::<f64>::identity(3, 3) * var;

        let k = state.cov.ekf_update(&h, &r_noise);
        let dx = k * r;
        crate::updater_msckf::apply_error_state(state, &dx);
        state.timestamp = t;
        self.has_moved_since_zupt = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::IMU_STATE_SIZE;

    #[test]
    fn zupt_pulls_nonzero_velocity_toward_zero() {
        let mut state = State::new(&[1e-2; IMU_STATE_SIZE]);
        state.imu.vel = Vector3::new(0.02, 0.0, 0.0);
        let mut gate = ZuptGate::new(ZuptConfig {
            max_velocity: 0.05,
            noise_multiplier: 1.0,
            max_disparity: 10.0,
            only_at_beginning: false,
        });
        for i in 0..10 {
            gate.feed_imu(ImuData {
                timestamp: i as f64 * 0.01,
                wm: Vector3::zeros(),
                am: Vector3::new(0.0, 0.0, 9.81),
            });
        }
        let applied = gate.try_update(&mut state, 0.1, true);
        assert!(applied);
        assert!(state.imu.vel.norm() < 0.02);
    }

    #[test]
    fn zupt_skipped_when_timestamp_matches_state() {
        let mut state = State::new(&[1e-2; IMU_STATE_SIZE]);
        let mut gate = ZuptGate::new(ZuptConfig {
            max_velocity: 0.05,
            noise_multiplier: 1.0,
            max_disparity: 10.0,
            only_at_beginning: false,
        });
        assert!(!gate.try_update(&mut state, 0.0, true));
    }
}
