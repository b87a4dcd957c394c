//! IMU mean and covariance propagation between image times.
//!
//! Closed-form (zeroth-order-hold) integration rather than full RK4, since
//! the estimator only needs propagation accurate to within the clone
//! spacing, not continuous-time trajectory output. Grounded on the
//! teacher's `factors/imu_preintegration.rs::PreintegratedImuMeasurements`,
//! generalized from a factor-graph preintegration summary into a
//! step-by-step EKF mean/covariance propagator.

use crate::quat::skew_symmetric;
use crate::state::State;
use crate::types::ImuData;
use nalgebra::{DMatrix, Matrix3, Vector3};

#[derive(Clone, Debug)]
pub struct PropagatorConfig {
    pub gravity_mag: f64,
    pub gyro_noise: f64,
    pub accel_noise: f64,
    pub gyro_bias_noise: f64,
    pub accel_bias_noise: f64,
}

impl Default for PropagatorConfig {
    fn default() -> Self {
        Self {
            gravity_mag: 9.81,
            gyro_noise: 1.6968e-4,
            accel_noise: 2.0e-3,
            gyro_bias_noise: 1.9393e-5,
            accel_bias_noise: 3.0e-3,
        }
    }
}

pub struct Propagator {
    cfg: PropagatorConfig,
    buffer: Vec<ImuData>,
}

impl Propagator {
    pub fn new(cfg: PropagatorConfig) -> Self {
        Self {
            cfg,
            buffer: Vec::new(),
        }
    }

    pub fn feed_imu(&mut self, sample: ImuData) {
        self.buffer.push(sample);
    }

    /// Drop samples strictly older than `t`, keeping one sample at-or-before
    /// `t` so the next propagation call has a valid starting rate.
    pub fn cleanup_older_than(&mut self, t: f64) {
        let keep_from = self
            .buffer
            .iter()
            .rposition(|s| s.timestamp <= t)
            .unwrap_or(0);
        self.buffer.drain(0..keep_from);
    }

    fn gravity(&self) -> Vector3<f64> {
        Vector3::new(0.0, 0.0, self.cfg.gravity_mag)
    }

    /// Integrate `state` forward to `t_target`, consuming IMU samples in
    /// `(state.timestamp, t_target]`, then append a clone at `t_target`.
    /// Returns false (leaving state untouched) if no IMU samples span the
    /// requested interval.
    pub fn propagate_and_clone(&mut self, state: &mut State, t_target: f64) -> bool {
        let samples: Vec<ImuData> = self
            .buffer
            .iter()
            .filter(|s| s.timestamp > state.timestamp && s.timestamp <= t_target)
            .cloned()
            .collect();
        if samples.is_empty() {
            return false;
        }
        let mut t_prev = state.timestamp;
        for sample in &samples {
            let dt = sample.timestamp - t_prev;
            if dt > 0.0 {
                self.propagate_step(state, sample, dt);
            }
            t_prev = sample.timestamp;
        }
        state.timestamp = t_prev;
        state.add_clone(t_target);
        true
    }

    fn propagate_step(&self, state: &mut State, sample: &ImuData, dt: f64) {
        let wm = sample.wm - state.imu.bg;
        let am = sample.am - state.imu.ba;

        let r_gtoi = state.imu.rotation();
        let theta = wm * dt;
        state.imu.q_gtoi = state.imu.q_gtoi.update(&theta);

        let accel_global = r_gtoi.transpose() * am - self.gravity();
        let new_pos = state.imu.pos + state.imu.vel * dt + 0.5 * accel_global * dt * dt;
        let new_vel = state.imu.vel + accel_global * dt;
        state.imu.pos = new_pos;
        state.imu.vel = new_vel;

        let f = self.error_state_transition(&r_gtoi, &am, dt);
        let g = self.noise_jacobian(&r_gtoi, dt);
        let q = self.discrete_noise_covariance(dt);

        let io = state.imu_index.offset;
        let n = state.max_covariance_size();
        let mut phi = DMatrix::<f64>::identity(n, n);
        phi.view_mut((io, io), (15, 15)).copy_from(&f);
        let gq_gt = &g * q * g.transpose();

        let p = state.cov.matrix().clone();
        let mut p_new = &phi * p * phi.transpose();
        let updated_block = p_new.view((io, io), (15, 15)).into_owned() + gq_gt;
        p_new.view_mut((io, io), (15, 15)).copy_from(&updated_block);
        *state.cov.matrix_mut() = p_new;
        state.cov.symmetrize();
    }

    fn error_state_transition(&self, r_gtoi: &Matrix3<f64>, am: &Vector3<f64>, dt: f64) -> DMatrix<f64> {
        let mut f = DMatrix::<f64>::identity(15, 15);
        let skew_am = skew_symmetric(am);
        // d(theta)/d(theta), d(theta)/d(bg)
        f.view_mut((0, 9), (3, 3))
            .copy_from(&(-Matrix3::identity() * dt));
        // d(vel)/d(theta)
        f.view_mut((6, 0), (3, 3))
            .copy_from(&(-r_gtoi.transpose() * skew_am * dt));
        // d(vel)/d(ba)
        f.view_mut((6, 12), (3, 3))
            .copy_from(&(-r_gtoi.transpose() * dt));
        // d(pos)/d(vel)
        f.view_mut((3, 6), (3, 3))
            .copy_from(&(Matrix3::identity() * dt));
        f
    }

    fn noise_jacobian(&self, r_gtoi: &Matrix3<f64>, dt: f64) -> DMatrix<f64> {
        let mut g = DMatrix::<f64>::zeros(15, 12);
        g.view_mut((0, 0), (3, 3)).copy_from(&(-Matrix3::identity() * dt));
        g.view_mut((6, 3), (3, 3)).copy_from(&(-r_gtoi.transpose() * dt));
        g.view_mut((9, 6), (3, 3)).copy_from(&(Matrix3::identity()));
        g.view_mut((12, 9), (3, 3)).copy_from(&(Matrix3::identity()));
        g
    }

    fn discrete_noise_covariance(&self, dt: f64) -> DMatrix<f64> {
        let mut q = DMatrix::<f64>::zeros(12, 12);
        let gyro_var = self.cfg.gyro_noise * self.cfg.gyro_noise / dt;
        let accel_var = self.cfg.accel_noise * self.cfg.accel_noise / dt;
        let gyro_bias_var = self.cfg.gyro_bias_noise * self.cfg.gyro_bias_noise * dt;
        let accel_bias_var = self.cfg.accel_bias_noise * self.cfg.accel_bias_noise * dt;
        for i in 0..3 {
            q[(i, i)] = gyro_var;
            q[(3 + i, 3 + i)] = accel_var;
            q[(6 + i, 6 + i)] = gyro_bias_var;
            q[(9 + i, 9 + i)] = accel_bias_var;
        }
        q
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::IMU_STATE_SIZE;

    fn stationary_state() -> State {
        State::new(&[1e-4; IMU_STATE_SIZE])
    }

    #[test]
    fn stationary_gravity_aligned_imu_holds_position() {
        let mut state = stationary_state();
        let mut prop = Propagator::new(PropagatorConfig::default());
        let g = prop.cfg.gravity_mag;
        for i in 0..100 {
            prop.feed_imu(ImuData {
                timestamp: i as f64 * 0.01,
                wm: Vector3::zeros(),
                am: Vector3::new(0.0, 0.0, g),
            });
        }
        prop.propagate_and_clone(&mut state, 0.99);
        assert!(state.imu.pos.norm() < 1e-6);
        assert!(state.imu.vel.norm() < 1e-6);
    }

    #[test]
    fn no_samples_in_interval_returns_false() {
        let mut state = stationary_state();
        let mut prop = Propagator::new(PropagatorConfig::default());
        assert!(!prop.propagate_and_clone(&mut state, 1.0));
    }

    #[test]
    fn propagation_appends_exactly_one_clone() {
        let mut state = stationary_state();
        let mut prop = Propagator::new(PropagatorConfig::default());
        prop.feed_imu(ImuData {
            timestamp: 0.01,
            wm: Vector3::zeros(),
            am: Vector3::new(0.0, 0.0, 9.81),
        });
        prop.propagate_and_clone(&mut state, 0.01);
        assert_eq!(state.clones.len(), 1);
    }
}
