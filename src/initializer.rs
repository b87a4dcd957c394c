//! Stationary / jerk-triggered inertial initializer.
//!
//! Mirrors `try_to_initialize` in the original `VioManager.cpp`: gravity
//! direction comes from the mean accelerometer reading over a trailing
//! window, position is always forced to zero, and (unless ZUPT is enabled)
//! a jerk above `init_imu_thresh` must appear before initialization
//! succeeds. Windowing/stillness-detection style borrowed from the
//! teacher's `sensor_fusion.rs` dynamic-calibration bookkeeping.

use crate::quat::JplQuat;
use crate::state::ImuVariable;
use crate::types::ImuData;
use nalgebra::Vector3;

pub struct InertialInitializer {
    window_time: f64,
    jerk_threshold: f64,
    wait_for_jerk: bool,
    buffer: Vec<ImuData>,
}

pub struct InitResult {
    pub imu: ImuVariable,
    pub timestamp: f64,
}

impl InertialInitializer {
    pub fn new(window_time: f64, jerk_threshold: f64, wait_for_jerk: bool) -> Self {
        Self {
            window_time,
            jerk_threshold,
            wait_for_jerk,
            buffer: Vec::new(),
        }
    }

    pub fn feed_imu(&mut self, sample: ImuData) {
        let cutoff = sample.timestamp - self.window_time * 4.0;
        self.buffer.push(sample);
        self.buffer.retain(|s| s.timestamp >= cutoff);
    }

    /// Attempt initialization using the trailing `window_time` of buffered
    /// IMU. Returns `None` until enough data has accumulated, or (when
    /// `wait_for_jerk` is set) until a jerk above threshold is observed.
    pub fn try_initialize(&self) -> Option<InitResult> {
        let Some(&latest) = self.buffer.last().map(|s| &s.timestamp) else {
            return None;
        };
        let window_start = latest - self.window_time;
        let window: Vec<&ImuData> = self
            .buffer
            .iter()
            .filter(|s| s.timestamp >= window_start)
            .collect();
        if window.len() < 2 {
            return None;
        }

        if self.wait_for_jerk {
            let accel_disparity = accel_std_dev(&window);
            if accel_disparity < self.jerk_threshold {
                return None;
            }
        }

        let mean_accel = window.iter().fold(Vector3::zeros(), |acc, s| acc + s.am)
            / window.len() as f64;
        let mean_gyro = window.iter().fold(Vector3::zeros(), |acc, s| acc + s.wm)
            / window.len() as f64;

        // Orientation: align IMU +z with gravity direction (measured
        // specific force points opposite gravity at rest).
        let gravity_dir = mean_accel.normalize();
        let z = Vector3::new(0.0, 0.0, 1.0);
        let v = z.cross(&gravity_dir);
        let c = z.dot(&gravity_dir);
        let q_gtoi = if (1.0 + c).abs() < 1e-10 {
            // 180-degree case: pick an arbitrary orthogonal axis.
            JplQuat::from_xyzw(1.0, 0.0, 0.0, 0.0)
        } else {
            let s = (2.0 * (1.0 + c)).sqrt();
            JplQuat::from_xyzw(v.x / s, v.y / s, v.z / s, s / 2.0)
        };

        let mut imu = ImuVariable::identity();
        imu.q_gtoi = q_gtoi;
        imu.fej_q_gtoi = q_gtoi;
        imu.pos = Vector3::zeros();
        imu.fej_pos = Vector3::zeros();
        imu.vel = Vector3::zeros();
        imu.bg = mean_gyro;
        imu.ba = Vector3::zeros();

        Some(InitResult {
            imu,
            timestamp: latest,
        })
    }
}

fn accel_std_dev(window: &[&ImuData]) -> f64 {
    let n = window.len() as f64;
    let mean = window.iter().fold(Vector3::zeros(), |acc, s| acc + s.am) / n;
    let var = window
        .iter()
        .map(|s| (s.am - mean).norm_squared())
        .sum::<f64>()
        / n;
    var.sqrt()
}
