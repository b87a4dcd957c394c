//! Wire-level sensor data types.
//!
//! Shaped after the teacher's `types/mod.rs` (`AccelData`, `GyroData`,
//! `GpsData`), collapsed into the three message kinds the estimator
//! actually consumes: IMU samples, camera frames, and geodetic fixes.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A single inertial measurement: angular velocity and specific force,
/// both in the IMU body frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImuData {
    /// Seconds, monotonically increasing per stream.
    pub timestamp: f64,
    /// Angular velocity, rad/s.
    pub wm: Vector3<f64>,
    /// Specific force (accelerometer reading, includes gravity), m/s^2.
    pub am: Vector3<f64>,
}

/// A single-channel 8-bit image. Pixel contents are opaque to the
/// estimator; only width/height and the tracker's feature extraction see
/// them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Gray8Image {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Gray8Image {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width as usize) * (height as usize)],
        }
    }
}

/// A camera frame, possibly stereo (multiple `sensor_ids` sharing one
/// timestamp). `sensor_ids` is required to be sorted ascending.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraData {
    pub timestamp: f64,
    pub sensor_ids: Vec<i32>,
    pub images: Vec<Gray8Image>,
    #[serde(default)]
    pub masks: Vec<Gray8Image>,
}

impl CameraData {
    pub fn is_base_camera_frame(&self) -> bool {
        self.sensor_ids.first() == Some(&0)
    }
}

/// A geodetic GNSS fix: longitude/latitude in degrees, altitude in metres,
/// with a 3x3 measurement covariance in the same East-North-Up-adjacent
/// ordering the updater expects on `lla`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GpsData {
    pub timestamp: f64,
    /// (longitude_deg, latitude_deg, altitude_m).
    pub lla: Vector3<f64>,
    pub cov: [[f64; 3]; 3],
}

/// A single pixel observation of a tracked feature in one camera.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PixelObservation {
    pub timestamp: f64,
    pub uv: (f64, f64),
    pub uv_norm: (f64, f64),
}
