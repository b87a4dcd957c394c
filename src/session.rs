//! A recorded session: a time-ordered list of IMU/camera/GPS records,
//! loaded from disk and fed into a `VioOrchestrator`. Used by the
//! `replay` and `gnss_demo` binaries, and by the main CLI.
//!
//! Record shape mirrors the teacher's `main.rs` serializable
//! `SensorReading`/`TrajectoryPoint` output structs, but for *input*
//! replay instead of logged output.

use crate::orchestrator::VioOrchestrator;
use crate::types::{GpsData, ImuData, PixelObservation};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SessionRecord {
    Imu(ImuData),
    /// A simulated camera frame: a base timestamp plus the pre-extracted
    /// feature ids/pixel coordinates a real tracker would have produced.
    Camera {
        timestamp: f64,
        sensor_ids: Vec<i32>,
        observations: Vec<(u64, f64, f64)>,
    },
    Gps(GpsData),
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Session {
    pub records: Vec<SessionRecord>,
}

impl Session {
    pub fn load(path: &Path) -> crate::error::VioResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> crate::error::VioResult<()> {
        let text = serde_json::to_string_pretty(self).map_err(crate::error::VioError::SessionParse)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Drive every record, in order, into `orchestrator`.
    pub fn drive(&self, orchestrator: &mut VioOrchestrator) {
        for record in &self.records {
            match record {
                SessionRecord::Imu(sample) => orchestrator.feed_imu(sample.clone()),
                SessionRecord::Camera {
                    timestamp,
                    sensor_ids,
                    observations,
                } => {
                    for &(id, u, v) in observations {
                        orchestrator.feed_sim_observation(
                            sensor_ids.first().copied().unwrap_or(0),
                            id,
                            PixelObservation {
                                timestamp: *timestamp,
                                uv: (u, v),
                                uv_norm: (u, v),
                            },
                        );
                    }
                    orchestrator.feed_camera(crate::types::CameraData {
                        timestamp: *timestamp,
                        sensor_ids: sensor_ids.clone(),
                        images: vec![],
                        masks: vec![],
                    });
                }
                SessionRecord::Gps(fix) => orchestrator.feed_gps(*fix),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn empty_session_drives_without_panicking() {
        let session = Session::default();
        let mut orch = VioOrchestrator::new(crate::config::VioConfig::default());
        session.drive(&mut orch);
        assert!(!orch.is_initialized());
    }

    #[test]
    fn session_round_trips_through_json() {
        let session = Session {
            records: vec![SessionRecord::Imu(ImuData {
                timestamp: 0.0,
                wm: Vector3::zeros(),
                am: Vector3::new(0.0, 0.0, 9.81),
            })],
        };
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.records.len(), 1);
    }
}
