//! Owns the queues, ordering, initialization, and dispatch between every
//! other component. Grounded on
//! `original_source/ov_msckf/src/core/VioManager.cpp`
//! (`feed_measurement_imu`, `track_image_and_update`,
//! `do_feature_propagate_update`), with the overall "one big struct
//! composing the sub-filters and bookkeeping fields" shape borrowed from
//! the teacher's `sensor_fusion.rs::SensorFusion`.

use crate::config::VioConfig;
use crate::feature_selector::select_features;
use crate::gnss::GnssUpdater;
use crate::initializer::InertialInitializer;
use crate::marginalizer::{marginalize_old_clone, marginalize_slam};
use crate::propagator::{Propagator, PropagatorConfig};
use crate::retriangulate::{retriangulate_active_tracks, ActiveTracks};
use crate::state::State;
use crate::tracker::camera::CameraModel;
use crate::tracker::{FeatureDatabase, TrackBase};
use crate::types::{CameraData, GpsData, ImuData, PixelObservation};
use crate::updater_msckf::{self, MsckfConfig};
use crate::updater_slam::{self, SlamConfig};
use crate::zupt::{ZuptConfig, ZuptGate};

pub struct VioOrchestrator {
    cfg: VioConfig,
    state: State,
    propagator: Propagator,
    initializer: InertialInitializer,
    tracker: TrackBase,
    zupt: ZuptGate,
    gnss: GnssUpdater,
    cameras: Vec<CameraModel>,

    camera_queue: Vec<CameraData>,
    gps_queue: Vec<GpsData>,

    is_initialized_vio: bool,
    startup_time: f64,
    has_moved_since_zupt: bool,

    pub active_tracks: Option<ActiveTracks>,
}

impl VioOrchestrator {
    pub fn new(cfg: VioConfig) -> Self {
        let cameras = cfg.cameras.iter().map(CameraModel::from_config).collect();
        let imu_diag = [1e-3; crate::state::IMU_STATE_SIZE];
        let wait_for_jerk = !cfg.try_zupt;
        Self {
            gnss: GnssUpdater::new(&cfg),
            zupt: ZuptGate::new(ZuptConfig {
                max_velocity: cfg.zupt_max_velocity,
                noise_multiplier: cfg.zupt_noise_multiplier,
                max_disparity: cfg.zupt_max_disparity,
                only_at_beginning: cfg.zupt_only_at_beginning,
            }),
            initializer: InertialInitializer::new(cfg.init_window_time, cfg.init_imu_thresh, wait_for_jerk),
            propagator: Propagator::new(PropagatorConfig {
                gravity_mag: cfg.gravity_mag,
                ..PropagatorConfig::default()
            }),
            tracker: TrackBase::from_kind(cfg.tracker),
            state: State::new(&imu_diag),
            cameras,
            camera_queue: Vec::new(),
            gps_queue: Vec::new(),
            is_initialized_vio: false,
            startup_time: 0.0,
            has_moved_since_zupt: false,
            active_tracks: None,
            cfg,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized_vio
    }

    /// Feed one pre-extracted feature observation into the simulation
    /// tracker ahead of calling `feed_camera` for the same timestamp.
    pub fn feed_sim_observation(&mut self, sensor_id: i32, feature_id: u64, obs: PixelObservation) {
        if let TrackBase::Sim(t) = &mut self.tracker {
            t.feed_observations(sensor_id, &[(feature_id, obs)]);
        }
    }

    /// Feed one pre-extracted ArUco tag observation. Only tagged as ArUco
    /// when `cfg.use_aruco` is on; otherwise it is fed as an ordinary
    /// feature, matching the original's behavior of ignoring tag detections
    /// entirely when tag tracking is disabled.
    pub fn feed_sim_aruco_observation(&mut self, sensor_id: i32, feature_id: u64, obs: PixelObservation) {
        if let TrackBase::Sim(t) = &mut self.tracker {
            if self.cfg.use_aruco {
                t.feed_aruco_observations(sensor_id, &[(feature_id, obs)]);
            } else {
                t.feed_observations(sensor_id, &[(feature_id, obs)]);
            }
        }
    }

    pub fn feed_imu(&mut self, sample: ImuData) {
        self.propagator.feed_imu(sample.clone());
        if !self.is_initialized_vio {
            self.initializer.feed_imu(sample.clone());
        }
        if self.cfg.try_zupt {
            self.zupt.feed_imu(sample.clone());
        }

        if self.unique_camera_streams_ready() {
            while let Some(front) = self.camera_queue.first().cloned() {
                if front.timestamp >= sample.timestamp - self.cfg.calib_camimu_dt {
                    break;
                }
                self.camera_queue.remove(0);
                self.track_image_and_update(&front);
            }
        }
        while let Some(front) = self.gps_queue.first().cloned() {
            if front.timestamp >= sample.timestamp - self.cfg.calib_camimu_dt {
                break;
            }
            self.gps_queue.remove(0);
            self.track_gps_and_update(&front);
        }
    }

    pub fn feed_camera(&mut self, frame: CameraData) {
        self.camera_queue.push(frame);
    }

    /// Mirrors `VioManager.cpp`'s `unique_cam_ids`/`num_unique_cameras`
    /// gate: don't start draining queued frames until at least one sample
    /// has arrived from every expected image stream (a synced stereo pair
    /// sharing one `CameraData` counts as a single stream).
    fn unique_camera_streams_ready(&self) -> bool {
        if self.cfg.use_stereo {
            return !self.camera_queue.is_empty();
        }
        let mut seen: std::collections::HashSet<i32> = std::collections::HashSet::new();
        for frame in &self.camera_queue {
            seen.extend(frame.sensor_ids.iter().copied());
        }
        seen.len() >= self.cfg.num_cameras
    }

    pub fn feed_gps(&mut self, fix: GpsData) {
        self.gps_queue.push(fix);
    }

    fn track_gps_and_update(&mut self, fix: &GpsData) {
        if fix.timestamp <= self.state.timestamp {
            log::warn!("dropping out-of-order GNSS fix at t={}", fix.timestamp);
            return;
        }
        self.gnss.update(&mut self.state, fix);
    }

    fn track_image_and_update(&mut self, frame: &CameraData) {
        if self.is_initialized_vio && frame.timestamp <= self.state.timestamp {
            log::warn!("dropping out-of-order image at t={}", frame.timestamp);
            return;
        }

        self.tracker.feed_new_camera(frame);

        if self.zupt.try_update(&mut self.state, frame.timestamp, self.is_initialized_vio) {
            return;
        }

        if !self.is_initialized_vio {
            if let Some(result) = self.initializer.try_initialize() {
                self.state.imu = result.imu;
                self.state.timestamp = result.timestamp;
                self.startup_time = result.timestamp;
                self.state.fix_4dof_gauge_freedoms();
                self.gnss.collapse_to_latest(&self.gps_queue);
                self.gps_queue.clear();
                self.is_initialized_vio = true;
            } else {
                return;
            }
        }

        self.do_feature_propagate_update(frame);
    }

    fn do_feature_propagate_update(&mut self, frame: &CameraData) {
        if self.state.timestamp > frame.timestamp {
            log::warn!("dropping out-of-order image at t={}", frame.timestamp);
            return;
        }

        if !self.propagator.propagate_and_clone(&mut self.state, frame.timestamp) {
            return;
        }
        self.has_moved_since_zupt = true;
        self.zupt.mark_moved();

        if self.state.clones.len() < self.cfg.max_clone_size.min(5) {
            return;
        }

        let marg_timestep = match self.state.oldest_clone_timestamp() {
            Some(t) => t,
            None => return,
        };
        let elapsed = frame.timestamp - self.startup_time;

        let db_snapshot = clone_db(self.tracker.feature_database());
        let selection = select_features(
            &self.cfg,
            &mut self.state,
            &db_snapshot,
            marg_timestep,
            &frame.sensor_ids,
            elapsed,
        );

        let camera0 = &self.cameras[0];
        let msckf_cfg = MsckfConfig::default();
        let accepted = updater_msckf::update(&mut self.state, &db_snapshot, camera0, &selection.msckf_features, &msckf_cfg);

        let slam_cfg = SlamConfig {
            pixel_noise_std: msckf_cfg.pixel_noise_std,
            max_slam_in_update: self.cfg.max_slam_in_update,
        };
        updater_slam::update(&mut self.state, &db_snapshot, camera0, &selection.slam_update, &slam_cfg);
        updater_slam::delayed_init(
            &mut self.state,
            &db_snapshot,
            camera0,
            &selection.slam_delayed,
            self.cfg.landmark_representation,
            msckf_cfg.pixel_noise_std,
        );

        if frame.is_base_camera_frame() {
            self.active_tracks = retriangulate_active_tracks(
                &self.state,
                &db_snapshot,
                camera0,
                self.cfg.cameras[0].width,
                self.cfg.cameras[0].height,
                self.cfg.max_clone_size,
                &frame.sensor_ids,
            );
        }

        let db = self.tracker.feature_database_mut();
        for id in accepted.iter().chain(selection.msckf_features.iter()) {
            db.mark_to_delete(*id);
        }

        marginalize_slam(&mut self.state);
        db.cleanup();
        if self.state.clones.len() > self.cfg.max_clone_size {
            if let (Some(old), Some(new)) = (
                self.state.oldest_clone_timestamp(),
                self.state.clones.get(1).map(|c| c.timestamp),
            ) {
                updater_slam::change_anchors(&mut self.state, old, new);
            }
        }
        db.cleanup_measurements(marg_timestep);
        marginalize_old_clone(&mut self.state, self.cfg.max_clone_size);
    }
}

fn clone_db(db: &FeatureDatabase) -> FeatureDatabase {
    let mut out = FeatureDatabase::new();
    out.append_new_measurements(db);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn cfg() -> VioConfig {
        let mut c = VioConfig::default();
        c.max_clone_size = 3;
        c
    }

    #[test]
    fn orchestrator_starts_uninitialized() {
        let orch = VioOrchestrator::new(cfg());
        assert!(!orch.is_initialized());
    }

    #[test]
    fn stationary_imu_plus_camera_eventually_initializes() {
        let mut orch = VioOrchestrator::new(cfg());
        for i in 0..200 {
            orch.feed_imu(ImuData {
                timestamp: i as f64 * 0.01,
                wm: Vector3::zeros(),
                am: Vector3::new(0.0, 0.0, 9.81),
            });
        }
        orch.feed_camera(CameraData {
            timestamp: 1.0,
            sensor_ids: vec![0],
            images: vec![],
            masks: vec![],
        });
        for i in 200..210 {
            orch.feed_imu(ImuData {
                timestamp: i as f64 * 0.01,
                wm: Vector3::zeros(),
                am: Vector3::new(0.0, 0.0, 9.81),
            });
        }
        assert!(orch.is_initialized());
    }

    #[test]
    fn feed_sim_aruco_observation_tags_the_feature_when_use_aruco_is_on() {
        let mut c = cfg();
        c.use_aruco = true;
        let mut orch = VioOrchestrator::new(c);
        orch.feed_sim_aruco_observation(
            0,
            7,
            PixelObservation {
                timestamp: 1.0,
                uv: (0.0, 0.0),
                uv_norm: (0.0, 0.0),
            },
        );
        assert!(orch.tracker.feature_database().is_aruco(7));
    }

    #[test]
    fn feed_sim_aruco_observation_is_untagged_when_use_aruco_is_off() {
        let mut orch = VioOrchestrator::new(cfg());
        orch.feed_sim_aruco_observation(
            0,
            7,
            PixelObservation {
                timestamp: 1.0,
                uv: (0.0, 0.0),
                uv_norm: (0.0, 0.0),
            },
        );
        assert!(!orch.tracker.feature_database().is_aruco(7));
    }

    #[test]
    fn camera_queue_does_not_drain_until_every_stream_has_a_sample() {
        let mut c = cfg();
        c.num_cameras = 2;
        c.cameras.push(c.cameras[0].clone());
        let mut orch = VioOrchestrator::new(c);
        orch.feed_camera(CameraData {
            timestamp: 0.0,
            sensor_ids: vec![0],
            images: vec![],
            masks: vec![],
        });
        for i in 0..5 {
            orch.feed_imu(ImuData {
                timestamp: i as f64 * 0.01 + 1.0,
                wm: Vector3::zeros(),
                am: Vector3::new(0.0, 0.0, 9.81),
            });
        }
        assert_eq!(orch.camera_queue.len(), 1, "stream 1 never arrived, queue must not drain");
    }

    #[test]
    fn out_of_order_gps_is_dropped() {
        let mut orch = VioOrchestrator::new(cfg());
        orch.state.timestamp = 10.0;
        orch.track_gps_and_update(&GpsData {
            timestamp: 9.0,
            lla: Vector3::zeros(),
            cov: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        });
        assert_eq!(orch.state.timestamp, 10.0);
    }
}
