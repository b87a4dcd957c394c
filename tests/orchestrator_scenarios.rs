//! End-to-end orchestrator scenarios, one file per `SPEC_FULL.md` §8
//! scenario family. Drives `VioOrchestrator` the way `replay`/`main` do,
//! through its public `feed_*` surface only.

use nalgebra::Vector3;
use vio_estimator::config::VioConfig;
use vio_estimator::orchestrator::VioOrchestrator;
use vio_estimator::types::{CameraData, ImuData, PixelObservation};

fn stationary_imu(from: usize, to: usize, dt: f64) -> Vec<ImuData> {
    (from..to)
        .map(|i| ImuData {
            timestamp: i as f64 * dt,
            wm: Vector3::zeros(),
            am: Vector3::new(0.0, 0.0, 9.81),
        })
        .collect()
}

fn camera_frame(t: f64, sensor_ids: Vec<i32>) -> CameraData {
    CameraData {
        timestamp: t,
        sensor_ids,
        images: vec![],
        masks: vec![],
    }
}

#[test]
fn stationary_init_plus_zupt_holds_near_zero_position() {
    let mut cfg = VioConfig::default();
    cfg.try_zupt = true;
    cfg.zupt_only_at_beginning = false;
    let mut orch = VioOrchestrator::new(cfg);

    for sample in stationary_imu(0, 150, 0.01) {
        orch.feed_imu(sample);
    }
    orch.feed_camera(camera_frame(1.5, vec![0]));
    for sample in stationary_imu(150, 160, 0.01) {
        orch.feed_imu(sample);
    }

    assert!(orch.is_initialized());
    assert!(orch.state().clones.iter().any(|c| (c.timestamp - 1.5).abs() < 1e-9));

    for sample in stationary_imu(160, 210, 0.01) {
        orch.feed_imu(sample);
    }
    orch.feed_camera(camera_frame(2.0, vec![0]));
    for sample in stationary_imu(210, 220, 0.01) {
        orch.feed_imu(sample);
    }

    assert!(orch.state().imu.pos.norm() < 1e-3);
}

#[test]
fn clone_window_never_exceeds_configured_size() {
    let mut cfg = VioConfig::default();
    cfg.max_clone_size = 5;
    cfg.try_zupt = false;
    cfg.init_imu_thresh = 0.0;
    let mut orch = VioOrchestrator::new(cfg);

    let mut t = 0.0;
    for i in 0..300 {
        orch.feed_imu(ImuData {
            timestamp: t,
            wm: Vector3::zeros(),
            am: Vector3::new(0.05, 0.0, 9.81),
        });
        t += 0.01;
        if i % 30 == 0 && i > 0 {
            let frame_t = t;
            orch.feed_sim_observation(
                0,
                1,
                PixelObservation {
                    timestamp: frame_t,
                    uv: (0.0, 0.0),
                    uv_norm: (0.0, 0.0),
                },
            );
            orch.feed_camera(camera_frame(frame_t, vec![0]));
        }
    }

    assert!(orch.state().clones.len() <= 5);
}

#[test]
fn out_of_order_image_is_dropped_without_changing_state() {
    let mut orch = VioOrchestrator::new(VioConfig::default());
    for sample in stationary_imu(0, 150, 0.01) {
        orch.feed_imu(sample);
    }
    orch.feed_camera(camera_frame(1.0, vec![0]));
    for sample in stationary_imu(150, 160, 0.01) {
        orch.feed_imu(sample);
    }
    let before = orch.state().timestamp;
    let clones_before = orch.state().clones.len();

    // An image stamped well before the current state time must be dropped
    // outright, leaving the state exactly as it was.
    orch.feed_camera(camera_frame(before - 0.5, vec![0]));

    assert_eq!(orch.state().timestamp, before);
    assert_eq!(orch.state().clones.len(), clones_before);
}
