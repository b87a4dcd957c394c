//! Diagnostic: drive a handful of GNSS fixes against a stationary IMU
//! state and print the resulting position/covariance trace at each step.
//!
//! Mirrors the teacher's `src/bin/ekf_gps_demo.rs` (a standalone
//! print-driven diagnostic, no subcommands) but against the real
//! `GnssUpdater` instead of a scalar-vs-full-covariance toy comparison.

use nalgebra::Vector3;
use vio_estimator::config::VioConfig;
use vio_estimator::gnss::GnssUpdater;
use vio_estimator::state::{State, IMU_STATE_SIZE};
use vio_estimator::types::GpsData;

fn main() {
    println!("=== GNSS update demo ===\n");

    let cfg = VioConfig::default();
    let mut state = State::new(&[1e-2; IMU_STATE_SIZE]);
    let mut updater = GnssUpdater::new(&cfg);

    let fixes = [
        GpsData {
            timestamp: 0.0,
            lla: Vector3::new(-122.4194, 37.7749, 10.0),
            cov: [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 9.0]],
        },
        GpsData {
            timestamp: 1.0,
            lla: Vector3::new(-122.41935, 37.77495, 10.2),
            cov: [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 9.0]],
        },
        GpsData {
            timestamp: 2.0,
            lla: Vector3::new(-122.4193, 37.7750, 10.1),
            cov: [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 9.0]],
        },
    ];

    for fix in &fixes {
        let delta = updater.update(&mut state, fix);
        println!(
            "t={:.1}  enu_delta={:?}  position=({:.3}, {:.3}, {:.3})",
            fix.timestamp,
            delta.map(|d| (d.x, d.y, d.z)),
            state.imu.pos.x,
            state.imu.pos.y,
            state.imu.pos.z,
        );
    }

    println!(
        "\nfinal position covariance trace: {:.6}",
        state.cov.matrix().diagonal().sum()
    );
}
