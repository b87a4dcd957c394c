//! `SPEC_FULL.md` §8 feature-selection end-to-end scenarios: the MSCKF
//! batch cap and SLAM promotion.

use vio_estimator::config::VioConfig;
use vio_estimator::feature_selector::select_features;
use vio_estimator::state::{State, IMU_STATE_SIZE};
use vio_estimator::tracker::FeatureDatabase;
use vio_estimator::types::PixelObservation;

fn obs(t: f64) -> PixelObservation {
    PixelObservation {
        timestamp: t,
        uv: (0.0, 0.0),
        uv_norm: (0.0, 0.0),
    }
}

#[test]
fn msckf_batch_cap_keeps_the_longest_tracks_and_spares_the_rest() {
    let mut cfg = VioConfig::default();
    cfg.max_msckf_in_update = 20;
    cfg.max_clone_size = 100; // keep every feature out of the "max track" bucket
    cfg.max_slam_features = 0;

    let mut state = State::new(&[1e-4; IMU_STATE_SIZE]);
    let mut db = FeatureDatabase::new();
    // 50 lost features (no observation newer than state_time=0.0), with
    // distinct observation counts so the cap keeps a deterministic subset.
    for id in 1..=50u64 {
        for k in 0..id {
            db.insert_observation(id, 0, obs(-(k as f64) - 1.0));
        }
    }

    let result = select_features(&cfg, &mut state, &db, 0.0, &[0], 0.0);

    assert_eq!(result.msckf_features.len(), 20);
    // The selector sorts ascending by observation count and keeps the
    // longest-tracked suffix, i.e. feature ids 31..=50 (counts 31..=50).
    let kept: std::collections::HashSet<u64> = result.msckf_features.iter().copied().collect();
    for id in 31..=50u64 {
        assert!(kept.contains(&id), "expected feature {id} to survive the cap");
    }
    for id in 1..=30u64 {
        assert!(!kept.contains(&id), "feature {id} should have been dropped by the cap");
    }
}

#[test]
fn slam_promotion_caps_delayed_init_at_max_slam_features() {
    let mut cfg = VioConfig::default();
    cfg.max_clone_size = 5;
    cfg.max_slam_features = 5;
    cfg.max_msckf_in_update = 1000;

    let mut state = State::new(&[1e-4; IMU_STATE_SIZE]);
    let mut db = FeatureDatabase::new();
    // 8 features whose longest track exceeds max_clone_size, making them
    // "max track" (SLAM-eligible) candidates rather than plain MSCKF ones.
    for id in 1..=8u64 {
        for k in 0..(cfg.max_clone_size + 2) {
            db.insert_observation(id, 0, obs(k as f64));
        }
    }

    let result = select_features(&cfg, &mut state, &db, 0.0, &[0], 0.0);

    assert_eq!(result.slam_delayed.len(), cfg.max_slam_features);
    let delayed: std::collections::HashSet<u64> = result.slam_delayed.iter().copied().collect();
    let msckf: std::collections::HashSet<u64> = result.msckf_features.iter().copied().collect();
    for id in &delayed {
        assert!(!msckf.contains(id), "feature {id} should not appear in both sets");
    }
}
