//! Partitions tracked features into the sets the update pipeline consumes:
//! lost, marginalize-due-to-old-clone, max-length (SLAM candidates), and
//! SLAM continuations — then caps and orders the MSCKF batch.
//!
//! Grounded directly on `original_source/ov_msckf/src/core/VioManager.cpp`
//! `do_feature_propagate_update`, which this module reproduces step for
//! step (see `SPEC_FULL.md` §4.2).

use crate::config::VioConfig;
use crate::state::{SlamLandmark, State};
use crate::tracker::FeatureDatabase;
use std::collections::HashSet;

pub struct SelectionResult {
    pub msckf_features: Vec<u64>,
    pub slam_update: Vec<u64>,
    pub slam_delayed: Vec<u64>,
}

pub fn select_features(
    cfg: &VioConfig,
    state: &mut State,
    db: &FeatureDatabase,
    marg_timestep: f64,
    current_sensor_ids: &[i32],
    elapsed_since_startup: f64,
) -> SelectionResult {
    let state_time = state.timestamp;

    let mut lost: Vec<u64> = db.features_not_containing_newer(state_time);
    lost.retain(|id| {
        db.get_feature(*id)
            .map(|f| f.sensor_ids().iter().any(|s| current_sensor_ids.contains(s)))
            .unwrap_or(false)
    });

    // ArUco features are never candidates for the marg/max-track/SLAM
    // batch before `dt_slam_delay` has elapsed since startup (the tag
    // corners need a settled pose estimate first); existing SLAM landmarks
    // already carrying tag features bypass this and are always retained.
    let mut marg: Vec<u64> = db
        .features_containing(marg_timestep)
        .into_iter()
        .filter(|id| !state.landmarks.iter().any(|l| l.feature_id == *id && l.is_aruco))
        .filter(|id| elapsed_since_startup >= cfg.dt_slam_delay || !db.is_aruco(*id))
        .collect();

    let lost_set: HashSet<u64> = lost.iter().copied().collect();
    marg.retain(|id| !lost_set.contains(id));

    let mut max_tracks: Vec<u64> = Vec::new();
    marg.retain(|id| {
        let long_enough = db
            .get_feature(*id)
            .map(|f| f.longest_camera_track() > cfg.max_clone_size)
            .unwrap_or(false);
        if long_enough {
            max_tracks.push(*id);
        }
        !long_enough
    });

    // SLAM continuation: update should_marg on existing landmarks whose
    // track vanished from the current frame.
    for landmark in state.landmarks.iter_mut() {
        let still_tracked = db.get_feature(landmark.feature_id).is_some();
        if !still_tracked && current_sensor_ids.contains(&landmark.unique_camera_id) {
            landmark.should_marg = true;
        }
    }
    let slam_update: Vec<u64> = state
        .landmarks
        .iter()
        .filter(|l| !l.should_marg)
        .map(|l| l.feature_id)
        .collect();

    let curr_aruco = state.landmarks.iter().filter(|l| l.is_aruco).count();
    let mut slam_delayed = Vec::new();
    while state.landmarks.len() + slam_delayed.len() < cfg.max_slam_features + curr_aruco {
        match max_tracks.pop() {
            Some(id) => slam_delayed.push(id),
            None => break,
        }
    }
    slam_delayed.reverse();

    let mut msckf: Vec<u64> = lost
        .into_iter()
        .chain(marg.into_iter())
        .chain(max_tracks.into_iter())
        .collect();
    msckf.sort_by_key(|id| db.get_feature(*id).map(|f| f.total_observation_count()).unwrap_or(0));
    if msckf.len() > cfg.max_msckf_in_update {
        let drop_count = msckf.len() - cfg.max_msckf_in_update;
        msckf.drain(0..drop_count);
    }

    SelectionResult {
        msckf_features: msckf,
        slam_update,
        slam_delayed,
    }
}

/// Placeholder constructor used by the SLAM updater when promoting a
/// feature id into a fresh landmark shell before triangulation fills in
/// its value.
pub fn new_landmark_shell(feature_id: u64, unique_camera_id: i32, representation: crate::config::LandmarkRepresentation) -> SlamLandmark {
    SlamLandmark {
        feature_id,
        representation,
        value: nalgebra::Vector3::zeros(),
        anchor_clone_timestamp: None,
        anchor_camera_id: unique_camera_id,
        unique_camera_id,
        should_marg: false,
        is_aruco: false,
    }
}
