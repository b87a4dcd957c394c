//! Active-track re-triangulation for the base camera.
//!
//! For every currently tracked non-SLAM feature (and every SLAM landmark,
//! converted to global coordinates), re-triangulate/transform and project
//! into the base camera's current pose for visualization/interfacing.
//! Grounded on `original_source/ov_msckf/src/core/VioManager.cpp`
//! `retriangulate_active_tracks` (`SPEC_FULL.md` §4.6): only runs on
//! frames from camera id 0, discards observations outside the clone
//! window, and discards short tracks below `max(4, floor(max_clone_size*2/5))`.

use crate::state::State;
use crate::tracker::camera::CameraModel;
use crate::tracker::FeatureDatabase;
use nalgebra::Vector3;
use std::collections::HashMap;

pub struct ActiveTracks {
    pub global_xyz: HashMap<u64, Vector3<f64>>,
    pub projected_uvd: HashMap<u64, (f64, f64, f64)>,
}

pub fn retriangulate_active_tracks(
    state: &State,
    db: &FeatureDatabase,
    camera: &CameraModel,
    camera_width: u32,
    camera_height: u32,
    max_clone_size: usize,
    sensor_ids: &[i32],
) -> Option<ActiveTracks> {
    if sensor_ids.first() != Some(&0) {
        return None;
    }

    let clone_timestamps: Vec<f64> = state.clones.iter().map(|c| c.timestamp).collect();
    let min_obs = (4usize).max((max_clone_size * 2) / 5);

    let slam_ids: std::collections::HashSet<u64> = state.landmarks.iter().map(|l| l.feature_id).collect();

    let mut global_xyz = HashMap::new();

    for landmark in &state.landmarks {
        if let Some(point) = landmark.to_global(&state.clones) {
            global_xyz.insert(landmark.feature_id, point);
        }
    }

    for id in db.features_containing_older(state.timestamp) {
        if slam_ids.contains(&id) {
            continue;
        }
        let Some(feature) = db.get_feature(id) else {
            continue;
        };
        let Some(obs) = feature.observations.get(&0) else {
            continue;
        };
        let restricted: Vec<_> = obs
            .iter()
            .filter(|o| clone_timestamps.contains(&o.timestamp))
            .collect();
        if restricted.len() < min_obs {
            continue;
        }
        if let Some(point) = triangulate_points(state, &restricted) {
            global_xyz.insert(id, point);
        }
    }

    let base_clone = state.clones.last()?;
    let r = base_clone.q_gtoi.to_rotation_matrix();
    let mut projected_uvd = HashMap::new();
    for (&id, point) in &global_xyz {
        let p_c = r * (point - base_clone.pos);
        if p_c.z < 0.1 {
            continue;
        }
        let (u, v) = camera.distort((p_c.x / p_c.z, p_c.y / p_c.z));
        if u < 0.0 || v < 0.0 || u >= camera_width as f64 || v >= camera_height as f64 {
            continue;
        }
        projected_uvd.insert(id, (u, v, p_c.z));
    }

    Some(ActiveTracks {
        global_xyz,
        projected_uvd,
    })
}

fn triangulate_points(state: &State, obs: &[&crate::types::PixelObservation]) -> Option<Vector3<f64>> {
    use nalgebra::{DMatrix, DVector};
    let mut rows = Vec::new();
    let mut rhs = Vec::new();
    for o in obs {
        let clone = state.clones.iter().find(|c| c.timestamp == o.timestamp)?;
        let r = clone.q_gtoi.to_rotation_matrix();
        let p = clone.pos;
        let (x, y) = o.uv_norm;
        let r0 = r.row(0) - x * r.row(2);
        let r1 = r.row(1) - y * r.row(2);
        let b0 = (r.row(0) * p)[0] - x * (r.row(2) * p)[0];
        let b1 = (r.row(1) * p)[0] - y * (r.row(2) * p)[0];
        rows.push([r0[0], r0[1], r0[2]]);
        rhs.push(b0);
        rows.push([r1[0], r1[1], r1[2]]);
        rhs.push(b1);
    }
    if rows.len() < 4 {
        return None;
    }
    let a = DMatrix::from_fn(rows.len(), 3, |r, c| rows[r][c]);
    let b = DVector::from_vec(rhs);
    let ata = a.transpose() * &a;
    let atb = a.transpose() * &b;
    let sol = ata.try_inverse()? * atb;
    Some(Vector3::new(sol[0], sol[1], sol[2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::IMU_STATE_SIZE;

    fn camera() -> CameraModel {
        CameraModel::RadTan {
            fx: 100.0,
            fy: 100.0,
            cx: 50.0,
            cy: 50.0,
            k: [0.0; 4],
        }
    }

    #[test]
    fn non_base_camera_frame_returns_none() {
        let state = State::new(&[1e-4; IMU_STATE_SIZE]);
        let db = FeatureDatabase::new();
        let result = retriangulate_active_tracks(&state, &db, &camera(), 100, 100, 5, &[1]);
        assert!(result.is_none());
    }

    #[test]
    fn base_camera_frame_with_no_clones_returns_none() {
        let state = State::new(&[1e-4; IMU_STATE_SIZE]);
        let db = FeatureDatabase::new();
        let result = retriangulate_active_tracks(&state, &db, &camera(), 100, 100, 5, &[0]);
        assert!(result.is_none());
    }

    #[test]
    fn anchored_landmark_is_reported_in_global_frame() {
        use crate::config::LandmarkRepresentation;
        use crate::feature_selector::new_landmark_shell;

        let mut state = State::new(&[1e-4; IMU_STATE_SIZE]);
        state.add_clone(1.0);
        let anchor = state.clones[0].clone();
        let point_global = Vector3::new(1.0, 2.0, 10.0);
        let mut landmark = new_landmark_shell(1, 0, LandmarkRepresentation::AnchoredXyz);
        landmark.value = LandmarkRepresentation::AnchoredXyz.from_xyz(point_global, anchor.rotation(), anchor.pos);
        landmark.anchor_clone_timestamp = Some(1.0);
        let n = state.max_covariance_size();
        state.add_landmark(landmark, nalgebra::DMatrix::identity(3, 3), nalgebra::DMatrix::zeros(3, n));

        let db = FeatureDatabase::new();
        let result = retriangulate_active_tracks(&state, &db, &camera(), 1000, 1000, 5, &[0]).unwrap();
        let resolved = result.global_xyz.get(&1).expect("landmark resolved to global frame");
        assert!((resolved - point_global).norm() < 1e-9);
    }
}
