//! Persistent SLAM landmark update, delayed initialization, and anchor
//! change on marginalization.
//!
//! Algorithmic shape grounded on `original_source/ov_msckf`'s
//! `UpdaterSLAM` (`update`, `delayed_init`, `change_anchors`, as invoked
//! from `VioManager.cpp::do_feature_propagate_update`); residual/Jacobian
//! idiom from `factors/imu_preintegration.rs`.

use crate::config::LandmarkRepresentation;
use crate::feature_selector::new_landmark_shell;
use crate::quat::skew_symmetric;
use crate::state::{SlamLandmark, State};
use crate::tracker::camera::CameraModel;
use crate::tracker::FeatureDatabase;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

pub struct SlamConfig {
    pub pixel_noise_std: f64,
    pub max_slam_in_update: usize,
}

/// EKF update against already-initialized SLAM landmarks, in mini-batches
/// of at most `max_slam_in_update` to bound per-frame latency.
pub fn update(state: &mut State, db: &FeatureDatabase, camera: &CameraModel, feature_ids: &[u64], cfg: &SlamConfig) {
    for batch in feature_ids.chunks(cfg.max_slam_in_update.max(1)) {
        update_batch(state, db, camera, batch, cfg);
    }
}

fn update_batch(state: &mut State, db: &FeatureDatabase, camera: &CameraModel, batch: &[u64], cfg: &SlamConfig) {
    let n = state.max_covariance_size();
    let mut rows = Vec::new();
    let mut h_rows: Vec<DMatrix<f64>> = Vec::new();
    let mut residuals: Vec<f64> = Vec::new();

    for &id in batch {
        let Some(landmark) = state.landmarks.iter().find(|l| l.feature_id == id) else {
            continue;
        };
        let Some(idx) = state.landmark_index.get(&id).copied() else {
            continue;
        };
        let Some(feature) = db.get_feature(id) else {
            continue;
        };
        // Only the base camera (sensor id 0) feeds the SLAM update; a
        // stereo second camera's observations of the same landmark are not
        // fused here (`SPEC_FULL.md` §4.3/§4.4 don't specify multi-camera
        // fusion for SLAM landmarks).
        let Some(obs) = feature.observations.get(&0).and_then(|v| v.last()) else {
            continue;
        };
        let Some(clone) = state.clones.iter().find(|c| c.timestamp == obs.timestamp) else {
            continue;
        };
        let Some(global_point) = landmark.to_global(&state.clones) else {
            continue;
        };

        let r = clone.q_gtoi.to_rotation_matrix();
        let p_c = r * (global_point - clone.pos);
        if p_c.z <= 0.05 {
            continue;
        }
        let uv_pred = camera.distort((p_c.x / p_c.z, p_c.y / p_c.z));
        let uv_meas = camera.distort(obs.uv_norm);

        let (fx, fy) = camera.focal();
        let d_uv_d_pc = nalgebra::Matrix2x3::new(
            fx / p_c.z, 0.0, -fx * p_c.x / (p_c.z * p_c.z),
            0.0, fy / p_c.z, -fy * p_c.y / (p_c.z * p_c.z),
        );

        // d(point_global)/d(landmark.value): identity for `GlobalXyz`,
        // otherwise the anchor-relative-to-global Jacobian, so the
        // covariance block stays expressed in the landmark's own stored
        // representation rather than raw global XYZ.
        let d_point_d_value = match landmark.representation {
            LandmarkRepresentation::GlobalXyz => Matrix3::identity(),
            _ => {
                let anchor = state
                    .clones
                    .iter()
                    .find(|c| Some(c.timestamp) == landmark.anchor_clone_timestamp)
                    .unwrap();
                landmark.representation.to_xyz_jacobian(landmark.value, anchor.rotation())
            }
        };

        let mut h_row = DMatrix::<f64>::zeros(2, n);
        let clone_idx = state.clone_var_index(obs.timestamp).unwrap();
        h_row
            .view_mut((0, clone_idx.offset), (2, 3))
            .copy_from(&(d_uv_d_pc * skew_symmetric(&p_c)));
        h_row
            .view_mut((0, clone_idx.offset + 3), (2, 3))
            .copy_from(&(d_uv_d_pc * (-r)));
        h_row
            .view_mut((0, idx.offset), (2, 3))
            .copy_from(&(d_uv_d_pc * r * d_point_d_value));

        h_rows.push(h_row);
        residuals.push(uv_meas.0 - uv_pred.0);
        residuals.push(uv_meas.1 - uv_pred.1);
        rows.push(id);
    }

    if h_rows.is_empty() {
        return;
    }

    let total_rows = h_rows.len() * 2;
    let mut h_full = DMatrix::<f64>::zeros(total_rows, n);
    for (i, h) in h_rows.iter().enumerate() {
        h_full.view_mut((2 * i, 0), (2, n)).copy_from(h);
    }
    let r_full = DVector::from_vec(residuals);
    let var = cfg.pixel_noise_std * cfg.pixel_noise_std;
    let r_noise = DMatrix::<f64>::identity(total_rows, total_rows) * var;

    let k = state.cov.ekf_update(&h_full, &r_noise);
    let dx = k * r_full;
    crate::updater_msckf::apply_error_state(state, &dx);
}

/// Triangulate and add each feature in `feature_ids` as a fresh SLAM
/// landmark, with an initial covariance block derived from the
/// measurement Jacobian and pixel noise.
pub fn delayed_init(
    state: &mut State,
    db: &FeatureDatabase,
    camera: &CameraModel,
    feature_ids: &[u64],
    representation: crate::config::LandmarkRepresentation,
    pixel_noise_std: f64,
) {
    for &id in feature_ids {
        let Some(feature) = db.get_feature(id) else {
            continue;
        };
        // As in `update_batch`, triangulation and anchoring only consider
        // the base camera's observations; a stereo second camera's
        // observations of the same feature are not fused here.
        let Some(obs) = feature.observations.get(&0) else {
            continue;
        };
        if obs.len() < 2 {
            continue;
        }
        let Some(point) = triangulate_linear(state, obs) else {
            continue;
        };

        // Anchor non-global representations to the clone at the feature's
        // first observation (the classic MSCKF/OpenVINS choice of anchor).
        let value = match representation {
            LandmarkRepresentation::GlobalXyz => point,
            _ => {
                let Some(anchor_ts) = obs.first().map(|o| o.timestamp) else {
                    continue;
                };
                let Some(anchor) = state.clones.iter().find(|c| c.timestamp == anchor_ts) else {
                    continue;
                };
                representation.from_xyz(point, anchor.rotation(), anchor.pos)
            }
        };

        let unique_camera_id = feature.sensor_ids().into_iter().min().unwrap_or(0);
        let mut landmark = SlamLandmark {
            value,
            ..new_landmark_shell(id, unique_camera_id, representation)
        };
        if !matches!(representation, LandmarkRepresentation::GlobalXyz) {
            landmark.anchor_clone_timestamp = obs.first().map(|o| o.timestamp);
        }

        let n = state.max_covariance_size();
        let var = pixel_noise_std * pixel_noise_std;
        let prior = DMatrix::<f64>::identity(3, 3) * (var * 100.0);
        let cross = DMatrix::<f64>::zeros(3, n);
        state.add_landmark(landmark, prior, cross);
    }
}

fn triangulate_linear(state: &State, obs: &[crate::types::PixelObservation]) -> Option<Vector3<f64>> {
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

/// Rebind every landmark anchored at `old_anchor_timestamp` to
/// `new_anchor_timestamp`, transforming both its stored representation and
/// the corresponding covariance rows/columns through the Jacobian of the
/// anchor-rebind map (`SPEC_FULL.md` §4.4). Called before the old anchor
/// clone itself is marginalized, so both poses are still in `state.clones`.
/// `GlobalXyz` landmarks carry no anchor dependence and are only rebound
/// (no value/covariance transform needed) if they happen to carry a stale
/// anchor timestamp.
pub fn change_anchors(state: &mut State, old_anchor_timestamp: f64, new_anchor_timestamp: f64) {
    let old_pose = state
        .clones
        .iter()
        .find(|c| c.timestamp == old_anchor_timestamp)
        .map(|c| (c.rotation(), c.pos));
    let new_pose = state
        .clones
        .iter()
        .find(|c| c.timestamp == new_anchor_timestamp)
        .map(|c| (c.rotation(), c.pos));
    let (Some((r_old, p_old)), Some((r_new, p_new))) = (old_pose, new_pose) else {
        return;
    };

    let rebind_ids: Vec<u64> = state
        .landmarks
        .iter()
        .filter(|l| l.anchor_clone_timestamp == Some(old_anchor_timestamp))
        .map(|l| l.feature_id)
        .collect();

    for id in rebind_ids {
        let Some(pos) = state.landmarks.iter().position(|l| l.feature_id == id) else {
            continue;
        };
        let representation = state.landmarks[pos].representation;
        if representation == LandmarkRepresentation::GlobalXyz {
            state.landmarks[pos].anchor_clone_timestamp = Some(new_anchor_timestamp);
            continue;
        }

        let value_old = state.landmarks[pos].value;
        let jacobian = rebind_jacobian(representation, value_old, r_old, p_old, r_new, p_new);
        let point_global = representation.to_xyz(value_old, r_old, p_old);
        let value_new = representation.from_xyz(point_global, r_new, p_new);

        state.landmarks[pos].value = value_new;
        state.landmarks[pos].anchor_clone_timestamp = Some(new_anchor_timestamp);

        if let Some(idx) = state.landmark_index.get(&id).copied() {
            let n = state.max_covariance_size();
            let mut t = DMatrix::<f64>::identity(n, n);
            t.view_mut((idx.offset, idx.offset), (3, 3)).copy_from(&jacobian);
            let p = state.cov.matrix().clone();
            *state.cov.matrix_mut() = &t * &p * t.transpose();
            state.cov.symmetrize();
        }
    }
}

/// Jacobian of the anchor-rebind map `value_old -> value_new` at fixed
/// anchor poses: `d(from_xyz(to_xyz(value_old, old), new))/d(value_old)`.
fn rebind_jacobian(
    representation: LandmarkRepresentation,
    value_old: Vector3<f64>,
    r_old: Matrix3<f64>,
    p_old: Vector3<f64>,
    r_new: Matrix3<f64>,
    p_new: Vector3<f64>,
) -> Matrix3<f64> {
    match representation {
        LandmarkRepresentation::GlobalXyz => Matrix3::identity(),
        LandmarkRepresentation::AnchoredXyz => r_new * r_old.transpose(),
        LandmarkRepresentation::AnchoredInverseDepth => {
            let point_global = representation.to_xyz(value_old, r_old, p_old);
            let p_anchor_new = r_new * (point_global - p_new);
            let d_to = representation.to_xyz_jacobian(value_old, r_old);
            let (x, y, z) = (p_anchor_new.x, p_anchor_new.y, p_anchor_new.z);
            let d_from = Matrix3::new(
                1.0 / z, 0.0, -x / (z * z),
                0.0, 1.0 / z, -y / (z * z),
                0.0, 0.0, -1.0 / (z * z),
            ) * r_new;
            d_from * d_to
        }
    }
}
