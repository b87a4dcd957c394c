//! Nullspace-projected multi-view MSCKF update.
//!
//! For each feature, triangulates using every linked clone, builds the
//! stacked reprojection residual/Jacobian, projects onto the left
//! null-space of the feature's 3-D-position Jacobian block to eliminate
//! the unknown point, applies a chi-square gate, then stacks the surviving
//! residuals into one joint EKF update. Residual/Jacobian plumbing is in
//! the idiom of the teacher's `factors/imu_preintegration.rs::ImuFactor`
//! (`compute_residual`/`compute_weighted_error`); the algorithm itself is
//! `original_source/ov_msckf`'s classic MSCKF nullspace projection.

use crate::quat::skew_symmetric;
use crate::state::covariance::chi2_gate;
use crate::state::State;
use crate::tracker::camera::CameraModel;
use crate::tracker::FeatureDatabase;
use nalgebra::{DMatrix, DVector, Vector3};

pub struct MsckfConfig {
    pub pixel_noise_std: f64,
    pub chi2_multiplier: f64,
}

impl Default for MsckfConfig {
    fn default() -> Self {
        Self {
            pixel_noise_std: 1.0,
            chi2_multiplier: 5.0,
        }
    }
}

/// Triangulate a feature's 3-D position in the global frame via linear
/// least squares over its clone observations. Returns `None` if fewer than
/// two clones are available or the system is degenerate.
fn triangulate(state: &State, feature_id: u64, db: &FeatureDatabase) -> Option<Vector3<f64>> {
    let feature = db.get_feature(feature_id)?;
    // Only the base camera's (sensor id 0) observations are used; a
    // stereo partner's observations on the same feature are dropped here.
    let obs = feature.observations.get(&0)?;
    let mut rows = Vec::new();
    let mut rhs = Vec::new();
    for o in obs {
        let clone = state.clones.iter().find(|c| c.timestamp == o.timestamp)?;
        let r = clone.q_gtoi.to_rotation_matrix();
        let p = clone.pos;
        let (x, y) = o.uv_norm;
        // Two rows per observation: x*row2 - row0 = 0, y*row2 - row1 = 0,
        // expressed against global point `P`: R(P-p) normalized by depth.
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
    let m = rows.len();
    let a = DMatrix::from_fn(m, 3, |r, c| rows[r][c]);
    let b = DVector::from_vec(rhs);
    let ata = a.transpose() * &a;
    let atb = a.transpose() * &b;
    let solution = ata.try_inverse()? * atb;
    Some(Vector3::new(solution[0], solution[1], solution[2]))
}

/// Gram-Schmidt orthonormal basis (as a `rows x m` matrix) for the
/// left null-space of `h_f` (an `m x 3` matrix of rank <= 3). Starts from
/// `h_f`'s own orthonormalized columns and completes them against the
/// standard basis, discarding the first 3 rows (the column space of
/// `h_f`) and keeping the remaining `rows`.
fn left_nullspace_basis(h_f: &DMatrix<f64>, rows: usize) -> Option<DMatrix<f64>> {
    let m = h_f.nrows();
    let mut basis: Vec<DVector<f64>> = Vec::with_capacity(m);
    for c in 0..h_f.ncols() {
        let mut v = h_f.column(c).into_owned();
        for b in &basis {
            v -= b * (b.dot(&v));
        }
        let n = v.norm();
        if n > 1e-9 {
            basis.push(v / n);
        }
    }
    let rank = basis.len();
    for i in 0..m {
        if basis.len() >= rank + rows {
            break;
        }
        let mut e = DVector::<f64>::zeros(m);
        e[i] = 1.0;
        for b in &basis {
            e -= b * (b.dot(&e));
        }
        let n = e.norm();
        if n > 1e-9 {
            basis.push(e / n);
        }
    }
    if basis.len() < rank + rows {
        return None;
    }
    let mut out = DMatrix::<f64>::zeros(rows, m);
    for (i, b) in basis[rank..rank + rows].iter().enumerate() {
        out.row_mut(i).copy_from(&b.transpose());
    }
    Some(out)
}

/// Build the stacked reprojection Jacobian (wrt global point) and residual
/// for one feature across its observing clones.
fn feature_jacobian(
    state: &State,
    point: &Vector3<f64>,
    feature_id: u64,
    db: &FeatureDatabase,
    camera: &CameraModel,
    cfg: &MsckfConfig,
) -> Option<(DMatrix<f64>, DVector<f64>, Vec<f64>)> {
    let feature = db.get_feature(feature_id)?;
    // Same base-camera-only limitation as `triangulate`: a stereo partner's
    // observations are not folded into the stacked residual/Jacobian.
    let obs = feature.observations.get(&0)?;
    let m = obs.len() * 2;
    let mut h_x = DMatrix::<f64>::zeros(m, state.max_covariance_size());
    let mut h_f = DMatrix::<f64>::zeros(m, 3);
    let mut residual = DVector::<f64>::zeros(m);
    let mut var_diag = Vec::with_capacity(m);

    for (i, o) in obs.iter().enumerate() {
        let idx = state.clone_var_index(o.timestamp)?;
        let clone = state.clones.iter().find(|c| c.timestamp == o.timestamp)?;
        let r = clone.q_gtoi.to_rotation_matrix();
        let p_c = r * (point - clone.pos);
        if p_c.z <= 0.05 {
            return None;
        }
        let uv_norm_pred = (p_c.x / p_c.z, p_c.y / p_c.z);
        let uv_pred = camera.distort(uv_norm_pred);
        let uv_meas = camera.distort(o.uv_norm);

        residual[2 * i] = uv_meas.0 - uv_pred.0;
        residual[2 * i + 1] = uv_meas.1 - uv_pred.1;

        let (fx, fy) = camera.focal();
        let d_uv_d_pc = nalgebra::Matrix2x3::new(
            fx / p_c.z, 0.0, -fx * p_c.x / (p_c.z * p_c.z),
            0.0, fy / p_c.z, -fy * p_c.y / (p_c.z * p_c.z),
        );

        let d_pc_d_point = r;
        let d_pc_d_theta = skew_symmetric(&p_c);
        let d_pc_d_pos = -r;

        let block = d_uv_d_pc * d_pc_d_point;
        h_f.view_mut((2 * i, 0), (2, 3)).copy_from(&block);

        let d_uv_d_theta = d_uv_d_pc * d_pc_d_theta;
        let d_uv_d_pos = d_uv_d_pc * d_pc_d_pos;
        h_x.view_mut((2 * i, idx.offset), (2, 3)).copy_from(&d_uv_d_theta);
        h_x.view_mut((2 * i, idx.offset + 3), (2, 3)).copy_from(&d_uv_d_pos);

        var_diag.push(cfg.pixel_noise_std * cfg.pixel_noise_std);
        var_diag.push(cfg.pixel_noise_std * cfg.pixel_noise_std);
    }

    // Nullspace projection: eliminate h_f by projecting h_x/residual onto
    // an orthonormal basis of the left null-space of h_f (rank <= 3), built
    // by Gram-Schmidt completion of h_f's column space against the
    // standard basis.
    let null_rows = m.saturating_sub(3);
    if null_rows == 0 {
        return None;
    }
    let basis = left_nullspace_basis(&h_f, null_rows)?;
    let h_x_proj = &basis * &h_x;
    let res_proj = &basis * &residual;
    Some((h_x_proj, res_proj, var_diag[..null_rows].to_vec()))
}

/// Apply the MSCKF update for `feature_ids`, returning the ids that were
/// actually accepted (passed triangulation + the chi-square gate). The
/// orchestrator marks accepted ids `to_delete` on the feature database.
pub fn update(
    state: &mut State,
    db: &FeatureDatabase,
    camera: &CameraModel,
    feature_ids: &[u64],
    cfg: &MsckfConfig,
) -> Vec<u64> {
    let mut accepted_ids = Vec::new();
    let mut stacked_h = Vec::new();
    let mut stacked_r = Vec::new();
    let mut stacked_var = Vec::new();

    for &id in feature_ids {
        let Some(point) = triangulate(state, id, db) else {
            continue;
        };
        let Some((h, r, var)) = feature_jacobian(state, &point, id, db, camera, cfg) else {
            continue;
        };
        let r_diag = DMatrix::from_diagonal(&DVector::from_vec(var.clone()));
        let s = state.cov.innovation_covariance(&h, &r_diag);
        if !chi2_gate(&r, &s, cfg.chi2_multiplier * r.len() as f64) {
            continue;
        }
        accepted_ids.push(id);
        stacked_h.push(h);
        stacked_r.push(r);
        stacked_var.extend(var);
    }

    if stacked_h.is_empty() {
        return accepted_ids;
    }

    let total_rows: usize = stacked_h.iter().map(|h| h.nrows()).sum();
    let n = state.max_covariance_size();
    let mut h_full = DMatrix::<f64>::zeros(total_rows, n);
    let mut r_full = DVector::<f64>::zeros(total_rows);
    let mut row = 0;
    for (h, r) in stacked_h.iter().zip(stacked_r.iter()) {
        h_full.view_mut((row, 0), (h.nrows(), n)).copy_from(h);
        r_full.rows_mut(row, r.len()).copy_from(r);
        row += h.nrows();
    }
    let r_noise = DMatrix::from_diagonal(&DVector::from_vec(stacked_var));

    let k = state.cov.ekf_update(&h_full, &r_noise);
    let dx = k * r_full;
    apply_error_state(state, &dx);

    accepted_ids
}

pub(crate) fn apply_error_state(state: &mut State, dx: &DVector<f64>) {
    let io = state.imu_index.offset;
    let theta = Vector3::new(dx[io], dx[io + 1], dx[io + 2]);
    state.imu.q_gtoi = state.imu.q_gtoi.update(&theta);
    state.imu.pos += Vector3::new(dx[io + 3], dx[io + 4], dx[io + 5]);
    state.imu.vel += Vector3::new(dx[io + 6], dx[io + 7], dx[io + 8]);
    state.imu.bg += Vector3::new(dx[io + 9], dx[io + 10], dx[io + 11]);
    state.imu.ba += Vector3::new(dx[io + 12], dx[io + 13], dx[io + 14]);

    for clone in state.clones.iter_mut() {
        let idx = state
            .clone_index
            .get(&clone.timestamp.to_bits())
            .copied()
            .unwrap();
        let theta = Vector3::new(dx[idx.offset], dx[idx.offset + 1], dx[idx.offset + 2]);
        clone.q_gtoi = clone.q_gtoi.update(&theta);
        clone.pos += Vector3::new(dx[idx.offset + 3], dx[idx.offset + 4], dx[idx.offset + 5]);
    }

    for landmark in state.landmarks.iter_mut() {
        if let Some(idx) = state.landmark_index.get(&landmark.feature_id).copied() {
            landmark.value += Vector3::new(dx[idx.offset], dx[idx.offset + 1], dx[idx.offset + 2]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::IMU_STATE_SIZE;
    use crate::types::PixelObservation;

    #[test]
    fn empty_feature_set_leaves_state_unchanged() {
        let mut state = State::new(&[1e-4; IMU_STATE_SIZE]);
        let db = FeatureDatabase::new();
        let camera = CameraModel::RadTan {
            fx: 100.0,
            fy: 100.0,
            cx: 0.0,
            cy: 0.0,
            k: [0.0; 4],
        };
        let before = state.imu.pos;
        let accepted = update(&mut state, &db, &camera, &[], &MsckfConfig::default());
        assert!(accepted.is_empty());
        assert_eq!(state.imu.pos, before);
    }

    #[test]
    fn feature_with_too_few_observations_is_skipped() {
        let mut state = State::new(&[1e-4; IMU_STATE_SIZE]);
        state.add_clone(0.0);
        let mut db = FeatureDatabase::new();
        db.insert_observation(
            1,
            0,
            PixelObservation {
                timestamp: 0.0,
                uv: (0.0, 0.0),
                uv_norm: (0.0, 0.0),
            },
        );
        let camera = CameraModel::RadTan {
            fx: 100.0,
            fy: 100.0,
            cx: 0.0,
            cy: 0.0,
            k: [0.0; 4],
        };
        let accepted = update(&mut state, &db, &camera, &[1], &MsckfConfig::default());
        assert!(accepted.is_empty());
    }
}
