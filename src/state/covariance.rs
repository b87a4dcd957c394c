//! Dense symmetric covariance store addressed by variable index/size.
//!
//! The diagonal-block initialization pattern (`for (i, &val) in
//! diag.iter().enumerate() { cov[[i, i]] = val }`) is lifted from the
//! teacher's `filters/ekf_15d.rs::Ekf15d::new`, adapted to a dynamically
//! resizable `nalgebra::DMatrix` instead of a fixed 15x15 `ndarray::Array2`.

use nalgebra::{DMatrix, DVector};

/// Symmetric, positive-semi-definite covariance over a dynamically sized
/// error state. Rows/columns are addressed by `(index, size)` pairs handed
/// out by the owning `State`.
#[derive(Clone, Debug)]
pub struct Covariance {
    p: DMatrix<f64>,
}

impl Covariance {
    pub fn zeros(n: usize) -> Self {
        Self {
            p: DMatrix::zeros(n, n),
        }
    }

    pub fn from_diag(diag: &[f64]) -> Self {
        let n = diag.len();
        let mut p = DMatrix::zeros(n, n);
        for (i, &val) in diag.iter().enumerate() {
            p[(i, i)] = val;
        }
        Self { p }
    }

    pub fn size(&self) -> usize {
        self.p.nrows()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.p
    }

    pub fn matrix_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.p
    }

    /// Block `[index..index+size, index..index+size]`.
    pub fn block(&self, index: usize, size: usize) -> DMatrix<f64> {
        self.p.view((index, index), (size, size)).into_owned()
    }

    /// Append `size` new rows/columns at the end, with cross-covariance
    /// `cross` (size x old_n) and prior block `prior` (size x size).
    pub fn augment(&mut self, cross: &DMatrix<f64>, prior: &DMatrix<f64>) {
        let old_n = self.p.nrows();
        let size = prior.nrows();
        let mut grown = DMatrix::zeros(old_n + size, old_n + size);
        grown.view_mut((0, 0), (old_n, old_n)).copy_from(&self.p);
        grown
            .view_mut((old_n, 0), (size, old_n))
            .copy_from(cross);
        grown
            .view_mut((0, old_n), (old_n, size))
            .copy_from(&cross.transpose());
        grown
            .view_mut((old_n, old_n), (size, size))
            .copy_from(prior);
        self.p = grown;
    }

    /// Remove the `[index..index+size]` rows/columns, compacting the rest.
    pub fn marginalize(&mut self, index: usize, size: usize) {
        let n = self.p.nrows();
        let keep: Vec<usize> = (0..n).filter(|i| *i < index || *i >= index + size).collect();
        let mut out = DMatrix::zeros(keep.len(), keep.len());
        for (new_r, &r) in keep.iter().enumerate() {
            for (new_c, &c) in keep.iter().enumerate() {
                out[(new_r, new_c)] = self.p[(r, c)];
            }
        }
        self.p = out;
    }

    /// Force exact numeric symmetry after an update that may have drifted
    /// due to floating point error.
    pub fn symmetrize(&mut self) {
        let p = &self.p;
        self.p = 0.5 * (p + p.transpose());
    }

    /// Smallest eigenvalue, used for PSD property tests. Symmetric
    /// eigendecomposition is exact for a (numerically) symmetric matrix.
    pub fn min_eigenvalue(&self) -> f64 {
        let sym = nalgebra::linalg::SymmetricEigen::new(self.p.clone());
        sym.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min)
    }

    /// Joseph-form-free EKF update: `x' = x + K*r`, `P' = (I-KH)P`, applied
    /// by the caller to the state vector; this only updates `P` and returns
    /// the gain `K` for the caller to apply to the mean.
    ///
    /// `h` is `m x n`, `r_noise` is `m x m` measurement covariance.
    pub fn ekf_update(&mut self, h: &DMatrix<f64>, r_noise: &DMatrix<f64>) -> DMatrix<f64> {
        let n = self.p.nrows();
        let s = h * &self.p * h.transpose() + r_noise;
        let s_inv = s
            .clone()
            .try_inverse()
            .unwrap_or_else(|| DMatrix::identity(s.nrows(), s.ncols()));
        let k = &self.p * h.transpose() * &s_inv;
        let i_kh = DMatrix::<f64>::identity(n, n) - &k * h;
        self.p = &i_kh * &self.p * i_kh.transpose() + &k * r_noise * k.transpose();
        self.symmetrize();
        k
    }

    pub fn innovation_covariance(&self, h: &DMatrix<f64>, r_noise: &DMatrix<f64>) -> DMatrix<f64> {
        h * &self.p * h.transpose() + r_noise
    }
}

/// Chi-square Mahalanobis gate on a residual given its innovation
/// covariance. Returns true if the residual should be accepted.
pub fn chi2_gate(residual: &DVector<f64>, s: &DMatrix<f64>, threshold: f64) -> bool {
    match s.clone().try_inverse() {
        Some(s_inv) => {
            let d2 = (residual.transpose() * s_inv * residual)[0];
            d2 < threshold
        }
        None => false,
    }
}
