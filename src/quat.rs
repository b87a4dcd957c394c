//! JPL quaternion kinematics.
//!
//! `nalgebra::UnitQuaternion` follows the Hamilton convention; the state
//! here follows the JPL convention used throughout the estimator
//! (scalar-last storage, `q_AB * q_BC = q_AC`, right-handed small-angle
//! update `q_new = exp(0.5 * theta) * q_old`). Kept as a thin wrapper over
//! a `Vector4<f64>` rather than reusing `UnitQuaternion` directly, to avoid
//! silently mixing conventions.
//!
//! Grounded on the teacher's `factors/imu_preintegration.rs`
//! (`skew_symmetric`, `log_quaternion`), generalized from Hamilton to JPL.

use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

/// A unit quaternion in JPL (scalar-last) storage: `[qx, qy, qz, qw]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JplQuat(pub Vector4<f64>);

impl JplQuat {
    pub fn identity() -> Self {
        Self(Vector4::new(0.0, 0.0, 0.0, 1.0))
    }

    pub fn from_xyzw(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self(Vector4::new(x, y, z, w)).normalized()
    }

    pub fn normalized(&self) -> Self {
        Self(self.0 / self.0.norm())
    }

    pub fn vec(&self) -> Vector3<f64> {
        Vector3::new(self.0[0], self.0[1], self.0[2])
    }

    pub fn w(&self) -> f64 {
        self.0[3]
    }

    pub fn conjugate(&self) -> Self {
        Self(Vector4::new(-self.0[0], -self.0[1], -self.0[2], self.0[3]))
    }

    /// JPL quaternion product: `self (x) other`, i.e. `q_AC = q_AB (x) q_BC`
    /// when `self = q_AB` and `other = q_BC`.
    pub fn mul(&self, other: &JplQuat) -> JplQuat {
        let (x1, y1, z1, w1) = (self.0[0], self.0[1], self.0[2], self.0[3]);
        let l = Matrix4::new(
            w1, z1, -y1, x1, //
            -z1, w1, x1, y1, //
            y1, -x1, w1, z1, //
            -x1, -y1, -z1, w1,
        );
        JplQuat(l * other.0).normalized()
    }

    /// Rotation matrix `R_AB` such that `v_B = R_AB * v_A` for `self = q_AB`
    /// (JPL convention: rotates from the frame the quaternion is "from").
    pub fn to_rotation_matrix(&self) -> Matrix3<f64> {
        let q = self.vec();
        let qw = self.w();
        let skew_q = skew_symmetric(&q);
        (2.0 * qw * qw - 1.0) * Matrix3::identity() - 2.0 * qw * skew_q + 2.0 * q * q.transpose()
    }

    /// Small-angle update: `q_new = delta(theta) (x) q_old`.
    pub fn update(&self, theta: &Vector3<f64>) -> JplQuat {
        let norm = theta.norm();
        let dq = if norm < 1e-8 {
            JplQuat::from_xyzw(theta.x * 0.5, theta.y * 0.5, theta.z * 0.5, 1.0)
        } else {
            let half = 0.5 * norm;
            let axis = theta / norm;
            JplQuat::from_xyzw(
                axis.x * half.sin(),
                axis.y * half.sin(),
                axis.z * half.sin(),
                half.cos(),
            )
        };
        dq.mul(self)
    }
}

/// Skew-symmetric cross-product matrix, `skew(v) * x == v.cross(&x)`.
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Rodrigues exponential map: axis-angle vector to rotation matrix.
pub fn exp_so3(theta: &Vector3<f64>) -> Matrix3<f64> {
    let angle = theta.norm();
    if angle < 1e-8 {
        return Matrix3::identity() + skew_symmetric(theta);
    }
    let axis = theta / angle;
    let k = skew_symmetric(&axis);
    Matrix3::identity() + angle.sin() * k + (1.0 - angle.cos()) * (k * k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_product_is_identity() {
        let q = JplQuat::identity();
        let r = q.mul(&q);
        assert_relative_eq!(r.0, q.0, epsilon = 1e-12);
    }

    #[test]
    fn small_update_preserves_unit_norm() {
        let q = JplQuat::identity();
        let updated = q.update(&Vector3::new(0.01, -0.02, 0.03));
        assert_relative_eq!(updated.0.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn identity_rotation_matrix_is_identity() {
        let q = JplQuat::identity();
        let r = q.to_rotation_matrix();
        assert_relative_eq!(r, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn skew_matches_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let x = Vector3::new(4.0, -1.0, 2.0);
        assert_relative_eq!(skew_symmetric(&v) * x, v.cross(&x), epsilon = 1e-12);
    }
}
