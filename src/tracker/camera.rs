//! Camera distortion models.
//!
//! A tagged enum rather than a trait-object hierarchy, per the
//! "dynamic dispatch" design note: the set of supported models is closed
//! and small, so an enum keeps the per-frame hot path monomorphic.

use crate::config::{CameraConfig, CameraModelKind};

#[derive(Clone, Debug)]
pub enum CameraModel {
    Equidistant { fx: f64, fy: f64, cx: f64, cy: f64, k: [f64; 4] },
    RadTan { fx: f64, fy: f64, cx: f64, cy: f64, k: [f64; 4] },
}

impl CameraModel {
    pub fn from_config(cfg: &CameraConfig) -> Self {
        let p = &cfg.intrinsics;
        let (fx, fy, cx, cy) = (p[0], p[1], p[2], p[3]);
        let mut k = [0.0; 4];
        for (i, slot) in k.iter_mut().enumerate() {
            *slot = p.get(4 + i).copied().unwrap_or(0.0);
        }
        match cfg.model {
            CameraModelKind::Equidistant => CameraModel::Equidistant { fx, fy, cx, cy, k },
            CameraModelKind::RadTan => CameraModel::RadTan { fx, fy, cx, cy, k },
        }
    }

    /// Project a normalized (undistorted) point to distorted pixel
    /// coordinates.
    pub fn distort(&self, uv_norm: (f64, f64)) -> (f64, f64) {
        match self {
            CameraModel::RadTan { fx, fy, cx, cy, k } => {
                let (x, y) = uv_norm;
                let r2 = x * x + y * y;
                let radial = 1.0 + k[0] * r2 + k[1] * r2 * r2;
                let dx = x * radial + 2.0 * k[2] * x * y + k[3] * (r2 + 2.0 * x * x);
                let dy = y * radial + k[2] * (r2 + 2.0 * y * y) + 2.0 * k[3] * x * y;
                (fx * dx + cx, fy * dy + cy)
            }
            CameraModel::Equidistant { fx, fy, cx, cy, k } => {
                let (x, y) = uv_norm;
                let r = (x * x + y * y).sqrt();
                let theta = r.atan();
                let theta2 = theta * theta;
                let theta_d = theta
                    * (1.0 + k[0] * theta2 + k[1] * theta2.powi(2) + k[2] * theta2.powi(3)
                        + k[3] * theta2.powi(4));
                let scale = if r > 1e-12 { theta_d / r } else { 1.0 };
                (fx * x * scale + cx, fy * y * scale + cy)
            }
        }
    }

    pub fn focal(&self) -> (f64, f64) {
        match self {
            CameraModel::RadTan { fx, fy, .. } | CameraModel::Equidistant { fx, fy, .. } => (*fx, *fy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radtan_with_zero_distortion_is_pinhole() {
        let model = CameraModel::RadTan {
            fx: 100.0,
            fy: 100.0,
            cx: 50.0,
            cy: 40.0,
            k: [0.0; 4],
        };
        let (u, v) = model.distort((0.1, -0.2));
        assert!((u - 60.0).abs() < 1e-9);
        assert!((v - 20.0).abs() < 1e-9);
    }
}
