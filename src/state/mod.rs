//! Sliding-window state: IMU state, clone window, SLAM landmarks, and the
//! covariance that backs all of them.
//!
//! The flattened-serializable-state idea (a plain struct mirroring the
//! filter's internal layout, kept separate from the working representation)
//! is grounded on the teacher's `filters/ekf_15d.rs::Ekf15dState`; here the
//! working representation itself is index/size addressed to support the
//! dynamically sized clone and landmark population `SPEC_FULL.md` §3
//! requires.

pub mod covariance;

use crate::config::LandmarkRepresentation;
use crate::quat::JplQuat;
use covariance::Covariance;
use nalgebra::{Matrix3, Vector3};
use std::collections::HashMap;

/// A variable's location in the error-state covariance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarIndex {
    pub offset: usize,
    pub size: usize,
}

/// IMU error-state layout: orientation(3) position(3) velocity(3)
/// gyro-bias(3) accel-bias(3) == 15.
pub const IMU_STATE_SIZE: usize = 15;

#[derive(Clone, Debug)]
pub struct ImuVariable {
    pub q_gtoi: JplQuat,
    pub pos: Vector3<f64>,
    pub vel: Vector3<f64>,
    pub bg: Vector3<f64>,
    pub ba: Vector3<f64>,
    /// First-estimate Jacobian linearization point, frozen at the value
    /// present the first time this variable is used in a Jacobian.
    pub fej_q_gtoi: JplQuat,
    pub fej_pos: Vector3<f64>,
}

impl ImuVariable {
    pub fn identity() -> Self {
        Self {
            q_gtoi: JplQuat::identity(),
            pos: Vector3::zeros(),
            vel: Vector3::zeros(),
            bg: Vector3::zeros(),
            ba: Vector3::zeros(),
            fej_q_gtoi: JplQuat::identity(),
            fej_pos: Vector3::zeros(),
        }
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        self.q_gtoi.to_rotation_matrix()
    }
}

/// A cloned IMU pose retained at a past image timestamp.
#[derive(Clone, Debug)]
pub struct Clone_ {
    pub timestamp: f64,
    pub q_gtoi: JplQuat,
    pub pos: Vector3<f64>,
}

impl Clone_ {
    pub fn rotation(&self) -> Matrix3<f64> {
        self.q_gtoi.to_rotation_matrix()
    }
}

/// A persistent SLAM landmark.
#[derive(Clone, Debug)]
pub struct SlamLandmark {
    pub feature_id: u64,
    pub representation: LandmarkRepresentation,
    pub value: Vector3<f64>,
    pub anchor_clone_timestamp: Option<f64>,
    pub anchor_camera_id: i32,
    pub unique_camera_id: i32,
    pub should_marg: bool,
    pub is_aruco: bool,
}

impl SlamLandmark {
    /// Resolve this landmark's stored `value` to a global-frame XYZ point,
    /// looking up its anchor clone (if any) in `clones`. `GlobalXyz`
    /// landmarks need no anchor and always resolve. Anchored landmarks
    /// whose anchor clone has already been marginalized (it shouldn't be,
    /// since `change_anchors` always rebinds before the anchor is dropped)
    /// return `None`.
    pub fn to_global(&self, clones: &[Clone_]) -> Option<Vector3<f64>> {
        match self.representation {
            LandmarkRepresentation::GlobalXyz => Some(self.value),
            _ => {
                let anchor = clones.iter().find(|c| Some(c.timestamp) == self.anchor_clone_timestamp)?;
                Some(self.representation.to_xyz(self.value, anchor.rotation(), anchor.pos))
            }
        }
    }
}

/// The full sliding-window state: IMU, clone window, SLAM landmarks, and
/// the covariance addressing all of them.
pub struct State {
    pub timestamp: f64,
    pub imu: ImuVariable,
    pub imu_index: VarIndex,
    /// Ordered ascending by timestamp; invariant enforced by `add_clone`.
    pub clones: Vec<Clone_>,
    pub clone_index: HashMap<u64, VarIndex>,
    pub landmarks: Vec<SlamLandmark>,
    pub landmark_index: HashMap<u64, VarIndex>,
    pub cov: Covariance,
}

fn time_key(t: f64) -> u64 {
    t.to_bits()
}

impl State {
    pub fn new(initial_imu_diag: &[f64; IMU_STATE_SIZE]) -> Self {
        Self {
            timestamp: 0.0,
            imu: ImuVariable::identity(),
            imu_index: VarIndex {
                offset: 0,
                size: IMU_STATE_SIZE,
            },
            clones: Vec::new(),
            clone_index: HashMap::new(),
            landmarks: Vec::new(),
            landmark_index: HashMap::new(),
            cov: Covariance::from_diag(initial_imu_diag),
        }
    }

    pub fn max_covariance_size(&self) -> usize {
        self.cov.size()
    }

    /// Append a clone of the current IMU pose at `timestamp`, with prior
    /// covariance copied from the IMU pose block (position+orientation)
    /// and zero cross-correlation beyond what the caller fills in
    /// separately via `cov.augment`.
    pub fn add_clone(&mut self, timestamp: f64) {
        debug_assert!(
            self.clones.last().map(|c| c.timestamp).unwrap_or(f64::MIN) < timestamp,
            "clone timestamps must be strictly increasing"
        );
        let n = self.cov.size();
        let clone = Clone_ {
            timestamp,
            q_gtoi: self.imu.q_gtoi,
            pos: self.imu.pos,
        };
        // Cross-covariance between the new clone and the whole state is
        // the Jacobian-of-identity-wrt-IMU-pose times the IMU pose's rows:
        // since the clone equals the current IMU pose exactly, its row is
        // a copy of the IMU orientation+position rows.
        let mut cross = nalgebra::DMatrix::zeros(6, n);
        let io = self.imu_index.offset;
        cross
            .view_mut((0, io), (6, 6))
            .copy_from(&nalgebra::DMatrix::<f64>::identity(6, 6));
        let prior = self.cov.block(io, 6);
        self.cov.augment(&cross, &prior);
        self.clone_index.insert(
            time_key(timestamp),
            VarIndex {
                offset: n,
                size: 6,
            },
        );
        self.clones.push(clone);
    }

    pub fn oldest_clone_timestamp(&self) -> Option<f64> {
        self.clones.first().map(|c| c.timestamp)
    }

    pub fn clone_var_index(&self, timestamp: f64) -> Option<VarIndex> {
        self.clone_index.get(&time_key(timestamp)).copied()
    }

    /// Remove the oldest clone, compacting the covariance and every other
    /// clone's recorded index.
    pub fn marginalize_oldest_clone(&mut self) {
        let Some(oldest) = self.clones.first().cloned() else {
            return;
        };
        let removed = self
            .clone_index
            .remove(&time_key(oldest.timestamp))
            .expect("clone must have a covariance index");
        self.cov.marginalize(removed.offset, removed.size);
        self.clones.remove(0);
        self.shift_indices_after(removed.offset, removed.size);
    }

    pub fn marginalize_landmark(&mut self, feature_id: u64) {
        let Some(pos) = self.landmarks.iter().position(|l| l.feature_id == feature_id) else {
            return;
        };
        let removed = self
            .landmark_index
            .remove(&feature_id)
            .expect("landmark must have a covariance index");
        self.cov.marginalize(removed.offset, removed.size);
        self.landmarks.remove(pos);
        self.shift_indices_after(removed.offset, removed.size);
    }

    fn shift_indices_after(&mut self, removed_offset: usize, removed_size: usize) {
        if self.imu_index.offset > removed_offset {
            self.imu_index.offset -= removed_size;
        }
        for idx in self.clone_index.values_mut() {
            if idx.offset > removed_offset {
                idx.offset -= removed_size;
            }
        }
        for idx in self.landmark_index.values_mut() {
            if idx.offset > removed_offset {
                idx.offset -= removed_size;
            }
        }
    }

    /// Zero the covariance cross-terms/rows corresponding to the 4
    /// unobservable gauge directions (global yaw + 3D position) at init.
    pub fn fix_4dof_gauge_freedoms(&mut self) {
        let n = self.cov.size();
        let p = self.cov.matrix_mut();
        let pos_offset = self.imu_index.offset + 3; // orientation(3) then position(3)
        for col in 0..n {
            p[(pos_offset, col)] = 0.0;
            p[(pos_offset + 1, col)] = 0.0;
            p[(pos_offset + 2, col)] = 0.0;
        }
        for row in 0..n {
            p[(row, pos_offset)] = 0.0;
            p[(row, pos_offset + 1)] = 0.0;
            p[(row, pos_offset + 2)] = 0.0;
        }
        // global yaw: zero the z-row/col of the orientation block too.
        let ori_offset = self.imu_index.offset;
        for col in 0..n {
            p[(ori_offset + 2, col)] = 0.0;
        }
        for row in 0..n {
            p[(row, ori_offset + 2)] = 0.0;
        }
    }

    pub fn add_landmark(
        &mut self,
        landmark: SlamLandmark,
        prior: nalgebra::DMatrix<f64>,
        cross: nalgebra::DMatrix<f64>,
    ) {
        let n = self.cov.size();
        self.cov.augment(&cross, &prior);
        self.landmark_index.insert(
            landmark.feature_id,
            VarIndex {
                offset: n,
                size: 3,
            },
        );
        self.landmarks.push(landmark);
    }
}
