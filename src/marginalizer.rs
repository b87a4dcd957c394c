//! Marginalization: drop SLAM landmarks flagged `should_marg` (never
//! ArUco), then drop the oldest clone once the window exceeds
//! `max_clone_size`. Order is fixed: SLAM marg happens before
//! re-triangulation, old-clone marg happens after — see
//! `original_source/ov_msckf/src/core/VioManager.cpp`
//! `do_feature_propagate_update`, which this module's call order mirrors.

use crate::state::State;

pub fn marginalize_slam(state: &mut State) {
    let ids: Vec<u64> = state
        .landmarks
        .iter()
        .filter(|l| l.should_marg && !l.is_aruco)
        .map(|l| l.feature_id)
        .collect();
    for id in ids {
        state.marginalize_landmark(id);
    }
}

pub fn marginalize_old_clone(state: &mut State, max_clone_size: usize) {
    if state.clones.len() > max_clone_size {
        state.marginalize_oldest_clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LandmarkRepresentation;
    use crate::feature_selector::new_landmark_shell;
    use crate::state::IMU_STATE_SIZE;
    use nalgebra::DMatrix;

    #[test]
    fn aruco_landmarks_are_never_marginalized() {
        let mut state = State::new(&[1e-4; IMU_STATE_SIZE]);
        let n = state.max_covariance_size();
        let mut landmark = new_landmark_shell(1, 0, LandmarkRepresentation::GlobalXyz);
        landmark.is_aruco = true;
        landmark.should_marg = true;
        state.add_landmark(landmark, DMatrix::identity(3, 3), DMatrix::zeros(3, n));
        marginalize_slam(&mut state);
        assert_eq!(state.landmarks.len(), 1);
    }

    #[test]
    fn clone_window_never_exceeds_max_size() {
        let mut state = State::new(&[1e-4; IMU_STATE_SIZE]);
        for i in 0..5 {
            state.add_clone(i as f64);
            marginalize_old_clone(&mut state, 3);
        }
        assert!(state.clones.len() <= 3);
    }
}
