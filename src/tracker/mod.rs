//! Feature tracking collaborator.
//!
//! `TrackBase` is a tagged enum over {Klt, Descriptor, Sim} rather than a
//! trait-object hierarchy (the variant set is closed and small — see the
//! "dynamic dispatch" design note). Only `Sim` has a real body: it is the
//! deterministic, dependency-free backend used by tests and the replay
//! binary, standing in for the real KLT/descriptor trackers the estimator
//! is specified against as external collaborators (`SPEC_FULL.md` §1/§6).
//! Shape of `Feature`/`FeatureDatabase` is informed by `types/mod.rs`'s
//! per-sensor struct layout, generalized to the tracker's observation
//! lifecycle in `original_source/ov_msckf`.

pub mod camera;

use crate::config::TrackerKind;
use crate::types::{CameraData, PixelObservation};
use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct Feature {
    pub feature_id: u64,
    /// Observations per camera sensor id.
    pub observations: HashMap<i32, Vec<PixelObservation>>,
    pub to_delete: bool,
    /// Set for features belonging to a detected ArUco tag rather than a
    /// natural-image keypoint; consulted by `feature_selector` to always
    /// carry tag landmarks across the marginalization boundary.
    pub is_aruco: bool,
}

impl Feature {
    pub fn total_observation_count(&self) -> usize {
        self.observations.values().map(|v| v.len()).sum()
    }

    pub fn longest_camera_track(&self) -> usize {
        self.observations.values().map(|v| v.len()).max().unwrap_or(0)
    }

    pub fn newest_timestamp(&self) -> Option<f64> {
        self.observations
            .values()
            .filter_map(|v| v.last())
            .map(|o| o.timestamp)
            .fold(None, |acc, t| Some(acc.map_or(t, |a: f64| a.max(t))))
    }

    pub fn sensor_ids(&self) -> Vec<i32> {
        self.observations.keys().copied().collect()
    }
}

#[derive(Default)]
pub struct FeatureDatabase {
    features: HashMap<u64, Feature>,
}

impl FeatureDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_feature(&self, id: u64) -> Option<&Feature> {
        self.features.get(&id)
    }

    pub fn insert_observation(&mut self, id: u64, sensor_id: i32, obs: PixelObservation) {
        let feature = self.features.entry(id).or_insert_with(|| Feature {
            feature_id: id,
            ..Default::default()
        });
        feature.observations.entry(sensor_id).or_default().push(obs);
    }

    /// Like `insert_observation`, but tags the feature as an ArUco landmark
    /// so `feature_selector` always includes it in the marg-timestep batch.
    pub fn insert_aruco_observation(&mut self, id: u64, sensor_id: i32, obs: PixelObservation) {
        self.insert_observation(id, sensor_id, obs);
        if let Some(f) = self.features.get_mut(&id) {
            f.is_aruco = true;
        }
    }

    pub fn is_aruco(&self, id: u64) -> bool {
        self.features.get(&id).map(|f| f.is_aruco).unwrap_or(false)
    }

    /// Features with no observation newer than `t`.
    pub fn features_not_containing_newer(&self, t: f64) -> Vec<u64> {
        self.features
            .values()
            .filter(|f| !f.to_delete)
            .filter(|f| f.newest_timestamp().map_or(true, |nt| nt <= t))
            .map(|f| f.feature_id)
            .collect()
    }

    /// Features that have an observation exactly at `t`.
    pub fn features_containing(&self, t: f64) -> Vec<u64> {
        self.features
            .values()
            .filter(|f| !f.to_delete)
            .filter(|f| f.observations.values().any(|v| v.iter().any(|o| o.timestamp == t)))
            .map(|f| f.feature_id)
            .collect()
    }

    /// Features with at least one observation strictly older than `t`.
    pub fn features_containing_older(&self, t: f64) -> Vec<u64> {
        self.features
            .values()
            .filter(|f| !f.to_delete)
            .filter(|f| f.observations.values().any(|v| v.iter().any(|o| o.timestamp < t)))
            .map(|f| f.feature_id)
            .collect()
    }

    /// Drop observations outside `keep_timestamps` for `id`.
    pub fn restrict_to_timestamps(&mut self, id: u64, keep_timestamps: &[f64]) {
        if let Some(f) = self.features.get_mut(&id) {
            for obs in f.observations.values_mut() {
                obs.retain(|o| keep_timestamps.contains(&o.timestamp));
            }
        }
    }

    pub fn mark_to_delete(&mut self, id: u64) {
        if let Some(f) = self.features.get_mut(&id) {
            f.to_delete = true;
        }
    }

    /// Remove every feature marked `to_delete`.
    pub fn cleanup(&mut self) {
        self.features.retain(|_, f| !f.to_delete);
    }

    /// Remove observations older than `t` from every feature, and drop
    /// features left with no observations at all.
    pub fn cleanup_measurements(&mut self, t: f64) {
        for f in self.features.values_mut() {
            for obs in f.observations.values_mut() {
                obs.retain(|o| o.timestamp >= t);
            }
        }
        self.features.retain(|_, f| f.total_observation_count() > 0);
    }

    pub fn append_new_measurements(&mut self, other: &FeatureDatabase) {
        for (id, f) in &other.features {
            let entry = self.features.entry(*id).or_insert_with(|| Feature {
                feature_id: *id,
                ..Default::default()
            });
            for (cam, obs) in &f.observations {
                entry.observations.entry(*cam).or_default().extend(obs.iter().copied());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Deterministic "simulation" tracker: consumes pre-extracted feature ids
/// and pixel coordinates directly from a `CameraData`'s associated
/// metadata rather than running real image processing. Used for tests and
/// the replay binary.
#[derive(Default)]
pub struct SimTracker {
    pub db: FeatureDatabase,
    next_synthetic_id: u64,
}

impl SimTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame's worth of already-extracted observations.
    pub fn feed_observations(&mut self, sensor_id: i32, observations: &[(u64, PixelObservation)]) {
        for (id, obs) in observations {
            self.db.insert_observation(*id, sensor_id, *obs);
        }
    }

    /// Feed one frame's worth of already-extracted ArUco tag observations.
    pub fn feed_aruco_observations(&mut self, sensor_id: i32, observations: &[(u64, PixelObservation)]) {
        for (id, obs) in observations {
            self.db.insert_aruco_observation(*id, sensor_id, *obs);
        }
    }

    pub fn fresh_id(&mut self) -> u64 {
        self.next_synthetic_id += 1;
        self.next_synthetic_id
    }
}

/// Stand-in for a real KLT pyramidal optical-flow tracker. Holds its own
/// `FeatureDatabase` so it is selectable from `VioConfig::tracker` without
/// panicking, but `feed_new_camera` does not run any image processing.
#[derive(Default)]
pub struct KltTracker {
    db: FeatureDatabase,
}

/// Stand-in for a real descriptor-matching tracker (e.g. ORB). Same shape
/// and the same no-op `feed_new_camera` as `KltTracker`.
#[derive(Default)]
pub struct DescriptorTracker {
    db: FeatureDatabase,
}

/// Tagged dispatch over tracker backends. `Sim` is the only backend with a
/// real body: it is the deterministic, dependency-free one used by tests
/// and the replay binary. `Klt`/`Descriptor` are selectable placeholders
/// for the real collaborators the estimator is specified against
/// (`SPEC_FULL.md` §1 "out of scope") — their `feed_new_camera` is a no-op
/// since no actual optical-flow/descriptor matching runs.
pub enum TrackBase {
    Sim(SimTracker),
    Klt(KltTracker),
    Descriptor(DescriptorTracker),
}

impl TrackBase {
    pub fn from_kind(kind: TrackerKind) -> Self {
        match kind {
            TrackerKind::Sim => TrackBase::Sim(SimTracker::new()),
            TrackerKind::Klt => TrackBase::Klt(KltTracker::default()),
            TrackerKind::Descriptor => TrackBase::Descriptor(DescriptorTracker::default()),
        }
    }

    pub fn feature_database(&self) -> &FeatureDatabase {
        match self {
            TrackBase::Sim(t) => &t.db,
            TrackBase::Klt(t) => &t.db,
            TrackBase::Descriptor(t) => &t.db,
        }
    }

    pub fn feature_database_mut(&mut self) -> &mut FeatureDatabase {
        match self {
            TrackBase::Sim(t) => &mut t.db,
            TrackBase::Klt(t) => &mut t.db,
            TrackBase::Descriptor(t) => &mut t.db,
        }
    }

    pub fn feed_new_camera(&mut self, _frame: &CameraData) {
        // Real trackers would run KLT/descriptor matching here; the Sim
        // backend expects observations to be pushed directly via
        // `feed_observations` before this call, so every variant is a
        // no-op.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(t: f64, u: f64, v: f64) -> PixelObservation {
        PixelObservation {
            timestamp: t,
            uv: (u, v),
            uv_norm: (u, v),
        }
    }

    #[test]
    fn features_not_containing_newer_excludes_fresh_tracks() {
        let mut db = FeatureDatabase::new();
        db.insert_observation(1, 0, obs(1.0, 0.0, 0.0));
        db.insert_observation(2, 0, obs(2.0, 0.0, 0.0));
        let lost = db.features_not_containing_newer(1.0);
        assert_eq!(lost, vec![1]);
    }

    #[test]
    fn cleanup_removes_marked_features() {
        let mut db = FeatureDatabase::new();
        db.insert_observation(1, 0, obs(1.0, 0.0, 0.0));
        db.mark_to_delete(1);
        db.cleanup();
        assert!(db.get_feature(1).is_none());
    }

    #[test]
    fn cleanup_measurements_drops_empty_features() {
        let mut db = FeatureDatabase::new();
        db.insert_observation(1, 0, obs(1.0, 0.0, 0.0));
        db.cleanup_measurements(2.0);
        assert!(db.get_feature(1).is_none());
    }

    #[test]
    fn total_observation_count_sums_across_cameras() {
        let mut f = Feature {
            feature_id: 1,
            ..Default::default()
        };
        f.observations.insert(0, vec![obs(1.0, 0.0, 0.0), obs(2.0, 0.0, 0.0)]);
        f.observations.insert(1, vec![obs(1.0, 0.0, 0.0)]);
        assert_eq!(f.total_observation_count(), 3);
    }

    #[test]
    fn insert_aruco_observation_tags_the_feature() {
        let mut db = FeatureDatabase::new();
        db.insert_aruco_observation(1, 0, obs(1.0, 0.0, 0.0));
        assert!(db.is_aruco(1));
        assert!(db.get_feature(1).unwrap().is_aruco);
    }

    #[test]
    fn from_kind_selects_the_matching_variant() {
        assert!(matches!(TrackBase::from_kind(TrackerKind::Sim), TrackBase::Sim(_)));
        assert!(matches!(TrackBase::from_kind(TrackerKind::Klt), TrackBase::Klt(_)));
        assert!(matches!(TrackBase::from_kind(TrackerKind::Descriptor), TrackBase::Descriptor(_)));
    }

    #[test]
    fn klt_and_descriptor_backends_expose_an_empty_database() {
        let klt = TrackBase::from_kind(TrackerKind::Klt);
        assert!(klt.feature_database().is_empty());
        let descriptor = TrackBase::from_kind(TrackerKind::Descriptor);
        assert!(descriptor.feature_database().is_empty());
    }
}
