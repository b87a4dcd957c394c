//! Sliding-window visual-inertial-GNSS state estimator.
//!
//! An on-manifold, MSCKF-family EKF: a cloned-pose sliding window plus
//! persistent SLAM landmarks, a zero-velocity gate, and loosely-coupled
//! GNSS position updates. `VioOrchestrator` is the single entry point;
//! everything else is a component it composes.

pub mod config;
pub mod error;
pub mod feature_selector;
pub mod gnss;
pub mod initializer;
pub mod marginalizer;
pub mod orchestrator;
pub mod output;
pub mod propagator;
pub mod quat;
pub mod retriangulate;
pub mod session;
pub mod state;
pub mod tracker;
pub mod types;
pub mod updater_msckf;
pub mod updater_slam;
pub mod zupt;

pub use config::VioConfig;
pub use error::{VioError, VioResult};
pub use orchestrator::VioOrchestrator;
