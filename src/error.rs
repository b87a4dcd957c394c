//! Typed errors for the estimator library.
//!
//! Most of the control-flow described by the estimator's error table is not
//! an `Err` at all — out-of-order frames, insufficient clones, and outlier
//! rejection are logged and the frame is skipped. `VioError` covers the
//! remaining genuine failure boundaries: configuration, collaborator
//! construction, and output I/O.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VioError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("state has no variable named {0}")]
    UnknownVariable(&'static str),

    #[error("covariance update failed: {0}")]
    CovarianceUpdate(String),

    #[error("triangulation failed for feature {0}")]
    Triangulation(u64),

    #[error("output sink error: {0}")]
    Output(#[from] std::io::Error),

    #[error("csv writer error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to parse session file: {0}")]
    SessionParse(#[from] serde_json::Error),
}

pub type VioResult<T> = Result<T, VioError>;
