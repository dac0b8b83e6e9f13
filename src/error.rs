use crate::calibration::CalibrationPhase;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Non-fatal conditions reported by the calibration engine. None of them touch the thresholds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("calibration busy: {current:?} in progress")]
    Busy { current: CalibrationPhase },
    #[error("insufficient crossing samples: {seen} of {target}")]
    InsufficientSamples { seen: u32, target: u32 },
}
