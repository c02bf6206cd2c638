use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::frame::Channel;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed input: {0}")]
    InputMalformed(String),

    #[error("insufficient data: need {required} samples, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("frame size mismatch: expected {expected:?}, got {actual:?}")]
    Dimension {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("model fit failed: {0}")]
    Model(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A recoverable problem: the batch keeps going and the event lands in the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    ParseSkip {
        path: String,
        reason: String,
    },
    IncompletePair {
        subject: String,
        time: u32,
        missing: Channel,
    },
    RegistrationFallback {
        subject: String,
        time: u32,
        reason: String,
    },
    ExtractionGap {
        subject: String,
        time: u32,
        region: String,
        reason: String,
    },
    StatModelFailure {
        feature: String,
        reason: String,
    },
}

impl Degradation {
    /// Emit the event through the `log` facade at warn level.
    pub fn log(&self) {
        log::warn!("{}", self);
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::ParseSkip { path, reason } => {
                write!(f, "skipping {}: {}", path, reason)
            }
            Degradation::IncompletePair {
                subject,
                time,
                missing,
            } => write!(
                f,
                "excluding {} at t={}: missing {} channel",
                subject,
                time,
                missing.token()
            ),
            Degradation::RegistrationFallback {
                subject,
                time,
                reason,
            } => write!(
                f,
                "registration fell back to identity for {} at t={}: {}",
                subject, time, reason
            ),
            Degradation::ExtractionGap {
                subject,
                time,
                region,
                reason,
            } => write!(
                f,
                "feature extraction failed for {} at t={} ({}): {}",
                subject, time, region, reason
            ),
            Degradation::StatModelFailure { feature, reason } => {
                write!(f, "model excluded feature '{}': {}", feature, reason)
            }
        }
    }
}
