use std::time::Duration;

use thiserror::Error;

use crate::representation::Modality;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No usable modality at all. Fatal for a query, skip for a candidate.
    #[error("Incomplete representation for '{id}': {reason}")]
    IncompleteRepresentation { id: String, reason: String },

    /// One modality absent on either side. Recovered by the ranker.
    #[error("Missing modality: {0}")]
    MissingModality(Modality),

    #[error("Representation version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("Invalid vector dimension for {field}: expected {expected}, got {actual}")]
    InvalidDimension {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Candidate retrieval timed out after {0:?}")]
    RetrievalTimeout(Duration),

    #[error("Tuned weights regressed for {key}: precision@k {candidate:.4} < {current:.4}")]
    TuningRegression {
        key: String,
        candidate: f32,
        current: f32,
    },

    #[error("Weight profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Invalid weights: {0}")]
    InvalidWeights(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Escalation failed: {0}")]
    Escalation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that only disqualify a single candidate, never the whole query.
    pub fn is_candidate_local(&self) -> bool {
        matches!(
            self,
            Error::VersionMismatch { .. }
                | Error::InvalidDimension { .. }
                | Error::IncompleteRepresentation { .. }
                | Error::MissingModality(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
