use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Record-level normalization failure. The offending record is skipped.
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("invalid id in {field}: '{value}'")]
    InvalidId { field: &'static str, value: String },

    #[error("invalid date in {field}: '{value}'")]
    InvalidDate { field: &'static str, value: String },

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("unsupported value in {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Lineage graph failure. The affected family is skipped for the cycle.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("lineage walk from {start} exceeded {cap} steps")]
    WalkLimitExceeded { start: Uuid, cap: usize },

    #[error("reservation {0} is referenced by the lineage graph but not loaded")]
    MissingNode(Uuid),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("snapshot for region {region} not found at {path}")]
    NotFound { region: String, path: PathBuf },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed snapshot: {0}")]
    Decode(#[from] serde_json::Error),
}
