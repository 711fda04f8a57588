//! Error taxonomy.
//!
//! Two families, both fatal to the session they occur in:
//!
//! * [`ConfigError`] — missing columns, files, metadata keys or malformed
//!   identifiers.  Raised before any alignment work starts.
//! * [`AlignError`] — the clocks could not be reconciled (no trigger edges,
//!   length mismatches, a stream shifted twice, negative timestamps left
//!   after alignment).
//!
//! Both convert into `anyhow::Error`, which is what the rest of the crate
//! returns.  Callers that need to branch on the kind use
//! `err.downcast_ref::<AlignError>()`.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required column '{column}' missing from {path}")]
    MissingColumn { column: String, path: PathBuf },

    #[error("file '{}' not found", .0.display())]
    MissingFile(PathBuf),

    #[error("the '{name}' struct is not in '{}'", path.display())]
    MissingStruct { name: String, path: PathBuf },

    #[error("metadata entry {what} not found in {source_name}")]
    MissingMetadata { what: String, source_name: String },

    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("invalid session id '{0}': expected 'YYYYMMDD' (e.g. '20210528')")]
    InvalidSessionDate(String),

    #[error("file stem '{0}' is not '<subject>_<protocol>_<date>_<time>'")]
    InvalidStem(String),

    #[error("unsupported source '{}': {reason}", path.display())]
    UnsupportedSource { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("signal is empty")]
    EmptySignal,

    #[error("no rising edges found on trigger channel '{0}'")]
    NoEdges(String),

    #[error("no {0} landmark times to align on")]
    EmptyLandmarks(&'static str),

    #[error("length mismatch for {what}: {left} vs {right}")]
    LengthMismatch { what: String, left: usize, right: usize },

    #[error("timestamps of stream '{stream}' decrease at index {index}")]
    NonMonotonic { stream: String, index: usize },

    #[error("stream '{0}' was already shifted in this session")]
    AlreadyShifted(String),

    #[error("trigger channel '{0}' not found")]
    MissingTriggerChannel(String),

    #[error("stream '{stream}' starts at {first:.6} s, before the session start")]
    NegativeTimestamps { stream: String, first: f64 },
}
