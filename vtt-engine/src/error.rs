//! Error types for the evaluation engine.

use thiserror::Error;

use crate::session::Lifecycle;
use crate::types::ItemId;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while sampling, running or analysing a session.
#[derive(Debug, Error)]
pub enum Error {
    /// A pool handed to the sampler had no items.
    #[error("image pool '{0}' is empty")]
    EmptyPool(String),

    /// Sampling would produce an empty evaluation sequence.
    #[error("no items available to build an evaluation sequence")]
    NoItems,

    /// `start` was called with unmet preconditions.
    #[error("cannot start session: {0}")]
    InvalidStart(String),

    /// Operation is not allowed in the current lifecycle state.
    #[error("operation '{operation}' not allowed while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: Lifecycle,
    },

    /// Every item in the sequence already has a response.
    #[error("evaluation sequence exhausted after {0} items")]
    SequenceExhausted(usize),

    /// Response payload does not match the session's evaluation mode.
    #[error("response payload does not match {0} session")]
    ModeMismatch(&'static str),

    /// A rating score outside the ordinal scale.
    #[error("score {score} for feature '{feature}' is outside 1..=5")]
    InvalidScore { feature: String, score: i64 },

    /// A rating payload did not score every configured feature.
    #[error("missing score for feature '{0}'")]
    MissingScore(String),

    /// A rating payload scored a feature that is not configured.
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),

    /// The image source failed to list or fetch an item.
    #[error("failed to load item {item}: {reason}")]
    ItemLoad { item: ItemId, reason: String },

    /// Agreement analysis over logs that do not cover the same items/features.
    #[error("mismatched response logs: {0}")]
    MismatchedSequence(String),

    /// Remote mirror target failure.
    #[error("mirror error: {0}")]
    Mirror(String),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed data in a stored result log.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// IO operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
