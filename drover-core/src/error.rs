//! Error types for the harness.
//!
//! Nothing here is retried by the harness. Every error reaches the caller,
//! which decides whether to run another iteration.

use thiserror::Error;

use crate::types::{IterationId, WorkerId};

/// The result type for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A produce call was rejected by the broker client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("produce failed: {reason}")]
pub struct ProduceError {
    /// Reason reported by the broker client.
    pub reason: String,
}

impl ProduceError {
    /// Creates a produce error with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A consume call lost its connection to the broker.
///
/// Short deliveries are not errors; they come back as a shorter result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("consume failed: {reason}")]
pub struct ConsumeError {
    /// Reason reported by the broker client.
    pub reason: String,
}

impl ConsumeError {
    /// Creates a consume error with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A value could not be converted to or from its schema encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Bytes were not valid UTF-8 for a string schema.
    #[error("invalid utf-8 in string value: {reason}")]
    InvalidUtf8 {
        /// Decoder message.
        reason: String,
    },

    /// Bytes were not a JSON string for a json schema.
    #[error("invalid json value: {reason}")]
    InvalidJson {
        /// Decoder message.
        reason: String,
    },
}

/// Errors surfaced by the harness.
#[derive(Debug, Error)]
pub enum Error {
    /// The workload spec is unusable. Raised before any worker starts.
    #[error("invalid workload spec: {field}: {reason}")]
    InvalidSpec {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A worker's produce call failed; the iteration is aborted.
    #[error("{worker} {iteration}: {source}")]
    Produce {
        /// Worker whose produce failed.
        worker: WorkerId,
        /// Iteration that was aborted.
        iteration: IterationId,
        /// Broker client error.
        #[source]
        source: ProduceError,
    },

    /// A worker's consume call lost its connection.
    #[error("{worker} {iteration}: {source}")]
    Consume {
        /// Worker whose consume failed.
        worker: WorkerId,
        /// Iteration that was aborted.
        iteration: IterationId,
        /// Broker client error.
        #[source]
        source: ConsumeError,
    },

    /// A worker could not obtain its producer/consumer pair.
    #[error("{worker}: failed to connect: {reason}")]
    Connect {
        /// Worker that failed to connect.
        worker: WorkerId,
        /// Connector message.
        reason: String,
    },

    /// A generated value could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] SchemaError),
}

impl Error {
    /// Returns a stable numeric code for reporting.
    #[must_use]
    pub const fn error_code(&self) -> i16 {
        match self {
            Self::InvalidSpec { .. } => -1,
            Self::Produce { .. } => -2,
            Self::Consume { .. } => -3,
            Self::Connect { .. } => -4,
            Self::Serialization(_) => -5,
        }
    }

    /// Shorthand for an `InvalidSpec` error.
    #[must_use]
    pub fn invalid_spec(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            field,
            reason: reason.into(),
        }
    }
}
