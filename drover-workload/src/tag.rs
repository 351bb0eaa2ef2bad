//! Deterministic message values.
//!
//! Every generated value names its producer, iteration and position, so a
//! consumer can tell where any message came from without shared state:
//!
//! ```text
//! test-value-string-<index>-vu-<worker>-iter-<iteration>
//! ```

use std::fmt;

use drover_core::{IterationId, WorkerId};
use thiserror::Error;

const PREFIX: &str = "test-value-string-";
const WORKER_MARKER: &str = "-vu-";
const ITERATION_MARKER: &str = "-iter-";

/// Errors that can occur when parsing a value tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    /// The value does not start with the tag prefix.
    #[error("missing tag prefix in {0:?}")]
    MissingPrefix(String),

    /// A marker or number is missing or malformed.
    #[error("malformed {field} in {value:?}")]
    Malformed {
        /// Which part failed to parse.
        field: &'static str,
        /// The full value.
        value: String,
    },
}

/// Identity of one generated message value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueTag {
    /// Position of the message within its producer's iteration.
    pub index: u64,
    /// Worker that produced the message.
    pub worker: WorkerId,
    /// Iteration in which the message was produced.
    pub iteration: IterationId,
}

impl ValueTag {
    /// Creates a tag.
    #[must_use]
    pub const fn new(index: u64, worker: WorkerId, iteration: IterationId) -> Self {
        Self {
            index,
            worker,
            iteration,
        }
    }

    /// Renders the tag as a message value.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Parses a rendered tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the value was not produced by [`ValueTag::render`].
    pub fn parse(value: &str) -> Result<Self, TagError> {
        let rest = value
            .strip_prefix(PREFIX)
            .ok_or_else(|| TagError::MissingPrefix(value.to_string()))?;

        let malformed = |field| TagError::Malformed {
            field,
            value: value.to_string(),
        };

        let (index, rest) = rest.split_once(WORKER_MARKER).ok_or_else(|| malformed("worker"))?;
        let (worker, iteration) = rest
            .split_once(ITERATION_MARKER)
            .ok_or_else(|| malformed("iteration"))?;

        let index: u64 = index.parse().map_err(|_| malformed("index"))?;
        let worker: u64 = worker.parse().map_err(|_| malformed("worker"))?;
        let iteration: u64 = iteration.parse().map_err(|_| malformed("iteration"))?;

        Ok(Self::new(index, WorkerId::new(worker), IterationId::new(iteration)))
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PREFIX}{}{WORKER_MARKER}{}{ITERATION_MARKER}{}",
            self.index,
            self.worker.get(),
            self.iteration.get()
        )
    }
}
