//! Drover Core - Strongly-typed identifiers, limits and errors for drover.
//!
//! Shared by the workload harness and anything that drives it.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: a `WorkerId` can never be passed where an
//!   `IterationId` is expected
//! - **Explicit limits**: worker counts, batch sizes and timeouts are bounded
//! - **Explicit errors**: every failure the harness surfaces has a variant

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod limits;
mod types;

pub use error::{ConsumeError, Error, ProduceError, Result, SchemaError};
pub use limits::Limits;
pub use types::{IterationId, WorkerId};
