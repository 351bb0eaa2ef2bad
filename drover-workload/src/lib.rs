//! Drover Workload: produce/consume load testing for message brokers
//!
//! Runs a fixed message budget through a broker with many concurrent
//! workers and checks what comes back:
//!
//! 1. **Planning** - split the budget into per-worker produce/consume quotas
//! 2. **Driving** - write tagged values in ordered batches, read them back
//! 3. **Validation** - count, topic, round-trip, duplicate and order checks
//!
//! # Architecture
//!
//! The same harness runs in two modes:
//! - **Simulated mode**: against the in-process [`MemoryBroker`]
//! - **Real mode**: against a Kafka cluster (feature `kafka`)
//!
//! # Example
//!
//! ```ignore
//! use drover_workload::{load_profile, MemoryBroker, Runner};
//!
//! let profile = load_profile("smoke")?;
//! let runner = Runner::from_profile(&profile, MemoryBroker::new())?;
//! let summary = runner.run().await;
//!
//! assert!(summary.is_success());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod driver;
mod iteration;
mod message;
mod plan;
mod schema;
mod tag;
mod validation;

pub mod broker;
pub mod profiles;
pub mod run;

pub use driver::{ConsumeOutcome, Driver, ProduceOutcome};
pub use iteration::{Harness, HarnessConfig, IterationReport, IterationState, RunResult};
pub use message::Message;
pub use plan::{plan, plan_worker, WorkerQuota, WorkloadSpec, WorkloadSpecBuilder};
pub use schema::{LocalSerializer, SchemaType, Serializer};
pub use tag::{TagError, ValueTag};
pub use validation::{checks, CheckResult, CheckStatus, DeliveryPolicy, Validator};

// Re-export broker and run types.
pub use broker::{BrokerConnector, Consumer, MemoryBroker, Producer, Session};
pub use profiles::{builtin_profiles, list_profiles, load_profile, ProfileError, ScenarioProfile};
pub use run::{ExecutionPlan, LatencySummary, RunSummary, Runner};

#[cfg(feature = "kafka")]
pub use broker::{KafkaConnector, KafkaSettings};
