//! Worker iterations.
//!
//! One iteration is: connect, produce the worker's quota, consume its quota,
//! validate what came back. The [`Harness`] owns the broker connector and
//! the settings shared by every worker.

use std::fmt;
use std::time::Duration;

use drover_core::{IterationId, Limits, Result, WorkerId};
use tracing::{debug, warn};

use crate::broker::{BrokerConnector, Consumer, Producer, Session};
use crate::driver::Driver;
use crate::message::Message;
use crate::plan::{plan_worker, WorkerQuota, WorkloadSpec};
use crate::schema::{LocalSerializer, SchemaType, Serializer};
use crate::validation::{CheckResult, DeliveryPolicy, Validator};

/// What one worker observed during one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Worker that ran the iteration.
    pub worker_id: WorkerId,
    /// Iteration number.
    pub iteration_id: IterationId,
    /// Messages the worker produced.
    pub produced_count: u64,
    /// Messages the worker consumed, in delivery order.
    pub consumed_messages: Vec<Message>,
    /// First value the worker produced.
    pub first_value: Option<String>,
    /// Last value the worker produced.
    pub last_value: Option<String>,
}

impl RunResult {
    /// Creates a result with nothing produced or consumed.
    #[must_use]
    pub const fn empty(worker_id: WorkerId, iteration_id: IterationId) -> Self {
        Self {
            worker_id,
            iteration_id,
            produced_count: 0,
            consumed_messages: Vec::new(),
            first_value: None,
            last_value: None,
        }
    }

    /// Number of messages consumed.
    #[must_use]
    pub fn consumed_count(&self) -> u64 {
        self.consumed_messages.len() as u64
    }
}

/// Lifecycle of a worker iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterationState {
    /// Not started.
    Idle,
    /// Writing batches.
    Producing,
    /// Every batch acknowledged.
    Produced,
    /// Waiting for messages.
    Consuming,
    /// The full quota arrived (or a short delivery was tolerated).
    Consumed,
    /// Checks evaluated.
    Validated,
    /// A batch was rejected.
    ProduceFailed,
    /// Fewer messages than expected arrived before the timeout.
    ConsumeTimedOut,
    /// The consumer lost its connection.
    ConsumeFailed,
}

impl IterationState {
    /// Returns true if the state machine allows moving to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Producing)
                | (Self::Producing, Self::Produced | Self::ProduceFailed)
                | (Self::Produced, Self::Consuming)
                | (Self::Consuming, Self::Consumed | Self::ConsumeTimedOut | Self::ConsumeFailed)
                | (Self::Consumed, Self::Validated)
                | (Self::Validated, Self::Idle)
        )
    }

    /// Returns true for the failure states.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::ProduceFailed | Self::ConsumeTimedOut | Self::ConsumeFailed
        )
    }
}

impl fmt::Display for IterationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Producing => "producing",
            Self::Produced => "produced",
            Self::Consuming => "consuming",
            Self::Consumed => "consumed",
            Self::Validated => "validated",
            Self::ProduceFailed => "produce_failed",
            Self::ConsumeTimedOut => "consume_timed_out",
            Self::ConsumeFailed => "consume_failed",
        };
        f.write_str(s)
    }
}

/// Tracks and logs state transitions of one iteration.
struct StateTracker {
    worker: WorkerId,
    iteration: IterationId,
    state: IterationState,
}

impl StateTracker {
    const fn new(worker: WorkerId, iteration: IterationId) -> Self {
        Self {
            worker,
            iteration,
            state: IterationState::Idle,
        }
    }

    fn advance(&mut self, next: IterationState) {
        if !self.state.can_transition_to(next) {
            warn!(
                worker = %self.worker,
                iteration = %self.iteration,
                from = %self.state,
                to = %next,
                "Unexpected state transition"
            );
        }
        debug!(
            worker = %self.worker,
            iteration = %self.iteration,
            from = %self.state,
            to = %next,
            "State transition"
        );
        self.state = next;
    }
}

/// Settings shared by all workers of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Encoding of message values.
    pub schema: SchemaType,
    /// Severity of a short delivery.
    pub policy: DeliveryPolicy,
    /// How long a consume call waits for its quota.
    pub consume_timeout: Duration,
    /// Whether to run the first/last value round-trip checks.
    pub round_trip: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            schema: SchemaType::default(),
            policy: DeliveryPolicy::default(),
            consume_timeout: Duration::from_micros(Limits::new().default_consume_timeout_us),
            round_trip: true,
        }
    }
}

/// Everything one iteration produced.
#[derive(Debug, Clone)]
pub struct IterationReport {
    /// The quota the worker ran with.
    pub quota: WorkerQuota,
    /// What was produced and consumed.
    pub result: RunResult,
    /// Check outcomes, in fixed order.
    pub checks: Vec<CheckResult>,
    /// State the iteration ended in.
    pub state: IterationState,
    /// Wall time of each produce call in microseconds.
    pub produce_latencies_us: Vec<u64>,
    /// Wall time of the consume call in microseconds.
    pub consume_latency_us: Option<u64>,
}

impl IterationReport {
    /// Returns true if no check failed and the iteration did not end in a
    /// failure state.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.state.is_failure() && !self.checks.iter().any(CheckResult::is_failed)
    }
}

/// Runs worker iterations against a broker.
pub struct Harness<C, S = LocalSerializer> {
    connector: C,
    serializer: S,
    config: HarnessConfig,
}

impl<C: BrokerConnector> Harness<C> {
    /// Creates a harness using the built-in serializer.
    pub const fn new(connector: C, config: HarnessConfig) -> Self {
        Self::with_serializer(connector, LocalSerializer, config)
    }
}

impl<C: BrokerConnector, S: Serializer> Harness<C, S> {
    /// Creates a harness with a custom serializer.
    pub const fn with_serializer(connector: C, serializer: S, config: HarnessConfig) -> Self {
        Self {
            connector,
            serializer,
            config,
        }
    }

    /// Returns the harness settings.
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Runs one produce/consume/validate cycle for `worker`.
    ///
    /// The worker's session is closed before this returns, on success and
    /// on error. A short delivery is not an error: the report carries it.
    ///
    /// # Errors
    ///
    /// - `InvalidSpec` if the workload or worker id is invalid (nothing is
    ///   connected in that case)
    /// - `Connect` if the session cannot be opened
    /// - `Produce`, `Consume` or `Serialization` from the driver
    pub async fn run_worker_iteration(
        &self,
        spec: &WorkloadSpec,
        worker: WorkerId,
        iteration: IterationId,
        topic: &str,
    ) -> Result<IterationReport> {
        let quota = plan_worker(spec, worker)?;
        let mut session = self.connector.connect(worker, topic).await?;

        let mut tracker = StateTracker::new(worker, iteration);
        let report = self
            .drive(&mut session, spec, &quota, topic, &mut tracker)
            .await;
        session.close().await;
        report
    }

    /// Runs the iteration on an open session. `tracker` is left in `Idle`
    /// after a validated iteration and in a failure state otherwise.
    async fn drive<P: Producer, Q: Consumer>(
        &self,
        session: &mut Session<P, Q>,
        spec: &WorkloadSpec,
        quota: &WorkerQuota,
        topic: &str,
        tracker: &mut StateTracker,
    ) -> Result<IterationReport> {
        let worker = quota.worker_id;
        let iteration = tracker.iteration;
        let driver = Driver::new(spec.batch_size, self.config.schema, &self.serializer);

        tracker.advance(IterationState::Producing);
        let produced = match driver
            .run_produce(&mut session.producer, quota, iteration)
            .await
        {
            Ok(produced) => produced,
            Err(e) => {
                tracker.advance(IterationState::ProduceFailed);
                return Err(e);
            }
        };
        tracker.advance(IterationState::Produced);

        tracker.advance(IterationState::Consuming);
        let timeout = self.consume_timeout(&spec.limits);
        let consumed = match driver
            .run_consume(&mut session.consumer, quota, iteration, timeout)
            .await
        {
            Ok(consumed) => consumed,
            Err(e) => {
                tracker.advance(IterationState::ConsumeFailed);
                return Err(e);
            }
        };

        let timed_out = consumed.is_short() && self.config.policy == DeliveryPolicy::Strict;
        if timed_out {
            tracker.advance(IterationState::ConsumeTimedOut);
        } else {
            tracker.advance(IterationState::Consumed);
        }

        let result = RunResult {
            worker_id: worker,
            iteration_id: iteration,
            produced_count: produced.produced,
            consumed_messages: consumed.messages,
            first_value: produced.first_value,
            last_value: produced.last_value,
        };

        let checks = Validator::new(self.config.policy, self.config.schema, &self.serializer)
            .with_round_trip(self.config.round_trip)
            .validate(quota, &result, topic);
        if !timed_out {
            tracker.advance(IterationState::Validated);
        }

        for check in checks.iter().filter(|c| c.is_failed()) {
            warn!(%worker, %iteration, check = check.name, detail = %check.detail, "Check failed");
        }

        let report = IterationReport {
            quota: *quota,
            result,
            checks,
            state: tracker.state,
            produce_latencies_us: produced.batch_latencies_us,
            consume_latency_us: consumed.latency_us,
        };
        if !timed_out {
            tracker.advance(IterationState::Idle);
        }
        Ok(report)
    }

    fn consume_timeout(&self, limits: &Limits) -> Duration {
        let max = Duration::from_micros(limits.max_consume_timeout_us);
        self.config.consume_timeout.min(max)
    }
}
