//! Run orchestration.
//!
//! A run is a sequence of iterations. Every iteration spawns one task per
//! worker, waits for all of them and folds their reports into a
//! [`RunSummary`]. Dropping the future returned by [`Runner::run`] aborts
//! the worker tasks; their sessions are released as they are dropped.

use std::sync::Arc;
use std::time::Duration;

use drover_core::{Error, IterationId, Result, WorkerId};
use hdrhistogram::Histogram;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::broker::BrokerConnector;
use crate::iteration::{Harness, IterationReport};
use crate::plan::WorkloadSpec;
use crate::profiles::ScenarioProfile;
use crate::schema::{LocalSerializer, Serializer};
use crate::validation::CheckStatus;

/// Failures listed in a summary beyond this many are only counted.
const MAX_RECORDED_FAILURES: usize = 100;

/// How long a run lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Number of iterations when no duration is set.
    pub iterations: u32,
    /// Keep starting iterations until this much time has passed.
    pub duration: Option<Duration>,
}

impl ExecutionPlan {
    /// Runs exactly `iterations` iterations.
    #[must_use]
    pub const fn iterations(iterations: u32) -> Self {
        Self {
            iterations,
            duration: None,
        }
    }

    /// Runs iterations until `duration` has elapsed.
    #[must_use]
    pub const fn duration(duration: Duration) -> Self {
        Self {
            iterations: 0,
            duration: Some(duration),
        }
    }

    /// Rejects plans that would never run an iteration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` for zero iterations without a duration, or a
    /// zero duration.
    pub fn validate(&self) -> Result<()> {
        match self.duration {
            Some(d) if d.is_zero() => Err(Error::invalid_spec("duration", "must be positive")),
            None if self.iterations == 0 => {
                Err(Error::invalid_spec("iterations", "must be at least 1"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        Self::iterations(1)
    }
}

/// Latency percentiles in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Median.
    pub p50_ms: f64,
    /// 99th percentile.
    pub p99_ms: f64,
    /// Maximum.
    pub max_ms: f64,
}

/// Streams microsecond samples into a histogram.
struct LatencyRecorder {
    histogram: Option<Histogram<u64>>,
}

impl LatencyRecorder {
    fn new() -> Self {
        Self {
            histogram: Histogram::new(3).ok(),
        }
    }

    fn record(&mut self, micros: u64) {
        if let Some(histogram) = self.histogram.as_mut() {
            histogram.saturating_record(micros);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn summary(&self) -> LatencySummary {
        match &self.histogram {
            Some(h) if h.len() > 0 => LatencySummary {
                p50_ms: h.value_at_percentile(50.0) as f64 / 1000.0,
                p99_ms: h.value_at_percentile(99.0) as f64 / 1000.0,
                max_ms: h.max() as f64 / 1000.0,
            },
            _ => LatencySummary::default(),
        }
    }
}

/// Aggregated outcome of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Iterations started.
    pub iterations: u64,
    /// Worker iterations that produced a report.
    pub worker_iterations: u64,
    /// Messages produced across all workers.
    pub total_produced: u64,
    /// Messages consumed across all workers.
    pub total_consumed: u64,
    /// Checks that passed.
    pub checks_passed: u64,
    /// Checks that failed.
    pub checks_failed: u64,
    /// Checks that had nothing to look at.
    pub checks_skipped: u64,
    /// Checks tolerated by the delivery policy.
    pub checks_warned: u64,
    /// Worker iterations that ended with an error.
    pub errors: u64,
    /// First failed checks and errors, for reporting.
    pub failures: Vec<String>,
    /// Produce call latency.
    pub produce_latency: LatencySummary,
    /// Consume call latency.
    pub consume_latency: LatencySummary,
    /// Wall time of the run in milliseconds.
    pub duration_ms: u64,
}

impl RunSummary {
    /// Returns true if no check failed and no worker iteration errored.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.checks_failed == 0 && self.errors == 0
    }

    /// Prints a human-readable summary.
    pub fn print_summary(&self) {
        println!("=== Run Summary ===");
        println!(
            "Iterations: {} ({} worker iterations, {} errors)",
            self.iterations, self.worker_iterations, self.errors
        );
        println!(
            "Messages: {} produced, {} consumed",
            self.total_produced, self.total_consumed
        );
        println!(
            "Checks: {} passed, {} failed, {} warned, {} skipped",
            self.checks_passed, self.checks_failed, self.checks_warned, self.checks_skipped
        );
        println!(
            "Produce latency: p50={:.2}ms p99={:.2}ms max={:.2}ms",
            self.produce_latency.p50_ms, self.produce_latency.p99_ms, self.produce_latency.max_ms
        );
        println!(
            "Consume latency: p50={:.2}ms p99={:.2}ms max={:.2}ms",
            self.consume_latency.p50_ms, self.consume_latency.p99_ms, self.consume_latency.max_ms
        );
        println!("Duration: {}ms", self.duration_ms);
        println!("Result: {}", if self.is_success() { "PASS" } else { "FAIL" });
        for failure in &self.failures {
            println!("  - {failure}");
        }
    }
}

/// Folds iteration reports into a [`RunSummary`].
struct SummaryBuilder {
    summary: RunSummary,
    produce: LatencyRecorder,
    consume: LatencyRecorder,
}

impl SummaryBuilder {
    fn new() -> Self {
        Self {
            summary: RunSummary::default(),
            produce: LatencyRecorder::new(),
            consume: LatencyRecorder::new(),
        }
    }

    fn note_failure(&mut self, failure: String) {
        if self.summary.failures.len() < MAX_RECORDED_FAILURES {
            self.summary.failures.push(failure);
        }
    }

    fn record(&mut self, report: &IterationReport) {
        let s = &mut self.summary;
        s.worker_iterations += 1;
        s.total_produced += report.result.produced_count;
        s.total_consumed += report.result.consumed_count();

        let mut failed = Vec::new();
        for check in &report.checks {
            match check.status {
                CheckStatus::Passed => s.checks_passed += 1,
                CheckStatus::Skipped => s.checks_skipped += 1,
                CheckStatus::Warning => s.checks_warned += 1,
                CheckStatus::Failed => {
                    s.checks_failed += 1;
                    failed.push(format!(
                        "{} {}: {check}",
                        report.result.worker_id, report.result.iteration_id
                    ));
                }
            }
        }
        for failure in failed {
            self.note_failure(failure);
        }

        for &latency in &report.produce_latencies_us {
            self.produce.record(latency);
        }
        if let Some(latency) = report.consume_latency_us {
            self.consume.record(latency);
        }
    }

    fn record_error(&mut self, error: String) {
        self.summary.errors += 1;
        self.note_failure(error);
    }

    #[allow(clippy::cast_possible_truncation)] // Run duration in ms fits in u64.
    fn finish(mut self, iterations: u64, elapsed: Duration) -> RunSummary {
        self.summary.iterations = iterations;
        self.summary.produce_latency = self.produce.summary();
        self.summary.consume_latency = self.consume.summary();
        self.summary.duration_ms = elapsed.as_millis() as u64;
        self.summary
    }
}

/// Drives all workers through a sequence of iterations.
pub struct Runner<C, S = LocalSerializer> {
    harness: Arc<Harness<C, S>>,
    spec: WorkloadSpec,
    topic: String,
    plan: ExecutionPlan,
}

impl<C: BrokerConnector + 'static> Runner<C> {
    /// Builds a runner from a scenario profile.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` if the profile's workload or execution section
    /// is invalid.
    pub fn from_profile(profile: &ScenarioProfile, connector: C) -> Result<Self> {
        let harness = Harness::new(connector, profile.harness_config());
        Self::new(
            harness,
            profile.to_spec()?,
            profile.producer.topic.clone(),
            profile.execution_plan(),
        )
    }
}

impl<C: BrokerConnector + 'static, S: Serializer + 'static> Runner<C, S> {
    /// Creates a runner.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` if the execution plan would never run.
    pub fn new(
        harness: Harness<C, S>,
        spec: WorkloadSpec,
        topic: impl Into<String>,
        plan: ExecutionPlan,
    ) -> Result<Self> {
        plan.validate()?;
        Ok(Self {
            harness: Arc::new(harness),
            spec,
            topic: topic.into(),
            plan,
        })
    }

    /// Runs every iteration and returns the aggregated summary.
    ///
    /// Worker errors are counted, never propagated: one failing worker does
    /// not stop the others or later iterations.
    pub async fn run(&self) -> RunSummary {
        let started = Instant::now();
        let mut summary = SummaryBuilder::new();
        let mut iteration = IterationId::new(0);

        let config = self.harness.config();
        info!(
            workers = self.spec.worker_count,
            total_messages = self.spec.total_messages,
            topic = %self.topic,
            policy = ?config.policy,
            schema = ?config.schema,
            consume_timeout = ?config.consume_timeout,
            "Starting run"
        );

        loop {
            let done = match self.plan.duration {
                Some(duration) => started.elapsed() >= duration,
                None => iteration.get() >= u64::from(self.plan.iterations),
            };
            if done {
                break;
            }
            self.run_iteration(iteration, &mut summary).await;
            iteration = iteration.next();
        }

        let summary = summary.finish(iteration.get(), started.elapsed());
        info!(
            iterations = summary.iterations,
            produced = summary.total_produced,
            consumed = summary.total_consumed,
            failed = summary.checks_failed,
            errors = summary.errors,
            "Run finished"
        );
        summary
    }

    async fn run_iteration(&self, iteration: IterationId, summary: &mut SummaryBuilder) {
        let mut tasks: JoinSet<(WorkerId, Result<IterationReport>)> = JoinSet::new();

        for worker in self.spec.worker_ids() {
            let harness = Arc::clone(&self.harness);
            let spec = self.spec.clone();
            let topic = self.topic.clone();
            tasks.spawn(async move {
                let outcome = harness
                    .run_worker_iteration(&spec, worker, iteration, &topic)
                    .await;
                (worker, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => summary.record(&report),
                Ok((worker, Err(e))) => {
                    warn!(%worker, %iteration, code = e.error_code(), error = %e, "Worker iteration failed");
                    summary.record_error(e.to_string());
                }
                Err(e) => {
                    warn!(%iteration, error = %e, "Worker task panicked or was cancelled");
                    summary.record_error(format!("{iteration}: worker task failed: {e}"));
                }
            }
        }
    }
}
