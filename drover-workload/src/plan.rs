//! Workload planning.
//!
//! Splits a fixed message budget across workers. The split is a pure
//! function of the workload and the worker id, so every worker can compute its
//! own quota without talking to the others.

use std::collections::BTreeMap;

use drover_core::{Error, Limits, Result, WorkerId};

/// Shape of one load-test workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// Messages consumed across all workers in one iteration.
    pub total_messages: u64,
    /// Number of concurrent workers.
    pub worker_count: u32,
    /// Messages per produce call.
    pub batch_size: u32,
    /// Only worker 1 produces when set.
    pub single_producer: bool,
    /// Messages each worker generates in multi-producer mode.
    ///
    /// When unset, each worker produces as many messages as it consumes.
    pub messages_per_producer: Option<u64>,
    /// Bounds the workload is checked against whenever it is planned.
    pub limits: Limits,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            total_messages: 100,
            worker_count: 1,
            batch_size: 10,
            single_producer: true,
            messages_per_producer: None,
            limits: Limits::default(),
        }
    }
}

impl WorkloadSpec {
    /// Creates a workload builder.
    #[must_use]
    pub fn builder() -> WorkloadSpecBuilder {
        WorkloadSpecBuilder::default()
    }

    /// Checks the workload against its limits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if self.worker_count == 0 {
            return Err(Error::invalid_spec("worker_count", "must be at least 1"));
        }
        if self.worker_count > limits.max_workers {
            return Err(Error::invalid_spec(
                "worker_count",
                format!("{} exceeds maximum {}", self.worker_count, limits.max_workers),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::invalid_spec("batch_size", "must be at least 1"));
        }
        if self.batch_size > limits.max_messages_per_batch {
            return Err(Error::invalid_spec(
                "batch_size",
                format!(
                    "{} exceeds maximum {}",
                    self.batch_size, limits.max_messages_per_batch
                ),
            ));
        }
        if self.total_messages > limits.max_total_messages {
            return Err(Error::invalid_spec(
                "total_messages",
                format!(
                    "{} exceeds maximum {}",
                    self.total_messages, limits.max_total_messages
                ),
            ));
        }
        if self.single_producer && self.messages_per_producer.is_some() {
            return Err(Error::invalid_spec(
                "messages_per_producer",
                "only applies to multi-producer workloads",
            ));
        }
        if let Some(per_producer) = self.messages_per_producer {
            let produced = per_producer.saturating_mul(u64::from(self.worker_count));
            if produced < self.total_messages {
                return Err(Error::invalid_spec(
                    "messages_per_producer",
                    format!(
                        "{} producers x {per_producer} messages cannot cover {} consumed",
                        self.worker_count, self.total_messages
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Returns the ids of all workers, in order.
    pub fn worker_ids(&self) -> impl Iterator<Item = WorkerId> {
        (1..=u64::from(self.worker_count)).map(WorkerId::new)
    }
}

/// Builder for [`WorkloadSpec`].
#[derive(Debug, Default)]
pub struct WorkloadSpecBuilder {
    spec: WorkloadSpec,
}

impl WorkloadSpecBuilder {
    /// Sets the total number of messages.
    #[must_use]
    pub const fn total_messages(mut self, total: u64) -> Self {
        self.spec.total_messages = total;
        self
    }

    /// Sets the number of workers.
    #[must_use]
    pub const fn workers(mut self, count: u32) -> Self {
        self.spec.worker_count = count;
        self
    }

    /// Sets the produce batch size.
    #[must_use]
    pub const fn batch_size(mut self, size: u32) -> Self {
        self.spec.batch_size = size;
        self
    }

    /// Selects single-producer (`true`) or multi-producer (`false`) mode.
    #[must_use]
    pub const fn single_producer(mut self, single: bool) -> Self {
        self.spec.single_producer = single;
        self
    }

    /// Sets a fixed per-worker production quota (multi-producer mode).
    #[must_use]
    pub const fn messages_per_producer(mut self, count: u64) -> Self {
        self.spec.messages_per_producer = Some(count);
        self
    }

    /// Overrides the limits the workload is checked against.
    #[must_use]
    pub const fn limits(mut self, limits: Limits) -> Self {
        self.spec.limits = limits;
        self
    }

    /// Builds and validates the workload.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSpec` if the workload violates the configured limits.
    pub fn build(self) -> Result<WorkloadSpec> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}

/// One worker's share of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerQuota {
    /// Worker the quota belongs to.
    pub worker_id: WorkerId,
    /// Messages the worker produces per iteration.
    pub produce_count: u64,
    /// Messages the worker consumes per iteration.
    pub consume_count: u64,
}

impl WorkerQuota {
    /// Returns true when the worker's consume quota matches its own
    /// production, so its values can be checked end to end.
    #[must_use]
    pub const fn consumes_own_production(&self) -> bool {
        self.produce_count > 0 && self.consume_count == self.produce_count
    }
}

/// Computes the quota of a single worker.
///
/// `floor(total / workers)` for everyone, with the remainder added to worker 1
/// so the consume quotas always sum to `total_messages`.
///
/// # Errors
///
/// Returns `InvalidSpec` if the workload is invalid or the worker id is outside
/// `1..=worker_count`.
pub fn plan_worker(spec: &WorkloadSpec, worker_id: WorkerId) -> Result<WorkerQuota> {
    spec.validate()?;

    let workers = u64::from(spec.worker_count);
    if worker_id.get() == 0 || worker_id.get() > workers {
        return Err(Error::invalid_spec(
            "worker_id",
            format!("{worker_id} is outside 1..={workers}"),
        ));
    }

    let share = spec.total_messages / workers;
    let remainder = spec.total_messages % workers;
    let consume_count = if worker_id == WorkerId::FIRST {
        share + remainder
    } else {
        share
    };

    let produce_count = if spec.single_producer {
        if worker_id == WorkerId::FIRST {
            spec.total_messages
        } else {
            0
        }
    } else {
        spec.messages_per_producer.unwrap_or(consume_count)
    };

    Ok(WorkerQuota {
        worker_id,
        produce_count,
        consume_count,
    })
}

/// Computes every worker's quota.
///
/// # Errors
///
/// Returns `InvalidSpec` if the workload is invalid.
pub fn plan(spec: &WorkloadSpec) -> Result<BTreeMap<WorkerId, WorkerQuota>> {
    spec.validate()?;
    spec.worker_ids()
        .map(|id| plan_worker(spec, id).map(|quota| (id, quota)))
        .collect()
}
