//! Bounds on workload shape.
//!
//! A workload spec outside these bounds is rejected at planning time
//! instead of failing halfway through a run.

/// Upper bounds enforced when a workload spec is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of concurrent workers.
    pub max_workers: u32,
    /// Maximum number of messages in one produce call.
    pub max_messages_per_batch: u32,
    /// Maximum number of messages in one workload.
    pub max_total_messages: u64,
    /// Consume timeout used when a profile does not set one (microseconds).
    pub default_consume_timeout_us: u64,
    /// Maximum allowed consume timeout (microseconds).
    pub max_consume_timeout_us: u64,
}

impl Limits {
    /// Creates limits with the harness defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_workers: 4096,
            max_messages_per_batch: 10_000,
            max_total_messages: 1_000_000_000,
            // 10 seconds, 10 minutes.
            default_consume_timeout_us: 10_000_000,
            max_consume_timeout_us: 600_000_000,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
