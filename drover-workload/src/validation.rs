//! Delivery validation.
//!
//! Checks one worker iteration against its quota:
//! - Count (did the expected number of messages arrive)
//! - Topic (did every message come from the expected topic)
//! - Round-trip (do the first/last values decode to what was produced)
//! - Duplicates (was any value delivered twice)
//! - Producer order (did each producer's values arrive in sequence)
//!
//! Every check runs regardless of the others' outcomes, and validation has
//! no side effects: the same inputs always give the same results.

use std::collections::{HashMap, HashSet};
use std::fmt;

use drover_core::{IterationId, WorkerId};
use serde::{Deserialize, Serialize};

use crate::iteration::RunResult;
use crate::message::Message;
use crate::plan::WorkerQuota;
use crate::schema::{SchemaType, Serializer};
use crate::tag::ValueTag;

/// Check names as they appear in reports.
pub mod checks {
    /// Received count equals the consume quota.
    pub const COUNT_MATCHES: &str = "countMatches";
    /// Every received message belongs to the expected topic.
    pub const TOPIC_MATCHES: &str = "topicMatches";
    /// First received value decodes to the first produced value.
    pub const FIRST_VALUE_ROUND_TRIPS: &str = "firstValueRoundTrips";
    /// Last received value decodes to the last produced value.
    pub const LAST_VALUE_ROUND_TRIPS: &str = "lastValueRoundTrips";
    /// No value was received twice.
    pub const NO_DUPLICATES: &str = "noDuplicates";
    /// Each producer's values arrived in sequence order.
    pub const PRODUCER_ORDER_PRESERVED: &str = "producerOrderPreserved";
}

/// How a short delivery is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryPolicy {
    /// Fewer messages than expected fails the count check.
    #[default]
    Strict,
    /// Fewer messages than expected is reported as a warning.
    Lenient,
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// The property holds.
    Passed,
    /// The property is violated.
    Failed,
    /// The check had nothing to look at.
    Skipped,
    /// The property is violated but the policy tolerates it.
    Warning,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Warning => "warning",
        };
        f.write_str(s)
    }
}

/// Result of one named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    /// Check name (see [`checks`]).
    pub name: &'static str,
    /// Outcome.
    pub status: CheckStatus,
    /// Human-readable explanation.
    pub detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }

    fn passed(name: &'static str, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Passed, detail)
    }

    fn failed(name: &'static str, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Failed, detail)
    }

    fn skipped(name: &'static str, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Skipped, detail)
    }

    /// Returns true only for [`CheckStatus::Passed`].
    #[must_use]
    pub fn is_passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }

    /// Returns true only for [`CheckStatus::Failed`].
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == CheckStatus::Failed
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.name, self.status, self.detail)
    }
}

#[derive(Clone, Copy)]
enum End {
    First,
    Last,
}

/// Runs all checks for a worker iteration.
pub struct Validator<'a, S: Serializer + ?Sized> {
    policy: DeliveryPolicy,
    schema: SchemaType,
    round_trip: bool,
    serializer: &'a S,
}

impl<'a, S: Serializer + ?Sized> Validator<'a, S> {
    /// Creates a validator decoding values with `schema`.
    pub const fn new(policy: DeliveryPolicy, schema: SchemaType, serializer: &'a S) -> Self {
        Self {
            policy,
            schema,
            round_trip: true,
            serializer,
        }
    }

    /// Enables or disables the round-trip checks (reported as skipped).
    #[must_use]
    pub const fn with_round_trip(mut self, enabled: bool) -> Self {
        self.round_trip = enabled;
        self
    }

    /// Runs every check. Order of the returned results is fixed.
    #[must_use]
    pub fn validate(&self, expected: &WorkerQuota, result: &RunResult, topic: &str) -> Vec<CheckResult> {
        vec![
            self.check_count(expected, result),
            Self::check_topic(result, topic),
            self.check_round_trip(expected, result, End::First),
            self.check_round_trip(expected, result, End::Last),
            Self::check_duplicates(result),
            self.check_producer_order(result),
        ]
    }

    /// Compares the number of received messages with the consume quota.
    #[must_use]
    pub fn check_count(&self, expected: &WorkerQuota, result: &RunResult) -> CheckResult {
        let received = result.consumed_messages.len() as u64;
        let wanted = expected.consume_count;
        let detail = format!("received {received} of {wanted}");

        if received == wanted {
            return CheckResult::passed(checks::COUNT_MATCHES, detail);
        }
        let status = match self.policy {
            DeliveryPolicy::Strict => CheckStatus::Failed,
            // More than asked for is never tolerated.
            DeliveryPolicy::Lenient if received < wanted => CheckStatus::Warning,
            DeliveryPolicy::Lenient => CheckStatus::Failed,
        };
        CheckResult::new(checks::COUNT_MATCHES, status, detail)
    }

    /// Checks that every received message carries `topic`.
    #[must_use]
    pub fn check_topic(result: &RunResult, topic: &str) -> CheckResult {
        let messages = &result.consumed_messages;
        if messages.is_empty() {
            return CheckResult::skipped(checks::TOPIC_MATCHES, "no messages received");
        }

        let mismatched: Vec<&Message> = messages
            .iter()
            .filter(|m| m.topic() != Some(topic))
            .collect();

        match mismatched.first() {
            None => CheckResult::passed(
                checks::TOPIC_MATCHES,
                format!("{} messages from {topic}", messages.len()),
            ),
            Some(first) => CheckResult::failed(
                checks::TOPIC_MATCHES,
                format!(
                    "{} of {} messages not from {topic} (first: {:?})",
                    mismatched.len(),
                    messages.len(),
                    first.topic()
                ),
            ),
        }
    }

    fn check_round_trip(&self, expected: &WorkerQuota, result: &RunResult, end: End) -> CheckResult {
        let (name, recorded, received) = match end {
            End::First => (
                checks::FIRST_VALUE_ROUND_TRIPS,
                result.first_value.as_deref(),
                result.consumed_messages.first(),
            ),
            End::Last => (
                checks::LAST_VALUE_ROUND_TRIPS,
                result.last_value.as_deref(),
                result.consumed_messages.last(),
            ),
        };

        if !self.round_trip {
            return CheckResult::skipped(name, "round-trip checks disabled");
        }
        if !expected.consumes_own_production() || result.produced_count == 0 {
            return CheckResult::skipped(name, "worker does not consume its own production");
        }
        let (Some(recorded), Some(received)) = (recorded, received) else {
            return CheckResult::skipped(name, "no messages received");
        };
        let short = result.consumed_count() < expected.consume_count;

        // Partitions interleave freely, so position says nothing about
        // which value was produced first or last.
        if spans_partitions(&result.consumed_messages) {
            return self.find_round_trip(name, recorded, &result.consumed_messages, short);
        }
        if matches!(end, End::Last) && short {
            return CheckResult::skipped(name, "short delivery, last message not received");
        }

        match self.serializer.deserialize(&received.value, self.schema) {
            Ok(value) if value == recorded => CheckResult::passed(name, value),
            Ok(value) => CheckResult::failed(name, format!("expected {recorded}, got {value}")),
            Err(e) => CheckResult::failed(name, e.to_string()),
        }
    }

    /// Looks for the message carrying `recorded` anywhere in `messages`.
    fn find_round_trip(
        &self,
        name: &'static str,
        recorded: &str,
        messages: &[Message],
        short: bool,
    ) -> CheckResult {
        let found = messages.iter().any(|m| {
            self.serializer
                .deserialize(&m.value, self.schema)
                .is_ok_and(|value| value == recorded)
        });

        if found {
            CheckResult::passed(name, recorded)
        } else if short {
            CheckResult::skipped(name, format!("short delivery, {recorded} not received"))
        } else {
            CheckResult::failed(
                name,
                format!("no received message decodes to {recorded}"),
            )
        }
    }

    /// Checks that no value was delivered more than once.
    #[must_use]
    pub fn check_duplicates(result: &RunResult) -> CheckResult {
        let messages = &result.consumed_messages;
        if messages.len() < 2 {
            return CheckResult::skipped(checks::NO_DUPLICATES, "fewer than two messages received");
        }

        let mut seen = HashSet::with_capacity(messages.len());
        let duplicates = messages
            .iter()
            .filter(|m| !seen.insert(m.value.as_ref()))
            .count();

        if duplicates == 0 {
            CheckResult::passed(checks::NO_DUPLICATES, format!("{} distinct values", messages.len()))
        } else {
            CheckResult::failed(
                checks::NO_DUPLICATES,
                format!("{duplicates} duplicate values in {} messages", messages.len()),
            )
        }
    }

    /// Checks that, per producer iteration and partition, sequence indices
    /// strictly increase in delivery order.
    ///
    /// Values that are not tags are ignored.
    #[must_use]
    pub fn check_producer_order(&self, result: &RunResult) -> CheckResult {
        let mut last_index: HashMap<(WorkerId, IterationId, Option<i32>), u64> = HashMap::new();
        let mut parsed = 0usize;
        let mut violations = Vec::new();

        for message in &result.consumed_messages {
            let Ok(value) = self.serializer.deserialize(&message.value, self.schema) else {
                continue;
            };
            let Ok(tag) = ValueTag::parse(&value) else {
                continue;
            };
            parsed += 1;

            let key = (tag.worker, tag.iteration, message.partition);
            if let Some(previous) = last_index.insert(key, tag.index) {
                if tag.index <= previous {
                    violations.push((tag, previous));
                }
            }
        }

        if parsed < 2 {
            return CheckResult::skipped(
                checks::PRODUCER_ORDER_PRESERVED,
                "fewer than two tagged messages received",
            );
        }

        match violations.first() {
            None => CheckResult::passed(
                checks::PRODUCER_ORDER_PRESERVED,
                format!("{} producer streams in order", last_index.len()),
            ),
            Some((tag, previous)) => CheckResult::failed(
                checks::PRODUCER_ORDER_PRESERVED,
                format!(
                    "{} out-of-order values (first: {} {} index {} after {previous})",
                    violations.len(),
                    tag.worker,
                    tag.iteration,
                    tag.index
                ),
            ),
        }
    }
}

/// Returns true if the messages came from more than one partition.
fn spans_partitions(messages: &[Message]) -> bool {
    messages
        .split_first()
        .is_some_and(|(first, rest)| rest.iter().any(|m| m.partition != first.partition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LocalSerializer;
    use bytes::Bytes;

    fn tagged(index: u64, worker: u64, iteration: u64, topic: &str, offset: u64) -> Message {
        tagged_on(index, worker, iteration, topic, 0, offset)
    }

    fn tagged_on(
        index: u64,
        worker: u64,
        iteration: u64,
        topic: &str,
        partition: i32,
        offset: u64,
    ) -> Message {
        let value = ValueTag::new(index, WorkerId::new(worker), IterationId::new(iteration)).render();
        Message::new(Bytes::from(value)).acknowledged(topic, partition, offset)
    }

    /// Messages 0..count spread round-robin over three partitions and
    /// delivered partition 1 first, then 0, then 2.
    fn spread_over_partitions(count: u64) -> Vec<Message> {
        let mut messages: Vec<Message> = (0..count)
            .map(|i| tagged_on(i, 1, 0, "orders", (i % 3) as i32, i / 3))
            .collect();
        messages.sort_by_key(|m| {
            let turn = match m.partition {
                Some(1) => 0,
                Some(0) => 1,
                _ => 2,
            };
            (turn, m.offset)
        });
        messages
    }

    fn own_run(count: u64, topic: &str) -> (WorkerQuota, RunResult) {
        let quota = WorkerQuota {
            worker_id: WorkerId::new(1),
            produce_count: count,
            consume_count: count,
        };
        let consumed: Vec<Message> = (0..count).map(|i| tagged(i, 1, 0, topic, i)).collect();
        let result = RunResult {
            worker_id: WorkerId::new(1),
            iteration_id: IterationId::new(0),
            produced_count: count,
            first_value: Some(ValueTag::new(0, WorkerId::new(1), IterationId::new(0)).render()),
            last_value: Some(
                ValueTag::new(count - 1, WorkerId::new(1), IterationId::new(0)).render(),
            ),
            consumed_messages: consumed,
        };
        (quota, result)
    }

    fn validator(policy: DeliveryPolicy) -> Validator<'static, LocalSerializer> {
        Validator::new(policy, SchemaType::String, &LocalSerializer)
    }

    fn status_of(results: &[CheckResult], name: &str) -> CheckStatus {
        results
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.status)
            .unwrap()
    }

    #[test]
    fn test_exact_delivery_passes_everything() {
        let (quota, result) = own_run(10, "orders");
        let results = validator(DeliveryPolicy::Strict).validate(&quota, &result, "orders");

        assert_eq!(results.len(), 6);
        assert!(results.iter().all(CheckResult::is_passed), "{results:?}");
    }

    #[test]
    fn test_short_delivery_strict_fails() {
        let (quota, mut result) = own_run(10, "orders");
        result.consumed_messages.truncate(7);

        let results = validator(DeliveryPolicy::Strict).validate(&quota, &result, "orders");
        assert_eq!(status_of(&results, checks::COUNT_MATCHES), CheckStatus::Failed);
        // Other checks are still reported.
        assert_eq!(status_of(&results, checks::TOPIC_MATCHES), CheckStatus::Passed);
        assert_eq!(status_of(&results, checks::FIRST_VALUE_ROUND_TRIPS), CheckStatus::Passed);
        assert_eq!(status_of(&results, checks::LAST_VALUE_ROUND_TRIPS), CheckStatus::Skipped);
    }

    #[test]
    fn test_short_delivery_lenient_warns() {
        let (quota, mut result) = own_run(10, "orders");
        result.consumed_messages.truncate(3);

        let check = validator(DeliveryPolicy::Lenient).check_count(&quota, &result);
        assert_eq!(check.status, CheckStatus::Warning);
        assert_eq!(check.detail, "received 3 of 10");
    }

    #[test]
    fn test_over_delivery_fails_even_when_lenient() {
        let (mut quota, result) = own_run(10, "orders");
        quota.consume_count = 5;

        let check = validator(DeliveryPolicy::Lenient).check_count(&quota, &result);
        assert_eq!(check.status, CheckStatus::Failed);
    }

    #[test]
    fn test_empty_delivery_skips_topic() {
        let (quota, mut result) = own_run(10, "orders");
        result.consumed_messages.clear();

        let results = validator(DeliveryPolicy::Strict).validate(&quota, &result, "orders");
        assert_eq!(status_of(&results, checks::TOPIC_MATCHES), CheckStatus::Skipped);
        assert_eq!(status_of(&results, checks::COUNT_MATCHES), CheckStatus::Failed);
        assert_eq!(status_of(&results, checks::FIRST_VALUE_ROUND_TRIPS), CheckStatus::Skipped);
    }

    #[test]
    fn test_zero_quota_boundary() {
        let quota = WorkerQuota {
            worker_id: WorkerId::new(2),
            produce_count: 0,
            consume_count: 0,
        };
        let result = RunResult::empty(WorkerId::new(2), IterationId::new(0));

        let results = validator(DeliveryPolicy::Strict).validate(&quota, &result, "t");
        assert_eq!(status_of(&results, checks::COUNT_MATCHES), CheckStatus::Passed);
        assert_eq!(status_of(&results, checks::TOPIC_MATCHES), CheckStatus::Skipped);
        assert!(!results.iter().any(CheckResult::is_failed));
    }

    #[test]
    fn test_wrong_topic_fails() {
        let (_, mut result) = own_run(4, "orders");
        result.consumed_messages[2].topic = Some("payments".to_string());

        let check = Validator::<LocalSerializer>::check_topic(&result, "orders");
        assert_eq!(check.status, CheckStatus::Failed);
        assert!(check.detail.contains("1 of 4"));
    }

    #[test]
    fn test_round_trip_mismatch_fails() {
        let (quota, mut result) = own_run(4, "orders");
        result.first_value = Some("something else".to_string());

        let results = validator(DeliveryPolicy::Strict).validate(&quota, &result, "orders");
        assert_eq!(status_of(&results, checks::FIRST_VALUE_ROUND_TRIPS), CheckStatus::Failed);
        assert_eq!(status_of(&results, checks::LAST_VALUE_ROUND_TRIPS), CheckStatus::Passed);
    }

    #[test]
    fn test_round_trip_undecodable_fails() {
        let (quota, mut result) = own_run(4, "orders");
        result.consumed_messages[0].value = Bytes::from_static(&[0xff, 0xfe]);

        let results = validator(DeliveryPolicy::Strict).validate(&quota, &result, "orders");
        assert_eq!(status_of(&results, checks::FIRST_VALUE_ROUND_TRIPS), CheckStatus::Failed);
    }

    #[test]
    fn test_round_trip_skipped_for_cross_worker_consumption() {
        let (_, result) = own_run(4, "orders");
        let quota = WorkerQuota {
            worker_id: WorkerId::new(1),
            produce_count: 12,
            consume_count: 4,
        };

        let results = validator(DeliveryPolicy::Strict).validate(&quota, &result, "orders");
        assert_eq!(status_of(&results, checks::FIRST_VALUE_ROUND_TRIPS), CheckStatus::Skipped);
        assert_eq!(status_of(&results, checks::LAST_VALUE_ROUND_TRIPS), CheckStatus::Skipped);
    }

    #[test]
    fn test_round_trip_can_be_disabled() {
        let (quota, result) = own_run(4, "orders");
        let results = validator(DeliveryPolicy::Strict)
            .with_round_trip(false)
            .validate(&quota, &result, "orders");
        assert_eq!(status_of(&results, checks::FIRST_VALUE_ROUND_TRIPS), CheckStatus::Skipped);
    }

    #[test]
    fn test_round_trip_across_partitions() {
        let (quota, mut result) = own_run(10, "orders");
        result.consumed_messages = spread_over_partitions(10);
        // Neither end of the delivery is an end of the production.
        assert_eq!(&result.consumed_messages[0].value[..], b"test-value-string-1-vu-1-iter-0");
        assert_eq!(&result.consumed_messages[9].value[..], b"test-value-string-8-vu-1-iter-0");

        let results = validator(DeliveryPolicy::Strict).validate(&quota, &result, "orders");
        assert!(results.iter().all(CheckResult::is_passed), "{results:?}");
    }

    #[test]
    fn test_round_trip_across_partitions_missing_value() {
        let (quota, mut result) = own_run(10, "orders");
        result.consumed_messages = spread_over_partitions(10);
        result.consumed_messages.retain(|m| {
            let value = LocalSerializer.deserialize(&m.value, SchemaType::String).unwrap();
            ValueTag::parse(&value).unwrap().index != 9
        });

        let results = validator(DeliveryPolicy::Strict).validate(&quota, &result, "orders");
        assert_eq!(status_of(&results, checks::FIRST_VALUE_ROUND_TRIPS), CheckStatus::Passed);
        assert_eq!(status_of(&results, checks::LAST_VALUE_ROUND_TRIPS), CheckStatus::Skipped);

        // With the full quota delivered, a missing value is a failure.
        let mut quota = quota;
        quota.consume_count = 9;
        quota.produce_count = 9;
        let check = validator(DeliveryPolicy::Strict).validate(&quota, &result, "orders");
        assert_eq!(status_of(&check, checks::LAST_VALUE_ROUND_TRIPS), CheckStatus::Failed);
    }

    #[test]
    fn test_duplicates_detected() {
        let (_, mut result) = own_run(5, "orders");
        let copy = result.consumed_messages[1].clone();
        result.consumed_messages.push(copy);

        let check = Validator::<LocalSerializer>::check_duplicates(&result);
        assert_eq!(check.status, CheckStatus::Failed);
        assert!(check.detail.starts_with("1 duplicate"));
    }

    #[test]
    fn test_order_violation_detected() {
        let (_, mut result) = own_run(5, "orders");
        result.consumed_messages.swap(1, 3);

        let check = validator(DeliveryPolicy::Strict).check_producer_order(&result);
        assert_eq!(check.status, CheckStatus::Failed);
    }

    #[test]
    fn test_interleaved_producers_keep_order() {
        let mut result = RunResult::empty(WorkerId::new(3), IterationId::new(0));
        result.consumed_messages = vec![
            tagged(0, 1, 0, "t", 0),
            tagged(0, 2, 0, "t", 1),
            tagged(1, 1, 0, "t", 2),
            tagged(1, 2, 0, "t", 3),
            tagged(0, 1, 1, "t", 4),
        ];

        let check = validator(DeliveryPolicy::Strict).check_producer_order(&result);
        assert_eq!(check.status, CheckStatus::Passed);
        assert_eq!(check.detail, "3 producer streams in order");
    }

    #[test]
    fn test_validate_is_idempotent() {
        let (quota, mut result) = own_run(6, "orders");
        result.consumed_messages.truncate(4);
        let validator = validator(DeliveryPolicy::Lenient);

        let first = validator.validate(&quota, &result, "orders");
        let second = validator.validate(&quota, &result, "orders");
        assert_eq!(first, second);
    }
}
