//! Message driver.
//!
//! Turns a worker's quota into broker calls: tagged values go out in
//! batches, strictly one batch at a time, and a single consume call brings
//! back whatever the broker delivers within the timeout.

use std::time::Duration;

use drover_core::{Error, IterationId, Result};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::broker::{Consumer, Producer};
use crate::message::Message;
use crate::plan::WorkerQuota;
use crate::schema::{SchemaType, Serializer};
use crate::tag::ValueTag;

/// What a worker wrote during one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProduceOutcome {
    /// Number of messages acknowledged.
    pub produced: u64,
    /// Number of produce calls made.
    pub batches: u64,
    /// First generated value, if any.
    pub first_value: Option<String>,
    /// Last generated value, if any.
    pub last_value: Option<String>,
    /// Wall time of each produce call in microseconds.
    pub batch_latencies_us: Vec<u64>,
}

/// What a worker read during one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeOutcome {
    /// Number of messages asked for.
    pub requested: u64,
    /// Messages returned, in delivery order.
    pub messages: Vec<Message>,
    /// Wall time of the consume call in microseconds; `None` if skipped.
    pub latency_us: Option<u64>,
}

impl ConsumeOutcome {
    /// Returns true when fewer messages arrived than were requested.
    #[must_use]
    pub fn is_short(&self) -> bool {
        (self.messages.len() as u64) < self.requested
    }
}

/// Drives one worker's produce and consume phases.
pub struct Driver<'a, S: Serializer + ?Sized> {
    batch_size: u32,
    schema: SchemaType,
    serializer: &'a S,
}

impl<'a, S: Serializer + ?Sized> Driver<'a, S> {
    /// Creates a driver that writes `batch_size` messages per produce call.
    ///
    /// A zero batch size is treated as 1.
    pub fn new(batch_size: u32, schema: SchemaType, serializer: &'a S) -> Self {
        Self {
            batch_size: batch_size.max(1),
            schema,
            serializer,
        }
    }

    /// Produces `quota.produce_count` tagged messages in ascending order.
    ///
    /// Each batch is awaited before the next is built, so batches from one
    /// worker reach the broker in order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Produce` with the broker's error as soon as a batch is
    /// rejected, or `Error::Serialization` if a value cannot be encoded.
    #[allow(clippy::cast_possible_truncation)] // Latencies in microseconds fit in u64.
    pub async fn run_produce<P: Producer + ?Sized>(
        &self,
        producer: &mut P,
        quota: &WorkerQuota,
        iteration: IterationId,
    ) -> Result<ProduceOutcome> {
        let worker = quota.worker_id;
        let mut outcome = ProduceOutcome::default();
        let batch_capacity = usize::try_from(self.batch_size).unwrap_or(usize::MAX);
        let mut batch = Vec::with_capacity(batch_capacity);

        for index in 0..quota.produce_count {
            let value = ValueTag::new(index, worker, iteration).render();
            let bytes = self.serializer.serialize(&value, self.schema)?;
            batch.push(Message::new(bytes));

            if index == 0 {
                outcome.first_value = Some(value.clone());
            }
            if index + 1 == quota.produce_count {
                outcome.last_value = Some(value);
            }

            if batch.len() == batch_capacity || index + 1 == quota.produce_count {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_capacity));
                let size = full.len() as u64;

                let started = Instant::now();
                producer
                    .produce(full)
                    .await
                    .map_err(|source| Error::Produce {
                        worker,
                        iteration,
                        source,
                    })?;
                outcome
                    .batch_latencies_us
                    .push(started.elapsed().as_micros() as u64);

                outcome.produced += size;
                outcome.batches += 1;
                debug!(%worker, %iteration, batch = outcome.batches, size, "Batch acknowledged");
            }
        }

        if outcome.produced > 0 {
            info!(
                %worker,
                %iteration,
                produced = outcome.produced,
                batches = outcome.batches,
                first = outcome.first_value.as_deref().unwrap_or_default(),
                last = outcome.last_value.as_deref().unwrap_or_default(),
                "Produced messages"
            );
        }

        Ok(outcome)
    }

    /// Consumes up to `quota.consume_count` messages with one consume call.
    ///
    /// A short result is returned as is; judging it is the validator's job.
    /// No call is made when the quota is zero.
    ///
    /// # Errors
    ///
    /// Returns `Error::Consume` if the consumer loses its connection.
    #[allow(clippy::cast_possible_truncation)] // Latencies in microseconds fit in u64.
    pub async fn run_consume<C: Consumer + ?Sized>(
        &self,
        consumer: &mut C,
        quota: &WorkerQuota,
        iteration: IterationId,
        timeout: Duration,
    ) -> Result<ConsumeOutcome> {
        let worker = quota.worker_id;
        let requested = quota.consume_count;
        if requested == 0 {
            return Ok(ConsumeOutcome::default());
        }

        let started = Instant::now();
        let messages = consumer
            .consume(requested, timeout)
            .await
            .map_err(|source| Error::Consume {
                worker,
                iteration,
                source,
            })?;
        let latency_us = started.elapsed().as_micros() as u64;

        info!(%worker, %iteration, requested, received = messages.len(), "Consumed messages");

        Ok(ConsumeOutcome {
            requested,
            messages,
            latency_us: Some(latency_us),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LocalSerializer;
    use async_trait::async_trait;
    use drover_core::{ConsumeError, ProduceError, WorkerId};

    /// Records every batch; optionally rejects batch number `fail_at`.
    #[derive(Default)]
    struct RecordingProducer {
        batches: Vec<Vec<Message>>,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl Producer for RecordingProducer {
        async fn produce(&mut self, batch: Vec<Message>) -> std::result::Result<(), ProduceError> {
            if self.fail_at == Some(self.batches.len()) {
                return Err(ProduceError::new("not enough replicas"));
            }
            self.batches.push(batch);
            Ok(())
        }
    }

    /// Returns a fixed number of messages regardless of the limit.
    struct FixedConsumer {
        available: u64,
        calls: u32,
    }

    #[async_trait]
    impl Consumer for FixedConsumer {
        async fn consume(
            &mut self,
            limit: u64,
            _timeout: Duration,
        ) -> std::result::Result<Vec<Message>, ConsumeError> {
            self.calls += 1;
            let count = limit.min(self.available);
            Ok((0..count)
                .map(|i| Message::new(bytes::Bytes::from(i.to_string())).acknowledged("t", 0, i))
                .collect())
        }
    }

    fn quota(produce_count: u64, consume_count: u64) -> WorkerQuota {
        WorkerQuota {
            worker_id: WorkerId::new(1),
            produce_count,
            consume_count,
        }
    }

    fn values(producer: &RecordingProducer) -> Vec<String> {
        producer
            .batches
            .iter()
            .flatten()
            .map(|m| String::from_utf8(m.value.to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_produce_batches_in_order() {
        let driver = Driver::new(10, SchemaType::String, &LocalSerializer);
        let mut producer = RecordingProducer::default();

        let outcome = driver
            .run_produce(&mut producer, &quota(90, 30), IterationId::new(0))
            .await
            .unwrap();

        assert_eq!(outcome.produced, 90);
        assert_eq!(outcome.batches, 9);
        assert!(producer.batches.iter().all(|b| b.len() == 10));
        assert_eq!(
            outcome.first_value.as_deref(),
            Some("test-value-string-0-vu-1-iter-0")
        );
        assert_eq!(
            outcome.last_value.as_deref(),
            Some("test-value-string-89-vu-1-iter-0")
        );
        assert_eq!(outcome.batch_latencies_us.len(), 9);
    }

    #[tokio::test]
    async fn test_last_batch_may_be_short() {
        let driver = Driver::new(4, SchemaType::String, &LocalSerializer);
        let mut producer = RecordingProducer::default();

        driver
            .run_produce(&mut producer, &quota(10, 0), IterationId::new(3))
            .await
            .unwrap();

        let sizes: Vec<usize> = producer.batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_generated_values_unique_and_increasing() {
        let driver = Driver::new(7, SchemaType::String, &LocalSerializer);
        let mut producer = RecordingProducer::default();

        driver
            .run_produce(&mut producer, &quota(50, 0), IterationId::new(2))
            .await
            .unwrap();

        let tags: Vec<ValueTag> = values(&producer)
            .iter()
            .map(|v| ValueTag::parse(v).unwrap())
            .collect();
        assert_eq!(tags.len(), 50);
        assert!(tags.windows(2).all(|w| w[0].index < w[1].index));
        assert!(tags
            .iter()
            .all(|t| t.worker == WorkerId::new(1) && t.iteration == IterationId::new(2)));
    }

    #[tokio::test]
    async fn test_produce_nothing() {
        let driver = Driver::new(10, SchemaType::String, &LocalSerializer);
        let mut producer = RecordingProducer::default();

        let outcome = driver
            .run_produce(&mut producer, &quota(0, 30), IterationId::new(0))
            .await
            .unwrap();

        assert_eq!(outcome, ProduceOutcome::default());
        assert!(producer.batches.is_empty());
    }

    #[tokio::test]
    async fn test_produce_error_propagates_without_retry() {
        let driver = Driver::new(10, SchemaType::String, &LocalSerializer);
        let mut producer = RecordingProducer {
            fail_at: Some(2),
            ..RecordingProducer::default()
        };

        let err = driver
            .run_produce(&mut producer, &quota(50, 0), IterationId::new(1))
            .await
            .unwrap_err();

        match err {
            Error::Produce {
                worker,
                iteration,
                source,
            } => {
                assert_eq!(worker, WorkerId::new(1));
                assert_eq!(iteration, IterationId::new(1));
                assert_eq!(source, ProduceError::new("not enough replicas"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Two batches went through, nothing after the failure.
        assert_eq!(producer.batches.len(), 2);
    }

    #[tokio::test]
    async fn test_json_schema_values() {
        let driver = Driver::new(10, SchemaType::Json, &LocalSerializer);
        let mut producer = RecordingProducer::default();

        driver
            .run_produce(&mut producer, &quota(1, 0), IterationId::new(0))
            .await
            .unwrap();

        assert_eq!(
            values(&producer),
            vec!["\"test-value-string-0-vu-1-iter-0\"".to_string()]
        );
    }

    #[tokio::test]
    async fn test_consume_short_result_is_not_an_error() {
        let driver = Driver::new(10, SchemaType::String, &LocalSerializer);
        let mut consumer = FixedConsumer {
            available: 12,
            calls: 0,
        };

        let outcome = driver
            .run_consume(&mut consumer, &quota(0, 30), IterationId::new(0), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(outcome.requested, 30);
        assert_eq!(outcome.messages.len(), 12);
        assert!(outcome.is_short());
        assert_eq!(consumer.calls, 1);
    }

    #[tokio::test]
    async fn test_consume_skipped_for_zero_quota() {
        let driver = Driver::new(10, SchemaType::String, &LocalSerializer);
        let mut consumer = FixedConsumer {
            available: 5,
            calls: 0,
        };

        let outcome = driver
            .run_consume(&mut consumer, &quota(0, 0), IterationId::new(0), Duration::ZERO)
            .await
            .unwrap();

        assert!(outcome.messages.is_empty());
        assert!(!outcome.is_short());
        assert_eq!(consumer.calls, 0);
    }
}
