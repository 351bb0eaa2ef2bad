//! Kafka cluster adapter.
//!
//! Each session gets its own librdkafka producer and consumer. The consumer
//! joins the configured group and subscribes to the session topic, so
//! partitions are balanced by the cluster's group coordinator.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use drover_core::{ConsumeError, Error, ProduceError, Result, WorkerId};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer as _};
use rdkafka::producer::{BaseProducer, BaseRecord, Producer as _};
use rdkafka::Message as _;
use tracing::{debug, warn};

use super::{BrokerConnector, Consumer, Producer, Session};
use crate::message::Message;

/// Client settings shared by every session.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    /// Bootstrap servers.
    pub brokers: Vec<String>,
    /// Consumer group id.
    pub group_id: String,
    /// Required acks (-1 = all, 0 = none, 1 = leader).
    pub required_acks: i32,
    /// Delivery attempts per message, including the first.
    pub max_attempts: u32,
    /// Offset auto-commit interval.
    pub commit_interval: Duration,
    /// Group heartbeat interval.
    pub heartbeat_interval: Duration,
    /// How long a produce call waits for acknowledgements.
    pub produce_timeout: Duration,
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            group_id: "drover-group".to_string(),
            required_acks: -1,
            max_attempts: 3,
            commit_interval: Duration::from_millis(700),
            heartbeat_interval: Duration::from_millis(2300),
            produce_timeout: Duration::from_secs(5),
        }
    }
}

impl KafkaSettings {
    fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

/// Connector that opens librdkafka clients per worker.
#[derive(Debug, Clone)]
pub struct KafkaConnector {
    settings: KafkaSettings,
}

impl KafkaConnector {
    /// Creates a connector with the given settings.
    #[must_use]
    pub const fn new(settings: KafkaSettings) -> Self {
        Self { settings }
    }

    fn producer(&self) -> std::result::Result<BaseProducer, rdkafka::error::KafkaError> {
        ClientConfig::new()
            .set("bootstrap.servers", self.settings.bootstrap_servers())
            .set("acks", self.settings.required_acks.to_string())
            .set(
                "message.send.max.retries",
                self.settings.max_attempts.saturating_sub(1).to_string(),
            )
            .set(
                "message.timeout.ms",
                self.settings.produce_timeout.as_millis().to_string(),
            )
            .create()
    }

    fn consumer(&self) -> std::result::Result<BaseConsumer, rdkafka::error::KafkaError> {
        ClientConfig::new()
            .set("bootstrap.servers", self.settings.bootstrap_servers())
            .set("group.id", &self.settings.group_id)
            .set("partition.assignment.strategy", "roundrobin")
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                self.settings.commit_interval.as_millis().to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.settings.heartbeat_interval.as_millis().to_string(),
            )
            .set("auto.offset.reset", "earliest")
            .create()
    }
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    type Producer = KafkaProducer;
    type Consumer = KafkaConsumer;

    async fn connect(
        &self,
        worker: WorkerId,
        topic: &str,
    ) -> Result<Session<KafkaProducer, KafkaConsumer>> {
        let connect_error = |e: rdkafka::error::KafkaError| Error::Connect {
            worker,
            reason: e.to_string(),
        };

        let producer = self.producer().map_err(connect_error)?;
        let consumer = self.consumer().map_err(connect_error)?;
        consumer.subscribe(&[topic]).map_err(connect_error)?;

        debug!(
            %worker,
            topic,
            brokers = %self.settings.bootstrap_servers(),
            group = %self.settings.group_id,
            "Opened Kafka session"
        );

        Ok(Session::new(
            KafkaProducer {
                producer,
                topic: topic.to_string(),
                timeout: self.settings.produce_timeout,
            },
            KafkaConsumer { consumer },
        ))
    }
}

/// Producer half of a Kafka session.
pub struct KafkaProducer {
    producer: BaseProducer,
    topic: String,
    timeout: Duration,
}

#[async_trait]
impl Producer for KafkaProducer {
    async fn produce(&mut self, batch: Vec<Message>) -> std::result::Result<(), ProduceError> {
        for message in &batch {
            let mut record: BaseRecord<'_, [u8], [u8]> =
                BaseRecord::to(&self.topic).payload(message.value.as_ref());
            if let Some(key) = &message.key {
                record = record.key(key.as_ref());
            }
            self.producer
                .send(record)
                .map_err(|(err, _record)| ProduceError::new(err.to_string()))?;
        }

        // The batch counts as written once librdkafka has delivered it.
        self.producer
            .flush(self.timeout)
            .map_err(|e| ProduceError::new(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.producer.flush(self.timeout) {
            warn!(topic = %self.topic, error = %e, "Flush on close failed");
        }
    }
}

/// Consumer half of a Kafka session.
pub struct KafkaConsumer {
    consumer: BaseConsumer,
}

#[async_trait]
impl Consumer for KafkaConsumer {
    #[allow(clippy::cast_sign_loss)] // Offsets of delivered messages are non-negative.
    async fn consume(
        &mut self,
        limit: u64,
        timeout: Duration,
    ) -> std::result::Result<Vec<Message>, ConsumeError> {
        let mut messages = Vec::new();
        let deadline = std::time::Instant::now() + timeout;

        while (messages.len() as u64) < limit {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match self.consumer.poll(remaining) {
                Some(Ok(msg)) => {
                    let mut message = Message::new(
                        msg.payload().map(Bytes::copy_from_slice).unwrap_or_default(),
                    )
                    .acknowledged(msg.topic(), msg.partition(), msg.offset() as u64);
                    message.key = msg.key().map(Bytes::copy_from_slice);
                    messages.push(message);
                }
                Some(Err(e)) => {
                    if messages.is_empty() {
                        return Err(ConsumeError::new(e.to_string()));
                    }
                    break;
                }
                None => {
                    // Nothing arrived before the deadline.
                    break;
                }
            }
        }

        Ok(messages)
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = KafkaSettings::default();
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.commit_interval, Duration::from_millis(700));
    }

    #[test]
    fn test_bootstrap_servers_joined() {
        let settings = KafkaSettings {
            brokers: vec!["a:9091".to_string(), "b:9092".to_string()],
            ..KafkaSettings::default()
        };
        assert_eq!(settings.bootstrap_servers(), "a:9091,b:9092");
    }
}
