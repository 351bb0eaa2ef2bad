//! Broker capabilities.
//!
//! The harness never talks to a broker directly. Each worker receives its own
//! [`Session`] (one producer, one consumer) from a [`BrokerConnector`] and
//! gives it back when the iteration ends, successfully or not.
//!
//! Implementations:
//! - [`MemoryBroker`]: process-local, used by tests and the simulated CLI mode
//! - `KafkaConnector` (feature `kafka`): a real cluster via librdkafka

use std::time::Duration;

use async_trait::async_trait;
use drover_core::{ConsumeError, ProduceError, Result, WorkerId};

use crate::message::Message;

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use memory::{MemoryBroker, MemoryConsumer, MemoryProducer};

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConnector, KafkaConsumer, KafkaProducer, KafkaSettings};

/// Writes batches of messages to a topic.
#[async_trait]
pub trait Producer: Send {
    /// Writes one batch. Returns once the broker has acknowledged it.
    ///
    /// Implementations may retry internally; the harness never does.
    async fn produce(&mut self, batch: Vec<Message>) -> std::result::Result<(), ProduceError>;

    /// Flushes and releases the producer.
    async fn close(&mut self) {}
}

/// Reads messages from a topic as a member of a consumer group.
#[async_trait]
pub trait Consumer: Send {
    /// Returns up to `limit` messages, waiting at most `timeout` for them.
    ///
    /// A short (or empty) result on timeout is not an error.
    async fn consume(
        &mut self,
        limit: u64,
        timeout: Duration,
    ) -> std::result::Result<Vec<Message>, ConsumeError>;

    /// Leaves the group and releases the consumer.
    async fn close(&mut self) {}
}

/// Hands out per-worker broker sessions.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Producer type handed to workers.
    type Producer: Producer + 'static;
    /// Consumer type handed to workers.
    type Consumer: Consumer + 'static;

    /// Opens a fresh session for `worker` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connect` if the clients cannot be created.
    async fn connect(
        &self,
        worker: WorkerId,
        topic: &str,
    ) -> Result<Session<Self::Producer, Self::Consumer>>;
}

/// A worker's exclusive producer/consumer pair for one iteration.
///
/// Call [`Session::close`] on every exit path. If the owning future is
/// dropped instead (run aborted), the clients are released by their own
/// `Drop` impls.
pub struct Session<P, C> {
    /// The worker's producer.
    pub producer: P,
    /// The worker's consumer.
    pub consumer: C,
}

impl<P: Producer, C: Consumer> Session<P, C> {
    /// Creates a session from its two halves.
    pub const fn new(producer: P, consumer: C) -> Self {
        Self { producer, consumer }
    }

    /// Closes the producer, then the consumer.
    pub async fn close(mut self) {
        self.producer.close().await;
        self.consumer.close().await;
    }
}
