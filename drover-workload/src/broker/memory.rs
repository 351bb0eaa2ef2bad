//! Process-local broker.
//!
//! Topics are split into a fixed number of partitions; producers spread
//! messages across them round-robin and consumers of the same group share a
//! cursor per partition, so a message is delivered to exactly one member of
//! each group. Waiting consumers are woken whenever a batch is appended.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover_core::{ConsumeError, ProduceError, Result, WorkerId};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use super::{BrokerConnector, Consumer, Producer, Session};
use crate::message::Message;

/// Default consumer group for [`MemoryBroker::new`].
pub const DEFAULT_GROUP: &str = "drover-group";

/// Messages of one topic plus per-group read positions.
#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Vec<Message>>,
    next_partition: usize,
    cursors: HashMap<String, Vec<usize>>,
}

impl TopicLog {
    fn new(partition_count: usize) -> Self {
        Self {
            partitions: vec![Vec::new(); partition_count],
            next_partition: 0,
            cursors: HashMap::new(),
        }
    }

    #[allow(clippy::cast_possible_truncation)] // partition count is bounded by i32 at construction.
    #[allow(clippy::cast_possible_wrap)]
    fn append(&mut self, topic: &str, batch: Vec<Message>) {
        for message in batch {
            let partition = self.next_partition;
            let log = &mut self.partitions[partition];
            let offset = log.len() as u64;
            log.push(message.acknowledged(topic, partition as i32, offset));
            self.next_partition = (partition + 1) % self.partitions.len();
        }
    }

    /// Moves up to `limit` unread messages for `group` into `out`, one
    /// partition at a time in turns.
    fn take(&mut self, group: &str, limit: u64, out: &mut Vec<Message>) -> u64 {
        let partition_count = self.partitions.len();
        let cursors = self
            .cursors
            .entry(group.to_string())
            .or_insert_with(|| vec![0; partition_count]);

        let mut taken = 0u64;
        let mut progressed = true;
        while taken < limit && progressed {
            progressed = false;
            for (log, cursor) in self.partitions.iter().zip(cursors.iter_mut()) {
                if taken == limit {
                    break;
                }
                if let Some(message) = log.get(*cursor) {
                    out.push(message.clone());
                    *cursor += 1;
                    taken += 1;
                    progressed = true;
                }
            }
        }
        taken
    }

    fn len(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, TopicLog>,
    produce_faults: VecDeque<String>,
    consume_faults: VecDeque<String>,
    lost_writes: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    appended: Notify,
    partition_count: usize,
    open_clients: AtomicUsize,
}

impl Shared {
    fn release(&self) {
        self.open_clients.fetch_sub(1, Ordering::AcqRel);
    }
}

/// In-memory broker shared by all workers of a run.
///
/// Cloning is cheap and every clone sees the same topics.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
    group: String,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates a broker with single-partition topics.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Creates a broker whose topics have `partitions` partitions (at least 1).
    #[must_use]
    pub fn with_partitions(partitions: u16) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                appended: Notify::new(),
                partition_count: usize::from(partitions.max(1)),
                open_clients: AtomicUsize::new(0),
            }),
            group: DEFAULT_GROUP.to_string(),
        }
    }

    /// Returns a handle on the same broker whose consumers join `group`.
    #[must_use]
    pub fn with_group(&self, group: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            group: group.into(),
        }
    }

    /// Consumer group used by sessions from this handle.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Number of producers and consumers that have not been dropped.
    #[must_use]
    pub fn open_clients(&self) -> usize {
        self.shared.open_clients.load(Ordering::Acquire)
    }

    /// Makes the next produce call (from any worker) fail with `reason`.
    pub async fn inject_produce_fault(&self, reason: impl Into<String>) {
        self.shared
            .state
            .lock()
            .await
            .produce_faults
            .push_back(reason.into());
    }

    /// Makes the next consume call (from any worker) fail with `reason`.
    pub async fn inject_consume_fault(&self, reason: impl Into<String>) {
        self.shared
            .state
            .lock()
            .await
            .consume_faults
            .push_back(reason.into());
    }

    /// Acknowledges the next `count` produced messages (from any worker)
    /// without storing them.
    pub async fn inject_message_loss(&self, count: u64) {
        self.shared.state.lock().await.lost_writes += count;
    }

    /// Total number of messages ever written to `topic`.
    pub async fn message_count(&self, topic: &str) -> usize {
        self.shared
            .state
            .lock()
            .await
            .topics
            .get(topic)
            .map_or(0, TopicLog::len)
    }

    /// Snapshot of every message written to `topic`, partition by partition.
    pub async fn messages(&self, topic: &str) -> Vec<Message> {
        self.shared
            .state
            .lock()
            .await
            .topics
            .get(topic)
            .map(|log| log.partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    fn open(&self) -> Arc<Shared> {
        self.shared.open_clients.fetch_add(1, Ordering::AcqRel);
        Arc::clone(&self.shared)
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    type Producer = MemoryProducer;
    type Consumer = MemoryConsumer;

    async fn connect(
        &self,
        worker: WorkerId,
        topic: &str,
    ) -> Result<Session<MemoryProducer, MemoryConsumer>> {
        debug!(%worker, topic, group = %self.group, "Opening in-memory session");
        let producer = MemoryProducer {
            shared: self.open(),
            topic: topic.to_string(),
        };
        let consumer = MemoryConsumer {
            shared: self.open(),
            topic: topic.to_string(),
            group: self.group.clone(),
        };
        Ok(Session::new(producer, consumer))
    }
}

/// Producer half of an in-memory session.
#[derive(Debug)]
pub struct MemoryProducer {
    shared: Arc<Shared>,
    topic: String,
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn produce(&mut self, mut batch: Vec<Message>) -> std::result::Result<(), ProduceError> {
        {
            let mut state = self.shared.state.lock().await;
            if let Some(reason) = state.produce_faults.pop_front() {
                return Err(ProduceError::new(reason));
            }
            let lost = usize::try_from(state.lost_writes)
                .unwrap_or(usize::MAX)
                .min(batch.len());
            if lost > 0 {
                state.lost_writes -= lost as u64;
                batch.drain(..lost);
                debug!(topic = %self.topic, lost, "Dropped acknowledged messages");
            }
            let partition_count = self.shared.partition_count;
            let log = state
                .topics
                .entry(self.topic.clone())
                .or_insert_with(|| TopicLog::new(partition_count));
            log.append(&self.topic, batch);
        }
        self.shared.appended.notify_waiters();
        Ok(())
    }
}

impl Drop for MemoryProducer {
    fn drop(&mut self) {
        self.shared.release();
    }
}

/// Consumer half of an in-memory session.
#[derive(Debug)]
pub struct MemoryConsumer {
    shared: Arc<Shared>,
    topic: String,
    group: String,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn consume(
        &mut self,
        limit: u64,
        timeout: Duration,
    ) -> std::result::Result<Vec<Message>, ConsumeError> {
        let deadline = Instant::now() + timeout;
        let mut received = Vec::new();
        let mut taken = 0u64;

        loop {
            // Register for wakeups before looking, so an append between the
            // check and the wait is not missed.
            let appended = self.shared.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            {
                let mut state = self.shared.state.lock().await;
                if let Some(reason) = state.consume_faults.pop_front() {
                    return Err(ConsumeError::new(reason));
                }
                let partition_count = self.shared.partition_count;
                let log = state
                    .topics
                    .entry(self.topic.clone())
                    .or_insert_with(|| TopicLog::new(partition_count));
                taken += log.take(&self.group, limit - taken, &mut received);
            }

            if taken >= limit {
                break;
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                debug!(
                    topic = %self.topic,
                    group = %self.group,
                    requested = limit,
                    received = taken,
                    "Consume timed out"
                );
                break;
            }
        }

        Ok(received)
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.shared.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn batch(values: &[&'static str]) -> Vec<Message> {
        values
            .iter()
            .map(|v| Message::new(Bytes::from_static(v.as_bytes())))
            .collect()
    }

    #[tokio::test]
    async fn test_produce_assigns_offsets() {
        let broker = MemoryBroker::new();
        let mut session = broker.connect(WorkerId::FIRST, "t").await.unwrap();

        session.producer.produce(batch(&["a", "b", "c"])).await.unwrap();

        let messages = broker.messages("t").await;
        let offsets: Vec<_> = messages.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![Some(0), Some(1), Some(2)]);
        assert!(messages.iter().all(|m| m.topic() == Some("t")));
        session.close().await;
    }

    #[tokio::test]
    async fn test_round_robin_partitions() {
        let broker = MemoryBroker::with_partitions(2);
        let mut session = broker.connect(WorkerId::FIRST, "t").await.unwrap();

        session.producer.produce(batch(&["a", "b", "c", "d"])).await.unwrap();

        let messages = broker.messages("t").await;
        let placement: Vec<_> = messages.iter().map(|m| (m.partition, m.offset)).collect();
        assert_eq!(
            placement,
            vec![(Some(0), Some(0)), (Some(0), Some(1)), (Some(1), Some(0)), (Some(1), Some(1))]
        );
    }

    #[tokio::test]
    async fn test_consume_reads_partitions_in_turns() {
        let broker = MemoryBroker::with_partitions(2);
        let mut session = broker.connect(WorkerId::FIRST, "t").await.unwrap();

        session.producer.produce(batch(&["a", "b", "c", "d", "e"])).await.unwrap();

        let messages = session.consumer.consume(5, Duration::ZERO).await.unwrap();
        let values: Vec<&[u8]> = messages.iter().map(|m| m.value.as_ref()).collect();
        assert_eq!(values, vec![b"a" as &[u8], b"b", b"c", b"d", b"e"]);
        let partitions: Vec<_> = messages.iter().map(|m| m.partition).collect();
        assert_eq!(partitions, vec![Some(0), Some(1), Some(0), Some(1), Some(0)]);
    }

    #[tokio::test]
    async fn test_group_members_share_cursor() {
        let broker = MemoryBroker::new();
        let mut a = broker.connect(WorkerId::new(1), "t").await.unwrap();
        let mut b = broker.connect(WorkerId::new(2), "t").await.unwrap();

        a.producer.produce(batch(&["1", "2", "3", "4"])).await.unwrap();

        let first = a.consumer.consume(2, Duration::ZERO).await.unwrap();
        let second = b.consumer.consume(2, Duration::ZERO).await.unwrap();
        assert_eq!(first[0].value, Bytes::from_static(b"1"));
        assert_eq!(second[0].value, Bytes::from_static(b"3"));
    }

    #[tokio::test]
    async fn test_separate_groups_each_see_everything() {
        let broker = MemoryBroker::new();
        let other = broker.with_group("other");
        let mut a = broker.connect(WorkerId::new(1), "t").await.unwrap();
        let mut b = other.connect(WorkerId::new(2), "t").await.unwrap();

        a.producer.produce(batch(&["1", "2"])).await.unwrap();

        assert_eq!(a.consumer.consume(10, Duration::ZERO).await.unwrap().len(), 2);
        assert_eq!(b.consumer.consume(10, Duration::ZERO).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_times_out_with_partial_result() {
        let broker = MemoryBroker::new();
        let mut session = broker.connect(WorkerId::FIRST, "t").await.unwrap();
        session.producer.produce(batch(&["only"])).await.unwrap();

        let messages = session
            .consumer
            .consume(5, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_waits_for_late_producer() {
        let broker = MemoryBroker::new();
        let mut reader = broker.connect(WorkerId::new(2), "t").await.unwrap();
        let mut writer = broker.connect(WorkerId::new(1), "t").await.unwrap();

        let consume = tokio::spawn(async move {
            reader.consumer.consume(2, Duration::from_secs(30)).await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        writer.producer.produce(batch(&["x", "y"])).await.unwrap();

        let messages = consume.await.unwrap().unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let broker = MemoryBroker::new();
        let mut session = broker.connect(WorkerId::FIRST, "t").await.unwrap();

        broker.inject_produce_fault("leader not available").await;
        let err = session.producer.produce(batch(&["a"])).await.unwrap_err();
        assert_eq!(err.reason, "leader not available");
        // Fault is consumed by the first call.
        session.producer.produce(batch(&["a"])).await.unwrap();

        broker.inject_consume_fault("connection reset").await;
        let err = session.consumer.consume(1, Duration::ZERO).await.unwrap_err();
        assert_eq!(err.reason, "connection reset");
    }

    #[tokio::test]
    async fn test_injected_message_loss() {
        let broker = MemoryBroker::new();
        let mut session = broker.connect(WorkerId::FIRST, "t").await.unwrap();

        broker.inject_message_loss(3).await;
        session.producer.produce(batch(&["a", "b"])).await.unwrap();
        session.producer.produce(batch(&["c", "d", "e"])).await.unwrap();

        let messages = broker.messages("t").await;
        let values: Vec<&[u8]> = messages.iter().map(|m| m.value.as_ref()).collect();
        assert_eq!(values, vec![b"d" as &[u8], b"e"]);
        assert_eq!(messages[0].offset, Some(0));
    }

    #[tokio::test]
    async fn test_clients_released_on_drop() {
        let broker = MemoryBroker::new();
        let session = broker.connect(WorkerId::FIRST, "t").await.unwrap();
        assert_eq!(broker.open_clients(), 2);
        session.close().await;
        assert_eq!(broker.open_clients(), 0);

        let session = broker.connect(WorkerId::FIRST, "t").await.unwrap();
        drop(session);
        assert_eq!(broker.open_clients(), 0);
    }
}
