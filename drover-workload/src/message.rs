//! Message model shared by the driver, brokers and validator.

use bytes::Bytes;

/// A broker message.
///
/// Messages built by the driver carry only a value (and optionally a key);
/// topic, partition and offset are filled in once the broker acknowledges
/// the write, so consumed messages always have them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional message key.
    pub key: Option<Bytes>,
    /// Serialized value.
    pub value: Bytes,
    /// Topic the message was written to (set on acknowledgement).
    pub topic: Option<String>,
    /// Partition the message landed in (set on acknowledgement).
    pub partition: Option<i32>,
    /// Offset within the partition (set on acknowledgement).
    pub offset: Option<u64>,
}

impl Message {
    /// Creates an unacknowledged message with the given value.
    #[must_use]
    pub const fn new(value: Bytes) -> Self {
        Self {
            key: None,
            value,
            topic: None,
            partition: None,
            offset: None,
        }
    }

    /// Returns the message with broker placement filled in.
    #[must_use]
    pub fn acknowledged(mut self, topic: impl Into<String>, partition: i32, offset: u64) -> Self {
        self.topic = Some(topic.into());
        self.partition = Some(partition);
        self.offset = Some(offset);
        self
    }

    /// Returns the topic name, if acknowledged.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }
}
