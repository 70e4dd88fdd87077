#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! In-process event broker for the Sonara platform.
//!
//! The broker provides named topics, keyed partitions with per-partition
//! FIFO delivery, consumer groups with competing consumers, and explicit
//! per-message acknowledgement. Delivery is at-least-once: a negative
//! acknowledgement (or dropping a delivery without settling it) returns the
//! message to the front of its partition for redelivery with an incremented
//! delivery count, which consumers use for bounded retry before forwarding
//! to a dead-letter topic.
//!
//! Subscription must precede publication: like a broker consuming from the
//! latest offset, messages published to a topic nobody has subscribed to are
//! dropped.

pub mod error;
pub mod payloads;
pub mod topics;

use std::collections::{HashMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::error;

pub use error::{BusResult, EventBusError};

/// Default partition count per topic.
const DEFAULT_PARTITIONS: usize = 16;

/// A message as it travels on the bus.
#[derive(Debug, Clone)]
pub struct Message {
    /// Fully qualified topic (environment prefix applied).
    pub topic: String,
    /// Partition key.
    pub key: String,
    /// Event type discriminator.
    pub event_type: String,
    /// Payload bytes, JSON in practice.
    pub payload: Vec<u8>,
    /// Broker-side publication instant.
    pub published_at: DateTime<Utc>,
    /// Broker-wide sequence number, for diagnostics.
    pub sequence: u64,
}

/// Capability to publish to the bus; the seam workers and the outbox are
/// tested through.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one message, qualified onto the environment's topic.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        event_type: &str,
        payload: Vec<u8>,
    ) -> BusResult<()>;
}

struct QueuedMessage {
    message: Arc<Message>,
    delivery_count: u32,
}

#[derive(Default)]
struct PartitionQueue {
    items: VecDeque<QueuedMessage>,
    in_flight: bool,
}

struct GroupState {
    name: String,
    partitions: Vec<Mutex<PartitionQueue>>,
    notify: Notify,
}

impl GroupState {
    fn new(name: String, partitions: usize) -> Self {
        Self {
            name,
            partitions: (0..partitions).map(|_| Mutex::new(PartitionQueue::default())).collect(),
            notify: Notify::new(),
        }
    }

    fn lock_partition(&self, index: usize) -> MutexGuard<'_, PartitionQueue> {
        match self.partitions[index].lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!(group = %self.name, "partition mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn depth(&self) -> usize {
        (0..self.partitions.len())
            .map(|index| self.lock_partition(index).items.len())
            .sum()
    }
}

struct BusInner {
    environment: String,
    partitions: usize,
    groups: Mutex<HashMap<String, Vec<Arc<GroupState>>>>,
    sequence: AtomicU64,
}

/// Shared in-process broker handle.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Construct a broker for the given environment tag.
    #[must_use]
    pub fn new(environment: impl Into<String>) -> Self {
        Self::with_partitions(environment, DEFAULT_PARTITIONS)
    }

    /// Construct a broker with an explicit partition count per topic.
    ///
    /// # Panics
    ///
    /// Panics if `partitions` is zero.
    #[must_use]
    pub fn with_partitions(environment: impl Into<String>, partitions: usize) -> Self {
        assert!(partitions > 0, "topic partition count must be positive");
        Self {
            inner: Arc::new(BusInner {
                environment: environment.into(),
                partitions,
                groups: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(1),
            }),
        }
    }

    /// The environment tag this broker qualifies topics with.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.inner.environment
    }

    /// Subscribe a consumer group to a topic, creating the group on first
    /// use. Consumers holding the same `(topic, group)` pair compete for
    /// messages; distinct groups each receive every message.
    #[must_use]
    pub fn subscribe(&self, topic: &str, group: &str) -> Consumer {
        let qualified = topics::qualified(&self.inner.environment, topic);
        let mut groups = self.lock_groups();
        let entries = groups.entry(qualified).or_default();
        let state = entries
            .iter()
            .find(|state| state.name == group)
            .cloned()
            .unwrap_or_else(|| {
                let state = Arc::new(GroupState::new(group.to_string(), self.inner.partitions));
                entries.push(Arc::clone(&state));
                state
            });
        Consumer { group: state }
    }

    /// Undelivered message count for a consumer group, for gauges.
    #[must_use]
    pub fn queue_depth(&self, topic: &str, group: &str) -> usize {
        let qualified = topics::qualified(&self.inner.environment, topic);
        let groups = self.lock_groups();
        groups
            .get(&qualified)
            .and_then(|entries| entries.iter().find(|state| state.name == group))
            .map_or(0, |state| state.depth())
    }

    fn publish_message(&self, topic: &str, key: &str, event_type: &str, payload: Vec<u8>) {
        let qualified = topics::qualified(&self.inner.environment, topic);
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let message = Arc::new(Message {
            topic: qualified.clone(),
            key: key.to_string(),
            event_type: event_type.to_string(),
            payload,
            published_at: Utc::now(),
            sequence,
        });

        let partition = partition_for(key, self.inner.partitions);
        let groups = self.lock_groups();
        let Some(entries) = groups.get(&qualified) else {
            return;
        };
        for state in entries {
            let mut queue = state.lock_partition(partition);
            queue.items.push_back(QueuedMessage {
                message: Arc::clone(&message),
                delivery_count: 0,
            });
            drop(queue);
            state.notify.notify_waiters();
        }
    }

    fn lock_groups(&self) -> MutexGuard<'_, HashMap<String, Vec<Arc<GroupState>>>> {
        match self.inner.groups.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("bus group registry mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl Publisher for EventBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        event_type: &str,
        payload: Vec<u8>,
    ) -> BusResult<()> {
        self.publish_message(topic, key, event_type, payload);
        Ok(())
    }
}

fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    usize::try_from(hasher.finish() % partitions as u64).unwrap_or(0)
}

/// A member of a consumer group.
pub struct Consumer {
    group: Arc<GroupState>,
}

impl Consumer {
    /// Receive the next available message, waiting until one arrives.
    ///
    /// A partition delivers at most one message at a time; the next message
    /// on that partition becomes available only after the current delivery
    /// is settled, preserving per-key order.
    pub async fn recv(&self) -> Delivery {
        loop {
            let notified = self.group.notify.notified();
            tokio::pin!(notified);
            // Register interest before scanning, or a publication landing
            // between the scan and the await is lost.
            notified.as_mut().enable();
            if let Some(delivery) = self.try_claim() {
                return delivery;
            }
            notified.await;
        }
    }

    /// Claim a message if one is immediately available.
    #[must_use]
    pub fn try_claim(&self) -> Option<Delivery> {
        for index in 0..self.group.partitions.len() {
            let mut queue = self.group.lock_partition(index);
            if queue.in_flight {
                continue;
            }
            if let Some(front) = queue.items.front_mut() {
                front.delivery_count += 1;
                let message = Arc::clone(&front.message);
                let delivery_count = front.delivery_count;
                queue.in_flight = true;
                return Some(Delivery {
                    message,
                    delivery_count,
                    group: Arc::clone(&self.group),
                    partition: index,
                    settled: false,
                });
            }
        }
        None
    }
}

/// One in-flight message handed to a consumer.
///
/// Dropping a delivery without settling it counts as a negative
/// acknowledgement, so a crashed handler never wedges its partition.
pub struct Delivery {
    /// The claimed message.
    pub message: Arc<Message>,
    /// Deliveries of this message so far, including this one.
    pub delivery_count: u32,
    group: Arc<GroupState>,
    partition: usize,
    settled: bool,
}

impl Delivery {
    /// Settle positively: the message is removed and the partition advances.
    pub fn ack(mut self) {
        let mut queue = self.group.lock_partition(self.partition);
        queue.items.pop_front();
        queue.in_flight = false;
        drop(queue);
        self.settled = true;
        self.group.notify.notify_waiters();
    }

    /// Settle negatively: the message stays at the front for redelivery.
    pub fn nack(mut self) {
        self.release();
        self.settled = true;
    }

    fn release(&self) {
        let mut queue = self.group.lock_partition(self.partition);
        queue.in_flight = false;
        drop(queue);
        self.group.notify.notify_waiters();
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    async fn next(consumer: &Consumer) -> Delivery {
        timeout(RECV_TIMEOUT, consumer.recv())
            .await
            .expect("consumer stalled")
    }

    #[tokio::test]
    async fn per_key_order_is_preserved() -> anyhow::Result<()> {
        let bus = EventBus::new("test");
        let consumer = bus.subscribe(topics::AUDIO_EVENTS, "analyzer");
        for index in 0..3u8 {
            bus.publish(topics::AUDIO_EVENTS, "track-1", "analysis", vec![index])
                .await?;
        }

        for expected in 0..3u8 {
            let delivery = next(&consumer).await;
            assert_eq!(delivery.message.payload, vec![expected]);
            delivery.ack();
        }
        Ok(())
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_count() -> anyhow::Result<()> {
        let bus = EventBus::new("test");
        let consumer = bus.subscribe(topics::AUDIO_EVENTS, "analyzer");
        bus.publish(topics::AUDIO_EVENTS, "track-1", "analysis", b"x".to_vec())
            .await?;

        let first = next(&consumer).await;
        assert_eq!(first.delivery_count, 1);
        first.nack();

        let second = next(&consumer).await;
        assert_eq!(second.delivery_count, 2);
        assert_eq!(second.message.payload, b"x".to_vec());
        second.ack();
        Ok(())
    }

    #[tokio::test]
    async fn dropped_delivery_is_redelivered() -> anyhow::Result<()> {
        let bus = EventBus::new("test");
        let consumer = bus.subscribe(topics::AUDIO_EVENTS, "analyzer");
        bus.publish(topics::AUDIO_EVENTS, "track-1", "analysis", b"x".to_vec())
            .await?;

        drop(next(&consumer).await);
        let redelivered = next(&consumer).await;
        assert_eq!(redelivered.delivery_count, 2);
        redelivered.ack();
        Ok(())
    }

    #[tokio::test]
    async fn groups_each_receive_every_message() -> anyhow::Result<()> {
        let bus = EventBus::new("test");
        let ingest = bus.subscribe(topics::MINIO_EVENTS, "ingestor");
        let mirror = bus.subscribe(topics::MINIO_EVENTS, "mirror");
        bus.publish(topics::MINIO_EVENTS, "audio/u/t/s", "object_created", b"{}".to_vec())
            .await?;

        next(&ingest).await.ack();
        next(&mirror).await.ack();
        Ok(())
    }

    #[tokio::test]
    async fn competing_consumers_share_one_copy() -> anyhow::Result<()> {
        let bus = EventBus::new("test");
        let left = bus.subscribe(topics::AUDIO_EVENTS, "analyzer");
        let right = bus.subscribe(topics::AUDIO_EVENTS, "analyzer");
        bus.publish(topics::AUDIO_EVENTS, "track-1", "analysis", b"x".to_vec())
            .await?;

        let claimed = next(&left).await;
        assert!(right.try_claim().is_none(), "same group shares the queue");
        claimed.ack();
        assert_eq!(bus.queue_depth(topics::AUDIO_EVENTS, "analyzer"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn unsubscribed_topics_drop_messages() -> anyhow::Result<()> {
        let bus = EventBus::new("test");
        bus.publish(topics::TRACK_DELETIONS, "track-1", "deletion", b"{}".to_vec())
            .await?;
        let consumer = bus.subscribe(topics::TRACK_DELETIONS, "late");
        assert!(consumer.try_claim().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn queue_depth_counts_undelivered_messages() -> anyhow::Result<()> {
        let bus = EventBus::new("test");
        let _consumer = bus.subscribe(topics::AUDIO_EVENTS, "analyzer");
        for index in 0..4u8 {
            bus.publish(topics::AUDIO_EVENTS, "track", "analysis", vec![index])
                .await?;
        }
        assert_eq!(bus.queue_depth(topics::AUDIO_EVENTS, "analyzer"), 4);
        Ok(())
    }
}
