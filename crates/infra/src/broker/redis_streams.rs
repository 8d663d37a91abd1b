//! Redis Streams-backed message bus (durable, at-least-once delivery).
//!
//! - **Stream**: one per service, e.g. `intake:investor`
//! - **Consumer group**: one per service, e.g. `investor.saver`; every
//!   subscription is a named consumer in that group, so consumers compete
//! - **Prefetch**: each subscription buffers at most `batch_size` entries;
//!   the poller stops reading while its consumer is behind, leaving the rest of
//!   the stream to competing consumers
//! - **Redelivery**: entries left unacked for `reclaim_idle` are claimed by
//!   whichever consumer polls next, except entries this process still holds
//!   (buffered or being processed)
//! - **Dead-letter stream**: `<stream>:dlq`, fed by explicit dead-lettering and
//!   by entries that exceed `max_deliveries`

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use redis::Commands;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingId, StreamRangeReply,
    StreamReadOptions, StreamReadReply,
};
use tracing::{debug, error, instrument, warn};

use intake_events::{BusError, Delivery, DeliveryTag, MessageBus, Subscription};

const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    pub stream_key: String,
    pub group: String,
    pub dlq_key: String,
    /// Deliveries after which an entry is parked instead of redelivered.
    pub max_deliveries: u32,
    pub reclaim_idle: Duration,
    pub connect_timeout: Duration,
    /// How long one XREADGROUP call blocks waiting for new entries.
    pub block: Duration,
    /// Entries per read, and the size of each subscription's buffer.
    pub batch_size: usize,
}

impl RedisStreamsConfig {
    pub fn new(stream_key: impl Into<String>, group: impl Into<String>) -> Self {
        let stream_key = stream_key.into();
        Self {
            dlq_key: format!("{stream_key}:dlq"),
            stream_key,
            group: group.into(),
            max_deliveries: 5,
            reclaim_idle: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(2),
            block: Duration::from_millis(250),
            batch_size: 10,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),
}

impl From<RedisStreamsError> for BusError {
    fn from(e: RedisStreamsError) -> Self {
        BusError::Unavailable(e.to_string())
    }
}

/// Pending entries split by what the poller should do with them.
#[derive(Debug, Default, PartialEq, Eq)]
struct ReclaimPlan {
    dead_letter: Vec<String>,
    /// Entry ids with the attempt number their redelivery will carry.
    claim: Vec<(String, u32)>,
}

/// Message bus over one Redis stream and one consumer group.
///
/// Payloads are opaque strings stored in a single `payload` field. Every
/// call opens its own connection; subscriptions keep one per polling thread.
#[derive(Debug, Clone)]
pub struct RedisStreamsBus {
    client: Arc<redis::Client>,
    config: Arc<RedisStreamsConfig>,
    closed: Arc<AtomicBool>,
    /// Entry ids handed to a local subscription and not yet settled.
    held: Arc<Mutex<HashSet<String>>>,
}

impl RedisStreamsBus {
    pub fn new(redis_url: impl AsRef<str>, config: RedisStreamsConfig) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            config: Arc::new(config),
            closed: Arc::new(AtomicBool::new(false)),
            held: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn config(&self) -> &RedisStreamsConfig {
        &self.config
    }

    /// Stop polling threads; later publishes fail with `BusError::Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn hold(&self, id: &str) {
        if let Ok(mut held) = self.held.lock() {
            held.insert(id.to_string());
        }
    }

    fn unhold(&self, id: &str) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(id);
        }
    }

    fn held_ids(&self) -> HashSet<String> {
        self.held.lock().map(|h| h.clone()).unwrap_or_default()
    }

    fn connection(&self) -> Result<redis::Connection, RedisStreamsError> {
        self.client
            .get_connection_with_timeout(self.config.connect_timeout)
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// Create the consumer group (and the stream) if missing.
    pub fn ensure_consumer_group(&self) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;
        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(&self.config.stream_key, &self.config.group, "0");

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::ConsumerGroup(e.to_string())),
        }
    }

    #[instrument(skip_all, fields(stream_key = %self.config.stream_key), err)]
    fn publish_sync(&self, payload: &str) -> Result<String, RedisStreamsError> {
        let mut conn = self.connection()?;
        conn.xadd(&self.config.stream_key, "*", &[(PAYLOAD_FIELD, payload)])
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))
    }

    fn ack_sync(&self, conn: &mut redis::Connection, id: &str) -> Result<(), RedisStreamsError> {
        let _: u64 = conn
            .xack(&self.config.stream_key, &self.config.group, &[id])
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;
        self.unhold(id);
        Ok(())
    }

    /// Copy an entry into the DLQ stream with its reason, then ack it.
    fn dead_letter_sync(
        &self,
        conn: &mut redis::Connection,
        id: &str,
        reason: &str,
    ) -> Result<(), RedisStreamsError> {
        let range: StreamRangeReply = conn
            .xrange(&self.config.stream_key, id, id)
            .map_err(|e| RedisStreamsError::Command(format!("XRANGE failed: {e}")))?;
        let payload: String = range
            .ids
            .first()
            .and_then(|entry| entry.get(PAYLOAD_FIELD))
            .unwrap_or_default();
        let failed_at = chrono::Utc::now().to_rfc3339();

        let _: String = conn
            .xadd(
                &self.config.dlq_key,
                "*",
                &[
                    ("original_message_id", id),
                    ("reason", reason),
                    ("failed_at", failed_at.as_str()),
                    (PAYLOAD_FIELD, payload.as_str()),
                ],
            )
            .map_err(|e| RedisStreamsError::Command(format!("DLQ XADD failed: {e}")))?;

        self.ack_sync(conn, id)?;
        warn!(message_id = %id, reason, dlq = %self.config.dlq_key, "message sent to dead-letter queue");
        Ok(())
    }

    /// Decide what to do with idle pending entries.
    ///
    /// Entries this process still holds are skipped: they are buffered or in
    /// the middle of being processed, so claiming them would hand out a second
    /// copy. Everything else past `reclaim_idle` is either claimed or, once it
    /// has been delivered `max_deliveries` times, dead-lettered.
    fn plan_reclaim(&self, pending: Vec<StreamPendingId>, held: &HashSet<String>) -> ReclaimPlan {
        let idle_ms = self.config.reclaim_idle.as_millis() as usize;
        let mut plan = ReclaimPlan::default();

        for entry in pending {
            if entry.last_delivered_ms < idle_ms || held.contains(&entry.id) {
                continue;
            }
            if entry.times_delivered >= self.config.max_deliveries as usize {
                plan.dead_letter.push(entry.id);
            } else {
                plan.claim.push((entry.id, entry.times_delivered as u32 + 1));
            }
        }
        plan
    }

    /// Claim entries left idle for too long by any consumer of the group.
    fn reclaim_sync(
        &self,
        conn: &mut redis::Connection,
        consumer: &str,
    ) -> Result<Vec<Delivery<String>>, RedisStreamsError> {
        let pending: StreamPendingCountReply = conn
            .xpending_count(
                &self.config.stream_key,
                &self.config.group,
                "-",
                "+",
                self.config.batch_size,
            )
            .map_err(|e| RedisStreamsError::Command(format!("XPENDING failed: {e}")))?;

        let plan = self.plan_reclaim(pending.ids, &self.held_ids());

        let reason = format!("exceeded {} deliveries", self.config.max_deliveries);
        for id in &plan.dead_letter {
            self.dead_letter_sync(conn, id, &reason)?;
        }
        if plan.claim.is_empty() {
            return Ok(Vec::new());
        }

        let attempts: HashMap<String, u32> = plan.claim.into_iter().collect();
        let ids: Vec<&String> = attempts.keys().collect();
        let claimed: StreamClaimReply = conn
            .xclaim(
                &self.config.stream_key,
                &self.config.group,
                consumer,
                self.config.reclaim_idle.as_millis() as usize,
                &ids,
            )
            .map_err(|e| RedisStreamsError::Command(format!("XCLAIM failed: {e}")))?;

        Ok(claimed
            .ids
            .into_iter()
            .filter_map(|entry| {
                let attempt = attempts.get(&entry.id).copied().unwrap_or(2);
                to_delivery(entry).map(|d| d.with_attempt(attempt))
            })
            .collect())
    }

    fn read_new_sync(
        &self,
        conn: &mut redis::Connection,
        consumer: &str,
    ) -> Result<Vec<Delivery<String>>, RedisStreamsError> {
        let opts = StreamReadOptions::default()
            .group(&self.config.group, consumer)
            .count(self.config.batch_size)
            .block(self.config.block.as_millis() as usize);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.config.stream_key], &[">"], &opts)
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        Ok(reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .filter_map(to_delivery)
            .collect())
    }

    fn poll_loop(&self, consumer: String, tx: mpsc::SyncSender<Delivery<String>>) {
        let mut conn: Option<redis::Connection> = None;

        while !self.closed.load(Ordering::SeqCst) {
            if conn.is_none() {
                match self.connection() {
                    Ok(c) => conn = Some(c),
                    Err(e) => {
                        error!(consumer = %consumer, error = %e, "stream consumer cannot connect; retrying");
                        thread::sleep(Duration::from_secs(1));
                        continue;
                    }
                }
            }
            let Some(c) = conn.as_mut() else {
                continue;
            };

            let batch = match self.reclaim_sync(c, &consumer) {
                Ok(reclaimed) if !reclaimed.is_empty() => Ok(reclaimed),
                Ok(_) => self.read_new_sync(c, &consumer),
                Err(e) => Err(e),
            };

            match batch {
                Ok(deliveries) => {
                    for delivery in deliveries {
                        let id = delivery.tag.as_str().to_string();
                        self.hold(&id);
                        // Blocks while the subscription buffer is full.
                        if tx.send(delivery).is_err() {
                            self.unhold(&id);
                            debug!(consumer = %consumer, "subscription dropped; stopping poller");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!(consumer = %consumer, error = %e, "failed to read from stream");
                    conn = None;
                    thread::sleep(Duration::from_millis(500));
                }
            }
        }
    }
}

fn to_delivery(entry: StreamId) -> Option<Delivery<String>> {
    match entry.get::<String>(PAYLOAD_FIELD) {
        Some(payload) => Some(Delivery::new(DeliveryTag::new(entry.id), payload)),
        None => {
            // Deleted or foreign entry; nothing to hand over.
            warn!(message_id = %entry.id, "stream entry without payload skipped");
            None
        }
    }
}

impl MessageBus<String> for RedisStreamsBus {
    fn publish(&self, message: String) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        self.publish_sync(&message)?;
        Ok(())
    }

    fn subscribe(&self) -> Result<Subscription<String>, BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        self.ensure_consumer_group()?;

        let consumer = format!("consumer-{}", uuid::Uuid::now_v7());
        let (tx, rx) = mpsc::sync_channel(self.config.batch_size.max(1));
        let bus = self.clone();

        thread::Builder::new()
            .name(format!("{}-poller", self.config.group))
            .spawn(move || bus.poll_loop(consumer, tx))
            .map_err(|e| BusError::Unavailable(format!("failed to spawn stream poller: {e}")))?;

        Ok(Subscription::new(rx))
    }

    fn ack(&self, tag: &DeliveryTag) -> Result<(), BusError> {
        let mut conn = self.connection()?;
        self.ack_sync(&mut conn, tag.as_str())?;
        Ok(())
    }

    fn dead_letter(&self, tag: &DeliveryTag, reason: &str) -> Result<(), BusError> {
        let mut conn = self.connection()?;
        self.dead_letter_sync(&mut conn, tag.as_str(), reason)?;
        Ok(())
    }

    /// The entry stays pending in the group; once idle past `reclaim_idle` any
    /// consumer, this one included, may claim it again.
    fn release(&self, tag: &DeliveryTag) -> Result<(), BusError> {
        self.unhold(tag.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_key_follows_stream_key() {
        let cfg = RedisStreamsConfig::new("intake:client", "client.saver");
        assert_eq!(cfg.dlq_key, "intake:client:dlq");
        assert_eq!(cfg.group, "client.saver");
        assert_eq!(cfg.max_deliveries, 5);
    }

    fn bus(config: RedisStreamsConfig) -> RedisStreamsBus {
        RedisStreamsBus::new("redis://127.0.0.1:1", config).unwrap()
    }

    fn pending(id: &str, idle_ms: usize, times_delivered: usize) -> StreamPendingId {
        StreamPendingId {
            id: id.to_string(),
            consumer: "consumer-a".to_string(),
            last_delivered_ms: idle_ms,
            times_delivered,
        }
    }

    #[test]
    fn reclaim_skips_fresh_and_locally_held_entries() {
        let bus = bus(RedisStreamsConfig::new("intake:test", "test.saver"));
        let held: HashSet<String> = ["1-0".to_string()].into();

        let plan = bus.plan_reclaim(
            vec![
                // Still buffered here: another copy would be persisted twice.
                pending("1-0", 120_000, 4),
                pending("2-0", 1_000, 1),
                pending("3-0", 60_000, 2),
                pending("4-0", 90_000, 5),
            ],
            &held,
        );

        assert_eq!(
            plan,
            ReclaimPlan {
                dead_letter: vec!["4-0".to_string()],
                claim: vec![("3-0".to_string(), 3)],
            }
        );
    }

    #[test]
    fn released_entries_become_reclaimable() {
        let bus = bus(RedisStreamsConfig::new("intake:test", "test.saver"));
        bus.hold("7-0");
        assert!(bus.plan_reclaim(vec![pending("7-0", 61_000, 1)], &bus.held_ids()).claim.is_empty());

        bus.release(&DeliveryTag::new("7-0")).unwrap();
        let plan = bus.plan_reclaim(vec![pending("7-0", 61_000, 1)], &bus.held_ids());
        assert_eq!(plan.claim, vec![("7-0".to_string(), 2)]);
    }

    #[test]
    fn closed_bus_refuses_publish_without_touching_redis() {
        let bus = RedisStreamsBus::new(
            "redis://127.0.0.1:1",
            RedisStreamsConfig::new("intake:test", "test.saver"),
        )
        .unwrap();
        bus.close();

        assert_eq!(bus.publish("{}".to_string()), Err(BusError::Closed));
        assert!(matches!(bus.subscribe(), Err(BusError::Closed)));
    }

    #[test]
    fn unreachable_redis_is_reported_as_unavailable() {
        let mut cfg = RedisStreamsConfig::new("intake:test", "test.saver");
        cfg.connect_timeout = Duration::from_millis(200);
        let bus = RedisStreamsBus::new("redis://127.0.0.1:1", cfg).unwrap();

        assert!(matches!(
            bus.publish("{}".to_string()),
            Err(BusError::Unavailable(_))
        ));
    }
}
