//! Queue consumer: decode, persist, then ack.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{error, info, instrument, warn};

use intake_core::RecordId;
use intake_events::{BusError, Delivery, IngestionMessage, MessageBus, Subscription};

use crate::gateway::EntityGateway;
use crate::workers::WorkerHandle;

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Saved and acknowledged.
    Persisted(RecordId),
    /// Save failed; released back to the broker unacknowledged.
    PersistFailed(String),
    /// Payload could not be decoded (or was for another record family); dead-lettered.
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("failed to spawn consumer thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Consumer runtime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub persisted: u64,
    pub persist_failed: u64,
    pub malformed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    persisted: AtomicU64,
    persist_failed: AtomicU64,
    malformed: AtomicU64,
}

/// Drains ingestion messages into an entity gateway.
///
/// Each delivery is handled on its own: a bad payload or a failed save never
/// stops the consumer. Saves are not deduplicated, so a redelivered message
/// produces a second record.
#[derive(Clone)]
pub struct IngestionConsumer {
    bus: Arc<dyn MessageBus<String>>,
    gateway: Arc<dyn EntityGateway>,
    counters: Arc<Counters>,
}

impl core::fmt::Debug for IngestionConsumer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IngestionConsumer")
            .field("kind", &self.gateway.kind())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl IngestionConsumer {
    pub fn new(bus: Arc<dyn MessageBus<String>>, gateway: Arc<dyn EntityGateway>) -> Self {
        Self {
            bus,
            gateway,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            persist_failed: self.counters.persist_failed.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
        }
    }

    #[instrument(skip_all, fields(kind = %self.gateway.kind(), tag = %delivery.tag, attempt = delivery.attempt))]
    pub async fn process(&self, delivery: Delivery<String>) -> DeliveryOutcome {
        let message = match IngestionMessage::decode(&delivery.payload) {
            Ok(m) if m.kind() == self.gateway.kind() => m,
            Ok(m) => {
                return self.reject(&delivery, format!("message is for kind `{}`", m.kind()));
            }
            Err(e) => return self.reject(&delivery, e.to_string()),
        };
        let message_id = message.message_id();

        match self.gateway.save(message.into_entity()).await {
            Ok(id) => {
                self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                info!(%message_id, %id, "persisted queued record");
                if let Err(e) = self.bus.ack(&delivery.tag) {
                    // Saved already; a redelivery will store it a second time.
                    warn!(%message_id, error = %e, "failed to ack persisted delivery");
                }
                DeliveryOutcome::Persisted(id)
            }
            Err(e) => {
                self.counters.persist_failed.fetch_add(1, Ordering::Relaxed);
                error!(%message_id, error = %e, "failed to persist queued record; releasing unacked");
                if let Err(bus_err) = self.bus.release(&delivery.tag) {
                    warn!(%message_id, error = %bus_err, "failed to release delivery");
                }
                DeliveryOutcome::PersistFailed(e.to_string())
            }
        }
    }

    fn reject(&self, delivery: &Delivery<String>, reason: String) -> DeliveryOutcome {
        self.counters.malformed.fetch_add(1, Ordering::Relaxed);
        warn!(reason = %reason, "dropping malformed delivery");
        if let Err(e) = self.bus.dead_letter(&delivery.tag, &reason) {
            warn!(error = %e, "failed to dead-letter malformed delivery");
        }
        DeliveryOutcome::Malformed(reason)
    }

    /// Subscribe and run on a dedicated thread until shut down or the bus goes away.
    ///
    /// `runtime` drives the async gateway calls; it must outlive the worker.
    pub fn spawn(&self, name: impl Into<String>, runtime: Handle) -> Result<WorkerHandle, SpawnError> {
        let name = name.into();
        let sub = self.bus.subscribe()?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let consumer = self.clone();
        let thread_name = name.clone();

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || consumer.run(&thread_name, sub, shutdown_rx, runtime))?;

        Ok(WorkerHandle::new(name, shutdown_tx, join))
    }

    fn run(&self, name: &str, sub: Subscription<String>, shutdown_rx: mpsc::Receiver<()>, runtime: Handle) {
        let tick = Duration::from_millis(250);
        info!(worker = name, kind = %self.gateway.kind(), "ingestion consumer started");

        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            match sub.recv_timeout(tick) {
                Ok(delivery) => {
                    runtime.block_on(self.process(delivery));
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(worker = name, "subscription closed");
                    break;
                }
            }
        }

        info!(worker = name, stats = ?self.stats(), "ingestion consumer stopped");
    }
}
