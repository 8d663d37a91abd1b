use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use intake_core::{EntityDraft, EntityKind};
use intake_events::{IngestionMessage, MessageBus};

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Broker refused, was unreachable, or did not answer in time.
    ///
    /// After a timeout the message may still land; a retry can duplicate it.
    #[error("message broker unavailable: {0}")]
    BrokerUnavailable(String),
}

/// Encodes submitted records and hands them to the broker.
///
/// Success means the broker accepted the message, not that it was saved.
#[derive(Clone)]
pub struct IngestionProducer {
    bus: Arc<dyn MessageBus<String>>,
    kind: EntityKind,
    publish_timeout: Duration,
}

impl core::fmt::Debug for IngestionProducer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IngestionProducer")
            .field("kind", &self.kind)
            .field("publish_timeout", &self.publish_timeout)
            .finish_non_exhaustive()
    }
}

impl IngestionProducer {
    pub fn new(bus: Arc<dyn MessageBus<String>>, kind: EntityKind) -> Self {
        Self {
            bus,
            kind,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Publish one record; returns the message id used for log correlation.
    #[instrument(skip_all, fields(kind = %self.kind))]
    pub async fn submit(&self, draft: EntityDraft) -> Result<Uuid, SubmitError> {
        let message = IngestionMessage::new(self.kind, draft, Utc::now());
        let message_id = message.message_id();
        let payload = message
            .encode()
            .map_err(|e| SubmitError::BrokerUnavailable(format!("failed to encode message: {e}")))?;

        // Brokers are blocking; keep them off the async workers.
        let bus = self.bus.clone();
        let publish = tokio::task::spawn_blocking(move || bus.publish(payload));

        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(Ok(()))) => {
                info!(%message_id, name = %message.entity().name, "submitted record to queue");
                Ok(message_id)
            }
            Ok(Ok(Err(e))) => {
                warn!(%message_id, error = %e, "broker rejected message");
                Err(SubmitError::BrokerUnavailable(e.to_string()))
            }
            Ok(Err(join_err)) => {
                warn!(%message_id, error = %join_err, "publish task failed");
                Err(SubmitError::BrokerUnavailable(join_err.to_string()))
            }
            Err(_) => {
                warn!(%message_id, timeout_ms = self.publish_timeout.as_millis() as u64, "publish timed out");
                Err(SubmitError::BrokerUnavailable(format!(
                    "no answer within {} ms",
                    self.publish_timeout.as_millis()
                )))
            }
        }
    }
}
