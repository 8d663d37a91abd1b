use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use intake_core::{EntityDraft, EntityKind};

/// Wire form of a write intent placed on the broker.
///
/// Notes:
/// - Carries **no record id**; the store assigns one when the consumer saves.
/// - `message_id` is for log correlation only. Two submissions of the same
///   draft are two messages and will be persisted twice.
/// - JSON field order follows the struct, so encoding is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionMessage {
    message_id: Uuid,
    kind: EntityKind,
    published_at: DateTime<Utc>,
    entity: EntityDraft,
}

#[derive(Debug, Error)]
pub enum MessageDecodeError {
    #[error("payload is not a valid ingestion message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl IngestionMessage {
    pub fn new(kind: EntityKind, entity: EntityDraft, published_at: DateTime<Utc>) -> Self {
        Self {
            message_id: Uuid::now_v7(),
            kind,
            published_at,
            entity,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn entity(&self) -> &EntityDraft {
        &self.entity
    }

    pub fn into_entity(self) -> EntityDraft {
        self.entity
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, MessageDecodeError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoded_message_rebuilds_an_equal_draft() {
        let msg = IngestionMessage::new(EntityKind::Investor, EntityDraft::new("Jane", "abc"), Utc::now());
        let raw = msg.encode().unwrap();

        assert!(!raw.contains("\"id\""));
        let back = IngestionMessage::decode(&raw).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.into_entity(), EntityDraft::new("Jane", "abc"));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(IngestionMessage::decode("{not json").is_err());
        assert!(IngestionMessage::decode(r#"{"kind":"investor"}"#).is_err());
        assert!(IngestionMessage::decode(r#"{"message_id":"0191d3c2-7b7e-7cc0-9d2a-6f1e1d1f0a01","kind":"supplier","published_at":"2024-01-01T00:00:00Z","entity":{"name":"a","cert":"b"}}"#).is_err());
    }
}
