//! Persistence gateways: where ingested records end up.
//!
//! One trait, one backend per deployment. The relational backend assigns
//! numeric ids, the key-value backend assigns UUID strings; callers never
//! depend on which.

pub mod in_memory;
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;

use thiserror::Error;

use intake_core::{Entity, EntityDraft, EntityKind, RecordId};

pub use in_memory::InMemoryEntityGateway;
pub use postgres::PostgresEntityGateway;
#[cfg(feature = "redis")]
pub use self::redis::RedisEntityGateway;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Connection, query or row decoding failure in the backing store.
    #[error("persistence backend error: {0}")]
    Backend(String),
}

/// Storage contract for investor / client records.
#[async_trait::async_trait]
pub trait EntityGateway: Send + Sync {
    /// Record family this gateway stores.
    fn kind(&self) -> EntityKind;

    /// Persist a new record and return the id the store assigned.
    async fn save(&self, draft: EntityDraft) -> Result<RecordId, GatewayError>;

    async fn find_all(&self) -> Result<Vec<Entity>, GatewayError>;

    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Entity>, GatewayError>;

    /// Returns `false` when nothing had this id.
    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, GatewayError>;
}

#[async_trait::async_trait]
impl<G> EntityGateway for Arc<G>
where
    G: EntityGateway + ?Sized,
{
    fn kind(&self) -> EntityKind {
        (**self).kind()
    }

    async fn save(&self, draft: EntityDraft) -> Result<RecordId, GatewayError> {
        (**self).save(draft).await
    }

    async fn find_all(&self) -> Result<Vec<Entity>, GatewayError> {
        (**self).find_all().await
    }

    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Entity>, GatewayError> {
        (**self).find_by_id(id).await
    }

    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, GatewayError> {
        (**self).delete_by_id(id).await
    }
}
