//! Contract storage and offer acceptance.
//!
//! Stores follow the record backends: numeric ids in memory and in Postgres,
//! UUID strings in Redis.

pub mod acceptance;
pub mod in_memory;
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use intake_core::{Contract, ContractFilter, NewContract, OfferAcceptance, RecordId};

pub use acceptance::{AcceptError, accept_offer};
pub use in_memory::InMemoryContractStore;
pub use postgres::PostgresContractStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisContractStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContractStoreError {
    #[error("contract store backend error: {0}")]
    Backend(String),
}

#[async_trait::async_trait]
pub trait ContractStore: Send + Sync {
    /// Matching contracts in id order.
    async fn list(&self, filter: &ContractFilter) -> Result<Vec<Contract>, ContractStoreError>;

    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Contract>, ContractStoreError>;

    async fn insert(&self, contract: NewContract, created_at: DateTime<Utc>) -> Result<Contract, ContractStoreError>;

    /// Record both signatures and move an open contract to signed.
    ///
    /// `None` when no open contract has this id (absent or already signed).
    async fn mark_signed(
        &self,
        id: &RecordId,
        offer: &OfferAcceptance,
    ) -> Result<Option<Contract>, ContractStoreError>;

    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, ContractStoreError>;
}

#[async_trait::async_trait]
impl<S> ContractStore for Arc<S>
where
    S: ContractStore + ?Sized,
{
    async fn list(&self, filter: &ContractFilter) -> Result<Vec<Contract>, ContractStoreError> {
        (**self).list(filter).await
    }

    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Contract>, ContractStoreError> {
        (**self).find_by_id(id).await
    }

    async fn insert(&self, contract: NewContract, created_at: DateTime<Utc>) -> Result<Contract, ContractStoreError> {
        (**self).insert(contract, created_at).await
    }

    async fn mark_signed(
        &self,
        id: &RecordId,
        offer: &OfferAcceptance,
    ) -> Result<Option<Contract>, ContractStoreError> {
        (**self).mark_signed(id, offer).await
    }

    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, ContractStoreError> {
        (**self).delete_by_id(id).await
    }
}
