//! Token store contract (implemented by infrastructure backends).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use intake_core::{NewToken, RecordId, Token};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenStoreError {
    /// The backing store failed (connection, query, decoding).
    #[error("token store backend error: {0}")]
    Backend(String),

    /// A token with this value was already issued.
    #[error("token value already issued: {0}")]
    Conflict(String),
}

/// Keyed access to issued tokens.
///
/// Lookups by value are exact string matches. Stores that enforce uniqueness
/// of `value` report a duplicate issue as `TokenStoreError::Conflict`.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    async fn find_by_value(&self, value: &str) -> Result<Option<Token>, TokenStoreError>;

    async fn find_all(&self) -> Result<Vec<Token>, TokenStoreError>;

    /// Persist a newly issued token; `issued_at` becomes its `created_at`.
    async fn insert(&self, token: NewToken, issued_at: DateTime<Utc>) -> Result<Token, TokenStoreError>;

    /// Returns `false` when no token had this id.
    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, TokenStoreError>;
}

#[async_trait::async_trait]
impl<S> TokenStore for Arc<S>
where
    S: TokenStore + ?Sized,
{
    async fn find_by_value(&self, value: &str) -> Result<Option<Token>, TokenStoreError> {
        (**self).find_by_value(value).await
    }

    async fn find_all(&self) -> Result<Vec<Token>, TokenStoreError> {
        (**self).find_all().await
    }

    async fn insert(&self, token: NewToken, issued_at: DateTime<Utc>) -> Result<Token, TokenStoreError> {
        (**self).insert(token, issued_at).await
    }

    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, TokenStoreError> {
        (**self).delete_by_id(id).await
    }
}
