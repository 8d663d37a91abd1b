use std::sync::RwLock;

use chrono::{DateTime, Utc};

use intake_auth::{TokenStore, TokenStoreError};
use intake_core::{NewToken, RecordId, Token};

/// In-memory token store for tests/dev. Ids are numeric, starting at 1.
#[derive(Debug)]
pub struct InMemoryTokenStore {
    inner: RwLock<Tokens>,
}

#[derive(Debug)]
struct Tokens {
    next_id: i64,
    rows: Vec<Token>,
}

impl Default for InMemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Tokens {
                next_id: 1,
                rows: Vec::new(),
            }),
        }
    }
}

fn poisoned() -> TokenStoreError {
    TokenStoreError::Backend("in-memory token store lock poisoned".to_string())
}

#[async_trait::async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn find_by_value(&self, value: &str) -> Result<Option<Token>, TokenStoreError> {
        let tokens = self.inner.read().map_err(|_| poisoned())?;
        Ok(tokens.rows.iter().find(|t| t.value == value).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Token>, TokenStoreError> {
        let tokens = self.inner.read().map_err(|_| poisoned())?;
        Ok(tokens.rows.clone())
    }

    async fn insert(&self, token: NewToken, issued_at: DateTime<Utc>) -> Result<Token, TokenStoreError> {
        let mut tokens = self.inner.write().map_err(|_| poisoned())?;
        if tokens.rows.iter().any(|t| t.value == token.value) {
            return Err(TokenStoreError::Conflict(token.value));
        }
        let id = tokens.next_id;
        tokens.next_id += 1;
        let token = token.into_token(RecordId::Numeric(id), issued_at);
        tokens.rows.push(token.clone());
        Ok(token)
    }

    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, TokenStoreError> {
        let mut tokens = self.inner.write().map_err(|_| poisoned())?;
        let before = tokens.rows.len();
        tokens.rows.retain(|t| &t.id != id);
        Ok(tokens.rows.len() != before)
    }
}
