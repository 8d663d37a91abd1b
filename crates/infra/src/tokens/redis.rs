//! Redis token store.
//!
//! Layout, for kind `client`:
//! - `client:token:<uuid>`: hash with `token`, `owner_id`, `created_at`
//! - `client:token:value:<value>`: string holding the token id
//! - `client:token:ids`: set of every token id
//!
//! Issuing runs as one server-side script, so the value claim and the token
//! hash are written together or not at all.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::instrument;

use intake_auth::{TokenStore, TokenStoreError};
use intake_core::{EntityKind, NewToken, RecordId, Token};

/// KEYS: value key, record key, index key.
/// ARGV: id, token, owner id, created at, record key prefix.
///
/// A value key whose token hash is gone is treated as free.
const ISSUE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current and redis.call('EXISTS', ARGV[5] .. current) == 1 then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('HSET', KEYS[2], 'token', ARGV[2], 'owner_id', ARGV[3], 'created_at', ARGV[4])
redis.call('SADD', KEYS[3], ARGV[1])
return 1
"#;

#[derive(Clone)]
pub struct RedisTokenStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl core::fmt::Debug for RedisTokenStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisTokenStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn redis_err(operation: &str, e: redis::RedisError) -> TokenStoreError {
    TokenStoreError::Backend(format!("redis {operation} failed: {e}"))
}

impl RedisTokenStore {
    pub async fn connect(redis_url: &str, kind: EntityKind) -> Result<Self, TokenStoreError> {
        let client = redis::Client::open(redis_url).map_err(|e| redis_err("open", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| redis_err("connect", e))?;
        Ok(Self {
            conn,
            prefix: format!("{}:token", kind.singular()),
        })
    }

    fn record_key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    fn value_key(&self, value: &str) -> String {
        format!("{}:value:{}", self.prefix, value)
    }

    fn index_key(&self) -> String {
        format!("{}:ids", self.prefix)
    }

    async fn load(&self, conn: &mut MultiplexedConnection, id: &str) -> Result<Option<Token>, TokenStoreError> {
        let fields: HashMap<String, String> = conn
            .hgetall(self.record_key(id))
            .await
            .map_err(|e| redis_err("hgetall", e))?;
        if fields.is_empty() {
            return Ok(None);
        }

        let field = |name: &str| {
            fields
                .get(name)
                .cloned()
                .ok_or_else(|| TokenStoreError::Backend(format!("token {id} is missing `{name}`")))
        };
        let owner_id = field("owner_id")?
            .parse::<RecordId>()
            .map_err(|e| TokenStoreError::Backend(format!("token {id} has a bad owner_id: {e}")))?;
        let created_at = DateTime::parse_from_rfc3339(&field("created_at")?)
            .map_err(|e| TokenStoreError::Backend(format!("token {id} has a bad created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Some(Token {
            id: RecordId::Text(id.to_string()),
            value: field("token")?,
            owner_id,
            created_at,
        }))
    }
}

#[async_trait::async_trait]
impl TokenStore for RedisTokenStore {
    #[instrument(skip_all, fields(prefix = %self.prefix), err)]
    async fn find_by_value(&self, value: &str) -> Result<Option<Token>, TokenStoreError> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn
            .get(self.value_key(value))
            .await
            .map_err(|e| redis_err("find_by_value", e))?;
        match id {
            Some(id) => self.load(&mut conn, &id).await,
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(prefix = %self.prefix), err)]
    async fn find_all(&self) -> Result<Vec<Token>, TokenStoreError> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn
            .smembers(self.index_key())
            .await
            .map_err(|e| redis_err("find_all", e))?;
        ids.sort();

        let mut tokens = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(token) = self.load(&mut conn, &id).await? {
                tokens.push(token);
            }
        }
        Ok(tokens)
    }

    #[instrument(skip_all, fields(prefix = %self.prefix), err)]
    async fn insert(&self, token: NewToken, issued_at: DateTime<Utc>) -> Result<Token, TokenStoreError> {
        let id = RecordId::new_text();
        let raw = id.to_string();
        let mut conn = self.conn.clone();

        let issued: i64 = redis::Script::new(ISSUE_SCRIPT)
            .key(self.value_key(&token.value))
            .key(self.record_key(&raw))
            .key(self.index_key())
            .arg(&raw)
            .arg(&token.value)
            .arg(token.owner_id.to_string())
            .arg(issued_at.to_rfc3339())
            .arg(format!("{}:", self.prefix))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("insert", e))?;
        if issued == 0 {
            return Err(TokenStoreError::Conflict(token.value));
        }

        Ok(token.into_token(id, issued_at))
    }

    #[instrument(skip_all, fields(prefix = %self.prefix, id = %id), err)]
    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, TokenStoreError> {
        let raw = id.to_string();
        let mut conn = self.conn.clone();
        let Some(token) = self.load(&mut conn, &raw).await? else {
            return Ok(false);
        };

        redis::pipe()
            .atomic()
            .del(self.record_key(&raw))
            .ignore()
            .del(self.value_key(&token.value))
            .ignore()
            .srem(self.index_key(), &raw)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| redis_err("delete_by_id", e))?;
        Ok(true)
    }
}
