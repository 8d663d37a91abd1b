//! Redis-backed gateway (client service default).
//!
//! Layout, for kind `client`:
//! - `client:<uuid>`: hash with `name`, `cert`, `created_at` (RFC 3339)
//! - `client:ids`: set of every stored id
//!
//! Ids are UUIDv7 strings, so listing sorts them into insertion order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::instrument;

use intake_core::{Entity, EntityDraft, EntityKind, RecordId};

use super::{EntityGateway, GatewayError};

#[derive(Clone)]
pub struct RedisEntityGateway {
    conn: MultiplexedConnection,
    kind: EntityKind,
}

impl core::fmt::Debug for RedisEntityGateway {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisEntityGateway")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

fn redis_err(operation: &str, e: redis::RedisError) -> GatewayError {
    GatewayError::Backend(format!("redis {operation} failed: {e}"))
}

impl RedisEntityGateway {
    pub async fn connect(redis_url: &str, kind: EntityKind) -> Result<Self, GatewayError> {
        let client = redis::Client::open(redis_url).map_err(|e| redis_err("open", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| redis_err("connect", e))?;
        Ok(Self { conn, kind })
    }

    fn record_key(&self, id: &str) -> String {
        format!("{}:{}", self.kind.singular(), id)
    }

    fn index_key(&self) -> String {
        format!("{}:ids", self.kind.singular())
    }

    fn decode(id: &str, fields: HashMap<String, String>) -> Result<Entity, GatewayError> {
        let field = |name: &str| {
            fields
                .get(name)
                .cloned()
                .ok_or_else(|| GatewayError::Backend(format!("record {id} is missing `{name}`")))
        };
        let created_at = DateTime::parse_from_rfc3339(&field("created_at")?)
            .map_err(|e| GatewayError::Backend(format!("record {id} has a bad created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Entity {
            id: RecordId::Text(id.to_string()),
            name: field("name")?,
            cert: field("cert")?,
            created_at,
        })
    }
}

#[async_trait::async_trait]
impl EntityGateway for RedisEntityGateway {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    #[instrument(skip_all, fields(kind = %self.kind), err)]
    async fn save(&self, draft: EntityDraft) -> Result<RecordId, GatewayError> {
        let id = RecordId::new_text();
        let key = self.record_key(&id.to_string());
        let created_at = Utc::now().to_rfc3339();
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .hset_multiple(
                &key,
                &[
                    ("name", draft.name.as_str()),
                    ("cert", draft.cert.as_str()),
                    ("created_at", created_at.as_str()),
                ],
            )
            .ignore()
            .sadd(self.index_key(), id.to_string())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| redis_err("save", e))?;

        Ok(id)
    }

    #[instrument(skip_all, fields(kind = %self.kind), err)]
    async fn find_all(&self) -> Result<Vec<Entity>, GatewayError> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn
            .smembers(self.index_key())
            .await
            .map_err(|e| redis_err("find_all", e))?;
        ids.sort();

        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            let fields: HashMap<String, String> = conn
                .hgetall(self.record_key(&id))
                .await
                .map_err(|e| redis_err("find_all", e))?;
            // Index may briefly outlive a record deleted concurrently.
            if fields.is_empty() {
                continue;
            }
            entities.push(Self::decode(&id, fields)?);
        }
        Ok(entities)
    }

    #[instrument(skip_all, fields(kind = %self.kind, id = %id), err)]
    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Entity>, GatewayError> {
        let raw = id.to_string();
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.record_key(&raw))
            .await
            .map_err(|e| redis_err("find_by_id", e))?;

        if fields.is_empty() {
            return Ok(None);
        }
        Self::decode(&raw, fields).map(Some)
    }

    #[instrument(skip_all, fields(kind = %self.kind, id = %id), err)]
    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, GatewayError> {
        let raw = id.to_string();
        let mut conn = self.conn.clone();
        let (removed, _): (u64, u64) = redis::pipe()
            .atomic()
            .del(self.record_key(&raw))
            .srem(self.index_key(), &raw)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_err("delete_by_id", e))?;
        Ok(removed > 0)
    }
}
