//! Redis contract store.
//!
//! Layout:
//! - `contract:<uuid>`: hash with the contract fields, signatures absent until signed
//! - `contract:ids`: set of every contract id

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::instrument;

use intake_core::{
    Contract, ContractBody, ContractFilter, ContractStage, NewContract, OfferAcceptance, RecordId,
};

use super::{ContractStore, ContractStoreError};

const PREFIX: &str = "contract";

/// KEYS: contract key.
/// ARGV: signed stage, supplier id, supplier signature, investor signature.
///
/// Signs only a contract that exists and is still open.
const SIGN_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'stage') ~= 'open' then
    return 0
end
redis.call('HSET', KEYS[1], 'stage', ARGV[1], 'supplier_id', ARGV[2],
    'supplier_signature', ARGV[3], 'investor_signature', ARGV[4])
return 1
"#;

#[derive(Clone)]
pub struct RedisContractStore {
    conn: MultiplexedConnection,
}

impl core::fmt::Debug for RedisContractStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisContractStore").finish_non_exhaustive()
    }
}

fn redis_err(operation: &str, e: redis::RedisError) -> ContractStoreError {
    ContractStoreError::Backend(format!("redis {operation} failed: {e}"))
}

fn record_key(id: &str) -> String {
    format!("{PREFIX}:{id}")
}

fn index_key() -> String {
    format!("{PREFIX}:ids")
}

impl RedisContractStore {
    pub async fn connect(redis_url: &str) -> Result<Self, ContractStoreError> {
        let client = redis::Client::open(redis_url).map_err(|e| redis_err("open", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| redis_err("connect", e))?;
        Ok(Self { conn })
    }

    async fn load(&self, conn: &mut MultiplexedConnection, id: &str) -> Result<Option<Contract>, ContractStoreError> {
        let fields: HashMap<String, String> = conn
            .hgetall(record_key(id))
            .await
            .map_err(|e| redis_err("hgetall", e))?;
        if fields.is_empty() {
            return Ok(None);
        }
        contract_from_fields(id, &fields).map(Some)
    }
}

fn contract_from_fields(id: &str, fields: &HashMap<String, String>) -> Result<Contract, ContractStoreError> {
    let bad = |name: &str, e: &dyn core::fmt::Display| {
        ContractStoreError::Backend(format!("contract {id} has a bad {name}: {e}"))
    };
    let field = |name: &str| {
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| ContractStoreError::Backend(format!("contract {id} is missing `{name}`")))
    };
    let timestamp = |name: &str| -> Result<DateTime<Utc>, ContractStoreError> {
        DateTime::parse_from_rfc3339(&field(name)?)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| bad(name, &e))
    };

    Ok(Contract {
        id: RecordId::Text(id.to_string()),
        investor_id: field("investor_id")?
            .parse::<RecordId>()
            .map_err(|e| bad("investor_id", &e))?,
        supplier_id: fields
            .get("supplier_id")
            .map(|raw| raw.parse::<RecordId>())
            .transpose()
            .map_err(|e| bad("supplier_id", &e))?,
        stage: field("stage")?
            .parse::<ContractStage>()
            .map_err(|e| bad("stage", &e))?,
        created_at: timestamp("created_at")?,
        body: ContractBody {
            title: field("title")?,
            description: field("description")?,
            amount: field("amount")?.parse::<i64>().map_err(|e| bad("amount", &e))?,
            must_be_done: timestamp("must_be_done")?,
        },
        supplier_signature: fields.get("supplier_signature").cloned(),
        investor_signature: fields.get("investor_signature").cloned(),
    })
}

#[async_trait::async_trait]
impl ContractStore for RedisContractStore {
    /// Filters client side; the id set has no secondary indexes.
    #[instrument(skip_all, err)]
    async fn list(&self, filter: &ContractFilter) -> Result<Vec<Contract>, ContractStoreError> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = conn
            .smembers(index_key())
            .await
            .map_err(|e| redis_err("list", e))?;
        ids.sort();

        let mut contracts = Vec::new();
        for id in ids {
            if let Some(contract) = self.load(&mut conn, &id).await? {
                if filter.matches(&contract) {
                    contracts.push(contract);
                }
            }
        }
        Ok(contracts)
    }

    #[instrument(skip_all, fields(id = %id), err)]
    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Contract>, ContractStoreError> {
        let mut conn = self.conn.clone();
        self.load(&mut conn, &id.to_string()).await
    }

    #[instrument(skip_all, err)]
    async fn insert(&self, contract: NewContract, created_at: DateTime<Utc>) -> Result<Contract, ContractStoreError> {
        let id = RecordId::new_text();
        let raw = id.to_string();
        let body = &contract.body;
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .hset_multiple(
                record_key(&raw),
                &[
                    ("investor_id", contract.investor_id.to_string()),
                    ("stage", ContractStage::Open.as_str().to_string()),
                    ("created_at", created_at.to_rfc3339()),
                    ("title", body.title.clone()),
                    ("description", body.description.clone()),
                    ("amount", body.amount.to_string()),
                    ("must_be_done", body.must_be_done.to_rfc3339()),
                ],
            )
            .ignore()
            .sadd(index_key(), &raw)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| redis_err("insert", e))?;

        Ok(contract.into_contract(id, created_at))
    }

    #[instrument(skip_all, fields(id = %id), err)]
    async fn mark_signed(
        &self,
        id: &RecordId,
        offer: &OfferAcceptance,
    ) -> Result<Option<Contract>, ContractStoreError> {
        let raw = id.to_string();
        let mut conn = self.conn.clone();
        let signed: i64 = redis::Script::new(SIGN_SCRIPT)
            .key(record_key(&raw))
            .arg(ContractStage::Signed.as_str())
            .arg(offer.supplier_id.to_string())
            .arg(&offer.supplier_signature)
            .arg(&offer.investor_signature)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("mark_signed", e))?;
        if signed == 0 {
            return Ok(None);
        }
        self.load(&mut conn, &raw).await
    }

    #[instrument(skip_all, fields(id = %id), err)]
    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, ContractStoreError> {
        let raw = id.to_string();
        let mut conn = self.conn.clone();
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(record_key(&raw))
            .srem(index_key(), &raw)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_err("delete_by_id", e))?;
        Ok(removed > 0)
    }
}
