//! Postgres contract store: a single `contracts` table shared by both services.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::instrument;

use intake_core::{
    Contract, ContractBody, ContractFilter, ContractStage, NewContract, OfferAcceptance, RecordId,
};

use super::{ContractStore, ContractStoreError};
use crate::gateway::postgres::map_sqlx_error;

const COLUMNS: &str = "id, investor_id, supplier_id, stage, created_at, title, description, \
                       amount, must_be_done, supplier_signature, investor_signature";

#[derive(Debug, Clone)]
pub struct PostgresContractStore {
    pool: Arc<PgPool>,
}

impl PostgresContractStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn ensure_schema(&self) -> Result<(), ContractStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contracts (
                id                  BIGSERIAL PRIMARY KEY,
                investor_id         TEXT NOT NULL,
                supplier_id         TEXT,
                stage               TEXT NOT NULL DEFAULT 'open',
                created_at          TIMESTAMPTZ NOT NULL,
                title               TEXT NOT NULL,
                description         TEXT NOT NULL,
                amount              BIGINT NOT NULL,
                must_be_done        TIMESTAMPTZ NOT NULL,
                supplier_signature  TEXT,
                investor_signature  TEXT
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_err("ensure_schema", e))?;
        Ok(())
    }
}

fn map_err(operation: &str, err: sqlx::Error) -> ContractStoreError {
    ContractStoreError::Backend(map_sqlx_error(operation, err).to_string())
}

fn parse_id(column: &str, raw: &str) -> Result<RecordId, ContractStoreError> {
    raw.parse()
        .map_err(|e| ContractStoreError::Backend(format!("bad {column} `{raw}`: {e}")))
}

fn row_to_contract(row: &PgRow) -> Result<Contract, ContractStoreError> {
    let read = |e: sqlx::Error| ContractStoreError::Backend(format!("failed to read contract row: {e}"));
    let id: i64 = row.try_get("id").map_err(read)?;
    let investor_id: String = row.try_get("investor_id").map_err(read)?;
    let supplier_id: Option<String> = row.try_get("supplier_id").map_err(read)?;
    let stage: String = row.try_get("stage").map_err(read)?;

    Ok(Contract {
        id: RecordId::Numeric(id),
        investor_id: parse_id("investor_id", &investor_id)?,
        supplier_id: supplier_id
            .as_deref()
            .map(|raw| parse_id("supplier_id", raw))
            .transpose()?,
        stage: stage
            .parse::<ContractStage>()
            .map_err(|e| ContractStoreError::Backend(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(read)?,
        body: ContractBody {
            title: row.try_get("title").map_err(read)?,
            description: row.try_get("description").map_err(read)?,
            amount: row.try_get("amount").map_err(read)?,
            must_be_done: row.try_get("must_be_done").map_err(read)?,
        },
        supplier_signature: row.try_get("supplier_signature").map_err(read)?,
        investor_signature: row.try_get("investor_signature").map_err(read)?,
    })
}

/// `SELECT ... WHERE ...` for a listing filter, with bound parameters.
fn list_query(filter: &ContractFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM contracts WHERE TRUE"));
    if let Some(investor) = &filter.investor_id {
        qb.push(" AND investor_id = ").push_bind(investor.to_string());
    }
    if let Some(supplier) = &filter.supplier_id {
        qb.push(" AND supplier_id = ").push_bind(supplier.to_string());
    }
    if let Some(title) = &filter.title {
        qb.push(" AND strpos(lower(title), lower(")
            .push_bind(title.clone())
            .push(")) > 0");
    }
    qb.push(" ORDER BY id ASC");
    qb
}

#[async_trait::async_trait]
impl ContractStore for PostgresContractStore {
    #[instrument(skip_all, err)]
    async fn list(&self, filter: &ContractFilter) -> Result<Vec<Contract>, ContractStoreError> {
        let mut query = list_query(filter);
        let rows = query
            .build()
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_err("list", e))?;
        rows.iter().map(row_to_contract).collect()
    }

    #[instrument(skip_all, fields(id = %id), err)]
    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Contract>, ContractStoreError> {
        let Some(n) = id.as_numeric() else {
            return Ok(None);
        };
        let sql = format!("SELECT {COLUMNS} FROM contracts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(n)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_err("find_by_id", e))?;
        row.as_ref().map(row_to_contract).transpose()
    }

    #[instrument(skip_all, err)]
    async fn insert(&self, contract: NewContract, created_at: DateTime<Utc>) -> Result<Contract, ContractStoreError> {
        let row = sqlx::query(
            "INSERT INTO contracts (investor_id, stage, created_at, title, description, amount, must_be_done) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(contract.investor_id.to_string())
        .bind(ContractStage::Open.as_str())
        .bind(created_at)
        .bind(&contract.body.title)
        .bind(&contract.body.description)
        .bind(contract.body.amount)
        .bind(contract.body.must_be_done)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_err("insert", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| ContractStoreError::Backend(format!("failed to read id: {e}")))?;
        Ok(contract.into_contract(RecordId::Numeric(id), created_at))
    }

    #[instrument(skip_all, fields(id = %id), err)]
    async fn mark_signed(
        &self,
        id: &RecordId,
        offer: &OfferAcceptance,
    ) -> Result<Option<Contract>, ContractStoreError> {
        let Some(n) = id.as_numeric() else {
            return Ok(None);
        };
        let sql = format!(
            "UPDATE contracts SET stage = $2, supplier_id = $3, supplier_signature = $4, \
             investor_signature = $5 WHERE id = $1 AND stage = $6 RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(n)
            .bind(ContractStage::Signed.as_str())
            .bind(offer.supplier_id.to_string())
            .bind(&offer.supplier_signature)
            .bind(&offer.investor_signature)
            .bind(ContractStage::Open.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_err("mark_signed", e))?;
        row.as_ref().map(row_to_contract).transpose()
    }

    #[instrument(skip_all, fields(id = %id), err)]
    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, ContractStoreError> {
        let Some(n) = id.as_numeric() else {
            return Ok(false);
        };
        let result = sqlx::query("DELETE FROM contracts WHERE id = $1")
            .bind(n)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_err("delete_by_id", e))?;
        Ok(result.rows_affected() > 0)
    }
}
