//! Postgres token store: one `<kind>_tokens` table per service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use tracing::instrument;

use intake_auth::{TokenStore, TokenStoreError};
use intake_core::{EntityKind, NewToken, RecordId, Token};

use crate::gateway::postgres::map_sqlx_error;

#[derive(Debug, Clone)]
pub struct PostgresTokenStore {
    pool: Arc<PgPool>,
    table: String,
}

impl PostgresTokenStore {
    /// Shares the pool with the entity gateway of the same service.
    pub fn new(pool: PgPool, kind: EntityKind) -> Self {
        Self {
            pool: Arc::new(pool),
            table: format!("{}_tokens", kind.singular()),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), TokenStoreError> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id          BIGSERIAL PRIMARY KEY,
                token       TEXT NOT NULL UNIQUE,
                owner_id    TEXT NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL
            )
            "#,
            table = self.table
        );
        sqlx::query(&ddl)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_err("ensure_schema", e))?;
        Ok(())
    }
}

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

fn map_err(operation: &str, err: sqlx::Error) -> TokenStoreError {
    TokenStoreError::Backend(map_sqlx_error(operation, err).to_string())
}

fn insert_err(value: &str, err: sqlx::Error) -> TokenStoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            TokenStoreError::Conflict(value.to_string())
        }
        _ => map_err("insert", err),
    }
}

fn row_to_token(row: &PgRow) -> Result<Token, TokenStoreError> {
    let read = |e: sqlx::Error| TokenStoreError::Backend(format!("failed to read token row: {e}"));
    let id: i64 = row.try_get("id").map_err(read)?;
    let value: String = row.try_get("token").map_err(read)?;
    let owner_id: String = row.try_get("owner_id").map_err(read)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(read)?;

    let owner_id = owner_id
        .parse::<RecordId>()
        .map_err(|e| TokenStoreError::Backend(format!("token {id} has a bad owner_id: {e}")))?;

    Ok(Token {
        id: RecordId::Numeric(id),
        value,
        owner_id,
        created_at,
    })
}

#[async_trait::async_trait]
impl TokenStore for PostgresTokenStore {
    #[instrument(skip_all, fields(table = %self.table), err)]
    async fn find_by_value(&self, value: &str) -> Result<Option<Token>, TokenStoreError> {
        let sql = format!(
            "SELECT id, token, owner_id, created_at FROM {} WHERE token = $1",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_err("find_by_value", e))?;
        row.as_ref().map(row_to_token).transpose()
    }

    #[instrument(skip_all, fields(table = %self.table), err)]
    async fn find_all(&self) -> Result<Vec<Token>, TokenStoreError> {
        let sql = format!(
            "SELECT id, token, owner_id, created_at FROM {} ORDER BY id ASC",
            self.table
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_err("find_all", e))?;
        rows.iter().map(row_to_token).collect()
    }

    #[instrument(skip_all, fields(table = %self.table), err)]
    async fn insert(&self, token: NewToken, issued_at: DateTime<Utc>) -> Result<Token, TokenStoreError> {
        let sql = format!(
            "INSERT INTO {} (token, owner_id, created_at) VALUES ($1, $2, $3) RETURNING id",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(&token.value)
            .bind(token.owner_id.to_string())
            .bind(issued_at)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| insert_err(&token.value, e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| TokenStoreError::Backend(format!("failed to read id: {e}")))?;
        Ok(token.into_token(RecordId::Numeric(id), issued_at))
    }

    #[instrument(skip_all, fields(table = %self.table, id = %id), err)]
    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, TokenStoreError> {
        let Some(n) = id.as_numeric() else {
            return Ok(false);
        };
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let result = sqlx::query(&sql)
            .bind(n)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_err("delete_by_id", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_insert_failures_stay_backend_errors() {
        let err = insert_err("dup", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, TokenStoreError::Backend(msg) if msg.contains("insert")));
    }
}
