//! Postgres-backed gateway (investor service default).
//!
//! One table per record family (`investors`, `clients`) with a `BIGSERIAL`
//! primary key, so ids are numeric and start at 1.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::instrument;

use intake_core::{Entity, EntityDraft, EntityKind, RecordId};

use super::{EntityGateway, GatewayError};

#[derive(Debug, Clone)]
pub struct PostgresEntityGateway {
    pool: Arc<PgPool>,
    kind: EntityKind,
}

impl PostgresEntityGateway {
    pub fn new(pool: PgPool, kind: EntityKind) -> Self {
        Self {
            pool: Arc::new(pool),
            kind,
        }
    }

    /// Open a small pool against `database_url`.
    pub async fn connect(database_url: &str, kind: EntityKind) -> Result<Self, GatewayError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, kind))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table(&self) -> &'static str {
        self.kind.plural()
    }

    /// Create the record table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), GatewayError> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id          BIGSERIAL PRIMARY KEY,
                name        TEXT NOT NULL,
                cert        TEXT NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            table = self.table()
        );
        sqlx::query(&ddl)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

fn row_to_entity(row: &PgRow) -> Result<Entity, GatewayError> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| GatewayError::Backend(format!("failed to read id: {e}")))?;
    let name: String = row
        .try_get("name")
        .map_err(|e| GatewayError::Backend(format!("failed to read name: {e}")))?;
    let cert: String = row
        .try_get("cert")
        .map_err(|e| GatewayError::Backend(format!("failed to read cert: {e}")))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| GatewayError::Backend(format!("failed to read created_at: {e}")))?;

    Ok(Entity {
        id: RecordId::Numeric(id),
        name,
        cert,
        created_at,
    })
}

#[async_trait::async_trait]
impl EntityGateway for PostgresEntityGateway {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    #[instrument(skip_all, fields(table = self.table()), err)]
    async fn save(&self, draft: EntityDraft) -> Result<RecordId, GatewayError> {
        let sql = format!(
            "INSERT INTO {} (name, cert) VALUES ($1, $2) RETURNING id",
            self.table()
        );
        let row = sqlx::query(&sql)
            .bind(&draft.name)
            .bind(&draft.cert)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("save", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| GatewayError::Backend(format!("failed to read id: {e}")))?;
        Ok(RecordId::Numeric(id))
    }

    #[instrument(skip_all, fields(table = self.table()), err)]
    async fn find_all(&self) -> Result<Vec<Entity>, GatewayError> {
        let sql = format!(
            "SELECT id, name, cert, created_at FROM {} ORDER BY id ASC",
            self.table()
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_all", e))?;

        rows.iter().map(row_to_entity).collect()
    }

    #[instrument(skip_all, fields(table = self.table(), id = %id), err)]
    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Entity>, GatewayError> {
        let Some(n) = id.as_numeric() else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT id, name, cert, created_at FROM {} WHERE id = $1",
            self.table()
        );
        let row = sqlx::query(&sql)
            .bind(n)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_id", e))?;

        row.as_ref().map(row_to_entity).transpose()
    }

    #[instrument(skip_all, fields(table = self.table(), id = %id), err)]
    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, GatewayError> {
        let Some(n) = id.as_numeric() else {
            return Ok(false);
        };
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table());
        let result = sqlx::query(&sql)
            .bind(n)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_by_id", e))?;
        Ok(result.rows_affected() > 0)
    }
}

/// Map SQLx errors into `GatewayError`, keeping the operation name for logs.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> GatewayError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            GatewayError::Backend(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            GatewayError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            GatewayError::Backend(format!("connection pool timed out in {operation}"))
        }
        other => GatewayError::Backend(format!("{operation} failed: {other}")),
    }
}
