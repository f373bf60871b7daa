//! PostgreSQL connector (`pgsql`).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{DatabaseConnector, bytes_to_value, returns_rows, unsupported_value};
use crate::mcp::config::{DatabaseConfig, DatabaseKind, SslMode};
use crate::mcp::error::ConnectorError;
use crate::mcp::types::{ColumnInfo, IndexInfo, ProcedureInfo, QueryResult, SchemaInfo, TableInfo};

const SCHEMAS_SQL: &str = "\
SELECT schema_name::text AS name
FROM information_schema.schemata
WHERE schema_name NOT IN ('pg_catalog', 'information_schema')
ORDER BY schema_name";

const TABLES_SQL: &str = "\
SELECT table_name::text AS name,
       table_type::text AS table_type,
       obj_description((quote_ident(table_schema) || '.' || quote_ident(table_name))::regclass, 'pg_class') AS comment
FROM information_schema.tables
WHERE table_schema = $1
ORDER BY table_name";

const COLUMNS_SQL: &str = "\
SELECT column_name::text AS name,
       data_type::text AS data_type,
       is_nullable::text AS is_nullable,
       column_default::text AS column_default,
       col_description((quote_ident(table_schema) || '.' || quote_ident(table_name))::regclass, ordinal_position::int) AS comment
FROM information_schema.columns
WHERE table_schema = $1 AND table_name = $2
ORDER BY ordinal_position";

const INDEXES_SQL: &str = "\
SELECT i.relname::text AS name,
       array_agg(a.attname::text ORDER BY a.attnum) AS columns,
       ix.indisunique AS is_unique,
       am.amname::text AS index_type
FROM pg_class t
JOIN pg_index ix ON t.oid = ix.indrelid
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_am am ON am.oid = i.relam
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
JOIN pg_namespace n ON n.oid = t.relnamespace
WHERE n.nspname = $1 AND t.relname = $2
GROUP BY i.relname, ix.indisunique, am.amname
ORDER BY i.relname";

const ROUTINES_SQL: &str = "\
SELECT routine_name::text AS name,
       COALESCE(routine_type::text, 'FUNCTION') AS routine_type,
       routine_definition::text AS definition
FROM information_schema.routines
WHERE routine_schema = $1
ORDER BY routine_name";

const ROUTINE_SQL: &str = "\
SELECT routine_name::text AS name,
       COALESCE(routine_type::text, 'FUNCTION') AS routine_type,
       routine_definition::text AS definition
FROM information_schema.routines
WHERE routine_schema = $1 AND routine_name = $2
LIMIT 1";

pub struct PostgresConnector {
    config: DatabaseConfig,
    pool: RwLock<Option<PgPool>>,
}

impl PostgresConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port.unwrap_or(5432))
            .database(&self.config.database)
            .ssl_mode(ssl_mode(self.config.ssl_mode));

        if let Some(username) = &self.config.username {
            options = options.username(username);
        }
        if let Some(password) = &self.config.password {
            options = options.password(password);
        }
        options
    }

    async fn pool(&self) -> Result<PgPool, ConnectorError> {
        self.pool.read().await.clone().ok_or(ConnectorError::NotConnected)
    }
}

/// Without an explicit mode the connection is plain, matching Laravel's default.
fn ssl_mode(mode: Option<SslMode>) -> PgSslMode {
    match mode {
        None | Some(SslMode::Disable) => PgSslMode::Disable,
        Some(SslMode::Prefer) => PgSslMode::Prefer,
        Some(SslMode::Require) => PgSslMode::Require,
        Some(SslMode::VerifyCa) => PgSslMode::VerifyCa,
        Some(SslMode::VerifyFull) => PgSslMode::VerifyFull,
    }
}

fn cell(row: &PgRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    let decoded = match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(index).map(Value::from),
        "INT2" => row.try_get::<i16, _>(index).map(Value::from),
        "INT4" => row.try_get::<i32, _>(index).map(Value::from),
        "INT8" => row.try_get::<i64, _>(index).map(Value::from),
        "FLOAT4" => row.try_get::<f32, _>(index).map(Value::from),
        "FLOAT8" => row.try_get::<f64, _>(index).map(Value::from),
        "NUMERIC" => row
            .try_get::<rust_decimal::Decimal, _>(index)
            .map(|d| Value::String(d.to_string())),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index),
        "UUID" => row
            .try_get::<uuid::Uuid, _>(index)
            .map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(|t| Value::String(t.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|t| Value::String(t.to_string())),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .map(|d| Value::String(d.to_string())),
        "TIME" => row
            .try_get::<chrono::NaiveTime, _>(index)
            .map(|t| Value::String(t.to_string())),
        "BYTEA" => row.try_get::<Vec<u8>, _>(index).map(bytes_to_value),
        "TEXT[]" | "VARCHAR[]" | "NAME[]" => row
            .try_get::<Vec<String>, _>(index)
            .map(Value::from),
        _ => row.try_get::<String, _>(index).map(Value::String),
    };

    decoded.unwrap_or_else(|_| unsupported_value(&type_name))
}

fn rows_to_result(rows: &[PgRow]) -> QueryResult {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let data = rows
        .iter()
        .map(|row| (0..row.columns().len()).map(|i| cell(row, i)).collect())
        .collect();

    QueryResult {
        columns,
        rows: data,
        row_count: rows.len() as u64,
    }
}

fn procedure_from_row(row: &PgRow) -> Result<ProcedureInfo, sqlx::Error> {
    Ok(ProcedureInfo {
        name: row.try_get("name")?,
        routine_type: row.try_get("routine_type")?,
        definition: row.try_get("definition")?,
    })
}

#[async_trait]
impl DatabaseConnector for PostgresConnector {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(self.connect_options())
            .await
            .map_err(|e| ConnectorError::Connect(e.to_string()))?;

        info!(
            host = %self.config.host,
            database = %self.config.database,
            "Connected to PostgreSQL"
        );

        if let Some(previous) = self.pool.write().await.replace(pool) {
            previous.close().await;
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            debug!("PostgreSQL pool closed");
        }
    }

    async fn query(&self, sql: &str) -> Result<QueryResult, ConnectorError> {
        let pool = self.pool().await?;

        if returns_rows(sql) {
            let rows = sqlx::query(sql).fetch_all(&pool).await?;
            Ok(rows_to_result(&rows))
        } else {
            let done = sqlx::query(sql).execute(&pool).await?;
            Ok(QueryResult {
                row_count: done.rows_affected(),
                ..Default::default()
            })
        }
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaInfo>, ConnectorError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(SCHEMAS_SQL).fetch_all(&pool).await?;

        rows.iter()
            .map(|row| Ok(SchemaInfo { name: row.try_get("name")? }))
            .collect()
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableInfo>, ConnectorError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(TABLES_SQL).bind(schema).fetch_all(&pool).await?;

        rows.iter()
            .map(|row| {
                Ok(TableInfo {
                    name: row.try_get("name")?,
                    table_type: row.try_get("table_type")?,
                    comment: row.try_get("comment")?,
                })
            })
            .collect()
    }

    async fn table_structure(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, ConnectorError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(COLUMNS_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(&pool)
            .await?;

        rows.iter()
            .map(|row| {
                let nullable: String = row.try_get("is_nullable")?;
                Ok(ColumnInfo {
                    name: row.try_get("name")?,
                    data_type: row.try_get("data_type")?,
                    nullable: nullable == "YES",
                    default: row.try_get("column_default")?,
                    key: None,
                    extra: None,
                    comment: row.try_get("comment")?,
                })
            })
            .collect()
    }

    async fn list_indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexInfo>, ConnectorError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(INDEXES_SQL)
            .bind(schema)
            .bind(table)
            .fetch_all(&pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(IndexInfo {
                    name: row.try_get("name")?,
                    columns: row.try_get("columns")?,
                    unique: row.try_get("is_unique")?,
                    index_type: row.try_get("index_type")?,
                })
            })
            .collect()
    }

    async fn list_procedures(&self, schema: &str) -> Result<Vec<ProcedureInfo>, ConnectorError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(ROUTINES_SQL).bind(schema).fetch_all(&pool).await?;

        rows.iter()
            .map(|row| procedure_from_row(row).map_err(ConnectorError::from))
            .collect()
    }

    async fn procedure_detail(
        &self,
        schema: &str,
        name: &str,
    ) -> Result<Option<ProcedureInfo>, ConnectorError> {
        let pool = self.pool().await?;
        let row = sqlx::query(ROUTINE_SQL)
            .bind(schema)
            .bind(name)
            .fetch_optional(&pool)
            .await?;

        Ok(row.as_ref().map(procedure_from_row).transpose()?)
    }

    async fn ping(&self) -> bool {
        match self.pool().await {
            Ok(pool) => sqlx::query("SELECT 1").execute(&pool).await.is_ok(),
            Err(_) => false,
        }
    }
}
