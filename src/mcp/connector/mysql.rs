//! MySQL and MariaDB connector.
//!
//! `information_schema` text columns are cast to `CHAR` so they decode as
//! strings regardless of the server's collation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{DatabaseConnector, bytes_to_value, returns_rows, unsupported_value};
use crate::mcp::config::{DatabaseConfig, DatabaseKind, SslMode};
use crate::mcp::error::ConnectorError;
use crate::mcp::types::{ColumnInfo, IndexInfo, ProcedureInfo, QueryResult, SchemaInfo, TableInfo};

const SCHEMAS_SQL: &str = "\
SELECT CAST(SCHEMA_NAME AS CHAR) AS name
FROM information_schema.SCHEMATA
ORDER BY SCHEMA_NAME";

const TABLES_SQL: &str = "\
SELECT CAST(TABLE_NAME AS CHAR) AS name,
       CAST(TABLE_TYPE AS CHAR) AS table_type,
       CAST(TABLE_COMMENT AS CHAR) AS comment
FROM information_schema.TABLES
WHERE TABLE_SCHEMA = ?
ORDER BY TABLE_NAME";

const COLUMNS_SQL: &str = "\
SELECT CAST(COLUMN_NAME AS CHAR) AS name,
       CAST(COLUMN_TYPE AS CHAR) AS data_type,
       CAST(IS_NULLABLE AS CHAR) AS is_nullable,
       CAST(COLUMN_DEFAULT AS CHAR) AS column_default,
       CAST(COLUMN_KEY AS CHAR) AS column_key,
       CAST(EXTRA AS CHAR) AS extra,
       CAST(COLUMN_COMMENT AS CHAR) AS comment
FROM information_schema.COLUMNS
WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
ORDER BY ORDINAL_POSITION";

const INDEXES_SQL: &str = "\
SELECT CAST(INDEX_NAME AS CHAR) AS name,
       CAST(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) AS CHAR) AS columns,
       CAST(MAX(NON_UNIQUE) AS SIGNED) AS non_unique,
       CAST(INDEX_TYPE AS CHAR) AS index_type
FROM information_schema.STATISTICS
WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
GROUP BY INDEX_NAME, INDEX_TYPE
ORDER BY INDEX_NAME";

const ROUTINES_SQL: &str = "\
SELECT CAST(ROUTINE_NAME AS CHAR) AS name,
       CAST(ROUTINE_TYPE AS CHAR) AS routine_type,
       CAST(ROUTINE_DEFINITION AS CHAR) AS definition
FROM information_schema.ROUTINES
WHERE ROUTINE_SCHEMA = ?
ORDER BY ROUTINE_NAME";

const ROUTINE_SQL: &str = "\
SELECT CAST(ROUTINE_NAME AS CHAR) AS name,
       CAST(ROUTINE_TYPE AS CHAR) AS routine_type,
       CAST(ROUTINE_DEFINITION AS CHAR) AS definition
FROM information_schema.ROUTINES
WHERE ROUTINE_SCHEMA = ? AND ROUTINE_NAME = ?
LIMIT 1";

pub struct MySqlConnector {
    config: DatabaseConfig,
    pool: RwLock<Option<MySqlPool>>,
}

impl MySqlConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port.unwrap_or(3306))
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

    async fn pool(&self) -> Result<MySqlPool, ConnectorError> {
        self.pool.read().await.clone().ok_or(ConnectorError::NotConnected)
    }
}

fn ssl_mode(mode: Option<SslMode>) -> MySqlSslMode {
    match mode {
        None | Some(SslMode::Disable) => MySqlSslMode::Disabled,
        Some(SslMode::Prefer) => MySqlSslMode::Preferred,
        Some(SslMode::Require) => MySqlSslMode::Required,
        Some(SslMode::VerifyCa) => MySqlSslMode::VerifyCa,
        Some(SslMode::VerifyFull) => MySqlSslMode::VerifyIdentity,
    }
}

/// Empty strings in `information_schema` mean "not set".
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn cell(row: &MySqlRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    let decoded = match type_name.as_str() {
        "BOOLEAN" => row.try_get::<bool, _>(index).map(Value::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(index).map(Value::from)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get::<u64, _>(index).map(Value::from),
        "FLOAT" => row.try_get::<f32, _>(index).map(Value::from),
        "DOUBLE" => row.try_get::<f64, _>(index).map(Value::from),
        "DECIMAL" => row
            .try_get::<rust_decimal::Decimal, _>(index)
            .map(|d| Value::String(d.to_string())),
        "JSON" => row.try_get::<Value, _>(index),
        "TIMESTAMP" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(|t| Value::String(t.to_rfc3339())),
        "DATETIME" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map(|t| Value::String(t.to_string())),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .map(|d| Value::String(d.to_string())),
        "TIME" => row
            .try_get::<chrono::NaiveTime, _>(index)
            .map(|t| Value::String(t.to_string())),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            row.try_get::<Vec<u8>, _>(index).map(bytes_to_value)
        }
        _ => row.try_get::<String, _>(index).map(Value::String),
    };

    decoded.unwrap_or_else(|_| unsupported_value(&type_name))
}

fn rows_to_result(rows: &[MySqlRow]) -> QueryResult {
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

fn procedure_from_row(row: &MySqlRow) -> Result<ProcedureInfo, sqlx::Error> {
    Ok(ProcedureInfo {
        name: row.try_get("name")?,
        routine_type: row.try_get("routine_type")?,
        definition: row.try_get("definition")?,
    })
}

#[async_trait]
impl DatabaseConnector for MySqlConnector {
    fn kind(&self) -> DatabaseKind {
        self.config.kind
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(self.connect_options())
            .await
            .map_err(|e| ConnectorError::Connect(e.to_string()))?;

        info!(
            engine = %self.config.kind,
            host = %self.config.host,
            database = %self.config.database,
            "Connected to database"
        );

        if let Some(previous) = self.pool.write().await.replace(pool) {
            previous.close().await;
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            debug!(engine = %self.config.kind, "Pool closed");
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
                    comment: non_empty(row.try_get("comment")?),
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
                    key: non_empty(row.try_get("column_key")?),
                    extra: non_empty(row.try_get("extra")?),
                    comment: non_empty(row.try_get("comment")?),
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
                let columns: Option<String> = row.try_get("columns")?;
                let non_unique: i64 = row.try_get("non_unique")?;
                Ok(IndexInfo {
                    name: row.try_get("name")?,
                    columns: columns
                        .map(|c| c.split(',').map(str::to_string).collect())
                        .unwrap_or_default(),
                    unique: non_unique == 0,
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
