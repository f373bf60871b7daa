//! Database connectors.
//!
//! One [`DatabaseConnector`] implementation per engine, selected once at
//! startup by [`create_connector`]:
//!
//! - [`PostgresConnector`]: `pgsql`
//! - [`MySqlConnector`]: `mysql` and `mariadb`
//! - [`SqliteConnector`]: `sqlite`
//!
//! Each connector owns an `sqlx` pool behind an `RwLock<Option<_>>`; every
//! operation fails with [`ConnectorError::NotConnected`] until `connect`
//! succeeds and after `disconnect`.

#[cfg(test)]
mod mock;
mod mysql;
mod postgres;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::mcp::config::{DatabaseConfig, DatabaseKind};
use crate::mcp::error::ConnectorError;
use crate::mcp::types::{ColumnInfo, IndexInfo, ProcedureInfo, QueryResult, SchemaInfo, TableInfo};

#[cfg(test)]
pub(crate) use mock::MockConnector;
pub use mysql::MySqlConnector;
pub use postgres::PostgresConnector;
pub use sqlite::SqliteConnector;

/// Capability set the dispatcher needs from a database.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    fn kind(&self) -> DatabaseKind;

    async fn connect(&self) -> Result<(), ConnectorError>;

    /// Close the pool. A no-op when not connected.
    async fn disconnect(&self);

    async fn query(&self, sql: &str) -> Result<QueryResult, ConnectorError>;

    async fn list_schemas(&self) -> Result<Vec<SchemaInfo>, ConnectorError>;

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableInfo>, ConnectorError>;

    async fn table_structure(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, ConnectorError>;

    async fn list_indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexInfo>, ConnectorError>;

    async fn list_procedures(&self, schema: &str) -> Result<Vec<ProcedureInfo>, ConnectorError>;

    async fn procedure_detail(
        &self,
        schema: &str,
        name: &str,
    ) -> Result<Option<ProcedureInfo>, ConnectorError>;

    async fn ping(&self) -> bool;
}

/// Build the connector for the configured engine.
pub fn create_connector(config: &DatabaseConfig, readonly: bool) -> Arc<dyn DatabaseConnector> {
    match config.kind {
        DatabaseKind::Postgres => Arc::new(PostgresConnector::new(config.clone())),
        DatabaseKind::MySql | DatabaseKind::MariaDb => Arc::new(MySqlConnector::new(config.clone())),
        DatabaseKind::Sqlite => Arc::new(SqliteConnector::new(config.clone(), readonly)),
    }
}

/// Whether a statement produces a result set rather than a row count.
pub(crate) fn returns_rows(sql: &str) -> bool {
    let first_word: String = sql
        .trim_start()
        .trim_start_matches('(')
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    matches!(
        first_word.as_str(),
        "SELECT" | "WITH" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "PRAGMA" | "VALUES" | "TABLE"
    )
}

/// Text for a binary cell, lossy for non-UTF-8 bytes.
pub(crate) fn bytes_to_value(bytes: Vec<u8>) -> serde_json::Value {
    serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
}

/// Placeholder for a cell whose type has no JSON rendering.
pub(crate) fn unsupported_value(type_name: &str) -> serde_json::Value {
    serde_json::Value::String(format!("<{}>", type_name))
}
