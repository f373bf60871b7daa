//! SQLite connector.
//!
//! The database file must already exist. In read-only mode the file is
//! opened read-only, so writes fail at the driver even if they slip past
//! statement validation. SQLite has a single schema, `main`, and no stored
//! routines.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{DatabaseConnector, bytes_to_value, returns_rows, unsupported_value};
use crate::mcp::config::{DatabaseConfig, DatabaseKind};
use crate::mcp::error::ConnectorError;
use crate::mcp::types::{ColumnInfo, IndexInfo, ProcedureInfo, QueryResult, SchemaInfo, TableInfo};

pub const MAIN_SCHEMA: &str = "main";

const TABLES_SQL: &str = "\
SELECT name, type
FROM sqlite_master
WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
ORDER BY name";

const COLUMNS_SQL: &str = "\
SELECT name, type, \"notnull\", dflt_value, pk
FROM pragma_table_info(?1)
ORDER BY cid";

const INDEX_LIST_SQL: &str = "\
SELECT name, \"unique\", origin
FROM pragma_index_list(?1)
ORDER BY name";

const INDEX_COLUMNS_SQL: &str = "\
SELECT name
FROM pragma_index_info(?1)
ORDER BY seqno";

pub struct SqliteConnector {
    config: DatabaseConfig,
    readonly: bool,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteConnector {
    pub fn new(config: DatabaseConfig, readonly: bool) -> Self {
        Self {
            config,
            readonly,
            pool: RwLock::new(None),
        }
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.config.database)
            .read_only(self.readonly)
            .create_if_missing(false)
    }

    async fn pool(&self) -> Result<SqlitePool, ConnectorError> {
        self.pool.read().await.clone().ok_or(ConnectorError::NotConnected)
    }
}

fn cell(row: &SqliteRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    let decoded = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(index).map(Value::from),
        "REAL" => row.try_get::<f64, _>(index).map(Value::from),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).map(bytes_to_value),
        _ => row.try_get::<String, _>(index).map(Value::String),
    };

    decoded.unwrap_or_else(|_| unsupported_value(&type_name))
}

fn rows_to_result(rows: &[SqliteRow]) -> QueryResult {
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

#[async_trait]
impl DatabaseConnector for SqliteConnector {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(self.connect_options())
            .await
            .map_err(|e| ConnectorError::Connect(e.to_string()))?;

        info!(
            path = %self.config.database,
            readonly = self.readonly,
            "Opened SQLite database"
        );

        if let Some(previous) = self.pool.write().await.replace(pool) {
            previous.close().await;
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            debug!("SQLite pool closed");
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
        self.pool().await?;
        Ok(vec![SchemaInfo {
            name: MAIN_SCHEMA.to_string(),
        }])
    }

    async fn list_tables(&self, _schema: &str) -> Result<Vec<TableInfo>, ConnectorError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(TABLES_SQL).fetch_all(&pool).await?;

        rows.iter()
            .map(|row| {
                Ok(TableInfo {
                    name: row.try_get("name")?,
                    table_type: row.try_get("type")?,
                    comment: None,
                })
            })
            .collect()
    }

    async fn table_structure(
        &self,
        _schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, ConnectorError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(COLUMNS_SQL).bind(table).fetch_all(&pool).await?;

        rows.iter()
            .map(|row| {
                let not_null: i64 = row.try_get("notnull")?;
                let pk: i64 = row.try_get("pk")?;
                Ok(ColumnInfo {
                    name: row.try_get("name")?,
                    data_type: row.try_get("type")?,
                    nullable: not_null == 0,
                    default: row.try_get("dflt_value")?,
                    key: (pk > 0).then(|| "PRI".to_string()),
                    extra: None,
                    comment: None,
                })
            })
            .collect()
    }

    async fn list_indexes(&self, _schema: &str, table: &str) -> Result<Vec<IndexInfo>, ConnectorError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(INDEX_LIST_SQL).bind(table).fetch_all(&pool).await?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.try_get("name")?;
            let unique: i64 = row.try_get("unique")?;

            let columns = sqlx::query(INDEX_COLUMNS_SQL)
                .bind(&name)
                .fetch_all(&pool)
                .await?
                .iter()
                .filter_map(|c| c.try_get::<Option<String>, _>("name").ok().flatten())
                .collect();

            indexes.push(IndexInfo {
                name,
                columns,
                unique: unique != 0,
                index_type: None,
            });
        }
        Ok(indexes)
    }

    async fn list_procedures(&self, _schema: &str) -> Result<Vec<ProcedureInfo>, ConnectorError> {
        self.pool().await?;
        Ok(Vec::new())
    }

    async fn procedure_detail(
        &self,
        _schema: &str,
        _name: &str,
    ) -> Result<Option<ProcedureInfo>, ConnectorError> {
        self.pool().await?;
        Ok(None)
    }

    async fn ping(&self) -> bool {
        match self.pool().await {
            Ok(pool) => sqlx::query("SELECT 1").execute(&pool).await.is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn config(path: &str) -> DatabaseConfig {
        DatabaseConfig {
            kind: DatabaseKind::Sqlite,
            host: String::new(),
            port: None,
            database: path.to_string(),
            username: None,
            password: None,
            ssl_mode: None,
        }
    }

    async fn seeded() -> (NamedTempFile, SqliteConnector) {
        let file = NamedTempFile::new().unwrap();
        let connector = SqliteConnector::new(config(file.path().to_str().unwrap()), false);
        connector.connect().await.unwrap();

        for sql in [
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT DEFAULT 'none', score REAL)",
            "CREATE UNIQUE INDEX users_email_unique ON users (email)",
            "CREATE INDEX users_name_score_index ON users (name, score)",
            "CREATE VIEW active_users AS SELECT * FROM users",
            "INSERT INTO users (name, email, score) VALUES ('Taylor', 'taylor@laravel.com', 9.5)",
            "INSERT INTO users (name, email, score) VALUES ('Abigail', NULL, NULL)",
        ] {
            connector.query(sql).await.unwrap();
        }
        (file, connector)
    }

    mod introspection {
        use super::*;

        #[tokio::test]
        async fn test_single_main_schema() {
            let (_file, connector) = seeded().await;
            let schemas = connector.list_schemas().await.unwrap();
            assert_eq!(schemas, vec![SchemaInfo { name: "main".to_string() }]);
        }

        #[tokio::test]
        async fn test_tables_and_views() {
            let (_file, connector) = seeded().await;
            let tables = connector.list_tables(MAIN_SCHEMA).await.unwrap();

            let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
            assert_eq!(names, vec!["active_users", "users"]);
            assert_eq!(tables[0].table_type.as_deref(), Some("view"));
            assert_eq!(tables[1].table_type.as_deref(), Some("table"));
        }

        #[tokio::test]
        async fn test_table_structure() {
            let (_file, connector) = seeded().await;
            let columns = connector.table_structure(MAIN_SCHEMA, "users").await.unwrap();

            assert_eq!(columns.len(), 4);
            assert_eq!(columns[0].name, "id");
            assert_eq!(columns[0].key.as_deref(), Some("PRI"));
            assert_eq!(columns[1].name, "name");
            assert!(!columns[1].nullable);
            assert_eq!(columns[2].default.as_deref(), Some("'none'"));
            assert!(columns[3].nullable);
        }

        #[tokio::test]
        async fn test_indexes() {
            let (_file, connector) = seeded().await;
            let indexes = connector.list_indexes(MAIN_SCHEMA, "users").await.unwrap();

            assert_eq!(indexes.len(), 2);
            assert_eq!(indexes[0].name, "users_email_unique");
            assert!(indexes[0].unique);
            assert_eq!(indexes[0].columns, vec!["email"]);
            assert_eq!(indexes[1].name, "users_name_score_index");
            assert!(!indexes[1].unique);
            assert_eq!(indexes[1].columns, vec!["name", "score"]);
        }

        #[tokio::test]
        async fn test_no_procedures() {
            let (_file, connector) = seeded().await;
            assert!(connector.list_procedures(MAIN_SCHEMA).await.unwrap().is_empty());
            assert_eq!(connector.procedure_detail(MAIN_SCHEMA, "p").await.unwrap(), None);
        }
    }

    mod queries {
        use super::*;

        #[tokio::test]
        async fn test_select_decodes_cells() {
            let (_file, connector) = seeded().await;
            let result = connector
                .query("SELECT id, name, email, score FROM users ORDER BY id")
                .await
                .unwrap();

            assert_eq!(result.columns, vec!["id", "name", "email", "score"]);
            assert_eq!(result.row_count, 2);
            assert_eq!(
                result.rows[0],
                vec![json!(1), json!("Taylor"), json!("taylor@laravel.com"), json!(9.5)]
            );
            assert_eq!(result.rows[1][2], Value::Null);
        }

        #[tokio::test]
        async fn test_write_reports_rows_affected() {
            let (_file, connector) = seeded().await;
            let result = connector.query("UPDATE users SET score = 1").await.unwrap();

            assert!(result.columns.is_empty());
            assert_eq!(result.row_count, 2);
        }

        #[tokio::test]
        async fn test_invalid_sql_is_query_error() {
            let (_file, connector) = seeded().await;
            let err = connector.query("SELECT * FROM missing").await.unwrap_err();
            assert!(matches!(err, ConnectorError::Query(_)));
        }

        #[tokio::test]
        async fn test_readonly_file_rejects_writes() {
            let (file, writer) = seeded().await;
            writer.disconnect().await;

            let reader = SqliteConnector::new(config(file.path().to_str().unwrap()), true);
            reader.connect().await.unwrap();

            assert_eq!(reader.query("SELECT COUNT(*) AS n FROM users").await.unwrap().rows[0][0], json!(2));
            assert!(reader.query("DELETE FROM users").await.is_err());
        }
    }

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn test_missing_file_fails_to_connect() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("database.sqlite");
            let connector = SqliteConnector::new(config(path.to_str().unwrap()), false);

            assert!(matches!(
                connector.connect().await,
                Err(ConnectorError::Connect(_))
            ));
            assert!(!path.exists());
        }

        #[tokio::test]
        async fn test_disconnect_is_idempotent() {
            let (_file, connector) = seeded().await;
            assert!(connector.ping().await);

            connector.disconnect().await;
            connector.disconnect().await;

            assert!(!connector.ping().await);
            assert!(matches!(
                connector.list_tables(MAIN_SCHEMA).await,
                Err(ConnectorError::NotConnected)
            ));
        }
    }
}
