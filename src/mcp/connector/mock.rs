//! In-memory connector for dispatcher and controller tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use super::DatabaseConnector;
use crate::mcp::config::DatabaseKind;
use crate::mcp::error::ConnectorError;
use crate::mcp::types::{ColumnInfo, IndexInfo, ProcedureInfo, QueryResult, SchemaInfo, TableInfo};

/// Records every call and answers with canned data.
#[derive(Default)]
pub(crate) struct MockConnector {
    pub calls: Mutex<Vec<String>>,
    pub fail: bool,
}

impl MockConnector {
    fn record(&self, call: String) -> Result<(), ConnectorError> {
        self.calls.lock().unwrap().push(call);
        if self.fail {
            Err(ConnectorError::NotConnected)
        } else {
            Ok(())
        }
    }

    pub fn last_call(&self) -> Option<String> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl DatabaseConnector for MockConnector {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::MySql
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        self.record("connect".to_string())
    }

    async fn disconnect(&self) {
        let _ = self.record("disconnect".to_string());
    }

    async fn query(&self, sql: &str) -> Result<QueryResult, ConnectorError> {
        self.record(format!("query({})", sql))?;
        Ok(QueryResult {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![vec![json!(1), json!("Taylor")]],
            row_count: 1,
        })
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaInfo>, ConnectorError> {
        self.record("list_schemas".to_string())?;
        Ok(vec![SchemaInfo {
            name: "app".to_string(),
        }])
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableInfo>, ConnectorError> {
        self.record(format!("list_tables({})", schema))?;
        Ok(vec![TableInfo {
            name: "users".to_string(),
            table_type: Some("BASE TABLE".to_string()),
            comment: None,
        }])
    }

    async fn table_structure(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, ConnectorError> {
        self.record(format!("table_structure({}, {})", schema, table))?;
        Ok(Vec::new())
    }

    async fn list_indexes(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, ConnectorError> {
        self.record(format!("list_indexes({}, {})", schema, table))?;
        Ok(vec![IndexInfo {
            name: "PRIMARY".to_string(),
            columns: vec!["id".to_string()],
            unique: true,
            index_type: Some("BTREE".to_string()),
        }])
    }

    async fn list_procedures(&self, schema: &str) -> Result<Vec<ProcedureInfo>, ConnectorError> {
        self.record(format!("list_procedures({})", schema))?;
        Ok(Vec::new())
    }

    async fn procedure_detail(
        &self,
        schema: &str,
        name: &str,
    ) -> Result<Option<ProcedureInfo>, ConnectorError> {
        self.record(format!("procedure_detail({}, {})", schema, name))?;
        Ok(None)
    }

    async fn ping(&self) -> bool {
        !self.fail
    }
}
