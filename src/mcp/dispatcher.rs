//! Resource and tool routing.
//!
//! Six resource URI shapes, matched in order (first match wins):
//!
//! 1. `db://schemas`
//! 2. `db://schemas/{schema}/tables`
//! 3. `db://schemas/{schema}/tables/{table}`
//! 4. `db://schemas/{schema}/tables/{table}/indexes`
//! 5. `db://schemas/{schema}/procedures`
//! 6. `db://schemas/{schema}/procedures/{procedure}`
//!
//! Segments must be non-empty, never contain `/`, and are percent-decoded
//! before reaching the connector. One tool, `execute_sql`, runs through the
//! [`QueryExecutor`] first.

use std::sync::Arc;

use percent_encoding::percent_decode_str;
use serde_json::Value;
use tracing::{debug, warn};

use crate::mcp::connector::DatabaseConnector;
use crate::mcp::error::DispatchError;
use crate::mcp::message::{
    render_indexes, render_procedure_detail, render_procedures, render_query_result,
    render_schemas, render_table_structure, render_tables,
};
use crate::mcp::protocol::RpcError;
use crate::mcp::query::QueryExecutor;
use crate::mcp::schema::execute_sql_input_schema;
use crate::mcp::types::{
    ExecuteSqlParams, ResourceContents, ResourceDescriptor, ResourceTemplateDescriptor,
    ToolDescriptor, ToolResult,
};

const SCHEMAS_URI: &str = "db://schemas";
const TEXT_MIME: &str = "text/plain";
pub const EXECUTE_SQL_TOOL: &str = "execute_sql";

const TEMPLATES: [(&str, &str, &str); 5] = [
    (
        "db://schemas/{schemaName}/tables",
        "Tables in Schema",
        "List all tables in a schema",
    ),
    (
        "db://schemas/{schemaName}/tables/{tableName}",
        "Table Structure",
        "Get the structure of a table",
    ),
    (
        "db://schemas/{schemaName}/tables/{tableName}/indexes",
        "Table Indexes",
        "Get indexes for a table",
    ),
    (
        "db://schemas/{schemaName}/procedures",
        "Procedures in Schema",
        "List all procedures in a schema",
    ),
    (
        "db://schemas/{schemaName}/procedures/{procedureName}",
        "Procedure Details",
        "Get details of a procedure",
    ),
];

/// A resource URI resolved to its handler and decoded arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRoute {
    Schemas,
    Tables { schema: String },
    TableStructure { schema: String, table: String },
    Indexes { schema: String, table: String },
    Procedures { schema: String },
    ProcedureDetail { schema: String, procedure: String },
}

impl ResourceRoute {
    pub fn parse(uri: &str) -> Result<Self, DispatchError> {
        let unknown = || DispatchError::UnknownResource(uri.to_string());

        let rest = uri.strip_prefix(SCHEMAS_URI).ok_or_else(unknown)?;
        if rest.is_empty() {
            return Ok(ResourceRoute::Schemas);
        }

        let path = rest.strip_prefix('/').ok_or_else(unknown)?;
        let segments: Vec<&str> = path.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(unknown());
        }

        match segments.as_slice() {
            [schema, "tables"] => Ok(ResourceRoute::Tables {
                schema: decode(schema)?,
            }),
            [schema, "tables", table] => Ok(ResourceRoute::TableStructure {
                schema: decode(schema)?,
                table: decode(table)?,
            }),
            [schema, "tables", table, "indexes"] => Ok(ResourceRoute::Indexes {
                schema: decode(schema)?,
                table: decode(table)?,
            }),
            [schema, "procedures"] => Ok(ResourceRoute::Procedures {
                schema: decode(schema)?,
            }),
            [schema, "procedures", procedure] => Ok(ResourceRoute::ProcedureDetail {
                schema: decode(schema)?,
                procedure: decode(procedure)?,
            }),
            _ => Err(unknown()),
        }
    }
}

fn decode(segment: &str) -> Result<String, DispatchError> {
    percent_decode_str(segment)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| DispatchError::InvalidSegment(segment.to_string()))
}

/// JSON-RPC error for a failed resource read or tool call.
pub fn rpc_error(error: &DispatchError) -> RpcError {
    match error {
        DispatchError::Connector(_) => RpcError::internal(error.to_string()),
        _ => RpcError::invalid_params(error.to_string()),
    }
}

pub struct RequestDispatcher {
    connector: Arc<dyn DatabaseConnector>,
    executor: QueryExecutor,
}

impl RequestDispatcher {
    pub fn new(connector: Arc<dyn DatabaseConnector>, executor: QueryExecutor) -> Self {
        Self { connector, executor }
    }

    pub fn list_resources(&self) -> Vec<ResourceDescriptor> {
        let mut resources = vec![ResourceDescriptor {
            uri: SCHEMAS_URI,
            name: "Database Schemas",
            description: "List all database schemas",
            mime_type: TEXT_MIME,
        }];
        resources.extend(TEMPLATES.iter().map(|&(uri, name, description)| ResourceDescriptor {
            uri,
            name,
            description,
            mime_type: TEXT_MIME,
        }));
        resources
    }

    pub fn list_resource_templates(&self) -> Vec<ResourceTemplateDescriptor> {
        TEMPLATES
            .iter()
            .map(|&(uri_template, name, description)| ResourceTemplateDescriptor {
                uri_template,
                name,
                description,
                mime_type: TEXT_MIME,
            })
            .collect()
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: EXECUTE_SQL_TOOL,
            description: "Execute a SQL query",
            input_schema: execute_sql_input_schema(),
        }]
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContents, DispatchError> {
        let route = ResourceRoute::parse(uri)?;
        debug!(uri = %uri, route = ?route, "Reading resource");

        let connector = &self.connector;
        let text = match &route {
            ResourceRoute::Schemas => render_schemas(&connector.list_schemas().await?),
            ResourceRoute::Tables { schema } => {
                render_tables(schema, &connector.list_tables(schema).await?)
            }
            ResourceRoute::TableStructure { schema, table } => render_table_structure(
                schema,
                table,
                &connector.table_structure(schema, table).await?,
            ),
            ResourceRoute::Indexes { schema, table } => {
                render_indexes(schema, table, &connector.list_indexes(schema, table).await?)
            }
            ResourceRoute::Procedures { schema } => {
                render_procedures(schema, &connector.list_procedures(schema).await?)
            }
            ResourceRoute::ProcedureDetail { schema, procedure } => render_procedure_detail(
                schema,
                procedure,
                connector.procedure_detail(schema, procedure).await?.as_ref(),
            ),
        };

        Ok(ResourceContents {
            uri: uri.to_string(),
            mime_type: TEXT_MIME,
            text,
        })
    }

    /// Invoke a tool.
    ///
    /// Unknown tools and malformed arguments are errors of the call itself.
    /// Validation, pagination and database failures are reported inside the
    /// result with `is_error` set.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, DispatchError> {
        if name != EXECUTE_SQL_TOOL {
            return Err(DispatchError::UnknownTool(name.to_string()));
        }

        let params: ExecuteSqlParams = serde_json::from_value(arguments)
            .map_err(|e| DispatchError::InvalidArguments(e.to_string()))?;

        match self.execute_sql(&params).await {
            Ok(text) => Ok(ToolResult::text(text)),
            Err(e) => {
                warn!(error = %e, "execute_sql failed");
                Ok(ToolResult::error(format!("SQL execution failed: {}", e)))
            }
        }
    }

    async fn execute_sql(&self, params: &ExecuteSqlParams) -> Result<String, DispatchError> {
        let sql = self.executor.prepare(params)?;
        debug!(
            engine = %self.connector.kind(),
            sql = %sql,
            readonly = self.executor.readonly(),
            "Executing SQL"
        );

        let result = self.connector.query(&sql).await?;
        Ok(render_query_result(&result))
    }
}
