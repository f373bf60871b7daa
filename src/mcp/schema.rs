//! JSON Schema helpers for MCP-compliant schemas.
//!
//! Generates standard JSON Schema without Rust-specific formats like "int64"
//! that LLMs may not understand correctly.

use schemars::Schema;
use schemars::json_schema;

use crate::mcp::types::ExecuteSqlParams;

/// Integer schema: `{"type": "integer"}`
///
/// Use with `#[schemars(schema_with = "crate::mcp::schema::integer")]` on
/// optional integer fields. Range checks happen at pagination time so that
/// the caller gets the descriptive error message.
pub fn integer(_generator: &mut schemars::SchemaGenerator) -> Schema {
    json_schema!({
        "type": "integer"
    })
}

/// Input schema published for the `execute_sql` tool.
pub fn execute_sql_input_schema() -> serde_json::Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(ExecuteSqlParams))
        .unwrap_or_else(|_| serde_json::json!({"type": "object"}));

    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    schema
}
