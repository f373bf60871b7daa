//! Plain-text renderings of introspection and query results.

use serde_json::Value;

use crate::mcp::types::{ColumnInfo, IndexInfo, ProcedureInfo, QueryResult, SchemaInfo, TableInfo};

use super::builder::MarkdownBuilder;

pub fn render_schemas(schemas: &[SchemaInfo]) -> String {
    let doc = MarkdownBuilder::new("Database Schemas");
    if schemas.is_empty() {
        return doc.line("No schemas found.").build();
    }

    schemas
        .iter()
        .fold(
            doc.line(format!("Found {} schema(s):", schemas.len())).blank(),
            |doc, schema| doc.bullet(&schema.name),
        )
        .build()
}

pub fn render_tables(schema: &str, tables: &[TableInfo]) -> String {
    let doc = MarkdownBuilder::new(format!("Tables in Schema: {}", schema));
    if tables.is_empty() {
        return doc.line("No tables found.").build();
    }

    tables
        .iter()
        .fold(
            doc.line(format!("Found {} table(s):", tables.len())).blank(),
            |doc, table| {
                let mut item = table.name.clone();
                if let Some(kind) = non_empty(&table.table_type) {
                    item.push_str(&format!(" ({})", kind));
                }
                if let Some(comment) = non_empty(&table.comment) {
                    item.push_str(&format!(" - {}", comment));
                }
                doc.bullet(item)
            },
        )
        .build()
}

pub fn render_table_structure(schema: &str, table: &str, columns: &[ColumnInfo]) -> String {
    let doc = MarkdownBuilder::new(format!("Table Structure: {}.{}", schema, table));
    if columns.is_empty() {
        return doc.line("No columns found.").build();
    }

    doc.line(format!("Found {} column(s):", columns.len()))
        .blank()
        .table(
            &["Column", "Type", "Nullable", "Default", "Key", "Extra", "Comment"],
            true,
            columns.iter().map(|c| {
                vec![
                    c.name.clone(),
                    c.data_type.clone(),
                    yes_no(c.nullable),
                    text_or_empty(&c.default),
                    text_or_empty(&c.key),
                    text_or_empty(&c.extra),
                    text_or_empty(&c.comment),
                ]
            }),
        )
        .build()
}

pub fn render_indexes(schema: &str, table: &str, indexes: &[IndexInfo]) -> String {
    let doc = MarkdownBuilder::new(format!("Indexes in Table: {}.{}", schema, table));
    if indexes.is_empty() {
        return doc.line("No indexes found.").build();
    }

    doc.line(format!("Found {} index(es):", indexes.len()))
        .blank()
        .table(
            &["Index Name", "Columns", "Unique", "Type"],
            true,
            indexes.iter().map(|i| {
                vec![
                    i.name.clone(),
                    i.columns.join(", "),
                    yes_no(i.unique),
                    text_or_empty(&i.index_type),
                ]
            }),
        )
        .build()
}

pub fn render_procedures(schema: &str, procedures: &[ProcedureInfo]) -> String {
    let doc = MarkdownBuilder::new(format!("Procedures in Schema: {}", schema));
    if procedures.is_empty() {
        return doc.line("No procedures found.").build();
    }

    doc.line(format!("Found {} procedure(s):", procedures.len()))
        .blank()
        .table(
            &["Name", "Type"],
            true,
            procedures
                .iter()
                .map(|p| vec![p.name.clone(), p.routine_type.clone()]),
        )
        .build()
}

pub fn render_procedure_detail(schema: &str, name: &str, procedure: Option<&ProcedureInfo>) -> String {
    let doc = MarkdownBuilder::new(format!("Procedure Details: {}.{}", schema, name));
    let Some(procedure) = procedure else {
        return doc.line("Procedure not found.").build();
    };

    let doc = doc
        .field("Name", &procedure.name)
        .field("Type", &procedure.routine_type)
        .blank();

    match non_empty(&procedure.definition) {
        Some(definition) => doc.line("**Definition:**").code("sql", definition).build(),
        None => doc.build(),
    }
}

pub fn render_query_result(result: &QueryResult) -> String {
    let doc = MarkdownBuilder::new("SQL Execution Result")
        .field("Rows affected/returned", result.row_count.to_string())
        .blank();

    if result.rows.is_empty() {
        return doc.line("*No rows returned.*").build();
    }
    if result.columns.is_empty() {
        return doc.build();
    }

    let headers: Vec<&str> = result.columns.iter().map(String::as_str).collect();
    doc.table(
        &headers,
        false,
        result
            .rows
            .iter()
            .map(|row| row.iter().map(render_cell).collect::<Vec<_>>()),
    )
    .build()
}

/// NULL for nulls, JSON for arrays and objects, the plain value otherwise.
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "YES" } else { "NO" }.to_string()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn text_or_empty(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}
