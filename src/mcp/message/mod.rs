//! Markdown rendering of resource and tool responses.
//!
//! Every handler returns a single text blob so that transports treat all
//! responses uniformly.

mod builder;
mod render;

pub use builder::MarkdownBuilder;
pub use render::{
    render_cell, render_indexes, render_procedure_detail, render_procedures, render_query_result,
    render_schemas, render_table_structure, render_tables,
};
