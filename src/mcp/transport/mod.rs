//! Client transports.
//!
//! - `stdio`: one persistent pipe, newline-delimited frames, implicit session
//! - `http`: streamable HTTP on `/mcp` with an explicit `mcp-session-id`

pub mod http;
pub mod stdio;

pub use http::{HttpTransport, MCP_PATH, SESSION_HEADER};
