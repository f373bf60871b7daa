//! MCP server for Laravel databases, with optional SSH tunnelling.
//!
//! This module is organized into the following submodules:
//!
//! - `config`: CLI and environment resolution
//! - `error`: Error types and retry classification
//! - `auth`, `client`: SSH authentication and connection with retry
//! - `forward`, `storage`: the local port-forwarding tunnel
//! - `connector`: per-engine database access over `sqlx`
//! - `query`: read-only validation and pagination
//! - `message`: markdown rendering of results
//! - `protocol`, `types`, `schema`: JSON-RPC framing and MCP wire types
//! - `session`, `controller`, `dispatcher`: session arbitration and routing
//! - `transport`: stdio and streamable HTTP
//! - `server`: startup and shutdown orchestration

pub(crate) mod auth;
pub(crate) mod client;
pub mod config;
pub mod connector;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod forward;
pub mod message;
pub mod protocol;
pub mod query;
pub mod schema;
pub mod server;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

pub use server::DatabaseServer;
