//! Error types and retry classification.
//!
//! Each concern of the server owns one error enum:
//!
//! - [`TunnelError`]: SSH authentication, key loading, listener binding
//! - [`ConnectorError`]: database driver failures
//! - [`QueryError`]: read-only validation and pagination
//! - [`DispatchError`]: resource routing and tool invocation
//! - [`SessionError`]: client session arbitration
//! - [`TransportError`]: stdio / HTTP transport failures
//! - [`ConfigError`]: CLI and environment resolution
//! - [`ServerError`]: orchestrator startup, wraps the fatal ones
//!
//! # Retry Classification
//!
//! Only the SSH connection attempt is retried. [`TunnelError::is_retryable`]
//! decides which failures are transient:
//!
//! 1. **Authentication failures (NOT retryable)**: rejected credentials, denied
//!    access. Retrying only risks account lockouts.
//! 2. **Key and bind failures (NOT retryable)**: local problems that will not
//!    change between attempts.
//! 3. **Connection errors (retryable)**: refused, reset, timed out, unreachable.
//!
//! Errors that carry only a message are classified by [`is_retryable_error`],
//! which matches known authentication and connection phrases.

use std::path::PathBuf;

use thiserror::Error;

/// Authentication failure patterns that should NOT be retried.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "permission denied",
    "publickey",
    "password authentication failed",
    "key authentication failed",
    "invalid credentials",
    "access denied",
    "no authentication",
    "all authentication methods failed",
];

/// Connection error patterns that indicate transient failures.
const RETRYABLE_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timeout",
    "timed out",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
    "handshake failed",
    "failed to connect",
    "broken pipe",
    "would block",
];

/// Failures raised while opening or running the SSH tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The server rejected every configured credential.
    #[error("SSH authentication failed for {username}@{host}: {reason}")]
    Authentication {
        username: String,
        host: String,
        reason: String,
    },

    /// The configured private key could not be read or decoded.
    #[error("Failed to read SSH private key {path:?}: {reason}")]
    KeyRead { path: PathBuf, reason: String },

    /// The local forwarding listener could not be bound.
    #[error("Failed to bind tunnel listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The TCP connection or SSH handshake with the jump host failed.
    #[error("SSH connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    /// A `direct-tcpip` channel could not be opened.
    #[error("Failed to open forwarding channel to {remote}: {reason}")]
    Channel { remote: String, reason: String },

    /// The SSH session failed mid-handshake or mid-authentication.
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// Neither a password nor a private key was configured.
    #[error("No SSH credentials configured: provide a password or a private key")]
    NoCredentials,
}

impl TunnelError {
    /// Whether the failed connection attempt is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            TunnelError::Authentication { .. }
            | TunnelError::KeyRead { .. }
            | TunnelError::Bind { .. }
            | TunnelError::NoCredentials => false,
            TunnelError::Connect { reason, .. } | TunnelError::Channel { reason, .. } => {
                is_retryable_error(reason)
            }
            TunnelError::Protocol(reason) => is_retryable_error(reason),
        }
    }
}

/// Failures raised by a database connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Not connected to database")]
    NotConnected,

    #[error("Database connection failed: {0}")]
    Connect(String),

    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Unsupported database type: {0}")]
    Unsupported(String),
}

/// Failures raised by the query executor before the database is reached.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error(
        "Write operations are not allowed in read-only mode. Only SELECT, SHOW, DESCRIBE, and EXPLAIN queries are permitted."
    )]
    NotReadOnly,

    #[error("Page number must be >= 1")]
    InvalidPage,

    #[error("Per page value must be >= 1")]
    InvalidPerPage,

    #[error("Offset must be >= 0")]
    InvalidOffset,

    #[error("Max rows must be >= 1")]
    InvalidMaxRows,

    #[error(
        "SQL query already contains LIMIT clause. Remove it to use pagination parameters."
    )]
    LimitConflict,

    /// A built-in SQL pattern did not compile; every statement is refused.
    #[error("SQL pattern failed to compile: {0}")]
    Pattern(String),
}

/// Failures raised while routing a resource read or tool call.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown resource URI: {0}")]
    UnknownResource(String),

    #[error("Invalid percent-encoding in resource URI segment: {0}")]
    InvalidSegment(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Failures of the single-session arbitration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("An MCP session is already active")]
    AlreadyActive,

    #[error("Server is shutting down")]
    Closing,
}

/// Failures of a client transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures while resolving configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Database name is required (--db-database or DB_DATABASE)")]
    MissingDatabase,

    #[error("Unsupported database type: {0}")]
    UnsupportedDatabase(String),

    #[error("Unsupported SSL mode: {0}")]
    UnsupportedSslMode(String),

    #[error("SSH tunnel requires exactly one of --ssh-password or --ssh-key")]
    AmbiguousSshCredentials,

    #[error("--ssh-passphrase requires --ssh-key")]
    PassphraseWithoutKey,

    #[error("Failed to parse .env file at {path}: {reason}")]
    EnvFile { path: String, reason: String },
}

/// Fatal failures of the server orchestrator.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Server already started")]
    AlreadyStarted,
}

/// Determines if an error message describes a transient failure.
///
/// # Classification Rules
///
/// 1. **Authentication failures are NOT retryable**: messages containing phrases
///    like "authentication failed" or "permission denied".
/// 2. **Connection errors ARE retryable**: "connection refused", "timeout",
///    "network is unreachable" and friends.
/// 3. **Unknown errors**: SSH protocol errors are not retried unless they also
///    mention a timeout or connect failure; anything else is retried.
///
/// Authentication patterns are checked first and take precedence.
pub(crate) fn is_retryable_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    if AUTH_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return false;
    }

    if RETRYABLE_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return true;
    }

    !error_lower.contains("ssh") || error_lower.contains("timeout") || error_lower.contains("connect")
}
