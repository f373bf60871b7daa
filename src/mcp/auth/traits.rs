//! Authentication strategy trait definition.

use async_trait::async_trait;
use russh::client;

use crate::mcp::client::TunnelClientHandler;
use crate::mcp::error::TunnelError;

/// Trait for SSH authentication strategies.
///
/// Implementations must be thread-safe (`Send + Sync`) because the tunnel
/// authenticates from inside the retry loop, which runs on the runtime.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate with the SSH server.
    ///
    /// # Arguments
    ///
    /// * `handle` - Mutable reference to the SSH client handle
    /// * `username` - Username for authentication
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - The server rejected the credentials
    /// * `Err(error)` - The credentials could not be presented at all
    async fn authenticate(
        &self,
        handle: &mut client::Handle<TunnelClientHandler>,
        username: &str,
    ) -> Result<bool, TunnelError>;

    /// Name used in log lines.
    fn name(&self) -> &'static str;
}
