//! SSH client connection and authentication for the tunnel.
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: Build the russh client configuration with
//!    keepalive and compression settings.
//! 2. **Connection Establishment**: Establish the TCP connection to the SSH
//!    server, bounded by the configured connect timeout.
//! 3. **Authentication**: Authenticate with the single configured credential
//!    (password or private key).
//!
//! ## Retry Strategy
//!
//! Connection attempts use exponential backoff with jitter via the `backon` crate:
//!
//! - **Initial delay**: `SSH_RETRY_DELAY_MS` (default: 1000ms)
//! - **Maximum delay**: Capped at [`MAX_RETRY_DELAY`] (10 seconds)
//! - **Maximum attempts**: `SSH_MAX_RETRIES` (default: 3)
//! - **Jitter**: Random jitter is added to prevent thundering herd
//!
//! Authentication and key failures are never retried to avoid account lockouts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use russh::{client, keys};
use tracing::{error, info, warn};

use crate::mcp::auth::strategy_for;
use crate::mcp::config::{MAX_RETRY_DELAY, SshClientSettings, SshConfig};
use crate::mcp::error::TunnelError;

/// Client handler for russh that accepts all host keys.
///
/// Host keys are not verified, similar to `StrictHostKeyChecking=no` in
/// OpenSSH configuration.
pub struct TunnelClientHandler;

impl client::Handler for TunnelClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Build russh client configuration for a long-lived tunnel.
///
/// The tunnel has no inactivity timeout: it lives as long as the server.
/// Keepalives are sent every 30 seconds and the session is dropped after
/// 3 unanswered ones.
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Connect to the SSH server with retry logic using exponential backoff with jitter.
///
/// # Arguments
///
/// * `ssh` - Target host, port, user and credential
/// * `settings` - Timeout, retry and compression tuning
///
/// # Returns
///
/// * `Ok(handle)` - Authenticated session handle
/// * `Err(error)` - The last failure once retries are exhausted, or the
///   first non-retryable one
pub(crate) async fn connect_with_retry(
    ssh: &SshConfig,
    settings: &SshClientSettings,
) -> Result<client::Handle<TunnelClientHandler>, TunnelError> {
    let attempt_counter = AtomicU32::new(0);
    let address = ssh.address();

    let backoff = ExponentialBuilder::default()
        .with_min_delay(settings.retry_delay)
        .with_max_delay(MAX_RETRY_DELAY)
        .with_max_times(settings.max_retries as usize)
        .with_jitter();

    let result = (|| async {
        let current_attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);

        if current_attempt > 0 {
            warn!(
                "SSH connection retry attempt {} to {}@{}",
                current_attempt, ssh.username, address
            );
        }

        connect(ssh, settings).await
    })
    .retry(backoff)
    .when(|e: &TunnelError| {
        let retryable = e.is_retryable();
        if !retryable {
            warn!(
                "SSH connection to {}@{} failed with non-retryable error: {}",
                ssh.username, address, e
            );
        }
        retryable
    })
    .notify(|err, dur| {
        warn!("SSH connection failed: {}. Retrying in {:?}", err, dur);
    })
    .await;

    let total_attempts = attempt_counter.load(Ordering::SeqCst);

    match result {
        Ok(handle) => {
            if total_attempts > 1 {
                info!(
                    "SSH connection to {}@{} succeeded after {} retry attempt(s)",
                    ssh.username,
                    address,
                    total_attempts - 1
                );
            }
            Ok(handle)
        }
        Err(e) => {
            error!(
                "SSH connection to {}@{} failed after {} attempt(s). Last error: {}",
                ssh.username, address, total_attempts, e
            );
            Err(e)
        }
    }
}

/// Establish one SSH connection and authenticate it.
async fn connect(
    ssh: &SshConfig,
    settings: &SshClientSettings,
) -> Result<client::Handle<TunnelClientHandler>, TunnelError> {
    let config = build_client_config(settings.compress);
    let address = ssh.address();

    let connect_future = client::connect(config, (ssh.host.as_str(), ssh.port), TunnelClientHandler);

    let mut handle = tokio::time::timeout(settings.connect_timeout, connect_future)
        .await
        .map_err(|_| TunnelError::Connect {
            address: address.clone(),
            reason: format!("Connection timed out after {:?}", settings.connect_timeout),
        })?
        .map_err(|e| TunnelError::Connect {
            address: address.clone(),
            reason: format!("Failed to connect: {}", e),
        })?;

    let strategy = strategy_for(&ssh.auth);
    let accepted = strategy.authenticate(&mut handle, &ssh.username).await?;

    if !accepted {
        return Err(TunnelError::Authentication {
            username: ssh.username.clone(),
            host: address,
            reason: format!("{} authentication rejected", strategy.name()),
        });
    }

    info!(
        "SSH tunnel authenticated as {}@{} using {}",
        ssh.username,
        address,
        strategy.name()
    );
    Ok(handle)
}
