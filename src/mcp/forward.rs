//! SSH tunnel to a database host that is only reachable through a jump host.
//!
//! The tunnel uses the `direct-tcpip` channel type defined in RFC 4254.
//!
//! # Architecture
//!
//! 1. **Authenticated session**: one SSH connection, authenticated before
//!    anything is bound locally.
//!
//! 2. **TCP Listener**: a listener on `127.0.0.1` at an OS-chosen port. Each
//!    accepted socket gets its own forwarding channel to the fixed remote
//!    `host:port`. A socket whose channel cannot be opened is dropped
//!    immediately and never tracked.
//!
//! 3. **Bidirectional I/O**: each pair is relayed with two `tokio::io::copy`
//!    directions joined in `tokio::select!`. Whichever direction ends first
//!    (EOF, reset or error) tears down both sides.
//!
//! Live pairs are tracked in a [`ConnectionRegistry`]. [`TunnelForwarder::close`]
//! force-closes them all without waiting for in-flight bytes to drain.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mcp::client::{TunnelClientHandler, connect_with_retry};
use crate::mcp::config::{SshClientSettings, SshConfig};
use crate::mcp::error::TunnelError;
use crate::mcp::storage::ConnectionRegistry;

/// Host the local listener binds to.
pub const TUNNEL_LOCAL_HOST: &str = "127.0.0.1";

/// Addresses of an open tunnel. Fixed for the tunnel's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl TunnelEndpoint {
    fn remote(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}

/// Opens the remote side of one forwarded connection.
#[async_trait]
pub trait ChannelOpener: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    async fn open_channel(&self, endpoint: &TunnelEndpoint) -> Result<Self::Stream, TunnelError>;
}

/// Opens `direct-tcpip` channels over an authenticated SSH session.
pub struct SshChannelOpener {
    handle: Arc<client::Handle<TunnelClientHandler>>,
}

#[async_trait]
impl ChannelOpener for SshChannelOpener {
    type Stream = russh::ChannelStream<client::Msg>;

    async fn open_channel(&self, endpoint: &TunnelEndpoint) -> Result<Self::Stream, TunnelError> {
        // The originator is the tunnel's own listener, by protocol convention.
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                endpoint.remote_host.clone(),
                endpoint.remote_port as u32,
                endpoint.local_host.clone(),
                endpoint.local_port as u32,
            )
            .await
            .map_err(|e| TunnelError::Channel {
                remote: endpoint.remote(),
                reason: e.to_string(),
            })?;

        Ok(channel.into_stream())
    }
}

/// Which side ended a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    LocalClosed,
    RemoteClosed,
    Cancelled,
}

/// Relay bytes between `local` and `remote` until either side closes or
/// `cancel` fires, then shut both down.
pub(crate) async fn relay<L, R>(local: L, remote: R, cancel: CancellationToken) -> RelayEnd
where
    L: AsyncRead + AsyncWrite,
    R: AsyncRead + AsyncWrite,
{
    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let end = tokio::select! {
        result = tokio::io::copy(&mut local_read, &mut remote_write) => {
            if let Err(e) = result {
                debug!("Local to remote copy ended: {}", e);
            }
            RelayEnd::LocalClosed
        }
        result = tokio::io::copy(&mut remote_read, &mut local_write) => {
            if let Err(e) = result {
                debug!("Remote to local copy ended: {}", e);
            }
            RelayEnd::RemoteClosed
        }
        _ = cancel.cancelled() => RelayEnd::Cancelled,
    };

    // Errors here mean the side is already gone.
    let _ = local_write.shutdown().await;
    let _ = remote_write.shutdown().await;

    end
}

/// Local listener half of the tunnel: accept loop plus tracked relays.
pub struct ForwardingListener {
    endpoint: TunnelEndpoint,
    connections: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ForwardingListener {
    /// Start accepting on an already bound listener.
    pub fn spawn<O: ChannelOpener>(
        listener: TcpListener,
        opener: Arc<O>,
        endpoint: TunnelEndpoint,
    ) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(accept_loop(
            listener,
            opener,
            Arc::new(endpoint.clone()),
            connections.clone(),
            shutdown.clone(),
        ));

        Self {
            endpoint,
            connections,
            shutdown,
            accept_task: Mutex::new(Some(task)),
        }
    }

    pub fn endpoint(&self) -> &TunnelEndpoint {
        &self.endpoint
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Force-close every relay and the listener. Safe to call repeatedly.
    pub async fn close(&self) -> usize {
        self.shutdown.cancel();
        let dropped = self.connections.close_all();

        if let Some(task) = self.accept_task.lock().await.take() {
            if let Err(e) = task.await {
                debug!("Tunnel accept task ended abnormally: {}", e);
            }
        }

        dropped
    }
}

async fn accept_loop<O: ChannelOpener>(
    listener: TcpListener,
    opener: Arc<O>,
    endpoint: Arc<TunnelEndpoint>,
    connections: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
) {
    debug!(
        "Tunnel listening on {}:{} -> {}",
        endpoint.local_host,
        endpoint.local_port,
        endpoint.remote()
    );

    loop {
        let (local_stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Error accepting tunnel connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        debug!("New tunnel connection from {}", peer);

        let opener = opener.clone();
        let endpoint = endpoint.clone();
        let connections = connections.clone();
        let cancel = shutdown.child_token();

        tokio::spawn(async move {
            let remote = match opener.open_channel(&endpoint).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Dropping tunnel connection from {}: {}", peer, e);
                    drop(local_stream);
                    return;
                }
            };

            let id = connections.register(peer, cancel.clone());
            let end = relay(local_stream, remote, cancel).await;
            connections.remove(id);

            debug!("Tunnel connection {} from {} closed ({:?})", id, peer, end);
        });
    }

    debug!("Tunnel listener on port {} closed", endpoint.local_port);
}

/// An open SSH tunnel: the authenticated session plus its local listener.
pub struct TunnelForwarder {
    listener: ForwardingListener,
    handle: Arc<client::Handle<TunnelClientHandler>>,
    closed: AtomicBool,
}

impl TunnelForwarder {
    /// Authenticate against the SSH server, then bind the local listener.
    ///
    /// # Arguments
    ///
    /// * `ssh` - Jump host and credential
    /// * `settings` - SSH client tuning (timeout, retries, compression)
    /// * `remote_host` - Database host as seen from the jump host
    /// * `remote_port` - Database port as seen from the jump host
    ///
    /// # Errors
    ///
    /// [`TunnelError::Authentication`] and [`TunnelError::KeyRead`] before
    /// anything is bound; [`TunnelError::Bind`] if the listener cannot bind.
    pub async fn open(
        ssh: &SshConfig,
        settings: &SshClientSettings,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Self, TunnelError> {
        Self::open_on_port(ssh, settings, 0, remote_host, remote_port).await
    }

    /// [`open`](Self::open) with an explicit local port; `0` lets the OS pick.
    pub async fn open_on_port(
        ssh: &SshConfig,
        settings: &SshClientSettings,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Self, TunnelError> {
        let handle = Arc::new(connect_with_retry(ssh, settings).await?);

        let bind_address = format!("{}:{}", TUNNEL_LOCAL_HOST, local_port);
        let listener = match TcpListener::bind(&bind_address).await {
            Ok(listener) => listener,
            Err(source) => {
                disconnect(&handle).await;
                return Err(TunnelError::Bind {
                    address: bind_address,
                    source,
                });
            }
        };

        let local_addr: SocketAddr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                disconnect(&handle).await;
                return Err(TunnelError::Bind {
                    address: bind_address,
                    source,
                });
            }
        };

        let endpoint = TunnelEndpoint {
            local_host: TUNNEL_LOCAL_HOST.to_string(),
            local_port: local_addr.port(),
            remote_host: remote_host.to_string(),
            remote_port,
        };

        info!(
            "SSH tunnel established: {}:{} -> {} via {}",
            endpoint.local_host,
            endpoint.local_port,
            endpoint.remote(),
            ssh.address()
        );

        let opener = Arc::new(SshChannelOpener {
            handle: handle.clone(),
        });

        Ok(Self {
            listener: ForwardingListener::spawn(listener, opener, endpoint),
            handle,
            closed: AtomicBool::new(false),
        })
    }

    /// `(host, port)` the database client should connect to.
    pub fn local_endpoint(&self) -> (&str, u16) {
        let endpoint = self.listener.endpoint();
        (endpoint.local_host.as_str(), endpoint.local_port)
    }

    /// Tear down every relay, the listener, then the SSH session. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let dropped = self.listener.close().await;
        disconnect(&self.handle).await;

        info!("SSH tunnel closed ({} connection(s) force-closed)", dropped);
    }
}

async fn disconnect(handle: &client::Handle<TunnelClientHandler>) {
    if let Err(e) = handle
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await
    {
        debug!("SSH disconnect failed: {}", e);
    }
}
