//! Process orchestration.
//!
//! Startup runs tunnel → connector → transport; a failure at any step tears
//! down what already started. Shutdown runs the other way: stop the
//! transport, close the active session, disconnect the database, close the
//! tunnel. Both `start` failures and `stop` are safe to follow with another
//! `stop`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::mcp::config::{DatabaseKind, ServerConfig, TransportMode};
use crate::mcp::connector::{DatabaseConnector, create_connector};
use crate::mcp::controller::SessionController;
use crate::mcp::dispatcher::RequestDispatcher;
use crate::mcp::error::ServerError;
use crate::mcp::forward::TunnelForwarder;
use crate::mcp::query::QueryExecutor;
use crate::mcp::transport::{HttpTransport, stdio};

/// How long `stop` waits for the transport task to finish.
const TRANSPORT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

struct Running {
    tunnel: Option<TunnelForwarder>,
    connector: Arc<dyn DatabaseConnector>,
    controller: Arc<SessionController>,
    transport_shutdown: CancellationToken,
    transport_task: JoinHandle<()>,
}

pub struct DatabaseServer {
    config: ServerConfig,
    running: Mutex<Option<Running>>,
    transport_finished: CancellationToken,
}

impl DatabaseServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
            transport_finished: CancellationToken::new(),
        }
    }

    pub async fn start(&self) -> Result<(), ServerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        info!("Starting Laravel Database MCP Server");
        let mut database = self.config.database.clone();

        let tunnel = match (&self.config.ssh, database.kind) {
            (Some(_), DatabaseKind::Sqlite) => {
                warn!("SSH tunnel ignored for SQLite databases");
                None
            }
            (Some(ssh), kind) => {
                let remote_port = database.port.or(kind.default_port()).unwrap_or(3306);
                info!("Setting up SSH tunnel");
                let tunnel = TunnelForwarder::open(
                    ssh,
                    &self.config.ssh_client,
                    &database.host,
                    remote_port,
                )
                .await?;

                let (local_host, local_port) = tunnel.local_endpoint();
                database.host = local_host.to_string();
                database.port = Some(local_port);
                Some(tunnel)
            }
            (None, _) => None,
        };

        info!(engine = %database.kind, "Connecting to database");
        let connector = create_connector(&database, self.config.readonly);
        if let Err(e) = connector.connect().await {
            close_tunnel(tunnel.as_ref()).await;
            return Err(e.into());
        }
        info!("Database connection established");

        let dispatcher = RequestDispatcher::new(
            connector.clone(),
            QueryExecutor::new(self.config.readonly, self.config.max_rows),
        );
        let controller = Arc::new(SessionController::new(Arc::new(dispatcher)));
        let transport_shutdown = CancellationToken::new();

        let transport_task = match self.config.transport {
            TransportMode::Stdio => {
                let task = stdio::serve(controller.clone(), transport_shutdown.clone());
                self.spawn_transport(async move { task.await.map_err(ServerError::from) })
            }
            TransportMode::Http => {
                let http = match HttpTransport::bind(&self.config.http_host, self.config.http_port).await {
                    Ok(http) => http,
                    Err(e) => {
                        connector.disconnect().await;
                        close_tunnel(tunnel.as_ref()).await;
                        return Err(e.into());
                    }
                };
                let task = http.serve(controller.clone(), transport_shutdown.clone());
                self.spawn_transport(async move { task.await.map_err(ServerError::from) })
            }
        };

        info!(transport = ?self.config.transport, "MCP Server started successfully");

        *running = Some(Running {
            tunnel,
            connector,
            controller,
            transport_shutdown,
            transport_task,
        });
        Ok(())
    }

    fn spawn_transport<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), ServerError>> + Send + 'static,
    {
        let finished = self.transport_finished.clone();
        tokio::spawn(
            async move {
                if let Err(e) = task.await {
                    warn!(error = %e, "Transport stopped with error");
                }
                finished.cancel();
            }
            .in_current_span(),
        )
    }

    /// Resolves once the transport has stopped on its own (stdin closed,
    /// listener failure) or been stopped.
    pub async fn finished(&self) {
        self.transport_finished.cancelled().await;
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Stop everything that `start` brought up. Idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            debug!("Server not running");
            return;
        };

        info!("Shutting down server");
        running.shutdown().await;
        info!("Server stopped");
    }
}

impl Running {
    /// The controller stays `Closing` until the transport task is joined, so
    /// connections the transport is still draining cannot open a session
    /// against a database that is about to go away.
    async fn shutdown(self) {
        self.transport_shutdown.cancel();
        self.controller.shutdown().await;

        if tokio::time::timeout(TRANSPORT_STOP_TIMEOUT, self.transport_task)
            .await
            .is_err()
        {
            warn!("Transport did not stop in time");
        }
        self.controller.reset().await;

        self.connector.disconnect().await;
        close_tunnel(self.tunnel.as_ref()).await;
    }
}

async fn close_tunnel(tunnel: Option<&TunnelForwarder>) {
    if let Some(tunnel) = tunnel {
        tunnel.close().await;
    }
}
