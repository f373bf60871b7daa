//! Single-session controller.
//!
//! # States
//!
//! ```text
//! Idle ──open──▶ Active ──close / transport end──▶ Idle
//!   ▲                │
//!   │             shutdown
//!   │                ▼
//!   └────reset──── Closing
//! ```
//!
//! At most one [`ClientSession`] exists at a time. Opening a second one while
//! a session is active is rejected and leaves the first untouched. Shutdown
//! waits (bounded) for in-flight requests to be answered and leaves the
//! controller in `Closing`, refusing new sessions, until [`reset`] is called
//! once the transport has stopped.
//!
//! [`reset`]: SessionController::reset
//!
//! The controller also owns the MCP method table: transports hand it decoded
//! JSON-RPC bodies and write back whatever it returns.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::mcp::dispatcher::{RequestDispatcher, rpc_error};
use crate::mcp::error::SessionError;
use crate::mcp::protocol::{self, Incoming, RpcError, SERVER_NAME};
use crate::mcp::session::{ClientSession, TransportKind};

/// Upper bound on how long shutdown waits for in-flight requests.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Active,
    Closing,
}

enum SessionState {
    Idle,
    Active(ClientSession),
    Closing,
}

pub struct SessionController {
    state: Mutex<SessionState>,
    /// Held shared by every dispatch; shutdown takes it exclusively.
    in_flight: RwLock<()>,
    dispatcher: Arc<RequestDispatcher>,
}

impl SessionController {
    pub fn new(dispatcher: Arc<RequestDispatcher>) -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            in_flight: RwLock::new(()),
            dispatcher,
        }
    }

    pub async fn status(&self) -> SessionStatus {
        match &*self.state.lock().await {
            SessionState::Idle => SessionStatus::Idle,
            SessionState::Active(_) => SessionStatus::Active,
            SessionState::Closing => SessionStatus::Closing,
        }
    }

    pub async fn current(&self) -> Option<ClientSession> {
        match &*self.state.lock().await {
            SessionState::Active(session) => Some(session.clone()),
            _ => None,
        }
    }

    /// `Idle → Active`. Fails if a session is active or shutdown is underway.
    pub async fn open_session(&self, kind: TransportKind) -> Result<ClientSession, SessionError> {
        let mut state = self.state.lock().await;
        match &*state {
            SessionState::Active(_) => Err(SessionError::AlreadyActive),
            SessionState::Closing => Err(SessionError::Closing),
            SessionState::Idle => {
                let session = ClientSession::new(kind);
                info!(session_id = %session.id(), transport = %kind, "Session opened");
                *state = SessionState::Active(session.clone());
                Ok(session)
            }
        }
    }

    /// Close whatever session is active and open a fresh one.
    ///
    /// Used by the pipe transport, where an `initialize` on a live channel
    /// starts over.
    pub async fn replace_session(&self, kind: TransportKind) -> Result<ClientSession, SessionError> {
        let mut state = self.state.lock().await;
        match &*state {
            SessionState::Closing => return Err(SessionError::Closing),
            SessionState::Active(previous) => {
                info!(session_id = %previous.id(), "Session replaced by re-initialization");
                previous.close();
            }
            SessionState::Idle => {}
        }

        let session = ClientSession::new(kind);
        info!(session_id = %session.id(), transport = %kind, "Session opened");
        *state = SessionState::Active(session.clone());
        Ok(session)
    }

    /// Look up the active session by id.
    pub async fn session(&self, id: &str) -> Result<ClientSession, SessionError> {
        match &*self.state.lock().await {
            SessionState::Active(session) if session.id().as_str() == id => Ok(session.clone()),
            _ => Err(SessionError::NotFound),
        }
    }

    /// `Active → Idle` for the session with this id.
    pub async fn close_session(&self, id: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        match &*state {
            SessionState::Active(session) if session.id().as_str() == id => {
                session.close();
                info!(
                    session_id = %id,
                    transport = %session.kind(),
                    age_secs = session_age_secs(session),
                    "Session closed"
                );
                *state = SessionState::Idle;
                Ok(())
            }
            _ => Err(SessionError::NotFound),
        }
    }

    /// End `session` if it is still the active one. Used when its transport
    /// goes away; a no-op for sessions that were already replaced.
    pub async fn release(&self, session: &ClientSession) {
        let mut state = self.state.lock().await;
        let is_current = matches!(&*state, SessionState::Active(current) if current.same_as(session));
        if is_current {
            session.close();
            debug!(
                session_id = %session.id(),
                transport = %session.kind(),
                age_secs = session_age_secs(session),
                "Session released by transport"
            );
            *state = SessionState::Idle;
        }
    }

    /// `any → Closing`.
    ///
    /// Safe to call repeatedly and concurrently with in-flight requests. The
    /// controller keeps refusing sessions until [`reset`](Self::reset).
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            if let SessionState::Active(session) = &*state {
                info!(session_id = %session.id(), "Closing session for shutdown");
                session.close();
            }
            *state = SessionState::Closing;
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, self.in_flight.write())
            .await
            .is_err()
        {
            warn!("Timed out waiting for in-flight requests");
        }

        debug!("In-flight requests drained");
    }

    /// `Closing → Idle`. A no-op in any other state.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        if matches!(&*state, SessionState::Closing) {
            *state = SessionState::Idle;
            debug!("Session controller idle");
        }
    }

    /// Handle one JSON-RPC body (a single frame or a batch).
    ///
    /// Returns `None` when nothing needs to be sent back, i.e. the body held
    /// only notifications and responses.
    pub async fn handle_message(&self, session: &ClientSession, body: Value) -> Option<Value> {
        let _in_flight = self.in_flight.read().await;

        match body {
            Value::Array(frames) if frames.is_empty() => Some(protocol::failure(
                Value::Null,
                RpcError::invalid_request("Invalid Request: empty batch"),
            )),
            Value::Array(frames) => {
                let mut responses = Vec::with_capacity(frames.len());
                for frame in frames {
                    if let Some(response) = self.handle_frame(session, frame).await {
                        responses.push(response);
                    }
                }
                (!responses.is_empty()).then_some(Value::Array(responses))
            }
            frame => self.handle_frame(session, frame).await,
        }
    }

    async fn handle_frame(&self, session: &ClientSession, frame: Value) -> Option<Value> {
        match Incoming::parse(&frame) {
            Err((id, error)) => Some(protocol::failure(id, error)),
            Ok(Incoming::Notification { method }) => {
                debug!(method = %method, "Notification received");
                None
            }
            Ok(Incoming::Response) => None,
            Ok(Incoming::Request { id, method, params }) => {
                debug!(session_id = %session.id(), method = %method, "Request received");
                Some(match self.dispatch(session, &method, params).await {
                    Ok(result) => protocol::success(id, result),
                    Err(error) => protocol::failure(id, error),
                })
            }
        }
    }

    async fn dispatch(
        &self,
        session: &ClientSession,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        match method {
            "initialize" => {
                let requested = params.get("protocolVersion").and_then(Value::as_str);
                let version = protocol::negotiate_version(requested);
                session.set_protocol_version(version);

                Ok(json!({
                    "protocolVersion": version,
                    "capabilities": {"resources": {}, "tools": {}},
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }))
            }
            "ping" => Ok(json!({})),
            "resources/list" => Ok(json!({"resources": self.dispatcher.list_resources()})),
            "resources/templates/list" => Ok(json!({
                "resourceTemplates": self.dispatcher.list_resource_templates()
            })),
            "resources/read" => {
                let uri = params
                    .get("uri")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::invalid_params("Missing required parameter: uri"))?;

                let contents = self
                    .dispatcher
                    .read_resource(uri)
                    .await
                    .map_err(|e| rpc_error(&e))?;
                Ok(json!({"contents": [contents]}))
            }
            "tools/list" => Ok(json!({"tools": self.dispatcher.list_tools()})),
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::invalid_params("Missing required parameter: name"))?;
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

                let result = self
                    .dispatcher
                    .call_tool(name, arguments)
                    .await
                    .map_err(|e| rpc_error(&e))?;
                serde_json::to_value(result).map_err(|e| RpcError::internal(e.to_string()))
            }
            _ => Err(RpcError::method_not_found(method)),
        }
    }
}

fn session_age_secs(session: &ClientSession) -> i64 {
    (Utc::now() - session.created_at()).num_seconds()
}
