//! Streamable HTTP transport on a single `/mcp` endpoint.
//!
//! | Request                                    | Outcome                              |
//! |--------------------------------------------|--------------------------------------|
//! | `POST` without session, body `initialize`  | new session, id in `mcp-session-id`  |
//! | `POST` without session, other body         | 400 `-32600` initialization required |
//! | `POST` without session, session active     | 409 `-32000` already active          |
//! | `POST`/`GET`/`DELETE` with unknown id      | 404 `-32004` session not found       |
//! | `POST` unparseable body                    | 400 `-32700`                         |
//! | `POST` notifications only                  | 202, empty body                      |
//! | `GET` without `Accept: text/event-stream`  | 406                                  |
//! | `GET` while a stream is open               | 409                                  |
//! | `DELETE` with matching id                  | 200, session cleared                 |
//! | other method / other path                  | 405 / 404                            |
//!
//! The `GET` stream carries no messages (the server never initiates
//! requests); it stays open with periodic `retry` hints until the session
//! ends.

use std::sync::Arc;
use std::time::Duration;

use poem::endpoint::BoxEndpoint;
use poem::error::NotFoundError;
use poem::http::{Method, StatusCode, header};
use poem::listener::{Listener, TcpAcceptor, TcpListener};
use poem::middleware::Tracing;
use poem::web::Data;
use poem::web::sse::{Event, SSE};
use poem::{Body, EndpointExt, IntoResponse, Request, Response, Route, Server, handler};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mcp::controller::SessionController;
use crate::mcp::error::{SessionError, TransportError};
use crate::mcp::protocol::{
    self, INVALID_REQUEST, NOT_FOUND, PARSE_ERROR, RpcError, SERVER_ERROR, SERVER_NAME,
};
use crate::mcp::session::{ClientSession, TransportKind};

pub const MCP_PATH: &str = "/mcp";
pub const SESSION_HEADER: &str = "mcp-session-id";

const EVENT_STREAM: &str = "text/event-stream";
const KEEP_ALIVE: Duration = Duration::from_secs(15);
const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(5);

/// A bound HTTP listener, ready to serve.
pub struct HttpTransport {
    acceptor: TcpAcceptor,
    address: String,
}

impl HttpTransport {
    /// Bind `host:port`. Binding happens up front so that an unavailable port
    /// is a startup failure.
    pub async fn bind(host: &str, port: u16) -> Result<Self, TransportError> {
        let address = format!("{}:{}", host, port);
        let acceptor = TcpListener::bind(address.clone()).into_acceptor().await?;
        Ok(Self { acceptor, address })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn serve(
        self,
        controller: Arc<SessionController>,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        info!(
            endpoint = %format!("http://{}{}", self.address, MCP_PATH),
            "MCP server listening"
        );

        Server::new_with_acceptor(self.acceptor)
            .name(SERVER_NAME)
            .run_with_graceful_shutdown(
                app(controller),
                async move { shutdown.cancelled().await },
                Some(GRACEFUL_SHUTDOWN),
            )
            .await?;

        debug!("HTTP transport stopped");
        Ok(())
    }
}

/// The `/mcp` application with JSON-RPC 404s for every other path.
pub fn app(controller: Arc<SessionController>) -> BoxEndpoint<'static> {
    Route::new()
        .at(MCP_PATH, mcp_endpoint)
        .data(controller)
        .catch_error(|_: NotFoundError| async move {
            error_response(StatusCode::NOT_FOUND, NOT_FOUND, "Not found")
        })
        .with(Tracing)
        .boxed()
}

#[handler]
async fn mcp_endpoint(
    req: &Request,
    body: Body,
    Data(controller): Data<&Arc<SessionController>>,
) -> Response {
    let session_id = req.header(SESSION_HEADER);

    match *req.method() {
        Method::POST => handle_post(controller, session_id, body).await,
        Method::GET => handle_get(controller, session_id, req.header(header::ACCEPT)).await,
        Method::DELETE => handle_delete(controller, session_id).await,
        _ => {
            let mut response =
                error_response(StatusCode::METHOD_NOT_ALLOWED, SERVER_ERROR, "Method not allowed");
            response
                .headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("GET, POST, DELETE"));
            response
        }
    }
}

async fn handle_post(
    controller: &SessionController,
    session_id: Option<&str>,
    body: Body,
) -> Response {
    let message: Value = match body.into_bytes().await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(message) => message,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    PARSE_ERROR,
                    &format!("Parse error: {}", e),
                );
            }
        },
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                PARSE_ERROR,
                &format!("Parse error: {}", e),
            );
        }
    };
    let initializing = protocol::contains_initialize_request(&message);

    match session_id {
        Some(id) => {
            let session = match controller.session(id).await {
                Ok(session) => session,
                Err(e) => return session_error_response(&e),
            };

            if initializing {
                warn!(session_id = %id, "Initialize received on an established session");
                let _ = controller.close_session(id).await;
                return error_response(
                    StatusCode::BAD_REQUEST,
                    INVALID_REQUEST,
                    "Invalid Request: Server already initialized",
                );
            }

            respond(controller, &session, message, false).await
        }
        None => {
            if controller.current().await.is_some() {
                return session_error_response(&SessionError::AlreadyActive);
            }
            if !initializing {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    INVALID_REQUEST,
                    "Bad Request: Server not initialized",
                );
            }

            match controller.open_session(TransportKind::Streaming).await {
                Ok(session) => respond(controller, &session, message, true).await,
                Err(e) => session_error_response(&e),
            }
        }
    }
}

async fn respond(
    controller: &SessionController,
    session: &ClientSession,
    message: Value,
    announce_session: bool,
) -> Response {
    let mut builder = Response::builder();
    if announce_session {
        builder = builder.header(SESSION_HEADER, session.id().as_str());
    }

    match controller.handle_message(session, message).await {
        Some(reply) => builder
            .status(StatusCode::OK)
            .content_type("application/json")
            .body(reply.to_string()),
        None => builder.status(StatusCode::ACCEPTED).finish(),
    }
}

async fn handle_get(
    controller: &SessionController,
    session_id: Option<&str>,
    accept: Option<&str>,
) -> Response {
    let session = match session_id {
        Some(id) => match controller.session(id).await {
            Ok(session) => session,
            Err(e) => return session_error_response(&e),
        },
        None => return session_error_response(&SessionError::NotFound),
    };

    if !accept.is_some_and(|a| a.contains(EVENT_STREAM)) {
        return error_response(
            StatusCode::NOT_ACCEPTABLE,
            SERVER_ERROR,
            "Not Acceptable: Client must accept text/event-stream",
        );
    }

    let Some(claim) = session.try_open_stream() else {
        return error_response(
            StatusCode::CONFLICT,
            SERVER_ERROR,
            "Conflict: Only one SSE stream is allowed per session",
        );
    };
    debug!(session_id = %session.id(), "Event stream opened");

    let token = session.cancellation();
    let stream = futures::stream::unfold((token, claim), |(token, claim)| async move {
        tokio::select! {
            _ = token.cancelled() => None,
            _ = tokio::time::sleep(KEEP_ALIVE) => {
                Some((Event::retry(KEEP_ALIVE.as_millis() as u64), (token, claim)))
            }
        }
    });

    SSE::new(stream).into_response()
}

async fn handle_delete(controller: &SessionController, session_id: Option<&str>) -> Response {
    let Some(id) = session_id else {
        return session_error_response(&SessionError::NotFound);
    };

    match controller.close_session(id).await {
        Ok(()) => json_response(
            StatusCode::OK,
            &protocol::success(Value::Null, serde_json::json!({})),
        ),
        Err(e) => session_error_response(&e),
    }
}

fn session_error_response(error: &SessionError) -> Response {
    let (status, code) = match error {
        SessionError::NotFound => (StatusCode::NOT_FOUND, NOT_FOUND),
        SessionError::AlreadyActive => (StatusCode::CONFLICT, SERVER_ERROR),
        SessionError::Closing => (StatusCode::SERVICE_UNAVAILABLE, SERVER_ERROR),
    };
    error_response(status, code, &error.to_string())
}

fn error_response(status: StatusCode, code: i64, message: &str) -> Response {
    json_response(status, &protocol::failure(Value::Null, RpcError::new(code, message)))
}

fn json_response(status: StatusCode, body: &Value) -> Response {
    Response::builder()
        .status(status)
        .content_type("application/json")
        .body(body.to_string())
}
