//! Pipe transport: newline-delimited JSON-RPC over stdin/stdout.
//!
//! The channel carries no session identifier. An `initialize` request opens
//! the implicit session (replacing any previous one); everything before it
//! is refused. The session ends when the input closes, on a write error, or
//! when shutdown is signalled.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::mcp::controller::SessionController;
use crate::mcp::error::TransportError;
use crate::mcp::protocol::{self, PARSE_ERROR, RpcError};
use crate::mcp::session::{ClientSession, TransportKind};

/// Serve the process's stdin/stdout until either closes or `shutdown` fires.
pub async fn serve(
    controller: Arc<SessionController>,
    shutdown: CancellationToken,
) -> Result<(), TransportError> {
    info!("MCP server listening on stdio");
    serve_io(controller, tokio::io::stdin(), tokio::io::stdout(), shutdown).await
}

pub async fn serve_io<R, W>(
    controller: Arc<SessionController>,
    reader: R,
    mut writer: W,
    shutdown: CancellationToken,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session: Option<ClientSession> = None;
    let result = read_loop(&controller, reader, &mut writer, &shutdown, &mut session).await;

    if let Some(session) = session {
        controller.release(&session).await;
    }

    match &result {
        Ok(()) => debug!("stdio transport finished"),
        Err(e) => error!(error = %e, "stdio transport failed"),
    }
    result
}

async fn read_loop<R, W>(
    controller: &SessionController,
    reader: R,
    writer: &mut W,
    shutdown: &CancellationToken,
    session: &mut Option<ClientSession>,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            debug!("stdin closed");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let body: Value = match serde_json::from_str(&line) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Unparseable frame on stdin");
                let error = RpcError::new(PARSE_ERROR, format!("Parse error: {}", e));
                write_frame(writer, &protocol::failure(Value::Null, error)).await?;
                continue;
            }
        };

        if protocol::contains_initialize_request(&body) {
            match controller.replace_session(TransportKind::Pipe).await {
                Ok(opened) => *session = Some(opened),
                Err(e) => {
                    if let Some(id) = request_id(&body) {
                        let error = RpcError::new(protocol::SERVER_ERROR, e.to_string());
                        write_frame(writer, &protocol::failure(id, error)).await?;
                    }
                    continue;
                }
            }
        }

        let active = match session.as_ref() {
            Some(active) if !active.is_closed() => active.clone(),
            _ => {
                if let Some(id) = request_id(&body) {
                    let error = RpcError::invalid_request("Bad Request: Server not initialized");
                    write_frame(writer, &protocol::failure(id, error)).await?;
                }
                continue;
            }
        };

        if let Some(response) = controller.handle_message(&active, body).await {
            write_frame(writer, &response).await?;
        }
    }
}

/// Id to echo when refusing a whole body; `null` for batches.
fn request_id(body: &Value) -> Option<Value> {
    match body {
        Value::Object(frame) => frame.get("id").cloned(),
        _ => Some(Value::Null),
    }
}

async fn write_frame<W>(writer: &mut W, frame: &Value) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
