//! Client session state.
//!
//! A [`ClientSession`] is a cheap, cloneable handle. The controller keeps one
//! clone in its slot; transports keep others for the requests and streams they
//! are serving. Cancelling the session's token ends every long-lived stream
//! bound to it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque, unguessable session identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport a session was opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Newline-delimited JSON-RPC over stdin/stdout.
    Pipe,
    /// Streamable HTTP on `/mcp`.
    Streaming,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Pipe => write!(f, "stdio"),
            TransportKind::Streaming => write!(f, "http"),
        }
    }
}

struct SessionInner {
    id: SessionId,
    kind: TransportKind,
    created_at: DateTime<Utc>,
    protocol_version: OnceCell<String>,
    cancel: CancellationToken,
    stream_open: AtomicBool,
}

#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<SessionInner>,
}

impl ClientSession {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::generate(),
                kind,
                created_at: Utc::now(),
                protocol_version: OnceCell::new(),
                cancel: CancellationToken::new(),
                stream_open: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Version agreed during `initialize`, if it has happened.
    pub fn protocol_version(&self) -> Option<&str> {
        self.inner.protocol_version.get().map(String::as_str)
    }

    /// Record the negotiated version. Only the first call has an effect.
    pub fn set_protocol_version(&self, version: &str) {
        let _ = self.inner.protocol_version.set(version.to_string());
    }

    /// Token cancelled when the session ends.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Claim the session's single server-to-client stream.
    ///
    /// Returns `None` when a stream is already open. The claim is released
    /// when the returned guard is dropped.
    pub fn try_open_stream(&self) -> Option<StreamGuard> {
        self.inner
            .stream_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| StreamGuard {
                session: self.clone(),
            })
    }

    /// Whether `other` is a handle to this same session.
    pub fn same_as(&self, other: &ClientSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("created_at", &self.inner.created_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Exclusive claim on a session's event stream.
pub struct StreamGuard {
    session: ClientSession,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.session.inner.stream_open.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_uuids() {
        let a = ClientSession::new(TransportKind::Streaming);
        let b = ClientSession::new(TransportKind::Streaming);

        assert_ne!(a.id(), b.id());
        assert!(Uuid::parse_str(a.id().as_str()).is_ok());
    }

    #[test]
    fn test_protocol_version_set_once() {
        let session = ClientSession::new(TransportKind::Pipe);
        assert_eq!(session.protocol_version(), None);

        session.set_protocol_version("2025-03-26");
        session.set_protocol_version("2024-11-05");
        assert_eq!(session.protocol_version(), Some("2025-03-26"));
    }

    #[test]
    fn test_close_cancels_token_for_all_clones() {
        let session = ClientSession::new(TransportKind::Streaming);
        let token = session.cancellation();
        let clone = session.clone();

        clone.close();

        assert!(session.is_closed());
        assert!(token.is_cancelled());
        assert!(session.same_as(&clone));
    }

    #[test]
    fn test_single_stream_claim() {
        let session = ClientSession::new(TransportKind::Streaming);

        let guard = session.try_open_stream();
        assert!(guard.is_some());
        assert!(session.try_open_stream().is_none());

        drop(guard);
        assert!(session.try_open_stream().is_some());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(TransportKind::Pipe.to_string(), "stdio");
        assert_eq!(TransportKind::Streaming.to_string(), "http");
    }
}
