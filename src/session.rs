//! Per-connection session state.
//!
//! A `Session` is created when a connection is accepted and destroyed when
//! its handler exits. The handler owns the read half of the transport; the
//! session holds the write half behind an async mutex so the registry's
//! broadcast path can reach it. No other task touches a session directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, MutexGuard};

use crate::channel::FramedWriter;

/// Write half of a session's transport, type-erased so the registry stays
/// non-generic over the underlying stream.
pub type BoxedWriter = FramedWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

/// Display name used for chat when anonymous sessions are permitted.
pub const ANONYMOUS_NAME: &str = "anonymous";

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// State for one connected, possibly-authenticated client.
pub struct Session {
    id: u64,
    /// Peer address label for logs.
    peer: String,
    state: RwLock<SessionState>,
    username: RwLock<Option<String>>,
    writer: Mutex<BoxedWriter>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &*self.state.read())
            .field("username", &*self.username.read())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session around the write half of a freshly accepted
    /// connection. Starts unauthenticated with no username.
    pub fn new(peer: impl Into<String>, writer: BoxedWriter) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            peer: peer.into(),
            state: RwLock::new(SessionState::Unauthenticated),
            username: RwLock::new(None),
            writer: Mutex::new(writer),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    pub fn username(&self) -> Option<String> {
        self.username.read().clone()
    }

    /// Name used when attributing chat lines. Anonymous sessions (permitted
    /// only when the server allows pre-auth commands) get a fixed label.
    pub fn display_name(&self) -> String {
        self.username
            .read()
            .clone()
            .unwrap_or_else(|| ANONYMOUS_NAME.to_string())
    }

    /// Transition to `Authenticated` and record the username. A repeated
    /// successful login re-evaluates credentials and overwrites the name.
    pub fn login(&self, username: &str) {
        *self.username.write() = Some(username.to_string());
        *self.state.write() = SessionState::Authenticated;
    }

    /// Mark the session closed. Called exactly once by the owning handler on
    /// its way out; the registry removal that follows is idempotent.
    pub fn close(&self) {
        *self.state.write() = SessionState::Closed;
    }

    /// Write one text line to this session's transport.
    pub async fn send_line(&self, line: &str) -> std::io::Result<()> {
        self.writer.lock().await.write_line(line).await
    }

    /// Lock the writer for a multi-write frame (discriminator line, metadata
    /// record, payload). Holding the guard across the whole frame keeps
    /// broadcast lines from interleaving mid-frame.
    pub async fn writer(&self) -> MutexGuard<'_, BoxedWriter> {
        self.writer.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::FramedWriter;

    fn discard_session() -> Arc<Session> {
        let writer: BoxedWriter = FramedWriter::new(Box::new(tokio::io::sink()));
        Session::new("test", writer)
    }

    #[tokio::test]
    async fn starts_unauthenticated() {
        let session = discard_session();
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(!session.is_authenticated());
        assert!(session.username().is_none());
        assert_eq!(session.display_name(), ANONYMOUS_NAME);
    }

    #[tokio::test]
    async fn login_sets_state_and_username() {
        let session = discard_session();
        session.login("alice");
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.username().as_deref(), Some("alice"));
        assert_eq!(session.display_name(), "alice");
    }

    #[tokio::test]
    async fn second_login_overwrites_username() {
        let session = discard_session();
        session.login("alice");
        session.login("bob");
        assert_eq!(session.username().as_deref(), Some("bob"));
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn close_transitions_state() {
        let session = discard_session();
        session.login("alice");
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let a = discard_session();
        let b = discard_session();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn send_line_reaches_transport() {
        let (client, server) = tokio::io::duplex(256);
        let writer: BoxedWriter = FramedWriter::new(Box::new(server));
        let session = Session::new("test", writer);

        session.send_line("hello").await.unwrap();
        drop(session);

        let mut received = String::new();
        use tokio::io::AsyncReadExt;
        let mut client = client;
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "hello\n");
    }
}
