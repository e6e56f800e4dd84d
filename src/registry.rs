//! The concurrency-safe set of live sessions.
//!
//! The registry is the only state shared between connection handlers. All
//! mutation happens under one lock; broadcast takes a point-in-time snapshot
//! under that lock and performs its writes after release, so a fan-out never
//! iterates a set being mutated by a concurrent connect or disconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::session::Session;

/// Upper bound on one broadcast write. A wedged recipient is skipped rather
/// than allowed to stall delivery to everyone behind it.
const BROADCAST_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry of live sessions, cheap to clone and share across handlers.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<u64, Arc<Session>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Called once per accepted connection.
    pub fn add(&self, session: Arc<Session>) {
        self.inner.write().insert(session.id(), session);
    }

    /// Remove a session by id. Idempotent: returns `false` if the session was
    /// already gone (e.g. concurrent disconnect detection).
    pub fn remove(&self, id: u64) -> bool {
        self.inner.write().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Point-in-time copy of the live set, safe to iterate while other
    /// handlers add and remove sessions.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.inner.read().values().cloned().collect()
    }

    /// Deliver one chat line to every authenticated session except the
    /// sender. Per-recipient failures are logged and skipped; they never
    /// abort delivery to the remaining recipients. With no other sessions
    /// registered this is a no-op.
    pub async fn broadcast(&self, sender: u64, line: &str) {
        for session in self.snapshot() {
            if session.id() == sender || !session.is_authenticated() {
                continue;
            }
            match tokio::time::timeout(BROADCAST_WRITE_TIMEOUT, session.send_line(line)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // Recipient likely disconnected mid-broadcast; its own
                    // handler will remove it.
                    tracing::warn!(
                        session = session.id(),
                        peer = session.peer(),
                        error = %e,
                        "dropping broadcast recipient"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        session = session.id(),
                        peer = session.peer(),
                        "broadcast write timed out, skipping recipient"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{FramedReader, FramedWriter};
    use crate::session::BoxedWriter;
    use tokio::io::DuplexStream;

    fn session_with_peer() -> (Arc<Session>, FramedReader<DuplexStream>) {
        let (ours, theirs) = tokio::io::duplex(4096);
        let writer: BoxedWriter = FramedWriter::new(Box::new(ours));
        (Session::new("test", writer), FramedReader::new(theirs))
    }

    #[tokio::test]
    async fn add_and_remove() {
        let registry = Registry::new();
        let (session, _peer) = session_with_peer();
        let id = session.id();

        registry.add(session);
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = Registry::new();
        let (session, _peer) = session_with_peer();
        let id = session.id();

        registry.add(session);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(!registry.remove(9999));
    }

    #[tokio::test]
    async fn broadcast_skips_sender_and_unauthenticated() {
        let registry = Registry::new();

        let (alice, mut alice_rx) = session_with_peer();
        let (bob, mut bob_rx) = session_with_peer();
        let (ghost, _ghost_rx) = session_with_peer();

        alice.login("alice");
        bob.login("bob");
        // ghost never logs in and must not receive the line.

        registry.add(alice.clone());
        registry.add(bob.clone());
        registry.add(ghost.clone());

        registry.broadcast(alice.id(), "alice: hi").await;

        assert_eq!(bob_rx.read_line().await.unwrap().as_deref(), Some("alice: hi"));

        // The sender got nothing: close its writer and expect immediate EOF.
        drop(alice);
        registry.remove(ghost.id());
        drop(ghost);
        drop(registry);
        assert!(alice_rx.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn broadcast_with_no_recipients_is_noop() {
        let registry = Registry::new();
        let (alice, _rx) = session_with_peer();
        alice.login("alice");
        registry.add(alice.clone());

        // Only the sender is registered; must complete without error.
        registry.broadcast(alice.id(), "alice: anyone?").await;
    }

    #[tokio::test]
    async fn broadcast_survives_dead_recipient() {
        let registry = Registry::new();

        let (alice, _alice_rx) = session_with_peer();
        let (bob, bob_rx) = session_with_peer();
        let (carol, mut carol_rx) = session_with_peer();
        alice.login("alice");
        bob.login("bob");
        carol.login("carol");

        registry.add(alice.clone());
        registry.add(bob.clone());
        registry.add(carol.clone());

        // Bob's peer hangs up before the broadcast.
        drop(bob_rx);

        registry.broadcast(alice.id(), "alice: still there?").await;

        // Carol still receives it even though bob's write failed.
        assert_eq!(
            carol_rx.read_line().await.unwrap().as_deref(),
            Some("alice: still there?")
        );
    }

    #[tokio::test]
    async fn snapshot_is_stable_under_mutation() {
        let registry = Registry::new();
        let (alice, _a) = session_with_peer();
        let (bob, _b) = session_with_peer();
        registry.add(alice.clone());
        registry.add(bob.clone());

        let snapshot = registry.snapshot();
        registry.remove(alice.id());
        registry.remove(bob.id());

        // The copy is unaffected by removals that happened after it was taken.
        assert_eq!(snapshot.len(), 2);
        assert!(registry.is_empty());
    }
}
