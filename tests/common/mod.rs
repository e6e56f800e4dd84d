//! Shared helpers for integration tests: spawn a real server on an
//! ephemeral port with an in-memory store and a fixed user table.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use filehub::auth::StaticAuthenticator;
use filehub::client::Client;
use filehub::config::UserEntry;
use filehub::server::{serve, ServerState};
use filehub::store::MemStore;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: ServerState,
    cancel: CancellationToken,
}

impl TestServer {
    /// Spawn a server with the default test state (MemStore, users
    /// alice/secret and bob/hunter2, auth required).
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn a server after letting the caller tweak the state (limits,
    /// anonymous mode, a different store).
    pub async fn spawn_with(tweak: impl FnOnce(&mut ServerState)) -> Self {
        let auth = StaticAuthenticator::new([
            UserEntry {
                name: "alice".into(),
                password: "secret".into(),
            },
            UserEntry {
                name: "bob".into(),
                password: "hunter2".into(),
            },
        ]);
        let mut state = ServerState::new(Arc::new(MemStore::new()), Arc::new(auth));
        tweak(&mut state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let cancel = CancellationToken::new();

        tokio::spawn(serve(listener, state.clone(), cancel.clone()));

        Self {
            addr,
            state,
            cancel,
        }
    }

    /// Connect and log in as the given user.
    pub async fn login(&self, user: &str, pass: &str) -> Client {
        let mut client = Client::connect(self.addr).await.expect("connect");
        assert!(client.login(user, pass).await.expect("login reply"));
        client
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
