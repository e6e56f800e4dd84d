//! TCP server: accept loop and per-connection command dispatch.
//!
//! One task per accepted connection. Each task owns its session's read half
//! and runs the dispatch loop; the only cross-task path is chat broadcast
//! through the registry. Cleanup (close session, remove from registry, drop
//! transport) runs exactly once per connection regardless of exit path.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::channel::{ChannelError, FramedReader, FramedWriter};
use crate::protocol::{Command, FileMetadata, ProtocolError, Reply};
use crate::registry::Registry;
use crate::session::{BoxedWriter, Session};
use crate::store::{FileStore, StoreError};

/// Resource limits applied to every connection.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_file_size: u64,
    pub max_line_len: usize,
    pub upload_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        let config = crate::config::ServerConfig::default();
        Self {
            max_file_size: config.max_file_size,
            max_line_len: config.max_line_len,
            upload_timeout: Duration::from_secs(config.upload_timeout_secs),
        }
    }
}

/// Shared state handed to every connection handler.
#[derive(Clone)]
pub struct ServerState {
    pub registry: Registry,
    pub store: Arc<dyn FileStore>,
    pub auth: Arc<dyn Authenticator>,
    pub limits: Limits,
    /// Permit non-login commands from unauthenticated sessions.
    pub allow_anonymous: bool,
}

impl ServerState {
    pub fn new(store: Arc<dyn FileStore>, auth: Arc<dyn Authenticator>) -> Self {
        Self {
            registry: Registry::new(),
            store,
            auth,
            limits: Limits::default(),
            allow_anonymous: false,
        }
    }
}

/// Why a connection handler stopped.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The peer announced an upload the server cannot frame (malformed
    /// announcement or over-limit size). The payload may already be in
    /// flight, so the connection cannot be salvaged.
    #[error("unrecoverable upload announcement: {0}")]
    UploadRejected(String),

    #[error("upload payload did not arrive within {0:?}")]
    UploadTimeout(Duration),
}

/// Accept connections until `cancel` fires, spawning one handler task each.
pub async fn serve(
    listener: TcpListener,
    state: ServerState,
    cancel: CancellationToken,
) -> io::Result<()> {
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "filehub server listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("server received cancel signal, stopping accept loop");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, peer.to_string(), state).await {
                                tracing::debug!(%peer, error = %e, "connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(?e, "failed to accept connection");
                        // Backoff to prevent tight loop under sustained accept errors
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Handle one client connection from accept to disconnect.
///
/// Generic over the stream so tests can drive it with in-memory transports.
pub async fn handle_client<S>(
    stream: S,
    peer: String,
    state: ServerState,
) -> Result<(), HandlerError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let reader = FramedReader::with_max_line(read_half, state.limits.max_line_len);
    let writer: BoxedWriter =
        FramedWriter::new(Box::new(write_half) as Box<dyn AsyncWrite + Send + Unpin>);

    let session = Session::new(peer, writer);
    state.registry.add(session.clone());
    tracing::info!(session = session.id(), peer = session.peer(), "client connected");

    let result = dispatch_loop(reader, &session, &state).await;

    // Exactly-once cleanup: every exit path of the loop lands here.
    session.close();
    state.registry.remove(session.id());
    tracing::info!(
        session = session.id(),
        peer = session.peer(),
        user = session.username().as_deref().unwrap_or("-"),
        "client disconnected"
    );
    result
}

/// Read commands and dispatch until the stream ends or a fatal error.
async fn dispatch_loop<R: AsyncRead + Unpin>(
    mut reader: FramedReader<R>,
    session: &Arc<Session>,
    state: &ServerState,
) -> Result<(), HandlerError> {
    loop {
        let line = match reader.read_line().await? {
            Some(line) => line,
            None => return Ok(()),
        };

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e @ (ProtocolError::MalformedUpload | ProtocolError::BadLength(_))) => {
                // The peer may already be streaming a payload whose length
                // the server never learned; framing is indeterminate.
                let _ = session.send_line(&Reply::Error(e.to_string()).encode()).await;
                return Err(HandlerError::UploadRejected(e.to_string()));
            }
            Err(e) => {
                session.send_line(&Reply::Error(e.to_string()).encode()).await?;
                continue;
            }
        };

        // Login gate: everything except Login requires an authenticated
        // session unless anonymous access is explicitly enabled.
        if !session.is_authenticated()
            && !state.allow_anonymous
            && !matches!(command, Command::Login { .. })
        {
            session
                .send_line(&Reply::Error("Unauthorized".into()).encode())
                .await?;
            continue;
        }

        match command {
            Command::Login { user, pass } => handle_login(session, state, &user, &pass).await?,
            Command::ListFiles => handle_list(session, state).await?,
            Command::Download { name } => handle_download(session, state, &name).await?,
            Command::Upload { name, size } => {
                handle_upload(&mut reader, session, state, &name, size).await?
            }
            Command::Chat { text } => {
                let line = format!("{}: {}", session.display_name(), text);
                state.registry.broadcast(session.id(), &line).await;
            }
        }
    }
}

async fn handle_login(
    session: &Arc<Session>,
    state: &ServerState,
    user: &str,
    pass: &str,
) -> Result<(), HandlerError> {
    if state.auth.authenticate(user, pass) {
        session.login(user);
        tracing::info!(session = session.id(), user, "login succeeded");
        session.send_line(&Reply::LoginSuccess.encode()).await?;
    } else {
        tracing::debug!(session = session.id(), user, "login failed");
        session.send_line(&Reply::LoginFailed.encode()).await?;
    }
    Ok(())
}

async fn handle_list(session: &Arc<Session>, state: &ServerState) -> Result<(), HandlerError> {
    match state.store.list().await {
        Ok(names) => {
            session.send_line(&Reply::FileList(names).encode()).await?;
        }
        Err(e) => {
            tracing::warn!(session = session.id(), error = %e, "file list failed");
            session
                .send_line(&Reply::Error("Storage error".into()).encode())
                .await?;
        }
    }
    Ok(())
}

async fn handle_download(
    session: &Arc<Session>,
    state: &ServerState,
    name: &str,
) -> Result<(), HandlerError> {
    let data = match state.store.read(name).await {
        Ok(data) => data,
        Err(StoreError::NotFound(_)) => {
            session
                .send_line(&Reply::Error("File not found".into()).encode())
                .await?;
            return Ok(());
        }
        Err(StoreError::InvalidName(_)) => {
            session
                .send_line(&Reply::Error("Invalid file name".into()).encode())
                .await?;
            return Ok(());
        }
        Err(e) => {
            tracing::warn!(session = session.id(), name, error = %e, "file read failed");
            session
                .send_line(&Reply::Error("Storage error".into()).encode())
                .await?;
            return Ok(());
        }
    };

    // Discriminator line, metadata record, and payload under one writer lock
    // so a concurrent broadcast line cannot land inside the binary frame.
    let meta = FileMetadata::new(name, data.len() as u64);
    {
        let mut writer = session.writer().await;
        writer.write_line(&Reply::Ok.encode()).await?;
        writer.write_all(&meta.encode()).await?;
        writer.write_all(&data).await?;
    }
    tracing::debug!(session = session.id(), name, bytes = data.len(), "file sent");
    Ok(())
}

async fn handle_upload<R: AsyncRead + Unpin>(
    reader: &mut FramedReader<R>,
    session: &Arc<Session>,
    state: &ServerState,
    name: &str,
    size: u64,
) -> Result<(), HandlerError> {
    if size > state.limits.max_file_size {
        // The peer will stream the payload regardless of what we answer;
        // refuse and drop the connection rather than read it through.
        let detail = format!(
            "File too large: {} bytes exceeds limit {}",
            size, state.limits.max_file_size
        );
        let _ = session.send_line(&Reply::Error(detail.clone()).encode()).await;
        return Err(HandlerError::UploadRejected(detail));
    }

    let data = match tokio::time::timeout(state.limits.upload_timeout, reader.read_exact(size))
        .await
    {
        Ok(Ok(data)) => data,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            let _ = session
                .send_line(&Reply::Error("Upload timed out".into()).encode())
                .await;
            return Err(HandlerError::UploadTimeout(state.limits.upload_timeout));
        }
    };

    // Payload fully consumed; framing is intact even if the name is bad, so
    // name and storage errors stay command-scoped.
    match state.store.write(name, &data).await {
        Ok(()) => {
            tracing::info!(session = session.id(), name, bytes = data.len(), "file stored");
            session
                .send_line(&Reply::UploadSuccess(name.to_string()).encode())
                .await?;
        }
        Err(StoreError::InvalidName(_)) => {
            session
                .send_line(&Reply::Error("Invalid file name".into()).encode())
                .await?;
        }
        Err(e) => {
            tracing::warn!(session = session.id(), name, error = %e, "file write failed");
            session
                .send_line(&Reply::Error("Storage error".into()).encode())
                .await?;
        }
    }
    Ok(())
}
