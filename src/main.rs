//! filehub - chat and file sharing over one TCP connection per client.
//!
//! ## Modes
//!
//! **Server mode** (`filehub server`): runs the daemon: accepts connections,
//! authenticates clients against the user table, fans chat out to every
//! authenticated session, and serves the shared file directory.
//!
//! **One-shot client commands** (`filehub list` / `send` / `fetch`): connect,
//! log in, perform a single catalog/upload/download operation, and exit.
//! There is no interactive console here; any line-oriented TCP client works
//! for chat.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filehub::auth::StaticAuthenticator;
use filehub::client::Client;
use filehub::config::{ConfigError, ServerConfig, UserFile};
use filehub::server::{serve, Limits, ServerState};
use filehub::store::{DirStore, StoreError};

/// filehub - a small multi-client chat and file-sharing server.
#[derive(Parser, Debug)]
#[command(name = "filehub", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the filehub server daemon
    Server {
        /// Address to bind the TCP listener (overrides config)
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Path to the server config file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory holding the shared files (overrides config)
        #[arg(long)]
        storage: Option<PathBuf>,

        /// Path to the user table file (TOML, overrides config)
        #[arg(long)]
        users: Option<PathBuf>,

        /// Permit commands from unauthenticated sessions
        #[arg(long)]
        allow_anonymous: bool,
    },

    /// List files available on the server
    List {
        #[command(flatten)]
        conn: ConnOpts,
    },

    /// Upload a local file to the server
    Send {
        /// Local file to upload
        file: PathBuf,

        /// Store under this name instead of the local file name
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        conn: ConnOpts,
    },

    /// Download a file from the server
    Fetch {
        /// Name of the file on the server
        name: String,

        /// Write to this path instead of the server-side name
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        conn: ConnOpts,
    },
}

/// Connection options shared by the one-shot client commands.
#[derive(Args, Debug)]
struct ConnOpts {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:7655")]
    addr: SocketAddr,

    /// Username
    #[arg(long, env = "FILEHUB_USER")]
    user: String,

    /// Password
    #[arg(long, env = "FILEHUB_PASSWORD")]
    password: String,
}

#[derive(Error, Debug)]
enum FilehubError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("login failed for user '{0}'")]
    LoginFailed(String),

    #[error("local file has no usable name: {0}")]
    BadLocalName(PathBuf),
}

#[tokio::main]
async fn main() -> Result<(), FilehubError> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server {
            bind,
            config,
            storage,
            users,
            allow_anonymous,
        } => run_server(bind, config, storage, users, allow_anonymous).await,
        Commands::List { conn } => run_list(conn).await,
        Commands::Send { file, name, conn } => run_send(file, name, conn).await,
        Commands::Fetch { name, output, conn } => run_fetch(name, output, conn).await,
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "filehub=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_server(
    bind: Option<SocketAddr>,
    config_path: Option<PathBuf>,
    storage: Option<PathBuf>,
    users: Option<PathBuf>,
    allow_anonymous: bool,
) -> Result<(), FilehubError> {
    let mut config = match &config_path {
        Some(path) => ServerConfig::load(path)?.unwrap_or_else(|| {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            ServerConfig::default()
        }),
        None => ServerConfig::default(),
    };

    // CLI flags override the file.
    if let Some(bind) = bind {
        config.bind = bind;
    }
    if let Some(storage) = storage {
        config.storage_dir = storage;
    }
    if let Some(users) = users {
        config.users_file = Some(users);
    }
    if allow_anonymous {
        config.allow_anonymous = true;
    }

    let user_table = match &config.users_file {
        Some(path) => UserFile::load(path)?.unwrap_or_else(|| {
            tracing::warn!(path = %path.display(), "user file not found");
            UserFile::default()
        }),
        None => UserFile::default(),
    };
    let auth = StaticAuthenticator::new(user_table.users);
    if auth.is_empty() && !config.allow_anonymous {
        tracing::warn!("user table is empty and anonymous access is off; no client can do anything");
    }

    let store = DirStore::create(&config.storage_dir).await?;
    tracing::info!(storage = %store.root().display(), "file store ready");

    let mut state = ServerState::new(Arc::new(store), Arc::new(auth));
    state.allow_anonymous = config.allow_anonymous;
    state.limits = Limits {
        max_file_size: config.max_file_size,
        max_line_len: config.max_line_len,
        upload_timeout: Duration::from_secs(config.upload_timeout_secs),
    };

    let listener = tokio::net::TcpListener::bind(config.bind).await?;

    let cancel = tokio_util::sync::CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down");
            signal_cancel.cancel();
        }
    });

    serve(listener, state, cancel).await?;
    Ok(())
}

async fn connect_and_login(conn: &ConnOpts) -> Result<Client, FilehubError> {
    let mut client = Client::connect(conn.addr).await?;
    if !client.login(&conn.user, &conn.password).await? {
        return Err(FilehubError::LoginFailed(conn.user.clone()));
    }
    Ok(client)
}

async fn run_list(conn: ConnOpts) -> Result<(), FilehubError> {
    let mut client = connect_and_login(&conn).await?;
    let names = client.list_files().await?;
    if names.is_empty() {
        println!("(no files)");
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

async fn run_send(
    file: PathBuf,
    name: Option<String>,
    conn: ConnOpts,
) -> Result<(), FilehubError> {
    let name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| FilehubError::BadLocalName(file.clone()))?,
    };
    let data = tokio::fs::read(&file).await?;

    let mut client = connect_and_login(&conn).await?;
    client.upload(&name, &data).await?;
    println!("uploaded {} ({} bytes)", name, data.len());
    Ok(())
}

async fn run_fetch(
    name: String,
    output: Option<PathBuf>,
    conn: ConnOpts,
) -> Result<(), FilehubError> {
    let mut client = connect_and_login(&conn).await?;
    let (meta, data) = client.download(&name).await?;

    let output = output.unwrap_or_else(|| PathBuf::from(&meta.name));
    tokio::fs::write(&output, &data).await?;
    println!("fetched {} ({} bytes) -> {}", meta.name, data.len(), output.display());
    Ok(())
}
