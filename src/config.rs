//! Server configuration and the user table file, both TOML.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level server config, loaded from TOML. Every field has a default so a
/// missing file or an empty one yields a runnable localhost server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the TCP listener binds.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Directory holding the shared files.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Path to the TOML user table. No file means no one can log in.
    pub users_file: Option<PathBuf>,
    /// Permit commands from unauthenticated sessions (reference behavior).
    /// Off by default: pre-auth commands get an Unauthorized error.
    #[serde(default)]
    pub allow_anonymous: bool,
    /// Largest accepted upload, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Largest accepted text line, in bytes.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
    /// Deadline for receiving a full upload payload.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

fn default_bind() -> SocketAddr {
    "127.0.0.1:7655".parse().expect("valid literal")
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("storage")
}

fn default_max_file_size() -> u64 {
    64 * 1024 * 1024
}

fn default_max_line_len() -> usize {
    crate::channel::DEFAULT_MAX_LINE
}

fn default_upload_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config parses via serde defaults")
    }
}

impl ServerConfig {
    /// Load config from a TOML file path. Returns `None` if the file doesn't
    /// exist.
    pub fn load(path: &std::path::Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }
}

/// One entry in the user table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub name: String,
    pub password: String,
}

/// The user table file: `[[users]]` entries with name and password.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserFile {
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

impl UserFile {
    /// Load the user table from a TOML file path. Returns `None` if the file
    /// doesn't exist.
    ///
    /// Checks file permissions and warns if world-readable.
    pub fn load(path: &std::path::Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        // The file holds passwords; warn if other users can read it.
        check_secret_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let users: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(users))
    }
}

/// Errors that can occur when loading config or user files.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse {}: {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Check file permissions on a secret-bearing file and warn if world-readable.
#[cfg(unix)]
pub fn check_secret_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if mode & 0o004 != 0 {
        tracing::warn!(
            "User file {} is world-readable (mode {:o}). \
             It contains passwords -- consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

/// No-op on non-Unix platforms.
#[cfg(not(unix))]
pub fn check_secret_permissions(_path: &std::path::Path) {}
