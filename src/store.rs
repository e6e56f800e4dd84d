//! File store gateway: the abstracted server-side file directory.
//!
//! Handlers only see the [`FileStore`] trait (list/read/write by name).
//! Names are sanitized before any path is formed; a `..`-bearing or
//! separator-bearing name never reaches the filesystem.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::protocol::MAX_NAME_LEN;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("storage i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Validate a file name for use as a single path component.
///
/// Rejects empty and over-long names, path separators and traversal
/// components, control characters, and the protocol's own delimiters
/// (`|` would corrupt an `UPLOAD` announcement, `,` a `FILE_LIST` reply).
pub fn sanitize_name(name: &str) -> Result<&str, StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidName("empty name".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(StoreError::InvalidName(format!(
            "name exceeds {} bytes",
            MAX_NAME_LEN
        )));
    }
    if name == "." || name == ".." {
        return Err(StoreError::InvalidName(name.into()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(StoreError::InvalidName(
            "name must not contain path separators".into(),
        ));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(StoreError::InvalidName(
            "name must not contain control characters".into(),
        ));
    }
    if name.contains('|') || name.contains(',') {
        return Err(StoreError::InvalidName(
            "name must not contain protocol delimiters".into(),
        ));
    }
    Ok(name)
}

/// Server-side file storage, keyed by bare file name.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Names of all stored files, sorted.
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Full contents of one file.
    async fn read(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Store a file, replacing any previous contents under that name.
    async fn write(&self, name: &str, data: &[u8]) -> Result<(), StoreError>;
}

/// Filesystem-backed store rooted at a server-controlled directory.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open a store over an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open a store, creating the root directory if needed.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[async_trait]
impl FileStore for DirStore {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            // Skip names that cannot round-trip through the UTF-8 protocol.
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let name = sanitize_name(name)?;
        let path = self.root.join(name);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let name = sanitize_name(name)?;
        let path = self.root.join(name);
        tokio::fs::write(&path, data).await?;
        Ok(())
    }
}

/// In-memory store for tests and ephemeral servers.
#[derive(Default)]
pub struct MemStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStore for MemStore {
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let name = sanitize_name(name)?;
        self.files
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn write(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let name = sanitize_name(name)?;
        self.files.write().insert(name.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_accepts_plain_names() {
        assert!(sanitize_name("song.mp3").is_ok());
        assert!(sanitize_name("report-2.final.txt").is_ok());
        assert!(sanitize_name(".hidden").is_ok());
    }

    #[test]
    fn sanitize_rejects_traversal() {
        assert!(sanitize_name("..").is_err());
        assert!(sanitize_name("../etc/passwd").is_err());
        assert!(sanitize_name("a/b").is_err());
        assert!(sanitize_name("a\\b").is_err());
    }

    #[test]
    fn sanitize_rejects_empty_and_oversized() {
        assert!(sanitize_name("").is_err());
        assert!(sanitize_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn sanitize_rejects_delimiters_and_controls() {
        assert!(sanitize_name("a|b").is_err());
        assert!(sanitize_name("a,b").is_err());
        assert!(sanitize_name("a\nb").is_err());
    }

    #[tokio::test]
    async fn mem_store_round_trip() {
        let store = MemStore::new();
        store.write("a.txt", b"hello").await.unwrap();
        assert_eq!(store.read("a.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn mem_store_miss() {
        let store = MemStore::new();
        assert!(matches!(
            store.read("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn mem_store_list_sorted() {
        let store = MemStore::new();
        store.write("b.txt", b"2").await.unwrap();
        store.write("a.txt", b"1").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn dir_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path());

        store.write("song.mp3", &[1, 2, 3, 4, 5]).await.unwrap();
        assert_eq!(store.read("song.mp3").await.unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(store.list().await.unwrap(), vec!["song.mp3"]);
    }

    #[tokio::test]
    async fn dir_store_overwrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path());

        store.write("a.txt", b"first").await.unwrap();
        store.write("a.txt", b"second").await.unwrap();
        assert_eq!(store.read("a.txt").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn dir_store_miss_and_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::new(dir.path());

        assert!(matches!(
            store.read("missing.txt").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.read("../outside").await,
            Err(StoreError::InvalidName(_))
        ));
        assert!(matches!(
            store.write("../outside", b"x").await,
            Err(StoreError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn dir_store_list_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("subdir")).await.unwrap();
        let store = DirStore::new(dir.path());
        store.write("a.txt", b"1").await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn dir_store_create_makes_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("storage");
        let store = DirStore::create(&root).await.unwrap();
        store.write("a.txt", b"1").await.unwrap();
        assert!(root.join("a.txt").exists());
    }
}
