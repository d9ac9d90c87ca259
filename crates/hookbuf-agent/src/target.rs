//! Document stores that batches are applied to
//!
//! - [`FsTargetStore`]: files under a vault directory on local disk
//! - [`MemoryTargetStore`]: an in-memory tree for tests

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AgentError, AgentResult};

/// What sits at a path in the document store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Minimal file-system surface needed to apply events
///
/// Paths are vault-relative and use `/` as separator.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// What exists at `path`, if anything
    async fn stat(&self, path: &str) -> AgentResult<Option<EntryKind>>;

    /// Create `path` and every missing parent directory
    async fn create_dir_all(&self, path: &str) -> AgentResult<()>;

    /// Read a file as text
    async fn read(&self, path: &str) -> AgentResult<String>;

    /// Replace the contents of a file, creating it if needed
    async fn write(&self, path: &str, content: &str) -> AgentResult<()>;
}

/// Target store backed by a directory on disk
#[derive(Debug, Clone)]
pub struct FsTargetStore {
    root: PathBuf,
}

impl FsTargetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a vault path onto disk
    ///
    /// A leading `/` is relative to the vault root. Paths may not leave it.
    fn resolve(&self, path: &str) -> AgentResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(AgentError::invalid_path(path, "escapes the vault")),
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl TargetStore for FsTargetStore {
    async fn stat(&self, path: &str) -> AgentResult<Option<EntryKind>> {
        let full = self.resolve(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => Ok(Some(EntryKind::Directory)),
            Ok(_) => Ok(Some(EntryKind::File)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::target(path, e)),
        }
    }

    async fn create_dir_all(&self, path: &str) -> AgentResult<()> {
        let full = self.resolve(path)?;
        debug!(path = %full.display(), "Creating directory");
        tokio::fs::create_dir_all(&full)
            .await
            .map_err(|e| AgentError::target(path, e))
    }

    async fn read(&self, path: &str) -> AgentResult<String> {
        let full = self.resolve(path)?;
        let bytes = tokio::fs::read(&full)
            .await
            .map_err(|e| AgentError::target(path, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn write(&self, path: &str, content: &str) -> AgentResult<()> {
        let full = self.resolve(path)?;
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| AgentError::target(path, e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MemoryEntry {
    File(String),
    Directory,
}

/// In-memory target store
///
/// Behaves like a strict file system: writing requires an existing parent
/// directory and a directory can never be overwritten by a file.
#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    entries: RwLock<BTreeMap<String, MemoryEntry>>,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    /// Parent directory key, `None` for entries at the root
    fn parent(key: &str) -> Option<&str> {
        key.rfind('/').map(|i| &key[..i])
    }

    /// Seed a file, creating its parents
    pub async fn insert_file(&self, path: &str, content: impl Into<String>) {
        let key = Self::key(path);
        let mut entries = self.entries.write().await;
        let mut parent = Self::parent(&key);
        while let Some(dir) = parent {
            entries.insert(dir.to_string(), MemoryEntry::Directory);
            parent = Self::parent(dir);
        }
        entries.insert(key, MemoryEntry::File(content.into()));
    }

    /// Seed an empty directory
    ///
    /// Ignored when a file is in the way.
    pub async fn insert_dir(&self, path: &str) {
        let _ = self.create_dir_all(path).await;
    }

    /// Remove an entry and everything below it
    pub async fn remove(&self, path: &str) {
        let key = Self::key(path);
        let nested = format!("{key}/");
        self.entries
            .write()
            .await
            .retain(|existing, _| existing != &key && !existing.starts_with(&nested));
    }

    /// Contents of a file, `None` when absent or a directory
    pub async fn content(&self, path: &str) -> Option<String> {
        match self.entries.read().await.get(&Self::key(path)) {
            Some(MemoryEntry::File(content)) => Some(content.clone()),
            _ => None,
        }
    }

    /// All files and their contents
    pub async fn files(&self) -> BTreeMap<String, String> {
        self.entries
            .read()
            .await
            .iter()
            .filter_map(|(path, entry)| match entry {
                MemoryEntry::File(content) => Some((path.clone(), content.clone())),
                MemoryEntry::Directory => None,
            })
            .collect()
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn stat(&self, path: &str) -> AgentResult<Option<EntryKind>> {
        let key = Self::key(path);
        if key.is_empty() {
            return Ok(Some(EntryKind::Directory));
        }
        Ok(self.entries.read().await.get(&key).map(|entry| match entry {
            MemoryEntry::File(_) => EntryKind::File,
            MemoryEntry::Directory => EntryKind::Directory,
        }))
    }

    async fn create_dir_all(&self, path: &str) -> AgentResult<()> {
        let key = Self::key(path);
        let mut entries = self.entries.write().await;

        let mut prefix = String::new();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            match entries.get(&prefix) {
                Some(MemoryEntry::File(_)) => {
                    return Err(AgentError::target(path, format!("{prefix} is a file")));
                }
                Some(MemoryEntry::Directory) => {}
                None => {
                    entries.insert(prefix.clone(), MemoryEntry::Directory);
                }
            }
        }
        Ok(())
    }

    async fn read(&self, path: &str) -> AgentResult<String> {
        match self.entries.read().await.get(&Self::key(path)) {
            Some(MemoryEntry::File(content)) => Ok(content.clone()),
            Some(MemoryEntry::Directory) => Err(AgentError::target(path, "is a directory")),
            None => Err(AgentError::target(path, "no such file")),
        }
    }

    async fn write(&self, path: &str, content: &str) -> AgentResult<()> {
        let key = Self::key(path);
        let mut entries = self.entries.write().await;

        if key.is_empty() || matches!(entries.get(&key), Some(MemoryEntry::Directory)) {
            return Err(AgentError::target(path, "is a directory"));
        }
        if let Some(parent) = Self::parent(&key)
            && !matches!(entries.get(parent), Some(MemoryEntry::Directory))
        {
            return Err(AgentError::target(path, "parent directory does not exist"));
        }

        entries.insert(key, MemoryEntry::File(content.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FsTargetStore::new(dir.path());

        assert_eq!(store.stat("notes/a.md").await.unwrap(), None);
        store.create_dir_all("notes").await.unwrap();
        store.write("notes/a.md", "hello").await.unwrap();

        assert_eq!(store.stat("notes").await.unwrap(), Some(EntryKind::Directory));
        assert_eq!(store.stat("notes/a.md").await.unwrap(), Some(EntryKind::File));
        assert_eq!(store.read("notes/a.md").await.unwrap(), "hello");
        assert!(dir.path().join("notes/a.md").is_file());
    }

    #[tokio::test]
    async fn test_fs_store_leading_slash_is_vault_relative() {
        let dir = TempDir::new().unwrap();
        let store = FsTargetStore::new(dir.path());

        store.write("/top.md", "x").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("top.md")).unwrap(),
            "x"
        );
    }

    #[tokio::test]
    async fn test_fs_store_rejects_parent_components() {
        let dir = TempDir::new().unwrap();
        let store = FsTargetStore::new(dir.path().join("vault"));

        let err = store.write("../escape.md", "x").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidPath { .. }));
        assert!(!dir.path().join("escape.md").exists());
    }

    #[tokio::test]
    async fn test_memory_store_requires_parent() {
        let store = MemoryTargetStore::new();

        tokio_test::assert_err!(store.write("a/b.md", "x").await);
        tokio_test::assert_ok!(store.create_dir_all("a").await);
        tokio_test::assert_ok!(store.write("a/b.md", "x").await);
        assert_eq!(store.content("a/b.md").await.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_memory_store_directory_is_not_writable() {
        let store = MemoryTargetStore::new();
        store.insert_dir("a/b").await;

        assert_eq!(store.stat("a").await.unwrap(), Some(EntryKind::Directory));
        assert!(store.write("a/b", "x").await.is_err());
        assert!(store.files().await.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_remove_subtree() {
        let store = MemoryTargetStore::new();
        store.insert_file("a/b/c.md", "x").await;
        store.insert_file("ab.md", "y").await;

        store.remove("a").await;

        assert_eq!(store.stat("a/b").await.unwrap(), None);
        assert_eq!(store.content("ab.md").await.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_memory_store_file_blocks_directory() {
        let store = MemoryTargetStore::new();
        store.insert_file("a", "x").await;

        assert!(store.create_dir_all("a/b").await.is_err());
    }
}
