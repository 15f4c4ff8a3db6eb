//! Local filesystem artifact storage.
//!
//! Documents are addressed by a relative key under a root directory and are
//! replaced atomically: the new content goes to a temp file that is then
//! renamed over the target.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::ArtifactStorage;

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Keys of the `.json` documents directly under `dir`, sorted.
    pub async fn list_json(&self, dir: &str) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(self.path(dir)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".json") {
                keys.push(format!("{}/{}", dir.trim_end_matches('/'), name));
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl ArtifactStorage for LocalStorage {
    async fn read_text(&self, key: &str) -> Result<Option<String>> {
        match self.read_bytes(key).await? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
                AppError::validation(format!("artifact {key} is not valid UTF-8: {e}"))
            }),
            None => Ok(None),
        }
    }

    async fn write_text(&self, key: &str, content: &str) -> Result<()> {
        self.write_bytes(key, content.as_bytes()).await
    }

    async fn remove_text(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}
