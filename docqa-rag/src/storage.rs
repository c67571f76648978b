//! Storage of uploaded files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{RagError, Result};

/// A place where uploaded files are kept.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a stored file.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Store `bytes` under `name` and return the stored path.
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf>;

    /// Remove a stored file. Missing files are not an error.
    async fn remove(&self, path: &Path) -> Result<()>;
}

/// Reduce an uploaded file name to a safe single path component.
///
/// Directory parts are stripped and every character other than ASCII
/// alphanumerics, `.`, `-` and `_` becomes `_`. Leading dots are dropped so
/// the result is never hidden or a parent reference. Returns `None` when
/// nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') { None } else { Some(cleaned) }
}

/// An [`ObjectStore`] rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store writing into `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory files are stored in.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> RagError {
    RagError::StorageError(format!("failed to {action} {}: {e}", path.display()))
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| io_error("read", path, e))
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let safe = sanitize_filename(name)
            .ok_or_else(|| RagError::InvalidInput(format!("invalid file name '{name}'")))?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error("create", &self.root, e))?;

        let path = self.root.join(&safe);
        let tmp = self.root.join(format!(".{safe}.tmp"));
        tokio::fs::write(&tmp, bytes).await.map_err(|e| io_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| io_error("rename", &tmp, e))?;

        debug!(path = %path.display(), bytes = bytes.len(), "stored upload");
        Ok(path)
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", path, e)),
        }
    }
}
