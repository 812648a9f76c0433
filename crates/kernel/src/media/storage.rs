//! Media storage backends.
//!
//! Each upload gets its own write target, created exclusively so no two
//! writers ever share a path.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

/// Writer handed to the upload pipeline for a single record.
pub type StorageWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Storage target for media bytes.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Create a new, empty target at `path`. Fails if it already exists.
    async fn create(&self, path: &str) -> Result<StorageWriter>;

    /// Read a stored file.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete a stored file. A missing file is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if a stored file exists.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Public URL for a stored file.
    fn public_url(&self, path: &str) -> String;
}

/// Local filesystem storage rooted at a single directory.
pub struct LocalMediaStorage {
    /// Root directory for stored files.
    base_path: PathBuf,
    /// URL prefix under which stored files are served.
    base_url: String,
}

impl LocalMediaStorage {
    /// Create a new local storage.
    pub fn new(base_path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            base_url: base_url.into(),
        }
    }

    /// Root directory.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a relative storage path below the root.
    ///
    /// Rejects absolute paths and `..` components.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() {
            bail!("empty storage path");
        }
        for component in Path::new(path).components() {
            if !matches!(component, Component::Normal(_)) {
                bail!("storage path must be relative and may not leave the root");
            }
        }
        Ok(self.base_path.join(path))
    }
}

#[async_trait]
impl MediaStorage for LocalMediaStorage {
    async fn create(&self, path: &str) -> Result<StorageWriter> {
        let full = self.resolve(path)?;

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create upload directory")?;
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
            .with_context(|| format!("failed to create {}", full.display()))?;

        debug!(path = %path, "storage target created");
        Ok(Box::new(file))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).await.context("failed to read file")
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;

        match fs::remove_file(&full).await {
            Ok(()) => {
                debug!(path = %path, "file deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path, "file not found for deletion");
                Ok(())
            }
            Err(e) => Err(e).context("failed to delete file"),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        fs::try_exists(&full)
            .await
            .context("failed to check file existence")
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl std::fmt::Debug for LocalMediaStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMediaStorage")
            .field("base_path", &self.base_path)
            .field("base_url", &self.base_url)
            .finish()
    }
}
