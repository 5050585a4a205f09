//! Local filesystem backend.
//!
//! Keys map onto paths under a root directory. Writes go to a temporary
//! sibling first and are renamed into place, so a reader never observes a
//! half-written blob even when two workers store the same hash at once.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use super::ContentStore;
use crate::error::StoreError;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct LocalStore {
    root: PathBuf,
    document_prefix: String,
}

impl LocalStore {
    pub fn new(root: PathBuf, document_prefix: String) -> Self {
        Self {
            root,
            document_prefix,
        }
    }

    /// Resolve a key under the root, dropping anything that would escape it.
    fn resolve(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for component in Path::new(key.trim_start_matches('/')).components() {
            if let Component::Normal(part) = component {
                path.push(part);
            }
        }
        path
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl ContentStore for LocalStore {
    fn backend(&self) -> &str {
        "local"
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn document_prefix(&self) -> &str {
        &self.document_prefix
    }

    async fn path_exists(&self, path: &str) -> Result<bool, StoreError> {
        let full = self.resolve(path);
        tokio::fs::try_exists(&full)
            .await
            .map_err(|e| io_error(&full, e))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let full = self.resolve(path);
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => Err(io_error(&full, e)),
        }
    }

    async fn put_path(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let file_name = full
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = full.with_file_name(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &full)
            .await
            .map_err(|e| io_error(&full, e))?;
        Ok(())
    }
}
