//! Content-addressed storage for raw and derived document bytes.
//!
//! The [`ContentStore`] trait exposes key-level primitives (`path_exists`,
//! `get`, `put_path`) that each backend implements, and derives the
//! hash-addressed operations ([`exists`](ContentStore::exists),
//! [`put`](ContentStore::put)) from them so every backend dedupes the same
//! way: a blob's location is a function of its kind and hash only.
//!
//! ```text
//! <document_prefix>/raw/<sha256>    raw document bytes
//! <document_prefix>/text/<sha256>   extracted text, keyed by the raw hash
//! edgar/data/<cik>/<accession>.txt  cached composite filings
//! ```
//!
//! | Backend | Module |
//! |---------|--------|
//! | Local filesystem tree | [`local`] |
//! | S3 / S3-compatible bucket | [`s3`] |

pub mod local;
pub mod s3;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::StoreError;

/// Namespace of a content blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Raw,
    Text,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Raw => "raw",
            ContentKind::Text => "text",
        }
    }
}

/// Where a blob lives and whether this call wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub path: String,
    pub written: bool,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Short backend label for status output.
    fn backend(&self) -> &str;

    /// Human-readable root of the store (directory or bucket URL).
    fn location(&self) -> String;

    /// Prefix under which hash-addressed blobs are stored.
    fn document_prefix(&self) -> &str;

    async fn path_exists(&self, path: &str) -> Result<bool, StoreError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Write bytes at an explicit key, replacing anything already there.
    async fn put_path(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Key for a blob of the given kind and hash.
    fn blob_path(&self, hash: &str, kind: ContentKind) -> String {
        let prefix = self.document_prefix().trim_matches('/');
        if prefix.is_empty() {
            format!("{}/{}", kind.as_str(), hash)
        } else {
            format!("{}/{}/{}", prefix, kind.as_str(), hash)
        }
    }

    async fn exists(&self, hash: &str, kind: ContentKind) -> Result<bool, StoreError> {
        self.path_exists(&self.blob_path(hash, kind)).await
    }

    /// Store a blob once. Existing blobs are left untouched.
    async fn put(
        &self,
        hash: &str,
        kind: ContentKind,
        bytes: &[u8],
    ) -> Result<StoredBlob, StoreError> {
        let path = self.blob_path(hash, kind);
        if self.path_exists(&path).await? {
            debug!(path = %path, "blob already stored");
            return Ok(StoredBlob {
                path,
                written: false,
            });
        }
        self.put_path(&path, bytes).await?;
        debug!(path = %path, bytes = bytes.len(), "stored blob");
        Ok(StoredBlob {
            path,
            written: true,
        })
    }
}

/// Build the configured backend.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn ContentStore>> {
    match config.backend.as_str() {
        "local" => {
            let Some(local) = &config.local else {
                bail!("[storage.local] is not configured");
            };
            Ok(Arc::new(local::LocalStore::new(
                local.root.clone(),
                config.document_prefix.clone(),
            )))
        }
        "s3" => {
            let Some(s3) = &config.s3 else {
                bail!("[storage.s3] is not configured");
            };
            Ok(Arc::new(s3::S3Store::from_env(
                s3.clone(),
                config.document_prefix.clone(),
            )?))
        }
        other => bail!("Unknown storage backend: '{}'", other),
    }
}
