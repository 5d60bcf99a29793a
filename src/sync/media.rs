//! Reading local media handles

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// Bytes and MIME type of a local media item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    /// Raw content
    pub bytes: Bytes,
    /// MIME type, e.g. `image/jpeg`
    pub mime: String,
}

impl MediaBlob {
    /// File extension derived from the MIME subtype, `bin` when absent
    ///
    /// Parameters and structured-syntax suffixes are dropped, so
    /// `image/svg+xml; charset=utf-8` yields `svg`.
    pub fn extension(&self) -> &str {
        let subtype = self
            .mime
            .split_once('/')
            .map_or("", |(_, rest)| rest)
            .split([';', '+'])
            .next()
            .unwrap_or_default()
            .trim();
        if subtype.is_empty() {
            "bin"
        } else {
            subtype
        }
    }
}

/// Platform capability that resolves a local media handle to bytes
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Read the media behind `handle`
    async fn read(&self, handle: &str) -> Result<MediaBlob>;
}

/// Reads `file:` URLs and plain paths from the filesystem
#[derive(Debug, Default, Clone)]
pub struct FsMediaSource;

#[async_trait]
impl MediaSource for FsMediaSource {
    async fn read(&self, handle: &str) -> Result<MediaBlob> {
        let path = if handle.starts_with("file:") {
            Url::parse(handle)?
                .to_file_path()
                .map_err(|_| Error::media(format!("not a local file: {}", handle)))?
        } else {
            handle.into()
        };

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::media(format!("cannot read {}: {}", path.display(), e)))?;
        let mime = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(MediaBlob {
            bytes: Bytes::from(bytes),
            mime,
        })
    }
}

/// In-memory media, keyed by handle
///
/// Useful for hosts that already hold the bytes, and for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryMediaSource {
    items: Arc<RwLock<HashMap<String, MediaBlob>>>,
}

impl MemoryMediaSource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Register media under `handle`
    pub async fn insert(&self, handle: impl Into<String>, bytes: impl Into<Bytes>, mime: impl Into<String>) {
        self.items.write().await.insert(
            handle.into(),
            MediaBlob {
                bytes: bytes.into(),
                mime: mime.into(),
            },
        );
    }
}

#[async_trait]
impl MediaSource for MemoryMediaSource {
    async fn read(&self, handle: &str) -> Result<MediaBlob> {
        self.items
            .read()
            .await
            .get(handle)
            .cloned()
            .ok_or_else(|| Error::media(format!("unknown media handle: {}", handle)))
    }
}
