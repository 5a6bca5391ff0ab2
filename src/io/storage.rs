//! Storage backends that hand out [`ReadAt`] sources by name.
//!
//! Split-archive discovery asks the backend for `name.zimaa`, `name.zimab`, …
//! and stops at the first `NotFound`.

use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{HttpRangeReader, LocalFileReader, ReadAt};
use crate::error::{Result, ZimError};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Open the file stored under `name`.
    async fn open(&self, name: &str) -> Result<Arc<dyn ReadAt>>;
}

/// Files below a local directory (or absolute paths when `root` is empty).
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn ReadAt>> {
        let path = self.root.join(name);
        if !tokio::fs::try_exists(&path).await? {
            return Err(ZimError::NotFound(path.display().to_string()));
        }
        Ok(Arc::new(LocalFileReader::new(&path)?))
    }
}

/// Files below an HTTP base URL, read with Range requests.
pub struct HttpStorage {
    client: Client,
    base_url: String,
}

impl HttpStorage {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url_for(&self, name: &str) -> String {
        if self.base_url.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), name)
        }
    }
}

#[async_trait]
impl Storage for HttpStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn ReadAt>> {
        let reader = HttpRangeReader::with_client(self.client.clone(), self.url_for(name)).await?;
        Ok(Arc::new(reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_storage_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.zim"), b"abc").unwrap();
        let storage = LocalStorage::new(dir.path());

        let reader = storage.open("present.zim").await.unwrap();
        assert_eq!(reader.size(), 3);

        let err = storage.open("absent.zim").await.err().unwrap();
        assert!(err.is_missing());
    }

    #[test]
    fn http_urls_are_joined_with_one_slash() {
        let storage = HttpStorage::new("https://example.com/zims/").unwrap();
        assert_eq!(
            storage.url_for("wiki.zimaa"),
            "https://example.com/zims/wiki.zimaa"
        );
    }
}
