//! Artifact retrieval for dispatch
//!
//! The dispatcher downloads a job's model file before pushing it to a machine.
//! Bytes are held in memory between fetch and upload.

use async_trait::async_trait;
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("artifact source unreachable: {0}")]
    Unreachable(String),

    #[error("artifact fetch returned HTTP {status} for {url}")]
    Status { status: u16, url: String },
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ArtifactError>;
}

/// Downloads artifacts over HTTP(S) with a bounded timeout.
#[derive(Debug, Clone)]
pub struct HttpArtifactStore {
    client: reqwest::Client,
}

impl HttpArtifactStore {
    pub fn new(timeout: Duration) -> Result<Self, ArtifactError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ArtifactError::Unreachable(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ArtifactError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ArtifactError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ArtifactError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(ArtifactError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ArtifactError::Unreachable(e.to_string()))?;
        debug!(url = %url, size = bytes.len(), "Fetched artifact");
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.artifacts.write().await.insert(url.into(), bytes.into());
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ArtifactError> {
        self.artifacts
            .read()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(url.to_string()))
    }
}

/// Sends `http://` and `https://` locators to an HTTP store and everything
/// else (such as `mem://` demo artifacts) to a local store.
pub struct RoutedArtifactStore {
    local: Arc<dyn ArtifactStore>,
    remote: Arc<dyn ArtifactStore>,
}

impl RoutedArtifactStore {
    pub fn new(local: Arc<dyn ArtifactStore>, remote: Arc<dyn ArtifactStore>) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl ArtifactStore for RoutedArtifactStore {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ArtifactError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.remote.fetch(url).await
        } else {
            self.local.fetch(url).await
        }
    }
}

/// Keeps recently fetched artifacts so a retried dispatch pass does not
/// download the same file again.
pub struct CachedArtifactStore {
    inner: Arc<dyn ArtifactStore>,
    cache: Cache<String, Arc<Vec<u8>>>,
}

impl CachedArtifactStore {
    pub fn new(inner: Arc<dyn ArtifactStore>, capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl ArtifactStore for CachedArtifactStore {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ArtifactError> {
        if let Some(bytes) = self.cache.get(url).await {
            debug!(url = %url, "Artifact cache hit");
            return Ok(bytes.as_ref().clone());
        }
        let bytes = self.inner.fetch(url).await?;
        self.cache
            .insert(url.to_string(), Arc::new(bytes.clone()))
            .await;
        Ok(bytes)
    }
}
