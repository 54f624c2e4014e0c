use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ContentType, NewDocument};

/// Per-call options passed through a registry to its providers.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Deadline for a single provider attempt. Exceeding it fails the attempt
    /// with [`AppError::Timeout`].
    pub deadline: Option<Duration>,
}

impl ExecuteOptions {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }
}

/// A pluggable strategy: a capability check plus an execute operation.
///
/// Fetchers and scrapers are `Provider<FetchRequest, RawContent>`, processors
/// are `Provider<RawContent, ProcessedDocument>`.
#[async_trait]
pub trait Provider<I, O>: Send + Sync
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    /// Unique name within a registry.
    fn name(&self) -> &str;

    fn can_handle(&self, input: &I) -> bool;

    async fn execute(&self, input: &I, opts: &ExecuteOptions) -> Result<O, AppError>;
}

/// Detects the content type of a URL, optionally from a leading byte sample.
pub trait Detector: Send + Sync + Clone {
    fn detect(
        &self,
        url: &str,
        sample: Option<&[u8]>,
    ) -> impl Future<Output = Result<ContentType, AppError>> + Send;
}

/// Persists cleaned documents and answers fingerprint lookups.
pub trait DocumentStore: Send + Sync + Clone {
    /// Returns true if a document with this content fingerprint already exists.
    fn contains_fingerprint(
        &self,
        fingerprint: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Save a new document. Returns the generated UUID.
    fn save(&self, document: &NewDocument) -> impl Future<Output = Result<Uuid, AppError>> + Send;
}

/// A no-op DocumentStore for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullStore;

impl DocumentStore for NullStore {
    async fn contains_fingerprint(&self, _fingerprint: &str) -> Result<bool, AppError> {
        Ok(false)
    }

    async fn save(&self, _document: &NewDocument) -> Result<Uuid, AppError> {
        Ok(Uuid::nil())
    }
}

/// Tracks URLs seen by the pipeline so batch operations can resolve patterns.
#[async_trait]
pub trait UrlTracker: Send + Sync {
    async fn track(&self, url: &str) -> Result<(), AppError>;

    async fn known_urls(&self) -> Result<Vec<String>, AppError>;
}

/// In-memory [`UrlTracker`], ordered by URL.
#[derive(Debug, Default)]
pub struct MemoryUrlTracker {
    urls: RwLock<BTreeSet<String>>,
}

impl MemoryUrlTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: RwLock::new(urls.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl UrlTracker for MemoryUrlTracker {
    async fn track(&self, url: &str) -> Result<(), AppError> {
        self.urls.write().await.insert(url.to_string());
        Ok(())
    }

    async fn known_urls(&self) -> Result<Vec<String>, AppError> {
        Ok(self.urls.read().await.iter().cloned().collect())
    }
}
