//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Map;
use uuid::Uuid;

use crate::cleaner::Cleaner;
use crate::config_store::{ConfigEntry, ConfigStore, MemoryConfigStore, StoredConfig};
use crate::error::AppError;
use crate::models::{
    CleanerConfig, ContentType, FetchRequest, NewDocument, ProcessedDocument, RawContent,
    TextFormat,
};
use crate::traits::{Detector, DocumentStore, ExecuteOptions, Provider};

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// Ties a provider output type to the input its registry hands in.
pub trait MockOutput: Clone + Send + Sync + 'static {
    type Input: Clone + Send + Sync + 'static;
}

impl MockOutput for RawContent {
    type Input = FetchRequest;
}

impl MockOutput for ProcessedDocument {
    type Input = RawContent;
}

enum Behaviour<O: MockOutput> {
    Succeed(O),
    Fail(fn() -> AppError),
    SucceedUnless(O, fn(&O::Input) -> bool),
}

/// Scripted provider that records every invocation.
pub struct MockProvider<O: MockOutput> {
    name: String,
    behaviour: Behaviour<O>,
    capable: bool,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<tokio::time::Instant>>>,
    last_input: Arc<Mutex<Option<O::Input>>>,
}

impl<O: MockOutput> MockProvider<O> {
    fn with_behaviour(name: &str, behaviour: Behaviour<O>) -> Self {
        Self {
            name: name.to_string(),
            behaviour,
            capable: true,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            last_input: Arc::new(Mutex::new(None)),
        }
    }

    /// Always returns a clone of `output`.
    pub fn succeeding(name: &str, output: O) -> Self {
        Self::with_behaviour(name, Behaviour::Succeed(output))
    }

    /// Always fails with a fresh error from `error`.
    pub fn failing(name: &str, error: fn() -> AppError) -> Self {
        Self::with_behaviour(name, Behaviour::Fail(error))
    }

    /// Succeeds unless `fails_for` accepts the input, then fails with HTTP 500.
    pub fn succeeding_unless(name: &str, output: O, fails_for: fn(&O::Input) -> bool) -> Self {
        Self::with_behaviour(name, Behaviour::SucceedUnless(output, fails_for))
    }

    /// Make the capability check reject every input.
    pub fn incapable(mut self) -> Self {
        self.capable = false;
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Tokio clock reading at the start of each invocation.
    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_input(&self) -> Option<O::Input> {
        self.last_input.lock().unwrap().clone()
    }
}

#[async_trait]
impl<O: MockOutput> Provider<O::Input, O> for MockProvider<O> {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, _input: &O::Input) -> bool {
        self.capable
    }

    async fn execute(&self, input: &O::Input, _opts: &ExecuteOptions) -> Result<O, AppError> {
        self.calls.lock().unwrap().push(tokio::time::Instant::now());
        *self.last_input.lock().unwrap() = Some(input.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behaviour {
            Behaviour::Succeed(output) => Ok(output.clone()),
            Behaviour::Fail(error) => Err(error()),
            Behaviour::SucceedUnless(output, fails_for) => {
                if fails_for(input) {
                    Err(AppError::HttpError("HTTP 500".into()))
                } else {
                    Ok(output.clone())
                }
            }
        }
    }
}

/// HTML payload attributed to `provider`.
pub fn raw_content(provider: &str) -> RawContent {
    RawContent {
        url: "https://example.com/page".to_string(),
        body: b"<html><body><p>Hello world</p></body></html>".to_vec(),
        mime: Some("text/html".to_string()),
        content_type: ContentType::Html,
        provider: provider.to_string(),
    }
}

/// Markdown document attributed to `processor`.
pub fn processed_document(processor: &str, text: &str) -> ProcessedDocument {
    ProcessedDocument {
        url: "https://example.com/page".to_string(),
        text: text.to_string(),
        format: TextFormat::Markdown,
        title: Some("Example".to_string()),
        metadata: Map::new(),
        processor: processor.to_string(),
    }
}

// ---------------------------------------------------------------------------
// MockCleaner
// ---------------------------------------------------------------------------

/// Cleaner that appends a marker, or fails, and counts its runs.
pub struct MockCleaner {
    name: String,
    priority: i32,
    suffix: String,
    fail: bool,
    formats: Vec<TextFormat>,
    warning: Option<String>,
    calls: Arc<Mutex<usize>>,
}

impl MockCleaner {
    fn build(name: &str, priority: i32, suffix: &str, fail: bool) -> Self {
        Self {
            name: name.to_string(),
            priority,
            suffix: suffix.to_string(),
            fail,
            formats: vec![TextFormat::Markdown, TextFormat::Html, TextFormat::Plain],
            warning: None,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Appends `suffix` to its input.
    pub fn appending(name: &str, priority: i32, suffix: &str) -> Self {
        Self::build(name, priority, suffix, false)
    }

    /// Fails in `perform_cleaning`.
    pub fn failing(name: &str, priority: i32) -> Self {
        Self::build(name, priority, "", true)
    }

    pub fn with_formats(mut self, formats: &[TextFormat]) -> Self {
        self.formats = formats.to_vec();
        self
    }

    pub fn with_warning(mut self, warning: &str) -> Self {
        self.warning = Some(warning.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl Cleaner for MockCleaner {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_formats(&self) -> &[TextFormat] {
        &self.formats
    }

    fn default_config(&self) -> CleanerConfig {
        CleanerConfig::new(self.name.clone(), self.priority)
    }

    fn perform_cleaning(
        &self,
        input: &str,
        _format: TextFormat,
        _config: &CleanerConfig,
    ) -> Result<String, AppError> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            return Err(AppError::Generic("mock cleaner failure".into()));
        }
        Ok(format!("{input}{}", self.suffix))
    }

    fn generate_warnings(&self, _original: &str, _cleaned: &str, _config: &CleanerConfig) -> Vec<String> {
        self.warning.iter().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// FailingConfigStore
// ---------------------------------------------------------------------------

/// In-memory store whose writes fail for chosen URLs.
pub struct FailingConfigStore<C> {
    inner: MemoryConfigStore<C>,
    failing_urls: HashSet<String>,
}

impl<C> FailingConfigStore<C> {
    pub fn failing_for<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: MemoryConfigStore::new(),
            failing_urls: urls.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl<C: ConfigEntry> ConfigStore<C> for FailingConfigStore<C> {
    async fn get(&self, url: &str, key: &str) -> Result<Option<C>, AppError> {
        self.inner.get(url, key).await
    }

    async fn set(&self, url: &str, config: &C) -> Result<(), AppError> {
        if self.failing_urls.contains(url) {
            return Err(AppError::DatabaseError(format!(
                "simulated write failure for {url}"
            )));
        }
        self.inner.set(url, config).await
    }

    async fn delete(&self, url: &str, key: Option<&str>) -> Result<(), AppError> {
        self.inner.delete(url, key).await
    }

    async fn list_all(&self) -> Result<Vec<StoredConfig<C>>, AppError> {
        self.inner.list_all().await
    }

    async fn clear(&self) -> Result<(), AppError> {
        self.inner.clear().await
    }
}

// ---------------------------------------------------------------------------
// MockDetector
// ---------------------------------------------------------------------------

/// Detector that reports a fixed content type and records the URLs it saw.
#[derive(Clone)]
pub struct MockDetector {
    content_type: ContentType,
    pub seen: Arc<Mutex<Vec<String>>>,
}

impl MockDetector {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            content_type,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Detector for MockDetector {
    async fn detect(&self, url: &str, _sample: Option<&[u8]>) -> Result<ContentType, AppError> {
        self.seen.lock().unwrap().push(url.to_string());
        Ok(self.content_type)
    }
}

// ---------------------------------------------------------------------------
// MockDocumentStore
// ---------------------------------------------------------------------------

/// In-memory document store with recorded saves.
#[derive(Clone, Default)]
pub struct MockDocumentStore {
    fingerprints: Arc<Mutex<HashSet<String>>>,
    saved: Arc<Mutex<Vec<NewDocument>>>,
}

impl MockDocumentStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Store that already knows these fingerprints.
    pub fn with_fingerprints<I: IntoIterator<Item = String>>(fingerprints: I) -> Self {
        Self {
            fingerprints: Arc::new(Mutex::new(fingerprints.into_iter().collect())),
            saved: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn saved(&self) -> Vec<NewDocument> {
        self.saved.lock().unwrap().clone()
    }
}

impl DocumentStore for MockDocumentStore {
    async fn contains_fingerprint(&self, fingerprint: &str) -> Result<bool, AppError> {
        Ok(self.fingerprints.lock().unwrap().contains(fingerprint))
    }

    async fn save(&self, document: &NewDocument) -> Result<Uuid, AppError> {
        self.fingerprints
            .lock()
            .unwrap()
            .insert(document.fingerprint.clone());
        self.saved.lock().unwrap().push(document.clone());
        Ok(Uuid::new_v4())
    }
}
