//! Per-URL orchestration: detect → fetch/scrape → process → clean → fingerprint → save.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::cleaner::CleanerChain;
use crate::config::PipelineConfig;
use crate::config_store::{ConfigManager, ConfigStore, MemoryConfigStore};
use crate::error::{AppError, PipelineError};
use crate::events::{BatchItemSummary, EventBus, PipelineEvent};
use crate::models::{
    CleanerConfig, FetchRequest, NewDocument, ProcessingOutcome, ProcessingResult,
    ProviderConfiguration, RawContent, compute_hash,
};
use crate::registry::{FetcherRegistry, ProcessorRegistry, ProviderRegistry, ScraperRegistry};
use crate::selector::{Selection, Selector};
use crate::traits::{Detector, DocumentStore, ExecuteOptions, MemoryUrlTracker, UrlTracker};
use crate::validation::ParameterService;

/// Shared, dependency-injected building blocks of a pipeline.
///
/// Nothing here is global: build one set per process (or per test) and hand
/// it to the [`Orchestrator`] and the batch manager.
#[derive(Clone)]
pub struct PipelineComponents {
    pub selector: Arc<Selector>,
    pub fetchers: Arc<FetcherRegistry>,
    pub scrapers: Arc<ScraperRegistry>,
    pub processors: Arc<ProcessorRegistry>,
    pub cleaners: Arc<CleanerChain>,
    pub parameters: Arc<ParameterService>,
    pub tracker: Arc<dyn UrlTracker>,
    pub events: EventBus,
}

impl PipelineComponents {
    /// Components backed entirely by in-memory stores.
    pub fn in_memory(config: &PipelineConfig) -> Self {
        Self::with_stores(
            config,
            Arc::new(MemoryConfigStore::<ProviderConfiguration>::new()),
            Arc::new(MemoryConfigStore::<CleanerConfig>::new()),
            Arc::new(MemoryUrlTracker::new()),
        )
    }

    pub fn with_stores(
        config: &PipelineConfig,
        provider_store: Arc<dyn ConfigStore<ProviderConfiguration>>,
        cleaner_store: Arc<dyn ConfigStore<CleanerConfig>>,
        tracker: Arc<dyn UrlTracker>,
    ) -> Self {
        let selector = Selector::new();
        selector.set_default(config.default_scraper.clone());

        let provider_configs = Arc::new(ConfigManager::with_capacity(
            "provider-configs",
            provider_store,
            config.config_cache_capacity,
        ));
        let cleaner_configs = Arc::new(ConfigManager::with_capacity(
            "cleaner-configs",
            cleaner_store,
            config.config_cache_capacity,
        ));

        Self {
            selector: Arc::new(selector),
            fetchers: Arc::new(ProviderRegistry::new("fetcher", config.retry.clone())),
            scrapers: Arc::new(ProviderRegistry::new("scraper", config.retry.clone())),
            processors: Arc::new(ProviderRegistry::new("processor", config.retry.clone())),
            cleaners: Arc::new(CleanerChain::new(cleaner_configs)),
            parameters: Arc::new(ParameterService::with_builtin_validators(provider_configs)),
            tracker,
            events: EventBus::default(),
        }
    }
}

/// Outcome of [`Orchestrator::process_batch`], in input order.
#[derive(Debug)]
pub struct BatchReport {
    pub concurrency: usize,
    pub outcomes: Vec<Result<ProcessingOutcome, PipelineError>>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Composes detector, selector, registries, cleaner chain and document store.
///
/// Generic over the detector and store so tests can inject mocks.
pub struct Orchestrator<D, S>
where
    D: Detector,
    S: DocumentStore,
{
    detector: D,
    store: S,
    components: PipelineComponents,
    options: ExecuteOptions,
    max_concurrency: usize,
}

impl<D, S> Orchestrator<D, S>
where
    D: Detector,
    S: DocumentStore,
{
    pub fn new(detector: D, store: S, components: PipelineComponents, config: &PipelineConfig) -> Self {
        Self {
            detector,
            store,
            components,
            options: ExecuteOptions::with_deadline(config.request_timeout),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    pub fn components(&self) -> &PipelineComponents {
        &self.components
    }

    pub fn events(&self) -> &EventBus {
        &self.components.events
    }

    fn progress(&self, url: &str, progress: f32, message: impl Into<String>) {
        self.components.events.publish(PipelineEvent::ProcessingProgress {
            url: url.to_string(),
            progress,
            message: Some(message.into()),
        });
    }

    /// Run the full pipeline for one URL.
    ///
    /// Every failure is reported as a [`PipelineError`] naming the error kind
    /// and, when known, the provider or cleaner responsible.
    pub async fn process_url(&self, url: &str) -> Result<ProcessingOutcome, PipelineError> {
        self.components.events.publish(PipelineEvent::ProcessingStarted {
            url: url.to_string(),
        });

        match self.run(url).await {
            Ok(outcome) => {
                self.components
                    .events
                    .publish(PipelineEvent::ProcessingCompleted {
                        url: url.to_string(),
                        result: Box::new(outcome.clone()),
                    });
                Ok(outcome)
            }
            Err(e) => {
                let error = PipelineError::from_error(url, &e);
                tracing::warn!(
                    url = %url,
                    kind = %error.kind,
                    provider = error.provider.as_deref().unwrap_or("-"),
                    error = %e,
                    "Processing failed"
                );
                self.components.events.publish(PipelineEvent::ProcessingFailed {
                    url: url.to_string(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    async fn run(&self, url: &str) -> Result<ProcessingOutcome, AppError> {
        let start = Instant::now();

        if let Err(e) = self.components.tracker.track(url).await {
            tracing::warn!(url = %url, error = %e, "Failed to track URL");
        }

        // 1. Detect
        let content_type = self.detector.detect(url, None).await?;
        tracing::info!(url = %url, %content_type, "Detected content type");
        self.progress(url, 0.2, format!("detected {content_type}"));

        // 2. Retrieve
        let raw = self.retrieve(url, content_type).await?;
        tracing::info!(url = %url, provider = %raw.provider, bytes = raw.body.len(), "Retrieved content");
        self.progress(url, 0.4, format!("retrieved via {}", raw.provider));

        // 3. Process
        let document = self.components.processors.execute(&raw, &self.options).await?;
        self.progress(url, 0.6, format!("processed via {}", document.processor));

        // 4. Clean
        let cleaned = self
            .components
            .cleaners
            .run(url, &document.text, document.format)
            .await?;
        self.progress(url, 0.8, format!("cleaned by {} cleaners", cleaned.applied.len()));

        // 5. Fingerprint
        let fingerprint = compute_hash(&cleaned.text);
        if self.store.contains_fingerprint(&fingerprint).await? {
            tracing::info!(url = %url, fingerprint = %&fingerprint[..8], "Duplicate content, skipping save");
            return Ok(ProcessingOutcome::Duplicate {
                url: url.to_string(),
                fingerprint,
            });
        }

        // 6. Persist
        let id = self
            .store
            .save(&NewDocument {
                url: url.to_string(),
                title: document.title.clone(),
                content: cleaned.text.clone(),
                fingerprint: fingerprint.clone(),
                content_type,
                provider: raw.provider.clone(),
                processor: document.processor.clone(),
            })
            .await?;
        let document_id = (!id.is_nil()).then_some(id);
        tracing::info!(url = %url, fingerprint = %&fingerprint[..8], ?document_id, "Processing complete");

        Ok(ProcessingOutcome::Completed(ProcessingResult {
            url: url.to_string(),
            content_type,
            provider: raw.provider,
            processor: document.processor,
            title: document.title,
            fingerprint,
            text: cleaned.text,
            cleaners_applied: cleaned.applied,
            warnings: cleaned.warnings,
            document_id,
            duration_ms: start.elapsed().as_millis() as u64,
        }))
    }

    /// Route through the selector when it names a registered provider,
    /// otherwise let the fetcher registry pick in registration order.
    async fn retrieve(
        &self,
        url: &str,
        content_type: crate::models::ContentType,
    ) -> Result<RawContent, AppError> {
        let selection = match self.components.selector.resolve(url) {
            Ok(selection) => Some(selection),
            Err(AppError::RuleNotMatched(_)) => None,
            Err(e) => return Err(e),
        };

        let Some(Selection {
            provider_name,
            source,
        }) = selection
        else {
            tracing::debug!(url = %url, "No selection rule matched, using fetchers");
            let request = FetchRequest::new(url, content_type);
            return self.components.fetchers.execute(&request, &self.options).await;
        };

        let configuration = self
            .components
            .parameters
            .get_parameters(url, &provider_name)
            .await?
            .filter(|c| c.enabled);
        let request = FetchRequest::new(url, content_type).with_configuration(configuration);

        let components = &self.components;
        if components.scrapers.contains(&provider_name) {
            tracing::debug!(url = %url, provider = %provider_name, %source, "Selected scraper");
            components
                .scrapers
                .execute_preferred(&provider_name, &request, &self.options)
                .await
        } else if components.fetchers.contains(&provider_name) {
            tracing::debug!(url = %url, provider = %provider_name, %source, "Selected fetcher");
            components
                .fetchers
                .execute_preferred(&provider_name, &request, &self.options)
                .await
        } else {
            tracing::warn!(
                url = %url,
                provider = %provider_name,
                "Selected provider is not registered, using fetchers"
            );
            components.fetchers.execute(&request, &self.options).await
        }
    }

    /// Lowest concurrency recommended by any stored configuration of these URLs.
    async fn recommended_concurrency(&self, urls: &[String]) -> Option<usize> {
        let mut lowest: Option<usize> = None;
        for url in urls {
            let configs = match self.components.parameters.configs().list_for_url(url).await {
                Ok(configs) => configs,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Could not read configuration");
                    continue;
                }
            };
            for config in configs.iter().filter(|c| c.enabled) {
                if let Some(n) = self.components.parameters.recommended_concurrency(config) {
                    lowest = Some(lowest.map_or(n, |l| l.min(n)));
                }
            }
        }
        lowest
    }

    /// Process many URLs concurrently, reporting results in input order.
    ///
    /// Concurrency is `min(requested or configured max, recommended)`, so a
    /// slow-motion browser configuration narrows the batch. URLs not started
    /// before `cancel` fires fail with a cancelled error; URLs already running
    /// finish normally.
    pub async fn process_batch(
        &self,
        urls: &[String],
        requested_concurrency: Option<usize>,
        cancel: CancellationToken,
    ) -> BatchReport {
        let mut concurrency = requested_concurrency
            .unwrap_or(self.max_concurrency)
            .max(1);
        if let Some(recommended) = self.recommended_concurrency(urls).await {
            if recommended < concurrency {
                tracing::info!(requested = concurrency, recommended, "Lowering batch concurrency");
                concurrency = recommended;
            }
        }

        self.components
            .events
            .publish(PipelineEvent::BatchStarted { count: urls.len() });
        tracing::info!(count = urls.len(), concurrency, "Batch started");

        let outcomes: Vec<Result<ProcessingOutcome, PipelineError>> = stream::iter(urls)
            .map(|url| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return Err(PipelineError::from_error(url.as_str(), &AppError::Cancelled));
                    }
                    // Once started, a URL runs to completion so a saved document
                    // is never reported as cancelled.
                    self.process_url(url).await
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let summaries = urls
            .iter()
            .zip(&outcomes)
            .map(|(url, outcome)| match outcome {
                Ok(ProcessingOutcome::Completed(_)) => BatchItemSummary {
                    url: url.clone(),
                    status: "completed".into(),
                    error: None,
                },
                Ok(ProcessingOutcome::Duplicate { .. }) => BatchItemSummary {
                    url: url.clone(),
                    status: "duplicate".into(),
                    error: None,
                },
                Err(e) => BatchItemSummary {
                    url: url.clone(),
                    status: "failed".into(),
                    error: Some(e.message.clone()),
                },
            })
            .collect();
        self.components
            .events
            .publish(PipelineEvent::BatchCompleted { results: summaries });

        let report = BatchReport {
            concurrency,
            outcomes,
        };
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Batch completed"
        );
        report
    }
}
