//! Generic provider registry with retry, fallback, try-all and best-of execution.
//!
//! Providers are tried in registration order; the first success wins. Each
//! provider gets `max_retries + 1` attempts, with exponential backoff between
//! attempts whose error matches a retryable tag. A fallback provider (used for
//! processors) runs only after every primary provider failed.
//!
//! Reads take a snapshot of the provider list, so registering or unregistering
//! a provider never affects a call already in flight.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::error::AppError;
use crate::models::{FetchRequest, ProcessedDocument, RawContent};
use crate::retry::RetryPolicy;
use crate::traits::{ExecuteOptions, Provider};

/// Human-readable label for a unit of work, used in errors and logs.
pub trait WorkItem {
    fn label(&self) -> String;
}

impl WorkItem for FetchRequest {
    fn label(&self) -> String {
        self.url.clone()
    }
}

impl WorkItem for RawContent {
    fn label(&self) -> String {
        format!("{} ({})", self.url, self.content_type)
    }
}

/// Timed record of one provider's attempt in a diagnostic run.
#[derive(Debug)]
pub struct ProviderAttempt<O> {
    pub provider_name: String,
    pub success: bool,
    pub duration: Duration,
    pub output: Option<O>,
    pub error: Option<String>,
}

pub type FetchAttempt = ProviderAttempt<RawContent>;
pub type ProcessAttempt = ProviderAttempt<ProcessedDocument>;

type SharedProvider<I, O> = Arc<dyn Provider<I, O>>;

/// Ordered collection of providers of one kind.
pub struct ProviderRegistry<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    kind: String,
    policy: RetryPolicy,
    providers: RwLock<Vec<SharedProvider<I, O>>>,
    fallback: RwLock<Option<SharedProvider<I, O>>>,
}

pub type FetcherRegistry = ProviderRegistry<FetchRequest, RawContent>;
pub type ScraperRegistry = ProviderRegistry<FetchRequest, RawContent>;
pub type ProcessorRegistry = ProviderRegistry<RawContent, ProcessedDocument>;

impl<I, O> ProviderRegistry<I, O>
where
    I: WorkItem + Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new(kind: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            kind: kind.into(),
            policy,
            providers: RwLock::new(Vec::new()),
            fallback: RwLock::new(None),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn read_providers(&self) -> RwLockReadGuard<'_, Vec<SharedProvider<I, O>>> {
        self.providers.read().unwrap_or_else(|poisoned| {
            tracing::warn!(registry = %self.kind, "Recovered from poisoned lock");
            poisoned.into_inner()
        })
    }

    fn write_providers(&self) -> RwLockWriteGuard<'_, Vec<SharedProvider<I, O>>> {
        self.providers.write().unwrap_or_else(|poisoned| {
            tracing::warn!(registry = %self.kind, "Recovered from poisoned lock");
            poisoned.into_inner()
        })
    }

    fn current_fallback(&self) -> Option<SharedProvider<I, O>> {
        self.fallback
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Register a provider at the end of the iteration order.
    pub fn register(&self, provider: SharedProvider<I, O>) -> Result<(), AppError> {
        let mut providers = self.write_providers();
        let name = provider.name().to_string();
        let fallback_clash = self
            .current_fallback()
            .is_some_and(|f| f.name() == name);
        if fallback_clash || providers.iter().any(|p| p.name() == name) {
            return Err(AppError::DuplicateProvider {
                kind: self.kind.clone(),
                name,
            });
        }
        tracing::debug!(registry = %self.kind, provider = %name, "Registered provider");
        providers.push(provider);
        Ok(())
    }

    /// Set the provider tried after every primary provider failed.
    pub fn set_fallback(&self, provider: SharedProvider<I, O>) {
        tracing::debug!(registry = %self.kind, provider = %provider.name(), "Set fallback provider");
        *self
            .fallback
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(provider);
    }

    /// Remove a provider by name. Calls already holding it are unaffected.
    pub fn unregister(&self, name: &str) -> bool {
        let mut providers = self.write_providers();
        let before = providers.len();
        providers.retain(|p| p.name() != name);
        let removed = providers.len() != before;
        if removed {
            tracing::debug!(registry = %self.kind, provider = %name, "Unregistered provider");
        }
        removed
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.read_providers()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read_providers().iter().any(|p| p.name() == name)
    }

    /// True if at least one registered provider (or the fallback) accepts the input.
    pub fn can_handle(&self, input: &I) -> bool {
        self.read_providers().iter().any(|p| p.can_handle(input))
            || self.current_fallback().is_some_and(|f| f.can_handle(input))
    }

    /// Snapshot of capable primaries (registration order) and the capable fallback.
    fn capable(&self, input: &I) -> (Vec<SharedProvider<I, O>>, Option<SharedProvider<I, O>>) {
        let primaries = self
            .read_providers()
            .iter()
            .filter(|p| p.can_handle(input))
            .cloned()
            .collect();
        let fallback = self.current_fallback().filter(|f| f.can_handle(input));
        (primaries, fallback)
    }

    /// Run the first capable provider that succeeds, in registration order.
    pub async fn execute(&self, input: &I, opts: &ExecuteOptions) -> Result<O, AppError> {
        let (primaries, fallback) = self.capable(input);
        self.run_in_order(input, opts, primaries, fallback).await
    }

    /// Like [`execute`](Self::execute) but tries `preferred` first when it is capable.
    pub async fn execute_preferred(
        &self,
        preferred: &str,
        input: &I,
        opts: &ExecuteOptions,
    ) -> Result<O, AppError> {
        let (mut primaries, fallback) = self.capable(input);
        if let Some(pos) = primaries.iter().position(|p| p.name() == preferred) {
            let chosen = primaries.remove(pos);
            primaries.insert(0, chosen);
        } else {
            tracing::debug!(
                registry = %self.kind,
                provider = %preferred,
                "Preferred provider not capable, using registration order"
            );
        }
        self.run_in_order(input, opts, primaries, fallback).await
    }

    async fn run_in_order(
        &self,
        input: &I,
        opts: &ExecuteOptions,
        primaries: Vec<SharedProvider<I, O>>,
        fallback: Option<SharedProvider<I, O>>,
    ) -> Result<O, AppError> {
        if primaries.is_empty() && fallback.is_none() {
            return Err(AppError::NoCapableProvider {
                kind: self.kind.clone(),
                input: input.label(),
            });
        }

        let mut attempted = Vec::new();
        let mut last_error = None;

        for provider in primaries.iter().chain(fallback.iter()) {
            attempted.push(provider.name().to_string());
            match self.execute_with_retry(provider.as_ref(), input, opts).await {
                Ok(output) => {
                    tracing::debug!(
                        registry = %self.kind,
                        provider = %provider.name(),
                        input = %input.label(),
                        "Provider succeeded"
                    );
                    return Ok(output);
                }
                Err(e) => {
                    tracing::warn!(
                        registry = %self.kind,
                        provider = %provider.name(),
                        input = %input.label(),
                        error = %e,
                        "Provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::AllProvidersFailed {
            kind: self.kind.clone(),
            attempted,
            last_error: Box::new(
                last_error.unwrap_or_else(|| AppError::Generic("no attempt made".into())),
            ),
        })
    }

    /// Attempt a single provider `max_retries + 1` times with backoff.
    ///
    /// Stops early on a non-retryable error. The backoff sleep suspends only
    /// the calling task.
    pub async fn execute_with_retry(
        &self,
        provider: &dyn Provider<I, O>,
        input: &I,
        opts: &ExecuteOptions,
    ) -> Result<O, AppError> {
        let mut attempt = 0;
        loop {
            match attempt_once(provider, input, opts).await {
                Ok(output) => return Ok(output),
                Err(e) if self.policy.should_retry(attempt, &e) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::debug!(
                        registry = %self.kind,
                        provider = %provider.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run every capable provider (and the fallback) once, concurrently.
    ///
    /// Results are sorted successes first, then by ascending duration.
    /// Diagnostic only: no retries.
    pub async fn execute_all(&self, input: &I, opts: &ExecuteOptions) -> Vec<ProviderAttempt<O>> {
        let (primaries, fallback) = self.capable(input);
        let runs = primaries
            .iter()
            .chain(fallback.iter())
            .map(|provider| async move {
                let start = Instant::now();
                let result = attempt_once(provider.as_ref(), input, opts).await;
                let duration = start.elapsed();
                match result {
                    Ok(output) => ProviderAttempt {
                        provider_name: provider.name().to_string(),
                        success: true,
                        duration,
                        output: Some(output),
                        error: None,
                    },
                    Err(e) => ProviderAttempt {
                        provider_name: provider.name().to_string(),
                        success: false,
                        duration,
                        output: None,
                        error: Some(e.to_string()),
                    },
                }
            });

        let mut attempts = join_all(runs).await;
        attempts.sort_by(|a, b| b.success.cmp(&a.success).then(a.duration.cmp(&b.duration)));
        attempts
    }

    /// The fastest successful attempt from [`execute_all`](Self::execute_all).
    pub async fn execute_best(
        &self,
        input: &I,
        opts: &ExecuteOptions,
    ) -> Result<ProviderAttempt<O>, AppError> {
        self.execute_all(input, opts)
            .await
            .into_iter()
            .find(|a| a.success)
            .ok_or_else(|| AppError::NoSuccessfulProvider {
                kind: self.kind.clone(),
            })
    }
}

/// One provider call, bounded by the per-call deadline.
async fn attempt_once<I, O>(
    provider: &dyn Provider<I, O>,
    input: &I,
    opts: &ExecuteOptions,
) -> Result<O, AppError>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    match opts.deadline {
        Some(deadline) => tokio::time::timeout(deadline, provider.execute(input, opts))
            .await
            .unwrap_or_else(|_| Err(AppError::Timeout(deadline.as_millis() as u64))),
        None => provider.execute(input, opts).await,
    }
}
