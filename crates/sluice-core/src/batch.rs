//! Configuration operations applied across many URLs at once.
//!
//! Every per-URL write is committed and reported on its own; one URL's
//! failure never aborts the rest of the batch.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config_store::StoredConfig;
use crate::error::AppError;
use crate::models::ProviderConfiguration;
use crate::preset::PresetCatalog;
use crate::selector::{
    DOMAIN_RULE_PRIORITY, EXTENSION_RULE_PRIORITY, SelectionRule, Selector, domain_matches,
    glob_to_regex,
};
use crate::traits::UrlTracker;
use crate::validation::{ConfigurationRequest, ParameterService};

/// Current export document version.
pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOperationType {
    Set,
    Update,
    Remove,
    Clear,
}

/// Partial change applied to an existing configuration. Parameters are
/// merged key by key; the result is validated again before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationUpdate {
    pub provider_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl ConfigurationUpdate {
    fn apply(&self, current: ProviderConfiguration) -> ConfigurationRequest {
        let mut request = ConfigurationRequest::from(current);
        for (key, value) in &self.parameters {
            request.parameters.insert(key.clone(), value.clone());
        }
        if let Some(priority) = self.priority {
            request.priority = priority;
        }
        if let Some(enabled) = self.enabled {
            request.enabled = enabled;
        }
        request
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    #[serde(rename = "type")]
    pub op_type: BatchOperationType,
    #[serde(default)]
    pub urls: Vec<String>,
    /// Globs matched against every known URL.
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub configuration: Option<ConfigurationRequest>,
    #[serde(default)]
    pub update: Option<ConfigurationUpdate>,
}

impl BatchOperation {
    fn new(op_type: BatchOperationType, urls: Vec<String>) -> Self {
        Self {
            op_type,
            urls,
            patterns: Vec::new(),
            configuration: None,
            update: None,
        }
    }

    pub fn set(urls: Vec<String>, configuration: ConfigurationRequest) -> Self {
        Self {
            configuration: Some(configuration),
            ..Self::new(BatchOperationType::Set, urls)
        }
    }

    pub fn update(urls: Vec<String>, update: ConfigurationUpdate) -> Self {
        Self {
            update: Some(update),
            ..Self::new(BatchOperationType::Update, urls)
        }
    }

    pub fn remove(urls: Vec<String>) -> Self {
        Self::new(BatchOperationType::Remove, urls)
    }

    pub fn clear() -> Self {
        Self::new(BatchOperationType::Clear, Vec::new())
    }

    pub fn with_patterns(mut self, patterns: Vec<String>) -> Self {
        self.patterns = patterns;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub url: String,
    pub error: String,
}

/// Per-URL outcome of a batch. `total_processed` always equals
/// `total_successful + total_failed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub successful: Vec<String>,
    pub failed: Vec<BatchFailure>,
    pub total_processed: usize,
    pub total_successful: usize,
    pub total_failed: usize,
}

impl BatchResult {
    pub fn record_success(&mut self, url: impl Into<String>) {
        self.successful.push(url.into());
        self.total_successful += 1;
        self.total_processed += 1;
    }

    pub fn record_failure(&mut self, url: impl Into<String>, error: &AppError) {
        self.failed.push(BatchFailure {
            url: url.into(),
            error: error.to_string(),
        });
        self.total_failed += 1;
        self.total_processed += 1;
    }
}

/// Result of a domain or extension configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetedConfiguration {
    pub result: BatchResult,
    /// Rule registered for URLs not seen yet, if any.
    pub rule: Option<SelectionRule>,
}

/// Versioned export of every stored configuration plus the active rule set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub configurations: Vec<StoredConfig<ProviderConfiguration>>,
    pub rules: Vec<SelectionRule>,
}

pub struct BatchConfigurationManager {
    parameters: Arc<ParameterService>,
    selector: Arc<Selector>,
    tracker: Arc<dyn UrlTracker>,
    presets: Arc<PresetCatalog>,
}

impl BatchConfigurationManager {
    pub fn new(
        parameters: Arc<ParameterService>,
        selector: Arc<Selector>,
        tracker: Arc<dyn UrlTracker>,
        presets: Arc<PresetCatalog>,
    ) -> Self {
        Self {
            parameters,
            selector,
            tracker,
            presets,
        }
    }

    pub fn presets(&self) -> &PresetCatalog {
        &self.presets
    }

    /// Explicit URLs followed by every known URL matching a pattern, deduplicated.
    pub async fn resolve_targets(
        &self,
        urls: &[String],
        patterns: &[String],
    ) -> Result<Vec<String>, AppError> {
        let mut seen = HashSet::new();
        let mut targets: Vec<String> = urls
            .iter()
            .filter(|u| seen.insert(u.to_string()))
            .cloned()
            .collect();

        if !patterns.is_empty() {
            let compiled = patterns
                .iter()
                .map(|p| glob_to_regex(p))
                .collect::<Result<Vec<_>, _>>()?;
            for known in self.tracker.known_urls().await? {
                if compiled.iter().any(|re| re.is_match(&known)) && seen.insert(known.clone()) {
                    targets.push(known);
                }
            }
        }
        Ok(targets)
    }

    pub async fn execute_batch_operation(&self, op: &BatchOperation) -> Result<BatchResult, AppError> {
        let result = match op.op_type {
            BatchOperationType::Clear => self.clear_all().await,
            BatchOperationType::Set => {
                let configuration = op.configuration.as_ref().ok_or_else(|| {
                    AppError::ConfigError("set operation requires a configuration".into())
                })?;
                let targets = self.resolve_targets(&op.urls, &op.patterns).await?;
                self.set_many(&targets, configuration).await
            }
            BatchOperationType::Update => {
                let update = op.update.as_ref().ok_or_else(|| {
                    AppError::ConfigError("update operation requires an update payload".into())
                })?;
                let targets = self.resolve_targets(&op.urls, &op.patterns).await?;
                self.update_many(&targets, update).await
            }
            BatchOperationType::Remove => {
                let targets = self.resolve_targets(&op.urls, &op.patterns).await?;
                self.remove_many(&targets).await
            }
        };

        tracing::info!(
            operation = ?op.op_type,
            processed = result.total_processed,
            successful = result.total_successful,
            failed = result.total_failed,
            "Batch operation finished"
        );
        Ok(result)
    }

    async fn set_one(&self, url: &str, configuration: &ConfigurationRequest) -> Result<(), AppError> {
        self.parameters.set_configuration(url, configuration).await?;
        self.refresh_override(url).await
    }

    /// Route `url` by everything stored for it, not only the last write.
    async fn refresh_override(&self, url: &str) -> Result<(), AppError> {
        let configs = self.parameters.configs().list_for_url(url).await?;
        match preferred_provider(&configs) {
            Some(provider) => self.selector.set_override(url, provider),
            None => {
                self.selector.remove_override(url);
            }
        }
        Ok(())
    }

    async fn set_many(&self, urls: &[String], configuration: &ConfigurationRequest) -> BatchResult {
        let mut result = BatchResult::default();
        for url in urls {
            match self.set_one(url, configuration).await {
                Ok(()) => result.record_success(url),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Batch set failed for URL");
                    result.record_failure(url, &e);
                }
            }
        }
        result
    }

    async fn update_one(&self, url: &str, update: &ConfigurationUpdate) -> Result<(), AppError> {
        let current = self
            .parameters
            .get_parameters(url, &update.provider_name)
            .await?
            .ok_or_else(|| AppError::ConfigurationNotFound {
                url: url.to_string(),
                provider: update.provider_name.clone(),
            })?;
        self.set_one(url, &update.apply(current)).await
    }

    async fn update_many(&self, urls: &[String], update: &ConfigurationUpdate) -> BatchResult {
        let mut result = BatchResult::default();
        for url in urls {
            match self.update_one(url, update).await {
                Ok(()) => result.record_success(url),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Batch update failed for URL");
                    result.record_failure(url, &e);
                }
            }
        }
        result
    }

    async fn remove_many(&self, urls: &[String]) -> BatchResult {
        let mut result = BatchResult::default();
        for url in urls {
            match self.parameters.remove_parameters(url, None).await {
                Ok(()) => {
                    self.selector.remove_override(url);
                    result.record_success(url);
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Batch remove failed for URL");
                    result.record_failure(url, &e);
                }
            }
        }
        result
    }

    /// Drop every stored configuration and override. Reports the URLs that
    /// held a configuration.
    async fn clear_all(&self) -> BatchResult {
        let configs = self.parameters.configs();
        let urls: BTreeSet<String> = match configs.list_all().await {
            Ok(entries) => entries.into_iter().map(|e| e.url).collect(),
            Err(e) => {
                let mut result = BatchResult::default();
                result.record_failure("*", &e);
                return result;
            }
        };

        let mut result = BatchResult::default();
        match configs.clear().await {
            Ok(()) => {
                self.selector.clear_overrides();
                for url in urls {
                    result.record_success(url);
                }
            }
            Err(e) => {
                for url in urls {
                    result.record_failure(url, &e);
                }
            }
        }
        result
    }

    pub async fn apply_preset(&self, name: &str, urls: &[String]) -> Result<BatchResult, AppError> {
        let preset = self.presets.get(name)?;
        tracing::info!(preset = %name, urls = urls.len(), "Applying preset");
        self.execute_batch_operation(&BatchOperation::set(urls.to_vec(), preset.configuration))
            .await
    }

    /// Apply to known URLs under `domain`; with no history, register a
    /// domain rule instead so future URLs route to the provider.
    pub async fn configure_by_domain(
        &self,
        domain: &str,
        configuration: &ConfigurationRequest,
    ) -> Result<TargetedConfiguration, AppError> {
        self.parameters.prepare(configuration)?;
        let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
        let known: Vec<String> = self
            .tracker
            .known_urls()
            .await?
            .into_iter()
            .filter(|u| domain_matches(u, &domain))
            .collect();

        if known.is_empty() {
            let rule = SelectionRule::new(
                domain.clone(),
                configuration.provider_name.clone(),
                DOMAIN_RULE_PRIORITY,
            );
            self.selector.add_rule(rule.clone())?;
            tracing::info!(domain = %domain, provider = %rule.provider_name, "No known URLs, registered domain rule");
            return Ok(TargetedConfiguration {
                result: BatchResult::default(),
                rule: Some(rule),
            });
        }

        Ok(TargetedConfiguration {
            result: self.set_many(&known, configuration).await,
            rule: None,
        })
    }

    /// Register a suffix rule for the extension and apply to known URLs
    /// containing it.
    pub async fn configure_by_extension(
        &self,
        extension: &str,
        configuration: &ConfigurationRequest,
    ) -> Result<TargetedConfiguration, AppError> {
        self.parameters.prepare(configuration)?;
        let extension = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        let rule = SelectionRule::new(
            format!("*.{extension}"),
            configuration.provider_name.clone(),
            EXTENSION_RULE_PRIORITY,
        );
        self.selector.add_rule(rule.clone())?;

        let needle = format!(".{extension}");
        let known: Vec<String> = self
            .tracker
            .known_urls()
            .await?
            .into_iter()
            .filter(|u| u.to_ascii_lowercase().contains(&needle))
            .collect();

        Ok(TargetedConfiguration {
            result: self.set_many(&known, configuration).await,
            rule: Some(rule),
        })
    }

    pub async fn export(&self) -> Result<ConfigDocument, AppError> {
        Ok(ConfigDocument {
            version: EXPORT_VERSION.to_string(),
            timestamp: Utc::now(),
            configurations: self.parameters.configs().export_all().await?,
            rules: self.selector.rules(),
        })
    }

    /// Rebuild selector overrides from the stored configurations, e.g. after
    /// reopening a persistent store.
    ///
    /// Each URL is routed to its highest-priority enabled configuration,
    /// the same choice every write makes. Returns the number of overrides installed.
    pub async fn restore_overrides(&self) -> Result<usize, AppError> {
        let mut by_url: BTreeMap<String, Vec<ProviderConfiguration>> = BTreeMap::new();
        for entry in self.parameters.configs().list_all().await? {
            by_url.entry(entry.url).or_default().push(entry.config);
        }

        self.selector.clear_overrides();
        let mut restored = 0;
        for (url, configs) in &by_url {
            if let Some(provider) = preferred_provider(configs) {
                self.selector.set_override(url.clone(), provider);
                restored += 1;
            }
        }
        tracing::debug!(overrides = restored, "Restored selector overrides");
        Ok(restored)
    }

    /// Replace the rule set wholesale, then upsert every configuration.
    ///
    /// Fails before touching anything if the major version differs or a rule
    /// does not compile.
    pub async fn import(&self, document: ConfigDocument) -> Result<BatchResult, AppError> {
        let major = |v: &str| v.split('.').next().unwrap_or_default().to_string();
        if major(&document.version) != major(EXPORT_VERSION) {
            return Err(AppError::ConfigError(format!(
                "unsupported configuration document version {} (expected {EXPORT_VERSION})",
                document.version
            )));
        }

        self.selector.replace_rules(document.rules)?;

        let mut result = BatchResult::default();
        for entry in document.configurations {
            let request = ConfigurationRequest::from(entry.config);
            match self.set_one(&entry.url, &request).await {
                Ok(_) => result.record_success(entry.url),
                Err(e) => {
                    tracing::warn!(url = %entry.url, error = %e, "Import failed for configuration");
                    result.record_failure(entry.url, &e);
                }
            }
        }
        tracing::info!(
            imported = result.total_successful,
            failed = result.total_failed,
            "Configuration import finished"
        );
        Ok(result)
    }
}

/// Provider a URL routes to: its highest-priority enabled configuration.
/// Equal priorities go to the alphabetically first provider so the choice
/// does not depend on store ordering.
fn preferred_provider(configs: &[ProviderConfiguration]) -> Option<&str> {
    configs
        .iter()
        .filter(|c| c.enabled)
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.provider_name.cmp(&a.provider_name))
        })
        .map(|c| c.provider_name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::{ConfigManager, ConfigStore, MemoryConfigStore};
    use crate::testutil::FailingConfigStore;
    use crate::traits::MemoryUrlTracker;
    use serde_json::json;

    struct Fixture {
        manager: BatchConfigurationManager,
        parameters: Arc<ParameterService>,
        selector: Arc<Selector>,
    }

    fn fixture_with(
        store: Arc<dyn ConfigStore<ProviderConfiguration>>,
        known: &[&str],
    ) -> Fixture {
        let parameters = Arc::new(ParameterService::with_builtin_validators(Arc::new(
            ConfigManager::new("providers", store),
        )));
        let selector = Arc::new(Selector::new());
        let tracker = Arc::new(MemoryUrlTracker::with_urls(known.iter().copied()));
        Fixture {
            manager: BatchConfigurationManager::new(
                parameters.clone(),
                selector.clone(),
                tracker,
                Arc::new(PresetCatalog::default()),
            ),
            parameters,
            selector,
        }
    }

    fn fixture(known: &[&str]) -> Fixture {
        fixture_with(
            Arc::new(MemoryConfigStore::<ProviderConfiguration>::new()),
            known,
        )
    }

    fn http(timeout_ms: i64) -> ConfigurationRequest {
        ConfigurationRequest::new(
            "http",
            json!({"timeout_ms": timeout_ms}).as_object().cloned().unwrap(),
        )
    }

    fn urls(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn set_reports_per_url_failures_with_conserved_totals() {
        let store = Arc::new(FailingConfigStore::<ProviderConfiguration>::failing_for(["u2"]));
        let fx = fixture_with(store, &[]);

        let result = fx
            .manager
            .execute_batch_operation(&BatchOperation::set(urls(&["u1", "u2", "u3"]), http(5000)))
            .await
            .unwrap();

        assert_eq!(result.successful, vec!["u1", "u3"]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].url, "u2");
        assert_eq!(result.total_processed, 3);
        assert_eq!(result.total_successful, 2);
        assert_eq!(result.total_failed, 1);
    }

    #[tokio::test]
    async fn set_twice_is_one_record() {
        let fx = fixture(&[]);
        let op = BatchOperation::set(urls(&["https://a.com"]), http(5000));
        fx.manager.execute_batch_operation(&op).await.unwrap();
        fx.manager.execute_batch_operation(&op).await.unwrap();

        assert_eq!(fx.parameters.configs().list_all().await.unwrap().len(), 1);
        assert_eq!(
            fx.selector.resolve("https://a.com").unwrap().provider_name,
            "http"
        );
    }

    #[tokio::test]
    async fn patterns_resolve_against_known_urls() {
        let fx = fixture(&[
            "https://example.com/a",
            "https://example.com/b",
            "https://other.org/c",
        ]);
        let op = BatchOperation::set(urls(&["https://example.com/a"]), http(5000))
            .with_patterns(vec!["https://example.com/*".into()]);

        let result = fx.manager.execute_batch_operation(&op).await.unwrap();

        assert_eq!(
            result.successful,
            vec!["https://example.com/a", "https://example.com/b"]
        );
    }

    #[tokio::test]
    async fn invalid_configuration_fails_every_url_without_writes() {
        let fx = fixture(&[]);
        let result = fx
            .manager
            .execute_batch_operation(&BatchOperation::set(urls(&["a", "b"]), http(1)))
            .await
            .unwrap();

        assert_eq!(result.total_failed, 2);
        assert!(result.failed[0].error.contains("out of range"));
        assert!(fx.parameters.configs().list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_without_existing_configuration_fails_that_url() {
        let fx = fixture(&[]);
        fx.manager
            .execute_batch_operation(&BatchOperation::set(urls(&["a"]), http(5000)))
            .await
            .unwrap();

        let update = ConfigurationUpdate {
            provider_name: "http".into(),
            parameters: json!({"follow_redirects": false}).as_object().cloned().unwrap(),
            priority: Some(3),
            enabled: None,
        };
        let result = fx
            .manager
            .execute_batch_operation(&BatchOperation::update(urls(&["a", "b"]), update))
            .await
            .unwrap();

        assert_eq!(result.successful, vec!["a"]);
        assert_eq!(result.failed[0].url, "b");
        assert!(result.failed[0].error.contains("no existing configuration"));

        let stored = fx.parameters.get_parameters("a", "http").await.unwrap().unwrap();
        assert_eq!(stored.priority, 3);
        assert_eq!(stored.parameters.get("timeout_ms"), Some(&json!(5000)));
        assert_eq!(stored.parameters.get("follow_redirects"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let fx = fixture(&[]);
        fx.manager
            .execute_batch_operation(&BatchOperation::set(urls(&["a", "b", "c"]), http(5000)))
            .await
            .unwrap();

        let removed = fx
            .manager
            .execute_batch_operation(&BatchOperation::remove(urls(&["a"])))
            .await
            .unwrap();
        assert_eq!(removed.total_successful, 1);
        assert!(fx.selector.resolve("a").is_err());

        let cleared = fx
            .manager
            .execute_batch_operation(&BatchOperation::clear())
            .await
            .unwrap();
        assert_eq!(cleared.successful, vec!["b", "c"]);
        assert!(fx.parameters.configs().list_all().await.unwrap().is_empty());
        assert!(fx.selector.resolve("b").is_err());
    }

    #[tokio::test]
    async fn unknown_preset_is_an_error() {
        let fx = fixture(&[]);
        let err = fx.manager.apply_preset("nope", &urls(&["a"])).await.unwrap_err();
        assert!(matches!(err, AppError::PresetNotFound(_)));
    }

    #[tokio::test]
    async fn preset_applies_its_configuration() {
        let fx = fixture(&[]);
        let result = fx
            .manager
            .apply_preset("spa-rendering", &urls(&["https://app.io"]))
            .await
            .unwrap();
        assert_eq!(result.total_successful, 1);

        let stored = fx
            .parameters
            .get_parameters("https://app.io", "browser")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.priority, 10);
        assert_eq!(stored.parameters.get("wait_until"), Some(&json!("networkidle")));
    }

    #[tokio::test]
    async fn domain_without_history_registers_rule() {
        let fx = fixture(&["https://other.org/"]);
        let targeted = fx
            .manager
            .configure_by_domain("example.com", &http(5000))
            .await
            .unwrap();

        assert_eq!(targeted.result.total_processed, 0);
        assert_eq!(targeted.rule.unwrap().priority, DOMAIN_RULE_PRIORITY);
        assert_eq!(
            fx.selector
                .resolve("https://docs.example.com/x")
                .unwrap()
                .provider_name,
            "http"
        );
    }

    #[tokio::test]
    async fn domain_with_history_configures_known_urls() {
        let fx = fixture(&["https://example.com/a", "https://www.example.com/b", "https://x.org/"]);
        let targeted = fx
            .manager
            .configure_by_domain("example.com", &http(5000))
            .await
            .unwrap();

        assert!(targeted.rule.is_none());
        assert_eq!(targeted.result.total_successful, 2);
        assert!(fx.selector.rules().is_empty());
    }

    #[tokio::test]
    async fn extension_registers_rule_and_configures_known_urls() {
        let fx = fixture(&["https://a.com/report.pdf", "https://a.com/index.html"]);
        let docling = ConfigurationRequest::new("docling", Map::new());
        let targeted = fx
            .manager
            .configure_by_extension(".PDF", &docling)
            .await
            .unwrap();

        assert_eq!(targeted.result.successful, vec!["https://a.com/report.pdf"]);
        let rule = targeted.rule.unwrap();
        assert_eq!(rule.pattern, "*.pdf");
        assert_eq!(rule.priority, EXTENSION_RULE_PRIORITY);
        assert_eq!(
            fx.selector
                .resolve("https://new.com/paper.pdf")
                .unwrap()
                .provider_name,
            "docling"
        );
    }

    #[tokio::test]
    async fn export_then_import_restores_state() {
        let fx = fixture(&[]);
        fx.manager
            .execute_batch_operation(&BatchOperation::set(urls(&["a", "b"]), http(5000)))
            .await
            .unwrap();
        fx.selector
            .add_rule(SelectionRule::new("*.pdf", "docling", 15))
            .unwrap();

        let document = fx.manager.export().await.unwrap();
        assert_eq!(document.version, EXPORT_VERSION);
        let json = serde_json::to_value(&document).unwrap();
        assert_eq!(json["configurations"][0]["providerName"], "http");
        assert_eq!(json["rules"][0]["providerName"], "docling");

        let target = fixture(&[]);
        target
            .selector
            .add_rule(SelectionRule::new("stale.com", "http", 1))
            .unwrap();
        let result = target.manager.import(document).await.unwrap();

        assert_eq!(result.total_successful, 2);
        assert_eq!(target.selector.rules().len(), 1);
        assert_eq!(target.selector.rules()[0].pattern, "*.pdf");
        assert!(target.parameters.get_parameters("b", "http").await.unwrap().is_some());
        assert_eq!(target.selector.resolve("b").unwrap().provider_name, "http");
    }

    #[tokio::test]
    async fn restore_overrides_prefers_highest_priority_enabled() {
        let store = Arc::new(MemoryConfigStore::<ProviderConfiguration>::new());
        let fx = fixture_with(store.clone(), &[]);
        fx.parameters
            .set_configuration("https://a.com", &http(5000).with_priority(1))
            .await
            .unwrap();
        fx.parameters
            .set_configuration(
                "https://a.com",
                &ConfigurationRequest::new("browser", Map::new()).with_priority(9),
            )
            .await
            .unwrap();
        let mut disabled = ConfigurationRequest::new("browser", Map::new());
        disabled.enabled = false;
        fx.parameters
            .set_configuration("https://b.com", &disabled)
            .await
            .unwrap();

        // A fresh manager over the same store starts with no overrides.
        let reopened = fixture_with(store, &[]);
        assert!(reopened.selector.resolve("https://a.com").is_err());

        assert_eq!(reopened.manager.restore_overrides().await.unwrap(), 1);
        assert_eq!(
            reopened.selector.resolve("https://a.com").unwrap().provider_name,
            "browser"
        );
        assert!(reopened.selector.resolve("https://b.com").is_err());
    }

    fn browser(priority: i32) -> ConfigurationRequest {
        ConfigurationRequest::new("browser", Map::new()).with_priority(priority)
    }

    async fn routed_after_reopen(store: Arc<MemoryConfigStore<ProviderConfiguration>>, url: &str) -> String {
        let reopened = fixture_with(store, &[]);
        reopened.manager.restore_overrides().await.unwrap();
        reopened.selector.resolve(url).unwrap().provider_name
    }

    #[tokio::test]
    async fn live_override_matches_restored_override_in_either_order() {
        let url = "https://a.com";
        let orders: [[ConfigurationRequest; 2]; 2] = [
            [browser(9), http(5000).with_priority(1)],
            [http(5000).with_priority(1), browser(9)],
        ];

        for [first, second] in orders {
            let store = Arc::new(MemoryConfigStore::<ProviderConfiguration>::new());
            let fx = fixture_with(store.clone(), &[]);
            for request in [first, second] {
                fx.manager
                    .execute_batch_operation(&BatchOperation::set(urls(&[url]), request))
                    .await
                    .unwrap();
            }

            let live = fx.selector.resolve(url).unwrap().provider_name;
            assert_eq!(live, "browser");
            assert_eq!(routed_after_reopen(store, url).await, live);
        }
    }

    #[tokio::test]
    async fn disabling_one_provider_keeps_the_other_routed() {
        let url = "https://a.com";
        let store = Arc::new(MemoryConfigStore::<ProviderConfiguration>::new());
        let fx = fixture_with(store.clone(), &[]);
        fx.manager
            .execute_batch_operation(&BatchOperation::set(urls(&[url]), http(5000).with_priority(1)))
            .await
            .unwrap();
        fx.manager
            .execute_batch_operation(&BatchOperation::set(urls(&[url]), browser(9)))
            .await
            .unwrap();

        let disable = ConfigurationUpdate {
            provider_name: "browser".into(),
            parameters: Map::new(),
            priority: None,
            enabled: Some(false),
        };
        let result = fx
            .manager
            .execute_batch_operation(&BatchOperation::update(urls(&[url]), disable))
            .await
            .unwrap();
        assert_eq!(result.total_successful, 1);

        assert_eq!(fx.selector.resolve(url).unwrap().provider_name, "http");
        assert_eq!(routed_after_reopen(store, url).await, "http");
    }

    #[tokio::test]
    async fn equal_priorities_route_to_the_same_provider_live_and_restored() {
        let url = "https://a.com";
        let store = Arc::new(MemoryConfigStore::<ProviderConfiguration>::new());
        let fx = fixture_with(store.clone(), &[]);
        for request in [http(5000), browser(0)] {
            fx.manager
                .execute_batch_operation(&BatchOperation::set(urls(&[url]), request))
                .await
                .unwrap();
        }

        let live = fx.selector.resolve(url).unwrap().provider_name;
        assert_eq!(live, "browser");
        assert_eq!(routed_after_reopen(store, url).await, live);
    }

    #[tokio::test]
    async fn clear_reports_each_url_once() {
        let fx = fixture(&[]);
        for request in [http(5000), browser(3)] {
            fx.manager
                .execute_batch_operation(&BatchOperation::set(urls(&["https://b.com"]), request))
                .await
                .unwrap();
        }
        fx.manager
            .execute_batch_operation(&BatchOperation::set(urls(&["https://a.com"]), http(5000)))
            .await
            .unwrap();

        let result = fx
            .manager
            .execute_batch_operation(&BatchOperation::clear())
            .await
            .unwrap();
        assert_eq!(result.successful, vec!["https://a.com", "https://b.com"]);
        assert_eq!(result.total_processed, 2);
        assert!(fx.selector.resolve("https://b.com").is_err());
    }

    #[tokio::test]
    async fn import_rejects_other_major_versions() {
        let fx = fixture(&[]);
        let document = ConfigDocument {
            version: "2.0".into(),
            timestamp: Utc::now(),
            configurations: Vec::new(),
            rules: Vec::new(),
        };
        let err = fx.manager.import(document).await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
