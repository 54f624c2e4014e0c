//! Text cleaners and the linear chain that runs them per URL.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::config_store::ConfigManager;
use crate::error::AppError;
use crate::models::{CleanerConfig, TextFormat};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleaningStatistics {
    pub original_length: usize,
    pub cleaned_length: usize,
    pub removed_chars: usize,
    /// Fraction of characters removed, in `[0, 1]`.
    pub reduction_ratio: f64,
}

impl CleaningStatistics {
    pub fn compute(original: &str, cleaned: &str) -> Self {
        let original_length = original.chars().count();
        let cleaned_length = cleaned.chars().count();
        let removed_chars = original_length.saturating_sub(cleaned_length);
        let reduction_ratio = if original_length == 0 {
            0.0
        } else {
            removed_chars as f64 / original_length as f64
        };
        Self {
            original_length,
            cleaned_length,
            removed_chars,
            reduction_ratio,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CleaningResult {
    pub original: String,
    pub cleaned: String,
    pub statistics: CleaningStatistics,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

/// Overlay `override` onto `base`: flags and priority come from the
/// override, options are merged key by key.
pub fn merge_config(base: &CleanerConfig, config_override: Option<&CleanerConfig>) -> CleanerConfig {
    let Some(over) = config_override else {
        return base.clone();
    };
    let mut merged = base.clone();
    merged.enabled = over.enabled;
    merged.priority = over.priority;
    for (key, value) in &over.options {
        merged.options.insert(key.clone(), value.clone());
    }
    merged
}

/// A text cleaner.
///
/// Cleaning runs as `validate_input -> pre_process -> perform_cleaning ->
/// post_process`, then `calculate_statistics` and `generate_warnings`.
/// Only `perform_cleaning` is mandatory.
pub trait Cleaner: Send + Sync {
    fn name(&self) -> &str;

    fn supported_formats(&self) -> &[TextFormat];

    /// Config used when no per-URL config is stored.
    fn default_config(&self) -> CleanerConfig;

    fn validate_input(&self, _input: &str, _format: TextFormat) -> Result<(), AppError> {
        Ok(())
    }

    fn pre_process(&self, input: &str, _config: &CleanerConfig) -> Result<String, AppError> {
        Ok(input.to_string())
    }

    fn perform_cleaning(
        &self,
        input: &str,
        format: TextFormat,
        config: &CleanerConfig,
    ) -> Result<String, AppError>;

    fn post_process(&self, output: String, _config: &CleanerConfig) -> Result<String, AppError> {
        Ok(output)
    }

    fn calculate_statistics(&self, original: &str, cleaned: &str) -> CleaningStatistics {
        CleaningStatistics::compute(original, cleaned)
    }

    fn generate_warnings(
        &self,
        _original: &str,
        _cleaned: &str,
        _config: &CleanerConfig,
    ) -> Vec<String> {
        Vec::new()
    }

    fn supports(&self, format: TextFormat) -> bool {
        self.supported_formats().contains(&format)
    }

    /// Run every phase with the default config merged with `config_override`.
    ///
    /// Phase errors are reported as [`AppError::CleanerError`] naming this cleaner.
    fn clean(
        &self,
        input: &str,
        format: TextFormat,
        config_override: Option<&CleanerConfig>,
    ) -> Result<CleaningResult, AppError> {
        let start = Instant::now();
        let config = merge_config(&self.default_config(), config_override);

        let cleaned = self
            .validate_input(input, format)
            .and_then(|()| self.pre_process(input, &config))
            .and_then(|pre| self.perform_cleaning(&pre, format, &config))
            .and_then(|out| self.post_process(out, &config))
            .map_err(|e| match e {
                AppError::CleanerError { .. } => e,
                other => AppError::CleanerError {
                    cleaner: self.name().to_string(),
                    message: other.to_string(),
                },
            })?;

        Ok(CleaningResult {
            statistics: self.calculate_statistics(input, &cleaned),
            warnings: self.generate_warnings(input, &cleaned, &config),
            original: input.to_string(),
            cleaned,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Read a boolean option from a cleaner config.
pub fn bool_option(config: &CleanerConfig, key: &str, default: bool) -> bool {
    config
        .options
        .get(key)
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

/// Output of a full chain run.
#[derive(Debug, Clone, Default)]
pub struct ChainOutput {
    pub text: String,
    pub applied: Vec<String>,
    pub warnings: Vec<String>,
}

/// Registered cleaners plus the per-URL config store that selects and orders them.
pub struct CleanerChain {
    cleaners: RwLock<Vec<Arc<dyn Cleaner>>>,
    configs: Arc<ConfigManager<CleanerConfig>>,
}

impl CleanerChain {
    pub fn new(configs: Arc<ConfigManager<CleanerConfig>>) -> Self {
        Self {
            cleaners: RwLock::new(Vec::new()),
            configs,
        }
    }

    pub fn configs(&self) -> &Arc<ConfigManager<CleanerConfig>> {
        &self.configs
    }

    pub fn register(&self, cleaner: Arc<dyn Cleaner>) -> Result<(), AppError> {
        let mut cleaners = self
            .cleaners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if cleaners.iter().any(|c| c.name() == cleaner.name()) {
            return Err(AppError::DuplicateProvider {
                kind: "cleaner".into(),
                name: cleaner.name().to_string(),
            });
        }
        tracing::debug!(cleaner = %cleaner.name(), "Registered cleaner");
        cleaners.push(cleaner);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.cleaners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Enabled cleaners for a URL and format, highest priority first.
    ///
    /// A stored (URL, cleaner) config overrides the cleaner's default; ties
    /// keep registration order.
    pub async fn active_cleaners(
        &self,
        url: &str,
        format: TextFormat,
    ) -> Result<Vec<(Arc<dyn Cleaner>, CleanerConfig)>, AppError> {
        let snapshot: Vec<Arc<dyn Cleaner>> = self
            .cleaners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let mut active = Vec::with_capacity(snapshot.len());
        for cleaner in snapshot {
            let stored = self.configs.get(url, cleaner.name()).await?;
            let config = merge_config(&cleaner.default_config(), stored.as_ref());
            if !config.enabled {
                continue;
            }
            if !cleaner.supports(format) {
                tracing::debug!(cleaner = %cleaner.name(), ?format, "Skipping cleaner for unsupported format");
                continue;
            }
            active.push((cleaner, config));
        }
        active.sort_by(|a, b| b.1.priority.cmp(&a.1.priority));
        Ok(active)
    }

    /// Thread `text` through every active cleaner in order.
    ///
    /// The first failing cleaner aborts the chain with its error.
    pub async fn run(&self, url: &str, text: &str, format: TextFormat) -> Result<ChainOutput, AppError> {
        let mut output = ChainOutput {
            text: text.to_string(),
            ..ChainOutput::default()
        };

        for (cleaner, config) in self.active_cleaners(url, format).await? {
            let result = cleaner.clean(&output.text, format, Some(&config))?;
            tracing::debug!(
                url = %url,
                cleaner = %cleaner.name(),
                removed = result.statistics.removed_chars,
                duration_ms = result.duration_ms,
                "Cleaner applied"
            );
            output.warnings.extend(
                result
                    .warnings
                    .into_iter()
                    .map(|w| format!("{}: {w}", cleaner.name())),
            );
            output.applied.push(cleaner.name().to_string());
            output.text = result.cleaned;
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockCleaner;

    fn chain() -> CleanerChain {
        CleanerChain::new(Arc::new(ConfigManager::in_memory("cleaners")))
    }

    #[tokio::test]
    async fn higher_priority_runs_first() {
        let chain = chain();
        chain
            .register(Arc::new(MockCleaner::appending("readability", 50, "[r]")))
            .unwrap();
        chain
            .register(Arc::new(MockCleaner::appending("xss", 95, "[x]")))
            .unwrap();

        let out = chain
            .run("https://a.com", "text", TextFormat::Markdown)
            .await
            .unwrap();

        assert_eq!(out.applied, vec!["xss", "readability"]);
        assert_eq!(out.text, "text[x][r]");
    }

    #[tokio::test]
    async fn disabling_a_cleaner_leaves_the_rest_untouched() {
        let chain = chain();
        chain
            .register(Arc::new(MockCleaner::appending("xss", 95, "[x]")))
            .unwrap();
        chain
            .register(Arc::new(MockCleaner::appending("readability", 50, "[r]")))
            .unwrap();
        chain
            .configs()
            .set("https://a.com", CleanerConfig::new("xss", 95).disabled())
            .await
            .unwrap();

        let out = chain
            .run("https://a.com", "text", TextFormat::Markdown)
            .await
            .unwrap();
        assert_eq!(out.applied, vec!["readability"]);
        assert_eq!(out.text, "text[r]");

        // Other URLs keep the default chain.
        let other = chain
            .run("https://b.com", "text", TextFormat::Markdown)
            .await
            .unwrap();
        assert_eq!(other.applied, vec!["xss", "readability"]);
    }

    #[tokio::test]
    async fn stored_priority_reorders_chain() {
        let chain = chain();
        chain
            .register(Arc::new(MockCleaner::appending("a", 10, "[a]")))
            .unwrap();
        chain
            .register(Arc::new(MockCleaner::appending("b", 20, "[b]")))
            .unwrap();
        chain
            .configs()
            .set("https://a.com", CleanerConfig::new("a", 30))
            .await
            .unwrap();

        let out = chain
            .run("https://a.com", "", TextFormat::Plain)
            .await
            .unwrap();
        assert_eq!(out.text, "[a][b]");
    }

    #[tokio::test]
    async fn ties_keep_registration_order() {
        let chain = chain();
        for name in ["first", "second", "third"] {
            chain
                .register(Arc::new(MockCleaner::appending(name, 10, name)))
                .unwrap();
        }
        let out = chain.run("u", "", TextFormat::Plain).await.unwrap();
        assert_eq!(out.text, "firstsecondthird");
    }

    #[tokio::test]
    async fn failing_cleaner_aborts_chain_with_its_name() {
        let chain = chain();
        chain
            .register(Arc::new(MockCleaner::failing("broken", 90)))
            .unwrap();
        let after = Arc::new(MockCleaner::appending("after", 10, "[after]"));
        chain.register(after.clone()).unwrap();

        let err = chain
            .run("https://a.com", "text", TextFormat::Html)
            .await
            .unwrap_err();

        match err {
            AppError::CleanerError { cleaner, .. } => assert_eq!(cleaner, "broken"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(after.calls(), 0);
    }

    #[tokio::test]
    async fn unsupported_format_is_skipped() {
        let chain = chain();
        chain
            .register(Arc::new(
                MockCleaner::appending("html-only", 10, "[h]").with_formats(&[TextFormat::Html]),
            ))
            .unwrap();

        let out = chain
            .run("https://a.com", "text", TextFormat::Markdown)
            .await
            .unwrap();
        assert!(out.applied.is_empty());
        assert_eq!(out.text, "text");
    }

    #[tokio::test]
    async fn warnings_are_prefixed_and_do_not_fail() {
        let chain = chain();
        chain
            .register(Arc::new(
                MockCleaner::appending("xss", 95, "").with_warning("potentially unsafe content stripped"),
            ))
            .unwrap();

        let out = chain
            .run("https://a.com", "text", TextFormat::Html)
            .await
            .unwrap();
        assert_eq!(out.warnings, vec!["xss: potentially unsafe content stripped"]);
    }

    #[test]
    fn merge_overlays_options() {
        let base = CleanerConfig::new("x", 1)
            .with_option("keep", Value::Bool(true))
            .with_option("mode", Value::from("strict"));
        let over = CleanerConfig::new("x", 5).with_option("mode", Value::from("loose"));

        let merged = merge_config(&base, Some(&over));
        assert_eq!(merged.priority, 5);
        assert_eq!(merged.options["keep"], Value::Bool(true));
        assert_eq!(merged.options["mode"], Value::from("loose"));
    }

    #[test]
    fn statistics_count_chars() {
        let stats = CleaningStatistics::compute("héllo world", "héllo");
        assert_eq!(stats.original_length, 11);
        assert_eq!(stats.cleaned_length, 5);
        assert_eq!(stats.removed_chars, 6);
    }
}
