use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::kinds::{BrowserValidator, CrawlerValidator, DocumentValidator, HttpValidator, OcrValidator};
use super::{ParameterSchema, ParameterValidator, ValidationReport};
use crate::config_store::ConfigManager;
use crate::error::AppError;
use crate::models::ProviderConfiguration;

fn default_enabled() -> bool {
    true
}

/// Unvalidated configuration as supplied by a caller, a preset or an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationRequest {
    pub provider_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ConfigurationRequest {
    pub fn new(provider_name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            provider_name: provider_name.into(),
            parameters,
            priority: 0,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl From<ProviderConfiguration> for ConfigurationRequest {
    fn from(config: ProviderConfiguration) -> Self {
        Self {
            provider_name: config.provider_name,
            parameters: config.parameters.as_map().clone(),
            priority: config.priority,
            enabled: config.enabled,
        }
    }
}

/// A validated, normalized configuration and the warnings raised on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedConfiguration {
    pub configuration: ProviderConfiguration,
    pub warnings: Vec<String>,
}

/// Owns the validator map and guards writes to the provider-configuration
/// store: nothing reaches the store without passing its kind's validator.
pub struct ParameterService {
    validators: RwLock<HashMap<String, Arc<dyn ParameterValidator>>>,
    configs: Arc<ConfigManager<ProviderConfiguration>>,
}

impl ParameterService {
    pub fn new(configs: Arc<ConfigManager<ProviderConfiguration>>) -> Self {
        Self {
            validators: RwLock::new(HashMap::new()),
            configs,
        }
    }

    /// Service with validators for `http`, `browser`, `crawl4ai`, `docling`
    /// and `deepdoctection`.
    pub fn with_builtin_validators(configs: Arc<ConfigManager<ProviderConfiguration>>) -> Self {
        let service = Self::new(configs);
        service.register_validator(Arc::new(HttpValidator::default()));
        service.register_validator(Arc::new(BrowserValidator::default()));
        service.register_validator(Arc::new(CrawlerValidator::default()));
        service.register_validator(Arc::new(DocumentValidator::default()));
        service.register_validator(Arc::new(OcrValidator::default()));
        service
    }

    pub fn configs(&self) -> &Arc<ConfigManager<ProviderConfiguration>> {
        &self.configs
    }

    /// Register (or replace) the validator for its kind.
    pub fn register_validator(&self, validator: Arc<dyn ParameterValidator>) {
        let kind = validator.kind().to_string();
        tracing::debug!(kind = %kind, "Registered parameter validator");
        self.validators
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(kind, validator);
    }

    pub fn validator(&self, kind: &str) -> Result<Arc<dyn ParameterValidator>, AppError> {
        self.validators
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(kind)
            .cloned()
            .ok_or_else(|| AppError::UnknownProviderKind(kind.to_string()))
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .validators
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        kinds.sort();
        kinds
    }

    pub fn schema(&self, kind: &str) -> Result<ParameterSchema, AppError> {
        Ok(self.validator(kind)?.schema().clone())
    }

    pub fn validate(&self, kind: &str, raw: &Map<String, Value>) -> Result<ValidationReport, AppError> {
        Ok(self.validator(kind)?.validate(raw))
    }

    /// Validate and normalize without touching the store.
    pub fn prepare(&self, request: &ConfigurationRequest) -> Result<AppliedConfiguration, AppError> {
        let validator = self.validator(&request.provider_name)?;
        let report = validator.validate(&request.parameters);
        if !report.valid {
            return Err(AppError::ValidationError {
                provider: request.provider_name.clone(),
                errors: report.errors,
            });
        }
        Ok(AppliedConfiguration {
            configuration: ProviderConfiguration {
                provider_name: request.provider_name.clone(),
                parameters: validator.normalize(&request.parameters),
                priority: request.priority,
                enabled: request.enabled,
            },
            warnings: report.warnings,
        })
    }

    /// Validate, normalize and upsert a configuration for a URL.
    ///
    /// An invalid request fails with [`AppError::ValidationError`] and leaves
    /// both cache and store untouched. Warnings do not block the write.
    pub async fn set_configuration(
        &self,
        url: &str,
        request: &ConfigurationRequest,
    ) -> Result<AppliedConfiguration, AppError> {
        let applied = self.prepare(request)?;
        for warning in &applied.warnings {
            tracing::warn!(url = %url, provider = %request.provider_name, "{warning}");
        }
        self.configs
            .set(url, applied.configuration.clone())
            .await?;
        Ok(applied)
    }

    pub async fn set_parameters(
        &self,
        url: &str,
        kind: &str,
        raw: Map<String, Value>,
    ) -> Result<AppliedConfiguration, AppError> {
        let existing = self.configs.get(url, kind).await?;
        let mut request = ConfigurationRequest::new(kind, raw);
        if let Some(existing) = existing {
            request.priority = existing.priority;
            request.enabled = existing.enabled;
        }
        self.set_configuration(url, &request).await
    }

    pub async fn get_parameters(
        &self,
        url: &str,
        kind: &str,
    ) -> Result<Option<ProviderConfiguration>, AppError> {
        self.configs.get(url, kind).await
    }

    pub async fn remove_parameters(&self, url: &str, kind: Option<&str>) -> Result<(), AppError> {
        self.configs.delete(url, kind).await
    }

    /// Concurrency cap recommended by the configuration's validator, if any.
    pub fn recommended_concurrency(&self, config: &ProviderConfiguration) -> Option<usize> {
        self.validator(&config.provider_name)
            .ok()?
            .recommended_concurrency(config.parameters.as_map())
    }
}
