use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Application-wide error types for Sluice.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A provider call exceeded its deadline.
    ///
    /// Rendered with a leading `timeout` so the retry classifier can match it.
    #[error("timeout: operation exceeded {0} ms deadline")]
    Timeout(u64),

    /// A provider failed for a provider-specific reason.
    #[error("Provider '{provider}' failed: {message}")]
    ProviderError { provider: String, message: String },

    /// No registered provider's capability check accepted the input.
    #[error("No capable {kind} provider for {input}")]
    NoCapableProvider { kind: String, input: String },

    /// Every capable provider exhausted its retries.
    #[error("All {kind} providers failed (tried: {}): {last_error}", attempted.join(", "))]
    AllProvidersFailed {
        kind: String,
        attempted: Vec<String>,
        last_error: Box<AppError>,
    },

    /// Diagnostic run produced no successful attempt.
    #[error("No {kind} provider succeeded")]
    NoSuccessfulProvider { kind: String },

    /// A provider with the same name is already registered.
    #[error("{kind} provider '{name}' is already registered")]
    DuplicateProvider { kind: String, name: String },

    /// A parameter bag failed its schema.
    #[error("Invalid parameters for '{provider}': {}", errors.join("; "))]
    ValidationError {
        provider: String,
        errors: Vec<String>,
    },

    /// No validator is registered for the requested provider kind.
    #[error("No parameter schema registered for '{0}'")]
    UnknownProviderKind(String),

    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    /// Selector found no override, no matching rule and no default.
    #[error("No selection rule matched {0}")]
    RuleNotMatched(String),

    /// An update targeted a URL with no stored configuration.
    #[error("no existing configuration for {url} ({provider})")]
    ConfigurationNotFound { url: String, provider: String },

    /// A cleaner in the chain raised an error.
    #[error("Cleaner '{cleaner}' failed: {message}")]
    CleanerError { cleaner: String, message: String },

    /// Content could not be decoded for the requested format.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The surrounding batch was cancelled before this item finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// Stable tag for an [`AppError`], used in structured per-URL failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Http,
    Network,
    Timeout,
    Provider,
    NoCapableProvider,
    AllProvidersFailed,
    NoSuccessfulProvider,
    DuplicateProvider,
    Validation,
    UnknownProviderKind,
    PresetNotFound,
    RuleNotMatched,
    ConfigurationNotFound,
    Cleaner,
    UnsupportedFormat,
    Serialization,
    Database,
    Cancelled,
    Config,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Http => "http",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Provider => "provider",
            ErrorKind::NoCapableProvider => "no_capable_provider",
            ErrorKind::AllProvidersFailed => "all_providers_failed",
            ErrorKind::NoSuccessfulProvider => "no_successful_provider",
            ErrorKind::DuplicateProvider => "duplicate_provider",
            ErrorKind::Validation => "validation",
            ErrorKind::UnknownProviderKind => "unknown_provider_kind",
            ErrorKind::PresetNotFound => "preset_not_found",
            ErrorKind::RuleNotMatched => "rule_not_matched",
            ErrorKind::ConfigurationNotFound => "configuration_not_found",
            ErrorKind::Cleaner => "cleaner",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Database => "database",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::HttpError(_) => ErrorKind::Http,
            AppError::NetworkError(_) => ErrorKind::Network,
            AppError::Timeout(_) => ErrorKind::Timeout,
            AppError::ProviderError { .. } => ErrorKind::Provider,
            AppError::NoCapableProvider { .. } => ErrorKind::NoCapableProvider,
            AppError::AllProvidersFailed { .. } => ErrorKind::AllProvidersFailed,
            AppError::NoSuccessfulProvider { .. } => ErrorKind::NoSuccessfulProvider,
            AppError::DuplicateProvider { .. } => ErrorKind::DuplicateProvider,
            AppError::ValidationError { .. } => ErrorKind::Validation,
            AppError::UnknownProviderKind(_) => ErrorKind::UnknownProviderKind,
            AppError::PresetNotFound(_) => ErrorKind::PresetNotFound,
            AppError::RuleNotMatched(_) => ErrorKind::RuleNotMatched,
            AppError::ConfigurationNotFound { .. } => ErrorKind::ConfigurationNotFound,
            AppError::CleanerError { .. } => ErrorKind::Cleaner,
            AppError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            AppError::SerializationError(_) => ErrorKind::Serialization,
            AppError::DatabaseError(_) => ErrorKind::Database,
            AppError::Cancelled => ErrorKind::Cancelled,
            AppError::ConfigError(_) => ErrorKind::Config,
            AppError::Generic(_) => ErrorKind::Other,
        }
    }

    /// Name of the provider or cleaner that produced this error, if known.
    ///
    /// For `AllProvidersFailed` this is the provider behind the last error.
    pub fn provider(&self) -> Option<&str> {
        match self {
            AppError::ProviderError { provider, .. } => Some(provider),
            AppError::ValidationError { provider, .. } => Some(provider),
            AppError::ConfigurationNotFound { provider, .. } => Some(provider),
            AppError::CleanerError { cleaner, .. } => Some(cleaner),
            AppError::AllProvidersFailed {
                attempted,
                last_error,
                ..
            } => last_error
                .provider()
                .or_else(|| attempted.last().map(String::as_str)),
            _ => None,
        }
    }
}

/// Structured per-URL failure surfaced by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineError {
    pub url: String,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl PipelineError {
    pub fn from_error(url: impl Into<String>, error: &AppError) -> Self {
        Self {
            url: url.into(),
            kind: error.kind(),
            message: error.to_string(),
            provider: error.provider().map(str::to_string),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "{} [{} via {provider}]: {}", self.url, self.kind, self.message),
            None => write!(f, "{} [{}]: {}", self.url, self.kind, self.message),
        }
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_carries_tag() {
        let msg = AppError::Timeout(1500).to_string();
        assert!(msg.starts_with("timeout"));
        assert!(msg.contains("1500"));
    }

    #[test]
    fn test_all_providers_failed_reports_last_provider() {
        let err = AppError::AllProvidersFailed {
            kind: "fetcher".into(),
            attempted: vec!["http".into(), "browser".into()],
            last_error: Box::new(AppError::ProviderError {
                provider: "browser".into(),
                message: "crashed".into(),
            }),
        };
        assert_eq!(err.kind(), ErrorKind::AllProvidersFailed);
        assert_eq!(err.provider(), Some("browser"));
        assert!(err.to_string().contains("http, browser"));
    }

    #[test]
    fn test_all_providers_failed_falls_back_to_attempted() {
        let err = AppError::AllProvidersFailed {
            kind: "processor".into(),
            attempted: vec!["html".into()],
            last_error: Box::new(AppError::Timeout(10)),
        };
        assert_eq!(err.provider(), Some("html"));
    }

    #[test]
    fn test_validation_error_joins_messages() {
        let err = AppError::ValidationError {
            provider: "browser".into(),
            errors: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Invalid parameters for 'browser': a; b");
        assert_eq!(err.kind().as_str(), "validation");
    }

    #[test]
    fn test_pipeline_error_carries_kind_and_provider() {
        let err = PipelineError::from_error(
            "https://a.com",
            &AppError::CleanerError {
                cleaner: "xss".into(),
                message: "boom".into(),
            },
        );
        assert_eq!(err.kind, ErrorKind::Cleaner);
        assert_eq!(err.provider.as_deref(), Some("xss"));
        assert!(err.to_string().starts_with("https://a.com [cleaner via xss]"));
    }
}
