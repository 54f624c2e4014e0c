use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;

/// Detected content type of a URL's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Html,
    Pdf,
    Docx,
    Spreadsheet,
    Presentation,
    Image,
    Json,
    Markdown,
    PlainText,
    Unknown,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Html => "html",
            ContentType::Pdf => "pdf",
            ContentType::Docx => "docx",
            ContentType::Spreadsheet => "spreadsheet",
            ContentType::Presentation => "presentation",
            ContentType::Image => "image",
            ContentType::Json => "json",
            ContentType::Markdown => "markdown",
            ContentType::PlainText => "plaintext",
            ContentType::Unknown => "unknown",
        }
    }

    /// Map a file extension (without the dot, any case) to a content type.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "html" | "htm" | "xhtml" | "php" | "asp" | "aspx" => ContentType::Html,
            "pdf" => ContentType::Pdf,
            "doc" | "docx" | "odt" | "rtf" => ContentType::Docx,
            "xls" | "xlsx" | "ods" | "csv" => ContentType::Spreadsheet,
            "ppt" | "pptx" | "odp" => ContentType::Presentation,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "tif" | "tiff" | "bmp" => ContentType::Image,
            "json" => ContentType::Json,
            "md" | "markdown" => ContentType::Markdown,
            "txt" | "text" | "log" => ContentType::PlainText,
            _ => ContentType::Unknown,
        }
    }

    /// Map a MIME type (parameters such as `charset` are ignored).
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "text/html" | "application/xhtml+xml" => ContentType::Html,
            "application/pdf" => ContentType::Pdf,
            "application/msword"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                ContentType::Docx
            }
            "application/vnd.ms-excel"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "text/csv" => ContentType::Spreadsheet,
            "application/vnd.ms-powerpoint"
            | "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                ContentType::Presentation
            }
            "application/json" => ContentType::Json,
            "text/markdown" => ContentType::Markdown,
            "text/plain" => ContentType::PlainText,
            m if m.starts_with("image/") => ContentType::Image,
            _ => ContentType::Unknown,
        }
    }

    /// Binary document formats that need a document processor rather than text decoding.
    pub fn is_document(&self) -> bool {
        matches!(
            self,
            ContentType::Pdf
                | ContentType::Docx
                | ContentType::Spreadsheet
                | ContentType::Presentation
                | ContentType::Image
        )
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format of normalized text handed to the cleaner chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormat {
    Markdown,
    Html,
    Plain,
}

/// A validated provider parameter bag.
///
/// Only a parameter validator's `normalize` builds one from user input; it is
/// deserializable so stored and exported configurations can be reloaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(Map<String, Value>);

impl Parameters {
    pub(crate) fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode into a provider's typed parameter struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }
}

/// Unit of work for fetchers and scrapers.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub content_type: ContentType,
    /// Stored configuration of the provider selected for this URL, if any.
    pub configuration: Option<ProviderConfiguration>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            url: url.into(),
            content_type,
            configuration: None,
        }
    }

    pub fn with_configuration(mut self, configuration: Option<ProviderConfiguration>) -> Self {
        self.configuration = configuration;
        self
    }

    /// Decode the stored parameters if they belong to `provider`, otherwise
    /// fall back to `T::default()`.
    pub fn parameters_for<T: DeserializeOwned + Default>(&self, provider: &str) -> Result<T, AppError> {
        match &self.configuration {
            Some(c) if c.provider_name == provider => c.parameters.decode(),
            _ => Ok(T::default()),
        }
    }
}

/// Raw payload produced by a fetcher or scraper.
#[derive(Debug, Clone)]
pub struct RawContent {
    pub url: String,
    pub body: Vec<u8>,
    /// MIME type reported by the source, if any.
    pub mime: Option<String>,
    pub content_type: ContentType,
    pub provider: String,
}

impl RawContent {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Normalized text produced by a processor.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub url: String,
    pub text: String,
    pub format: TextFormat,
    pub title: Option<String>,
    pub metadata: Map<String, Value>,
    pub processor: String,
}

fn default_enabled() -> bool {
    true
}

/// Per-(URL, provider) configuration managed by the parameter service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfiguration {
    pub provider_name: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Per-(URL, cleaner) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanerConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher runs first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl CleanerConfig {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            priority,
            options: Map::new(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Decode the options bag into a cleaner's typed options.
    pub fn decode_options<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        Ok(serde_json::from_value(Value::Object(self.options.clone()))?)
    }
}

/// DTO for persisting a cleaned document.
#[derive(Debug, Clone, Serialize)]
pub struct NewDocument {
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    /// SHA-256 of the cleaned content.
    pub fingerprint: String,
    pub content_type: ContentType,
    pub provider: String,
    pub processor: String,
}

/// A persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub fingerprint: String,
    pub content_type: ContentType,
    pub provider: String,
    pub processor: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one URL's pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProcessingOutcome {
    Completed(ProcessingResult),
    /// The fingerprint already exists in the store; nothing was saved.
    Duplicate { url: String, fingerprint: String },
}

impl ProcessingOutcome {
    pub fn url(&self) -> &str {
        match self {
            ProcessingOutcome::Completed(r) => &r.url,
            ProcessingOutcome::Duplicate { url, .. } => url,
        }
    }

    pub fn fingerprint(&self) -> &str {
        match self {
            ProcessingOutcome::Completed(r) => &r.fingerprint,
            ProcessingOutcome::Duplicate { fingerprint, .. } => fingerprint,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub url: String,
    pub content_type: ContentType,
    pub provider: String,
    pub processor: String,
    pub title: Option<String>,
    pub fingerprint: String,
    pub text: String,
    pub cleaners_applied: Vec<String>,
    pub warnings: Vec<String>,
    pub document_id: Option<Uuid>,
    pub duration_ms: u64,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_consistency() {
        let h1 = compute_hash("hello world");
        let h2 = compute_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_compute_hash_different_inputs() {
        assert_ne!(compute_hash("hello"), compute_hash("world"));
    }

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(ContentType::from_extension("PDF"), ContentType::Pdf);
        assert_eq!(ContentType::from_extension("htm"), ContentType::Html);
        assert_eq!(ContentType::from_extension("xlsx"), ContentType::Spreadsheet);
        assert_eq!(ContentType::from_extension("zzz"), ContentType::Unknown);
    }

    #[test]
    fn test_content_type_from_mime_ignores_params() {
        assert_eq!(
            ContentType::from_mime("text/html; charset=utf-8"),
            ContentType::Html
        );
        assert_eq!(ContentType::from_mime("image/png"), ContentType::Image);
        assert_eq!(
            ContentType::from_mime("application/octet-stream"),
            ContentType::Unknown
        );
    }

    #[test]
    fn test_provider_configuration_defaults_on_deserialize() {
        let cfg: ProviderConfiguration =
            serde_json::from_value(serde_json::json!({"providerName": "http"})).unwrap();
        assert_eq!(cfg.provider_name, "http");
        assert!(cfg.enabled);
        assert_eq!(cfg.priority, 0);
        assert!(cfg.parameters.is_empty());
    }

    #[test]
    fn test_parameters_decode() {
        #[derive(Deserialize, Default)]
        struct Typed {
            #[serde(default)]
            timeout_ms: u64,
        }
        let params = Parameters::from_map(
            serde_json::json!({"timeout_ms": 500})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let typed: Typed = params.decode().unwrap();
        assert_eq!(typed.timeout_ms, 500);

        let req = FetchRequest::new("https://example.com", ContentType::Html).with_configuration(
            Some(ProviderConfiguration {
                provider_name: "http".into(),
                parameters: params,
                priority: 0,
                enabled: true,
            }),
        );
        let own: Typed = req.parameters_for("http").unwrap();
        assert_eq!(own.timeout_ms, 500);
        let other: Typed = req.parameters_for("browser").unwrap();
        assert_eq!(other.timeout_ms, 0);
    }
}
