//! Built-in validators, one per provider kind, and the typed parameter views
//! providers decode from a validated [`Parameters`](crate::models::Parameters) bag.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::schema::{FieldDefault, FieldSpec, ParameterSchema};
use super::ParameterValidator;

/// Concurrency recommended for a browser running in slow-motion mode.
pub const SLOW_MO_CONCURRENCY: usize = 2;

const WAIT_UNTIL: &[&str] = &["load", "domcontentloaded", "networkidle"];
const CACHE_MODES: &[&str] = &["enabled", "disabled", "bypass", "read_only", "write_only"];
const EXTRACTION_STRATEGIES: &[&str] = &["none", "cosine", "llm", "regex"];
const DOCUMENT_TYPES: &[&str] = &[
    "pdf", "docx", "doc", "pptx", "ppt", "xlsx", "xls", "html", "txt", "md",
];
const OUTPUT_FORMATS: &[&str] = &["text", "markdown", "html", "json"];

fn bool_field(params: &Map<String, Value>, name: &str) -> bool {
    params.get(name).and_then(Value::as_bool).unwrap_or(false)
}

fn int_field(params: &Map<String, Value>, name: &str) -> Option<i64> {
    params.get(name).and_then(Value::as_i64)
}

fn str_field<'a>(params: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

// ---------------------------------------------------------------------------
// http
// ---------------------------------------------------------------------------

pub struct HttpValidator {
    schema: ParameterSchema,
}

impl Default for HttpValidator {
    fn default() -> Self {
        Self {
            schema: ParameterSchema::new(
                "http",
                vec![
                    FieldSpec::integer("timeout_ms", 1000, 120_000, "Request timeout")
                        .with_default(FieldDefault::Int(30_000)),
                    FieldSpec::string("user_agent", "User-Agent header")
                        .with_default(FieldDefault::Str("Sluice/0.1")),
                    FieldSpec::boolean("follow_redirects", true, "Follow 3xx redirects"),
                    FieldSpec::integer("max_body_bytes", 1024, 52_428_800, "Response size cap")
                        .with_default(FieldDefault::Int(10_485_760)),
                    FieldSpec::object("headers", "Extra request headers"),
                ],
            ),
        }
    }
}

impl ParameterValidator for HttpValidator {
    fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    fn cross_field(&self, params: &Map<String, Value>) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        if let Some(Value::Object(headers)) = params.get("headers") {
            for (name, value) in headers {
                if !value.is_string() {
                    errors.push(format!("headers.{name}: header values must be strings"));
                }
            }
        }
        (errors, Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpParameters {
    pub timeout_ms: u64,
    pub user_agent: String,
    pub follow_redirects: bool,
    pub max_body_bytes: usize,
    pub headers: HashMap<String, String>,
}

impl Default for HttpParameters {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            user_agent: "Sluice/0.1".to_string(),
            follow_redirects: true,
            max_body_bytes: 10_485_760,
            headers: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// browser
// ---------------------------------------------------------------------------

pub struct BrowserValidator {
    schema: ParameterSchema,
}

impl Default for BrowserValidator {
    fn default() -> Self {
        Self {
            schema: ParameterSchema::new(
                "browser",
                vec![
                    FieldSpec::boolean("headless", true, "Run without a visible window"),
                    FieldSpec::integer("slow_mo_ms", 0, 5000, "Delay between browser actions")
                        .with_default(FieldDefault::Int(0)),
                    FieldSpec::integer("timeout_ms", 1000, 180_000, "Navigation timeout")
                        .with_default(FieldDefault::Int(30_000)),
                    FieldSpec::one_of("wait_until", WAIT_UNTIL, "Navigation completion event")
                        .with_default(FieldDefault::Str("load")),
                    FieldSpec::string("wait_for_selector", "CSS selector to wait for"),
                    FieldSpec::integer("viewport_width", 320, 3840, "Viewport width")
                        .with_default(FieldDefault::Int(1280)),
                    FieldSpec::integer("viewport_height", 240, 2160, "Viewport height")
                        .with_default(FieldDefault::Int(720)),
                    FieldSpec::boolean("javascript", true, "Enable JavaScript"),
                    FieldSpec::boolean("screenshot", false, "Capture a screenshot"),
                ],
            ),
        }
    }
}

impl ParameterValidator for BrowserValidator {
    fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    fn cross_field(&self, params: &Map<String, Value>) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        if int_field(params, "slow_mo_ms").unwrap_or(0) > 0 {
            warnings.push(format!(
                "slow_mo_ms: slow-motion mode is resource heavy, batch concurrency will be limited to {SLOW_MO_CONCURRENCY}"
            ));
        }
        if !bool_field(params, "javascript") && str_field(params, "wait_until") == Some("networkidle")
        {
            warnings.push("wait_until: networkidle has little effect with javascript disabled".into());
        }
        if str_field(params, "wait_for_selector").is_some_and(|s| s.trim().is_empty()) {
            errors.push("wait_for_selector: must not be empty".into());
        }
        (errors, warnings)
    }

    fn recommended_concurrency(&self, params: &Map<String, Value>) -> Option<usize> {
        (int_field(params, "slow_mo_ms").unwrap_or(0) > 0).then_some(SLOW_MO_CONCURRENCY)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrowserParameters {
    pub headless: bool,
    pub slow_mo_ms: u64,
    pub timeout_ms: u64,
    pub wait_until: String,
    pub wait_for_selector: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub javascript: bool,
    pub screenshot: bool,
}

impl Default for BrowserParameters {
    fn default() -> Self {
        Self {
            headless: true,
            slow_mo_ms: 0,
            timeout_ms: 30_000,
            wait_until: "load".to_string(),
            wait_for_selector: None,
            viewport_width: 1280,
            viewport_height: 720,
            javascript: true,
            screenshot: false,
        }
    }
}

// ---------------------------------------------------------------------------
// crawl4ai
// ---------------------------------------------------------------------------

pub struct CrawlerValidator {
    schema: ParameterSchema,
}

impl Default for CrawlerValidator {
    fn default() -> Self {
        Self {
            schema: ParameterSchema::new(
                "crawl4ai",
                vec![
                    FieldSpec::integer("word_count_threshold", 0, 1000, "Minimum words per block")
                        .with_default(FieldDefault::Int(10)),
                    FieldSpec::string("css_selector", "Restrict extraction to this selector"),
                    FieldSpec::integer("page_timeout_ms", 1000, 180_000, "Page load timeout")
                        .with_default(FieldDefault::Int(60_000)),
                    FieldSpec::one_of("cache_mode", CACHE_MODES, "Crawler cache behaviour")
                        .with_default(FieldDefault::Str("enabled")),
                    FieldSpec::string_list("excluded_tags", "Tags removed before extraction"),
                    FieldSpec::boolean("only_text", false, "Strip all markup"),
                    FieldSpec::boolean("remove_overlay_elements", false, "Remove popups and modals"),
                    FieldSpec::boolean("magic", false, "Anti-bot heuristics"),
                    FieldSpec::boolean("process_iframes", false, "Inline iframe content"),
                    FieldSpec::boolean("screenshot", false, "Capture a screenshot"),
                    FieldSpec::one_of(
                        "extraction_strategy",
                        EXTRACTION_STRATEGIES,
                        "Structured extraction strategy",
                    )
                    .with_default(FieldDefault::Str("none")),
                    FieldSpec::string("llm_provider", "Provider for the llm strategy"),
                    FieldSpec::string("api_token", "API token for the llm strategy"),
                ],
            ),
        }
    }
}

impl ParameterValidator for CrawlerValidator {
    fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    fn cross_field(&self, params: &Map<String, Value>) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let strategy = str_field(params, "extraction_strategy").unwrap_or("none");
        let has_token = str_field(params, "api_token").is_some_and(|t| !t.trim().is_empty());
        if strategy == "llm" && !has_token {
            errors.push("api_token: required when extraction_strategy is llm".into());
        }
        if strategy != "llm" && str_field(params, "llm_provider").is_some() {
            warnings.push("llm_provider: ignored unless extraction_strategy is llm".into());
        }
        (errors, warnings)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CrawlerParameters {
    pub word_count_threshold: u32,
    pub css_selector: Option<String>,
    pub page_timeout_ms: u64,
    pub cache_mode: String,
    pub excluded_tags: Vec<String>,
    pub only_text: bool,
    pub remove_overlay_elements: bool,
    pub magic: bool,
    pub process_iframes: bool,
    pub screenshot: bool,
    pub extraction_strategy: String,
    pub llm_provider: Option<String>,
    pub api_token: Option<String>,
}

impl Default for CrawlerParameters {
    fn default() -> Self {
        Self {
            word_count_threshold: 10,
            css_selector: None,
            page_timeout_ms: 60_000,
            cache_mode: "enabled".to_string(),
            excluded_tags: Vec::new(),
            only_text: false,
            remove_overlay_elements: false,
            magic: false,
            process_iframes: false,
            screenshot: false,
            extraction_strategy: "none".to_string(),
            llm_provider: None,
            api_token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// docling
// ---------------------------------------------------------------------------

pub struct DocumentValidator {
    schema: ParameterSchema,
}

impl Default for DocumentValidator {
    fn default() -> Self {
        Self {
            schema: ParameterSchema::new(
                "docling",
                vec![
                    FieldSpec::one_of("document_type", DOCUMENT_TYPES, "Input document format")
                        .with_default(FieldDefault::Str("pdf")),
                    FieldSpec::boolean("export_tables", true, "Extract tables"),
                    FieldSpec::boolean("export_figures", false, "Extract figures"),
                    FieldSpec::boolean("ocr", true, "Run OCR on scanned pages"),
                    FieldSpec::one_of("output_format", OUTPUT_FORMATS, "Output text format")
                        .with_default(FieldDefault::Str("markdown")),
                    FieldSpec::integer("max_pages", 1, 10_000, "Stop after this many pages"),
                ],
            ),
        }
    }
}

impl ParameterValidator for DocumentValidator {
    fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    fn cross_field(&self, params: &Map<String, Value>) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let doc_type = str_field(params, "document_type").unwrap_or("pdf");
        if bool_field(params, "ocr") && matches!(doc_type, "html" | "txt" | "md") {
            warnings.push(format!("ocr: has no effect on {doc_type} documents"));
        }
        (Vec::new(), warnings)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DocumentParameters {
    pub document_type: String,
    pub export_tables: bool,
    pub export_figures: bool,
    pub ocr: bool,
    pub output_format: String,
    pub max_pages: Option<u32>,
}

impl Default for DocumentParameters {
    fn default() -> Self {
        Self {
            document_type: "pdf".to_string(),
            export_tables: true,
            export_figures: false,
            ocr: true,
            output_format: "markdown".to_string(),
            max_pages: None,
        }
    }
}

// ---------------------------------------------------------------------------
// deepdoctection
// ---------------------------------------------------------------------------

pub struct OcrValidator {
    schema: ParameterSchema,
}

impl Default for OcrValidator {
    fn default() -> Self {
        Self {
            schema: ParameterSchema::new(
                "deepdoctection",
                vec![
                    FieldSpec::boolean("ocr", true, "Run OCR"),
                    FieldSpec::boolean("use_layout_detection", false, "Detect page layout"),
                    FieldSpec::string_list("languages", "OCR languages")
                        .with_default(FieldDefault::StrList(&["en"])),
                    FieldSpec::integer("max_chars", 100, 1_000_000, "Truncate output")
                        .with_default(FieldDefault::Int(10_000)),
                ],
            ),
        }
    }
}

impl ParameterValidator for OcrValidator {
    fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    fn cross_field(&self, params: &Map<String, Value>) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        let languages_empty = params
            .get("languages")
            .and_then(Value::as_array)
            .is_some_and(|l| l.is_empty());
        if bool_field(params, "ocr") && languages_empty {
            errors.push("languages: at least one language is required when ocr is enabled".into());
        }
        (errors, Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OcrParameters {
    pub ocr: bool,
    pub use_layout_detection: bool,
    pub languages: Vec<String>,
    pub max_chars: usize,
}

impl Default for OcrParameters {
    fn default() -> Self {
        Self {
            ocr: true,
            use_layout_detection: false,
            languages: vec!["en".to_string()],
            max_chars: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn defaults_decode_to_typed_defaults() {
        assert_eq!(
            HttpValidator::default()
                .default_parameters()
                .decode::<HttpParameters>()
                .unwrap(),
            HttpParameters::default()
        );
        assert_eq!(
            BrowserValidator::default()
                .default_parameters()
                .decode::<BrowserParameters>()
                .unwrap(),
            BrowserParameters::default()
        );
        assert_eq!(
            CrawlerValidator::default()
                .default_parameters()
                .decode::<CrawlerParameters>()
                .unwrap(),
            CrawlerParameters::default()
        );
        assert_eq!(
            DocumentValidator::default()
                .default_parameters()
                .decode::<DocumentParameters>()
                .unwrap(),
            DocumentParameters::default()
        );
        assert_eq!(
            OcrValidator::default()
                .default_parameters()
                .decode::<OcrParameters>()
                .unwrap(),
            OcrParameters::default()
        );
    }

    #[test]
    fn llm_strategy_requires_token() {
        let v = CrawlerValidator::default();
        let report = v.validate(&map(json!({"extraction_strategy": "llm"})));
        assert!(!report.valid);
        assert!(report.errors[0].starts_with("api_token"));

        let report = v.validate(&map(json!({
            "extraction_strategy": "llm",
            "api_token": "secret"
        })));
        assert!(report.valid);
    }

    #[test]
    fn slow_mo_warns_and_limits_concurrency() {
        let v = BrowserValidator::default();
        let raw = map(json!({"slow_mo_ms": 250}));

        let report = v.validate(&raw);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);

        let normalized = v.normalize(&raw);
        assert_eq!(
            v.recommended_concurrency(normalized.as_map()),
            Some(SLOW_MO_CONCURRENCY)
        );
        assert_eq!(
            v.recommended_concurrency(v.default_parameters().as_map()),
            None
        );
    }

    #[test]
    fn header_values_must_be_strings() {
        let report = HttpValidator::default().validate(&map(json!({
            "headers": {"X-Trace": 1}
        })));
        assert!(!report.valid);
        assert!(report.errors[0].contains("headers.X-Trace"));
    }

    #[test]
    fn ocr_requires_languages() {
        let report = OcrValidator::default().validate(&map(json!({"languages": []})));
        assert!(!report.valid);

        let report = OcrValidator::default().validate(&map(json!({
            "ocr": false,
            "languages": []
        })));
        assert!(report.valid);
    }
}
