use std::sync::Arc;

use async_trait::async_trait;
use htmd::HtmlToMarkdown;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use sluice_core::error::AppError;
use sluice_core::models::{ContentType, ProcessedDocument, RawContent, TextFormat};
use sluice_core::traits::{ExecuteOptions, Provider};

pub const HTML_PROCESSOR: &str = "html";
pub const PLAIN_TEXT_PROCESSOR: &str = "plaintext";

/// HTML-to-Markdown processor using htmd.
///
/// Strips non-content elements (script, style, nav, etc.) and extracts the
/// page title and description into the document metadata.
#[derive(Clone)]
pub struct HtmlProcessor {
    converter: Arc<HtmlToMarkdown>,
}

impl HtmlProcessor {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }
}

impl Default for HtmlProcessor {
    fn default() -> Self {
        Self::new()
    }
}

fn is_html(raw: &RawContent) -> bool {
    raw.content_type == ContentType::Html
        || raw
            .mime
            .as_deref()
            .is_some_and(|m| ContentType::from_mime(m) == ContentType::Html)
}

/// First non-empty text of `<title>`, falling back to the first `<h1>`.
fn extract_title(document: &Html) -> Option<String> {
    ["title", "h1"].iter().find_map(|tag| {
        let selector = Selector::parse(tag).ok()?;
        document
            .select(&selector)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .find(|t| !t.is_empty())
    })
}

fn meta_description(document: &Html) -> Option<String> {
    let selector = Selector::parse("meta[name='description']").ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Provider<RawContent, ProcessedDocument> for HtmlProcessor {
    fn name(&self) -> &str {
        HTML_PROCESSOR
    }

    fn can_handle(&self, raw: &RawContent) -> bool {
        is_html(raw)
    }

    async fn execute(
        &self,
        raw: &RawContent,
        _opts: &ExecuteOptions,
    ) -> Result<ProcessedDocument, AppError> {
        let html = raw.text_lossy();

        let (title, description) = {
            let document = Html::parse_document(&html);
            (extract_title(&document), meta_description(&document))
        };

        let text = self.converter.convert(&html).map_err(|e| AppError::ProviderError {
            provider: HTML_PROCESSOR.to_string(),
            message: e.to_string(),
        })?;

        let mut metadata = Map::new();
        if let Some(description) = description {
            metadata.insert("description".into(), Value::String(description));
        }
        metadata.insert("source_bytes".into(), Value::from(raw.body.len()));

        Ok(ProcessedDocument {
            url: raw.url.clone(),
            text,
            format: TextFormat::Markdown,
            title,
            metadata,
            processor: HTML_PROCESSOR.to_string(),
        })
    }
}

/// Fallback processor: decodes any textual payload as UTF-8 unchanged.
///
/// The output format follows the input so HTML-aware cleaners still apply.
#[derive(Debug, Clone, Default)]
pub struct PlainTextProcessor;

#[async_trait]
impl Provider<RawContent, ProcessedDocument> for PlainTextProcessor {
    fn name(&self) -> &str {
        PLAIN_TEXT_PROCESSOR
    }

    fn can_handle(&self, raw: &RawContent) -> bool {
        !raw.content_type.is_document()
    }

    async fn execute(
        &self,
        raw: &RawContent,
        _opts: &ExecuteOptions,
    ) -> Result<ProcessedDocument, AppError> {
        let format = match raw.content_type {
            _ if is_html(raw) => TextFormat::Html,
            ContentType::Markdown => TextFormat::Markdown,
            _ => TextFormat::Plain,
        };

        Ok(ProcessedDocument {
            url: raw.url.clone(),
            text: raw.text_lossy(),
            format,
            title: None,
            metadata: Map::new(),
            processor: PLAIN_TEXT_PROCESSOR.to_string(),
        })
    }
}
