//! Built-in text cleaners, run by the core cleaner chain in descending priority.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use sluice_core::cleaner::{Cleaner, bool_option};
use sluice_core::error::AppError;
use sluice_core::models::{CleanerConfig, TextFormat};

const ALL_FORMATS: &[TextFormat] = &[TextFormat::Markdown, TextFormat::Html, TextFormat::Plain];
const TEXT_FORMATS: &[TextFormat] = &[TextFormat::Markdown, TextFormat::Plain];

// ---------------------------------------------------------------------------
// XSS
// ---------------------------------------------------------------------------

pub const XSS_CLEANER: &str = "xss";

const ACTIVE_TAGS: [&str; 5] = ["script", "style", "iframe", "object", "embed"];
const SAFE_URL_SCHEMES: [&str; 4] = ["http", "https", "mailto", "tel"];
const SCRIPT_SCHEMES: [&str; 3] = ["javascript:", "vbscript:", "data:text/html"];

static RE_ACTIVE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<(?:script|style|iframe|object|embed)\b[^>]*>.*?</(?:script|style|iframe|object|embed)\s*>",
    )
    .unwrap()
});
static RE_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?-->|</?[a-zA-Z][a-zA-Z0-9-]*(?:[\s/][^>]*)?>").unwrap()
});
static RE_TAG_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^</?([a-zA-Z][a-zA-Z0-9-]*)").unwrap());
static RE_HANDLER_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)[\s/"']on[a-z]+\s*="#).unwrap());
static RE_AUTOLINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([a-zA-Z][a-zA-Z0-9+.-]*:[^\s<>]*)>").unwrap());
static RE_LINK_DEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(\]\(\s*<?|^[ ]{0,3}\[[^\]]+\]:[ \t]*<?)([^\s)>]+)").unwrap()
});
static RE_NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)&#(x[0-9a-f]+|[0-9]+);?").unwrap());

/// Removes executable content.
///
/// HTML goes through an `ammonia` allowlist: script-like elements are dropped
/// with their content, `on*` attributes are removed and link schemes are
/// limited to http, https, mailto and tel. Markdown and plain text lose all
/// raw markup, and links whose decoded target is a script URL are replaced
/// with `#`.
///
/// Options: `strip_event_handlers` (default true, HTML only).
#[derive(Debug, Clone, Default)]
pub struct XssCleaner;

impl Cleaner for XssCleaner {
    fn name(&self) -> &str {
        XSS_CLEANER
    }

    fn supported_formats(&self) -> &[TextFormat] {
        ALL_FORMATS
    }

    fn default_config(&self) -> CleanerConfig {
        CleanerConfig::new(XSS_CLEANER, 100)
    }

    fn perform_cleaning(
        &self,
        input: &str,
        format: TextFormat,
        config: &CleanerConfig,
    ) -> Result<String, AppError> {
        Ok(match format {
            TextFormat::Html => {
                sanitize_html(input, bool_option(config, "strip_event_handlers", true))
            }
            TextFormat::Markdown | TextFormat::Plain => sanitize_text(input),
        })
    }

    fn generate_warnings(&self, original: &str, _cleaned: &str, _config: &CleanerConfig) -> Vec<String> {
        if has_unsafe_content(original) {
            vec!["potentially unsafe content stripped".to_string()]
        } else {
            Vec::new()
        }
    }
}

fn sanitize_html(input: &str, strip_event_handlers: bool) -> String {
    let mut builder = ammonia::Builder::default();
    builder
        .clean_content_tags(HashSet::from(ACTIVE_TAGS))
        .url_schemes(HashSet::from(SAFE_URL_SCHEMES))
        .link_rel(None);
    if !strip_event_handlers {
        builder.generic_attribute_prefixes(HashSet::from(["on"]));
    }
    builder.clean(input).to_string()
}

fn sanitize_text(input: &str) -> String {
    let text = RE_ACTIVE_BLOCK.replace_all(input, "");
    let text = RE_MARKUP.replace_all(&text, "");
    let text = RE_AUTOLINK.replace_all(&text, |caps: &Captures| {
        if is_script_url(&caps[1]) {
            String::new()
        } else {
            caps[0].to_string()
        }
    });
    RE_LINK_DEST
        .replace_all(&text, |caps: &Captures| {
            if is_script_url(&caps[2]) {
                format!("{}#", &caps[1])
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// The text a browser would see once character references are decoded and
/// whitespace inside the scheme is ignored.
fn decoded_view(raw: &str) -> String {
    let decoded = RE_NUMERIC_ENTITY.replace_all(raw, |caps: &Captures| {
        let digits = &caps[1];
        let code = match digits.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => digits.parse().ok(),
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    decoded
        .to_ascii_lowercase()
        .replace("&colon;", ":")
        .replace("&tab;", "")
        .replace("&newline;", "")
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect()
}

fn is_script_url(raw: &str) -> bool {
    let url = decoded_view(raw);
    SCRIPT_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

fn has_unsafe_content(text: &str) -> bool {
    let unsafe_tag = RE_MARKUP.find_iter(text).any(|tag| {
        let tag = tag.as_str();
        let active = RE_TAG_NAME
            .captures(tag)
            .is_some_and(|caps| ACTIVE_TAGS.contains(&caps[1].to_ascii_lowercase().as_str()));
        let view = decoded_view(tag);
        active
            || RE_HANDLER_ATTR.is_match(tag)
            || SCRIPT_SCHEMES.iter().any(|scheme| view.contains(scheme))
    });
    unsafe_tag
        || RE_AUTOLINK
            .captures_iter(text)
            .any(|caps| is_script_url(&caps[1]))
        || RE_LINK_DEST
            .captures_iter(text)
            .any(|caps| is_script_url(&caps[2]))
}

// ---------------------------------------------------------------------------
// Readability
// ---------------------------------------------------------------------------

pub const READABILITY_CLEANER: &str = "readability";

static RE_LINK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*+]\s+)?(?:\[[^\]]*\]\([^)]*\)[\s|·•/-]*)+$").unwrap()
});
static RE_IMAGE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+]\s+)?(?:!\[[^\]]*\]\([^)]*\)\s*)+$").unwrap());

const BOILERPLATE_PHRASES: &[&str] = &[
    "accept all cookies",
    "we use cookies",
    "all rights reserved",
    "subscribe to our newsletter",
    "skip to content",
    "skip to main content",
];

/// Drops navigation residue from converted text: lines made only of links,
/// image-only lines and common boilerplate phrases.
///
/// Options: `drop_link_lines` (true), `keep_images` (false), `drop_boilerplate` (true).
#[derive(Debug, Clone, Default)]
pub struct ReadabilityCleaner;

impl ReadabilityCleaner {
    fn is_noise(line: &str, config: &CleanerConfig) -> bool {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return false;
        }
        if RE_IMAGE_LINE.is_match(trimmed) {
            return !bool_option(config, "keep_images", false);
        }
        if bool_option(config, "drop_link_lines", true) && RE_LINK_LINE.is_match(trimmed) {
            return true;
        }
        if bool_option(config, "drop_boilerplate", true) {
            let lower = trimmed.to_lowercase();
            return lower.len() < 200 && BOILERPLATE_PHRASES.iter().any(|p| lower.contains(p));
        }
        false
    }
}

impl Cleaner for ReadabilityCleaner {
    fn name(&self) -> &str {
        READABILITY_CLEANER
    }

    fn supported_formats(&self) -> &[TextFormat] {
        TEXT_FORMATS
    }

    fn default_config(&self) -> CleanerConfig {
        CleanerConfig::new(READABILITY_CLEANER, 50)
    }

    fn perform_cleaning(
        &self,
        input: &str,
        _format: TextFormat,
        config: &CleanerConfig,
    ) -> Result<String, AppError> {
        let kept: Vec<&str> = input
            .lines()
            .filter(|line| !Self::is_noise(line, config))
            .collect();
        Ok(kept.join("\n"))
    }

    fn generate_warnings(&self, original: &str, cleaned: &str, _config: &CleanerConfig) -> Vec<String> {
        let count = |s: &str| s.lines().filter(|l| !l.trim().is_empty()).count();
        let (before, after) = (count(original), count(cleaned));
        if before > 0 && after * 2 < before {
            vec![format!(
                "removed {} of {before} lines; page may be mostly navigation",
                before - after
            )]
        } else {
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

pub const WHITESPACE_CLEANER: &str = "whitespace";

static RE_BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static RE_INNER_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}|\t").unwrap());

/// Normalizes line endings, trims trailing whitespace and collapses blank runs.
///
/// Options: `collapse_spaces` (default true) squeezes runs of inner spaces,
/// leaving indentation and fenced code blocks alone.
#[derive(Debug, Clone, Default)]
pub struct WhitespaceCleaner;

impl Cleaner for WhitespaceCleaner {
    fn name(&self) -> &str {
        WHITESPACE_CLEANER
    }

    fn supported_formats(&self) -> &[TextFormat] {
        ALL_FORMATS
    }

    fn default_config(&self) -> CleanerConfig {
        CleanerConfig::new(WHITESPACE_CLEANER, 10)
    }

    fn pre_process(&self, input: &str, _config: &CleanerConfig) -> Result<String, AppError> {
        Ok(input.replace("\r\n", "\n").replace('\r', "\n"))
    }

    fn perform_cleaning(
        &self,
        input: &str,
        _format: TextFormat,
        config: &CleanerConfig,
    ) -> Result<String, AppError> {
        let collapse = bool_option(config, "collapse_spaces", true);
        let mut in_fence = false;
        let mut lines = Vec::new();

        for line in input.lines() {
            let line = line.trim_end();
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                lines.push(line.to_string());
                continue;
            }
            if !collapse || in_fence {
                lines.push(line.to_string());
                continue;
            }
            let body = line.trim_start();
            let indent = &line[..line.len() - body.len()];
            lines.push(format!("{indent}{}", RE_INNER_SPACES.replace_all(body, " ")));
        }

        let joined = lines.join("\n");
        Ok(RE_BLANK_RUN.replace_all(joined.trim(), "\n\n").into_owned())
    }
}
