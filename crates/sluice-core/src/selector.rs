//! Priority-rule routing of URLs to scraper names.
//!
//! Resolution order: explicit per-URL override, then the highest-priority
//! matching rule (earliest declared wins ties), then the default provider.
//! Rule evaluation is a pure function of `(url, rules)`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// Priority used by `configure_by_domain` when registering a rule.
pub const DOMAIN_RULE_PRIORITY: i32 = 10;
/// Priority used by `configure_by_extension` when registering a rule.
pub const EXTENSION_RULE_PRIORITY: i32 = 15;

/// A declared `(pattern, provider, priority)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRule {
    pub pattern: String,
    pub provider_name: String,
    pub priority: i32,
}

impl SelectionRule {
    pub fn new(pattern: impl Into<String>, provider_name: impl Into<String>, priority: i32) -> Self {
        Self {
            pattern: pattern.into(),
            provider_name: provider_name.into(),
            priority,
        }
    }
}

/// Compiled form of a rule pattern.
#[derive(Debug, Clone)]
pub enum RulePattern {
    /// `*` wildcards, anchored, matched against the full URL.
    Glob(Regex),
    /// Written as `/expr/` or starting with `^`.
    Regex(Regex),
    /// Hostname equality or subdomain suffix.
    Domain(String),
}

impl RulePattern {
    /// Infer the pattern kind from its text and compile it.
    pub fn parse(pattern: &str) -> Result<Self, AppError> {
        if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            return compile_regex(&pattern[1..pattern.len() - 1]).map(RulePattern::Regex);
        }
        if pattern.starts_with('^') {
            return compile_regex(pattern).map(RulePattern::Regex);
        }
        if pattern.contains('*') {
            return glob_to_regex(pattern).map(RulePattern::Glob);
        }
        Ok(RulePattern::Domain(pattern.trim().to_ascii_lowercase()))
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            RulePattern::Glob(re) | RulePattern::Regex(re) => re.is_match(url),
            RulePattern::Domain(domain) => domain_matches(url, domain),
        }
    }
}

fn compile_regex(expr: &str) -> Result<Regex, AppError> {
    Regex::new(expr).map_err(|e| AppError::ConfigError(format!("Invalid rule regex '{expr}': {e}")))
}

/// Convert a glob into an anchored regex: metacharacters are escaped first,
/// then each `*` becomes `.*`.
pub fn glob_to_regex(glob: &str) -> Result<Regex, AppError> {
    let escaped = regex::escape(glob).replace(r"\*", ".*");
    compile_regex(&format!("^{escaped}$"))
}

/// Hostname of a URL, lowercased. `None` if the URL does not parse or has no host.
pub fn hostname(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// `hostname == domain || hostname.ends_with("." + domain)`.
pub fn domain_matches(url: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    match hostname(url) {
        Some(host) => host == domain || host.ends_with(&format!(".{domain}")),
        None => false,
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: SelectionRule,
    pattern: RulePattern,
}

/// An ordered, compiled set of selection rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: impl IntoIterator<Item = SelectionRule>) -> Result<Self, AppError> {
        let mut set = Self::new();
        for rule in rules {
            set.push(rule)?;
        }
        Ok(set)
    }

    pub fn push(&mut self, rule: SelectionRule) -> Result<(), AppError> {
        let pattern = RulePattern::parse(&rule.pattern)?;
        self.rules.push(CompiledRule { rule, pattern });
        Ok(())
    }

    pub fn rules(&self) -> Vec<SelectionRule> {
        self.rules.iter().map(|c| c.rule.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Highest-priority matching rule; the earliest declared wins ties.
    pub fn best_match(&self, url: &str) -> Option<&SelectionRule> {
        let mut best: Option<&CompiledRule> = None;
        for candidate in self.rules.iter().filter(|c| c.pattern.matches(url)) {
            if best.is_none_or(|b| candidate.rule.priority > b.rule.priority) {
                best = Some(candidate);
            }
        }
        best.map(|c| &c.rule)
    }
}

/// Why a provider was selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionSource {
    Override,
    Rule { pattern: String, priority: i32 },
    Default,
}

impl fmt::Display for SelectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionSource::Override => f.write_str("override"),
            SelectionSource::Rule { pattern, priority } => {
                write!(f, "rule '{pattern}' (priority {priority})")
            }
            SelectionSource::Default => f.write_str("default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub provider_name: String,
    pub source: SelectionSource,
}

/// Resolves which scraper handles a URL.
///
/// Mutations replace the rule snapshot under a short write lock; a resolution
/// that already took its snapshot keeps evaluating the old rules.
#[derive(Debug, Default)]
pub struct Selector {
    rules: RwLock<Arc<RuleSet>>,
    overrides: RwLock<HashMap<String, String>>,
    default_provider: RwLock<Option<String>>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: RuleSet) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            ..Self::default()
        }
    }

    pub fn with_default(self, provider: impl Into<String>) -> Self {
        self.set_default(Some(provider.into()));
        self
    }

    fn snapshot(&self) -> Arc<RuleSet> {
        self.rules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn resolve(&self, url: &str) -> Result<Selection, AppError> {
        let overridden = self
            .overrides
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(url)
            .cloned();
        if let Some(provider_name) = overridden {
            return Ok(Selection {
                provider_name,
                source: SelectionSource::Override,
            });
        }

        let rules = self.snapshot();
        if let Some(rule) = rules.best_match(url) {
            return Ok(Selection {
                provider_name: rule.provider_name.clone(),
                source: SelectionSource::Rule {
                    pattern: rule.pattern.clone(),
                    priority: rule.priority,
                },
            });
        }

        let default = self
            .default_provider
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match default {
            Some(provider_name) => Ok(Selection {
                provider_name,
                source: SelectionSource::Default,
            }),
            None => Err(AppError::RuleNotMatched(url.to_string())),
        }
    }

    pub fn add_rule(&self, rule: SelectionRule) -> Result<(), AppError> {
        let pattern = RulePattern::parse(&rule.pattern)?;
        let mut guard = self
            .rules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = RuleSet::clone(&guard);
        next.rules.push(CompiledRule { rule, pattern });
        *guard = Arc::new(next);
        Ok(())
    }

    /// Replace the whole rule set. Nothing changes if any pattern fails to compile.
    pub fn replace_rules(&self, rules: Vec<SelectionRule>) -> Result<(), AppError> {
        let next = RuleSet::from_rules(rules)?;
        *self
            .rules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(next);
        Ok(())
    }

    pub fn clear_rules(&self) {
        *self
            .rules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(RuleSet::new());
    }

    pub fn rules(&self) -> Vec<SelectionRule> {
        self.snapshot().rules()
    }

    pub fn set_override(&self, url: impl Into<String>, provider: impl Into<String>) {
        self.overrides
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url.into(), provider.into());
    }

    pub fn remove_override(&self, url: &str) -> bool {
        self.overrides
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(url)
            .is_some()
    }

    pub fn clear_overrides(&self) {
        self.overrides
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn set_default(&self, provider: Option<String>) {
        *self
            .default_provider
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = provider;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_wins_regardless_of_declaration_order() {
        let selector = Selector::with_rules(
            RuleSet::from_rules([
                SelectionRule::new("*.pdf", "docling", 15),
                SelectionRule::new("example.com", "playwright", 10),
            ])
            .unwrap(),
        );
        let selection = selector.resolve("https://example.com/report.pdf").unwrap();
        assert_eq!(selection.provider_name, "docling");

        let reversed = Selector::with_rules(
            RuleSet::from_rules([
                SelectionRule::new("example.com", "playwright", 10),
                SelectionRule::new("*.pdf", "docling", 15),
            ])
            .unwrap(),
        );
        assert_eq!(
            reversed
                .resolve("https://example.com/report.pdf")
                .unwrap()
                .provider_name,
            "docling"
        );
    }

    #[test]
    fn ties_go_to_earliest_declared_rule() {
        let rules = RuleSet::from_rules([
            SelectionRule::new("example.com", "first", 10),
            SelectionRule::new("*example.com*", "second", 10),
        ])
        .unwrap();
        assert_eq!(
            rules.best_match("https://example.com/").unwrap().provider_name,
            "first"
        );
    }

    #[test]
    fn domain_pattern_matches_subdomains_only_on_label_boundary() {
        assert!(domain_matches("https://example.com/a", "example.com"));
        assert!(domain_matches("https://docs.example.com/a", "example.com"));
        assert!(!domain_matches("https://badexample.com/a", "example.com"));
        assert!(!domain_matches("not a url", "example.com"));
    }

    #[test]
    fn glob_escapes_metacharacters() {
        let re = glob_to_regex("https://example.com/a?b=*").unwrap();
        assert!(re.is_match("https://example.com/a?b=1"));
        assert!(!re.is_match("https://example.com/ab=1"));

        let pdf = glob_to_regex("*.pdf").unwrap();
        assert!(pdf.is_match("https://x.org/file.pdf"));
        assert!(!pdf.is_match("https://x.org/filepdf"));
    }

    #[test]
    fn regex_patterns_are_inferred() {
        assert!(matches!(
            RulePattern::parse("/docs/v[0-9]+/").unwrap(),
            RulePattern::Regex(_)
        ));
        assert!(matches!(
            RulePattern::parse("^https://api\\.").unwrap(),
            RulePattern::Regex(_)
        ));
        assert!(matches!(
            RulePattern::parse("Example.COM").unwrap(),
            RulePattern::Domain(d) if d == "example.com"
        ));
        assert!(RulePattern::parse("/[unclosed/").is_err());
    }

    #[test]
    fn override_beats_rules_and_default_is_last_resort() {
        let selector = Selector::with_rules(
            RuleSet::from_rules([SelectionRule::new("example.com", "browser", 10)]).unwrap(),
        )
        .with_default("http");

        selector.set_override("https://example.com/special", "docling");
        assert_eq!(
            selector.resolve("https://example.com/special").unwrap(),
            Selection {
                provider_name: "docling".into(),
                source: SelectionSource::Override,
            }
        );
        assert_eq!(
            selector.resolve("https://example.com/other").unwrap().provider_name,
            "browser"
        );
        assert_eq!(
            selector.resolve("https://other.org/").unwrap().source,
            SelectionSource::Default
        );

        assert!(selector.remove_override("https://example.com/special"));
        assert_eq!(
            selector.resolve("https://example.com/special").unwrap().provider_name,
            "browser"
        );
    }

    #[test]
    fn no_match_without_default_is_rule_not_matched() {
        let selector = Selector::new();
        let err = selector.resolve("https://example.com").unwrap_err();
        assert!(matches!(err, AppError::RuleNotMatched(_)));
    }

    #[test]
    fn replace_rules_is_all_or_nothing() {
        let selector = Selector::new();
        selector
            .add_rule(SelectionRule::new("example.com", "browser", 10))
            .unwrap();

        let err = selector.replace_rules(vec![
            SelectionRule::new("other.com", "http", 1),
            SelectionRule::new("/[bad/", "http", 1),
        ]);
        assert!(err.is_err());
        assert_eq!(selector.rules().len(), 1);

        selector
            .replace_rules(vec![SelectionRule::new("other.com", "http", 1)])
            .unwrap();
        assert_eq!(selector.rules()[0].pattern, "other.com");

        selector.clear_rules();
        assert!(selector.rules().is_empty());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let selector = Selector::new();
        selector
            .add_rule(SelectionRule::new("example.com", "browser", 10))
            .unwrap();
        let snapshot = selector.snapshot();
        selector.clear_rules();

        assert!(snapshot.best_match("https://example.com").is_some());
        assert!(selector.resolve("https://example.com").is_err());
    }
}
