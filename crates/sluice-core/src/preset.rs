use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::Serialize;
use serde_json::json;

use crate::error::AppError;
use crate::validation::ConfigurationRequest;

/// A named, reusable configuration template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preset {
    pub name: String,
    pub description: String,
    pub configuration: ConfigurationRequest,
}

impl Preset {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        configuration: ConfigurationRequest,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            configuration,
        }
    }
}

fn request(provider: &str, priority: i32, parameters: serde_json::Value) -> ConfigurationRequest {
    ConfigurationRequest::new(
        provider,
        parameters.as_object().cloned().unwrap_or_default(),
    )
    .with_priority(priority)
}

fn builtin_presets() -> Vec<Preset> {
    vec![
        Preset::new(
            "aggressive-crawl",
            "Full crawler with anti-bot heuristics, overlay removal and iframe inlining",
            request(
                "crawl4ai",
                20,
                json!({
                    "magic": true,
                    "remove_overlay_elements": true,
                    "process_iframes": true,
                    "cache_mode": "bypass"
                }),
            ),
        ),
        Preset::new(
            "document-extraction",
            "Document parsing with table export and OCR",
            request(
                "docling",
                15,
                json!({"export_tables": true, "ocr": true, "output_format": "markdown"}),
            ),
        ),
        Preset::new(
            "spa-rendering",
            "Headless browser waiting for network idle",
            request(
                "browser",
                10,
                json!({"wait_until": "networkidle", "javascript": true, "timeout_ms": 60000}),
            ),
        ),
        Preset::new(
            "fast-extraction",
            "Plain HTTP fetch with a short timeout",
            request(
                "http",
                5,
                json!({"timeout_ms": 10000, "follow_redirects": true}),
            ),
        ),
    ]
}

/// Name → preset mapping. Built-ins are loaded at construction; more can be
/// registered at runtime.
#[derive(Debug)]
pub struct PresetCatalog {
    presets: RwLock<BTreeMap<String, Preset>>,
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::with_presets(builtin_presets())
    }
}

impl PresetCatalog {
    pub fn empty() -> Self {
        Self::with_presets(Vec::new())
    }

    pub fn with_presets(presets: impl IntoIterator<Item = Preset>) -> Self {
        Self {
            presets: RwLock::new(presets.into_iter().map(|p| (p.name.clone(), p)).collect()),
        }
    }

    /// Register a preset, replacing any preset with the same name.
    pub fn register(&self, preset: Preset) {
        self.presets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(preset.name.clone(), preset);
    }

    pub fn get(&self, name: &str) -> Result<Preset, AppError> {
        self.presets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::PresetNotFound(name.to_string()))
    }

    /// All presets, sorted by name.
    pub fn list(&self) -> Vec<Preset> {
        self.presets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::ConfigManager;
    use crate::validation::ParameterService;
    use std::sync::Arc;

    #[test]
    fn builtins_are_present() {
        let catalog = PresetCatalog::default();
        let names: Vec<String> = catalog.list().into_iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec![
                "aggressive-crawl",
                "document-extraction",
                "fast-extraction",
                "spa-rendering"
            ]
        );
        assert_eq!(catalog.get("aggressive-crawl").unwrap().configuration.priority, 20);
    }

    #[test]
    fn builtins_pass_their_validators() {
        let service =
            ParameterService::with_builtin_validators(Arc::new(ConfigManager::in_memory("p")));
        for preset in PresetCatalog::default().list() {
            let applied = service.prepare(&preset.configuration);
            assert!(applied.is_ok(), "{}: {:?}", preset.name, applied.err());
        }
    }

    #[test]
    fn unknown_preset_fails() {
        let err = PresetCatalog::default().get("warp-speed").unwrap_err();
        assert!(matches!(err, AppError::PresetNotFound(name) if name == "warp-speed"));
    }

    #[test]
    fn registration_extends_catalog() {
        let catalog = PresetCatalog::empty();
        catalog.register(Preset::new(
            "custom",
            "test",
            ConfigurationRequest::new("http", Default::default()),
        ));
        assert_eq!(catalog.get("custom").unwrap().configuration.provider_name, "http");
    }
}
