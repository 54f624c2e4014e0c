use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sluice_core::models::{CleanerConfig, ProviderConfiguration};
use sluice_core::traits::{MemoryUrlTracker, UrlTracker};
use sluice_core::{
    BatchConfigurationManager, ConfigDocument, MemoryConfigStore, PipelineComponents,
    PipelineConfig, PresetCatalog,
};
use sluice_db::{Database, DatabaseConfig};

/// Where configurations, rules and tracked URLs live between invocations.
pub enum Storage {
    File(PathBuf),
    Postgres(Database),
}

/// On-disk state of the file backend: an export document plus the URLs seen so far.
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    #[serde(flatten)]
    document: ConfigDocument,
    #[serde(default)]
    known_urls: Vec<String>,
}

/// Everything a command needs, wired to one storage backend.
pub struct AppContext {
    pub config: PipelineConfig,
    pub components: PipelineComponents,
    pub batch: BatchConfigurationManager,
    storage: Storage,
}

impl AppContext {
    /// Load state from a JSON file. A missing file starts empty.
    pub async fn open_file(path: PathBuf, config: PipelineConfig) -> Result<Self> {
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => Some(
                serde_json::from_str::<StateFile>(&raw)
                    .with_context(|| format!("Invalid state file {}", path.display()))?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read state file {}", path.display()));
            }
        };

        let known_urls = state
            .as_ref()
            .map(|s| s.known_urls.clone())
            .unwrap_or_default();
        let components = PipelineComponents::with_stores(
            &config,
            Arc::new(MemoryConfigStore::<ProviderConfiguration>::new()),
            Arc::new(MemoryConfigStore::<CleanerConfig>::new()),
            Arc::new(MemoryUrlTracker::with_urls(known_urls)),
        );
        let ctx = Self::assemble(config, components, Storage::File(path));

        if let Some(state) = state {
            let result = ctx.batch.import(state.document).await?;
            if result.total_failed > 0 {
                tracing::warn!(
                    failed = result.total_failed,
                    "Some stored configurations were rejected on load"
                );
            }
            ctx.batch.restore_overrides().await?;
        }
        Ok(ctx)
    }

    /// Connect to PostgreSQL, run migrations and rebuild the selector state.
    pub async fn open_postgres(db_config: &DatabaseConfig, config: PipelineConfig) -> Result<Self> {
        let db = Database::connect(db_config)
            .await
            .context("Failed to connect to database")?;
        db.migrate().await.context("Failed to run migrations")?;

        let components = PipelineComponents::with_stores(
            &config,
            Arc::new(db.provider_configs()),
            Arc::new(db.cleaner_configs()),
            Arc::new(db.urls()),
        );
        components.selector.replace_rules(db.rules().list().await?)?;

        let ctx = Self::assemble(config, components, Storage::Postgres(db));
        let restored = ctx.batch.restore_overrides().await?;
        tracing::debug!(restored, "Restored provider overrides");
        Ok(ctx)
    }

    fn assemble(config: PipelineConfig, components: PipelineComponents, storage: Storage) -> Self {
        let batch = BatchConfigurationManager::new(
            components.parameters.clone(),
            components.selector.clone(),
            components.tracker.clone(),
            Arc::new(PresetCatalog::default()),
        );
        Self {
            config,
            components,
            batch,
            storage,
        }
    }

    pub fn database(&self) -> Option<&Database> {
        match &self.storage {
            Storage::Postgres(db) => Some(db),
            Storage::File(_) => None,
        }
    }

    /// Write back the state that is not persisted as it changes.
    ///
    /// The file backend rewrites the whole state file. PostgreSQL already
    /// holds configurations and URLs, so only the rule set is saved.
    pub async fn persist(&self) -> Result<()> {
        match &self.storage {
            Storage::File(path) => {
                let state = StateFile {
                    document: self.batch.export().await?,
                    known_urls: self.components.tracker.known_urls().await?,
                };
                let json = serde_json::to_string_pretty(&state)?;
                std::fs::write(path, json)
                    .with_context(|| format!("Failed to write state file {}", path.display()))?;
            }
            Storage::Postgres(db) => {
                db.rules()
                    .replace_all(&self.components.selector.rules())
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_core::validation::ConfigurationRequest;
    use sluice_core::SelectionRule;

    fn params(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn missing_state_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open_file(dir.path().join("state.json"), PipelineConfig::default())
            .await
            .unwrap();

        assert!(ctx.components.parameters.configs().list_all().await.unwrap().is_empty());
        assert!(ctx.components.selector.rules().is_empty());
        assert!(ctx.database().is_none());
    }

    #[tokio::test]
    async fn file_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let ctx = AppContext::open_file(path.clone(), PipelineConfig::default())
            .await
            .unwrap();
        ctx.components
            .parameters
            .set_configuration(
                "https://example.com/a",
                &ConfigurationRequest::new("http", params(json!({"timeout_ms": 5000}))),
            )
            .await
            .unwrap();
        ctx.components
            .selector
            .set_override("https://example.com/a", "http");
        ctx.components
            .selector
            .add_rule(SelectionRule::new("*.pdf", "http", 5))
            .unwrap();
        ctx.components.tracker.track("https://example.com/b").await.unwrap();
        ctx.persist().await.unwrap();

        let reopened = AppContext::open_file(path, PipelineConfig::default())
            .await
            .unwrap();
        let stored = reopened
            .components
            .parameters
            .get_parameters("https://example.com/a", "http")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.parameters.get("timeout_ms"), Some(&json!(5000)));
        assert_eq!(reopened.components.selector.rules().len(), 1);
        assert_eq!(
            reopened
                .components
                .selector
                .resolve("https://example.com/a")
                .unwrap()
                .provider_name,
            "http"
        );
        assert!(
            reopened
                .components
                .tracker
                .known_urls()
                .await
                .unwrap()
                .contains(&"https://example.com/b".to_string())
        );
    }

    #[tokio::test]
    async fn corrupt_state_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        let err = AppContext::open_file(path, PipelineConfig::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("Invalid state file"));
    }
}
