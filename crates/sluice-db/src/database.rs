use sluice_core::AppError;
use sluice_core::models::{CleanerConfig, ProviderConfiguration};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::config_store::PgConfigStore;
use crate::document_repository::DocumentRepository;
use crate::rule_repository::RuleRepository;
use crate::url_repository::UrlRepository;

/// Central database facade. Owns the connection pool, runs migrations
/// and vends store and repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections = config.max_connections, "Connected to database");
        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    pub fn provider_configs(&self) -> PgConfigStore<ProviderConfiguration> {
        PgConfigStore::providers(self.pool.clone())
    }

    pub fn cleaner_configs(&self) -> PgConfigStore<CleanerConfig> {
        PgConfigStore::cleaners(self.pool.clone())
    }

    pub fn documents(&self) -> DocumentRepository {
        DocumentRepository::new(self.pool.clone())
    }

    pub fn urls(&self) -> UrlRepository {
        UrlRepository::new(self.pool.clone())
    }

    pub fn rules(&self) -> RuleRepository {
        RuleRepository::new(self.pool.clone())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
