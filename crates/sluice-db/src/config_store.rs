use std::marker::PhantomData;

use async_trait::async_trait;
use sluice_core::config_store::{ConfigEntry, ConfigStore, StoredConfig};
use sluice_core::error::AppError;
use sluice_core::models::{CleanerConfig, ProviderConfiguration};
use sqlx::PgPool;

const PROVIDER_TABLE: &str = "provider_configs";
const CLEANER_TABLE: &str = "cleaner_configs";

/// [`ConfigStore`] over a `(url, config_key) -> JSONB` table.
///
/// Provider configurations and cleaner configs share the layout but live in
/// separate tables; use [`PgConfigStore::providers`] or
/// [`PgConfigStore::cleaners`].
pub struct PgConfigStore<C> {
    pool: PgPool,
    table: &'static str,
    _entry: PhantomData<fn() -> C>,
}

impl<C> Clone for PgConfigStore<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            table: self.table,
            _entry: PhantomData,
        }
    }
}

impl PgConfigStore<ProviderConfiguration> {
    pub fn providers(pool: PgPool) -> Self {
        Self::with_table(pool, PROVIDER_TABLE)
    }
}

impl PgConfigStore<CleanerConfig> {
    pub fn cleaners(pool: PgPool) -> Self {
        Self::with_table(pool, CLEANER_TABLE)
    }
}

impl<C> PgConfigStore<C> {
    fn with_table(pool: PgPool, table: &'static str) -> Self {
        Self {
            pool,
            table,
            _entry: PhantomData,
        }
    }
}

#[async_trait]
impl<C: ConfigEntry> ConfigStore<C> for PgConfigStore<C> {
    async fn get(&self, url: &str, key: &str) -> Result<Option<C>, AppError> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(&format!(
            "SELECT config FROM {} WHERE url = $1 AND config_key = $2",
            self.table
        ))
        .bind(url)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(|(config,)| serde_json::from_value(config).map_err(AppError::from))
            .transpose()
    }

    async fn set(&self, url: &str, config: &C) -> Result<(), AppError> {
        let value = serde_json::to_value(config)?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (url, config_key, config)
            VALUES ($1, $2, $3)
            ON CONFLICT (url, config_key)
            DO UPDATE SET config = EXCLUDED.config, updated_at = NOW()
            "#,
            self.table
        ))
        .bind(url)
        .bind(config.key())
        .bind(&value)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, url: &str, key: Option<&str>) -> Result<(), AppError> {
        let result = match key {
            Some(key) => {
                sqlx::query(&format!(
                    "DELETE FROM {} WHERE url = $1 AND config_key = $2",
                    self.table
                ))
                .bind(url)
                .bind(key)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("DELETE FROM {} WHERE url = $1", self.table))
                    .bind(url)
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(
            table = self.table,
            url,
            deleted = result.rows_affected(),
            "Deleted configurations"
        );
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StoredConfig<C>>, AppError> {
        let rows: Vec<(String, serde_json::Value)> = sqlx::query_as(&format!(
            "SELECT url, config FROM {} ORDER BY url, config_key",
            self.table
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(|(url, config)| {
                Ok(StoredConfig {
                    url,
                    config: serde_json::from_value(config)?,
                })
            })
            .collect()
    }

    async fn list_for_url(&self, url: &str) -> Result<Vec<C>, AppError> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(&format!(
            "SELECT config FROM {} WHERE url = $1 ORDER BY config_key",
            self.table
        ))
        .bind(url)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(|(config,)| serde_json::from_value(config).map_err(AppError::from))
            .collect()
    }

    async fn clear(&self) -> Result<(), AppError> {
        sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}
