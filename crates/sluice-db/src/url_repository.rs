use async_trait::async_trait;
use sluice_core::error::AppError;
use sluice_core::traits::UrlTracker;
use sqlx::PgPool;

/// URLs seen by the pipeline, used to resolve batch patterns.
#[derive(Clone)]
pub struct UrlRepository {
    pool: PgPool,
}

impl UrlRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UrlTracker for UrlRepository {
    async fn track(&self, url: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO tracked_urls (url) VALUES ($1)
            ON CONFLICT (url) DO UPDATE SET last_seen = NOW()
            "#,
        )
        .bind(url)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn known_urls(&self) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM tracked_urls ORDER BY url")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }
}
