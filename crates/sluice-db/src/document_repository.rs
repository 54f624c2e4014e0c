use chrono::{DateTime, Utc};
use sluice_core::error::AppError;
use sluice_core::models::{ContentType, Document, NewDocument};
use sluice_core::traits::DocumentStore;
use sqlx::PgPool;
use uuid::Uuid;

/// Repository for cleaned documents in PostgreSQL.
///
/// Fingerprints are unique: saving content that is already stored returns
/// the existing row's id.
#[derive(Clone)]
pub struct DocumentRepository {
    pool: PgPool,
}

impl DocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, document: &NewDocument) -> Result<Uuid, AppError> {
        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO documents (url, title, content, fingerprint, content_type, provider, processor)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (fingerprint) DO UPDATE SET fingerprint = EXCLUDED.fingerprint
            RETURNING id
            "#,
        )
        .bind(&document.url)
        .bind(&document.title)
        .bind(&document.content)
        .bind(&document.fingerprint)
        .bind(document.content_type.as_str())
        .bind(&document.provider)
        .bind(&document.processor)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.0)
    }

    pub async fn contains_fingerprint(&self, fingerprint: &str) -> Result<bool, AppError> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM documents WHERE fingerprint = $1)")
                .bind(fingerprint)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.0)
    }

    /// Most recent document stored for a URL.
    pub async fn get_latest(&self, url: &str) -> Result<Option<Document>, AppError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, url, title, content, fingerprint, content_type, provider, processor, created_at
            FROM documents
            WHERE url = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    url: String,
    title: Option<String>,
    content: String,
    fingerprint: String,
    content_type: String,
    provider: String,
    processor: String,
    created_at: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            url: row.url,
            title: row.title,
            content: row.content,
            fingerprint: row.fingerprint,
            content_type: serde_json::from_value(serde_json::Value::String(row.content_type))
                .unwrap_or(ContentType::Unknown),
            provider: row.provider,
            processor: row.processor,
            created_at: row.created_at,
        }
    }
}

// -- Trait implementation --

impl DocumentStore for DocumentRepository {
    async fn contains_fingerprint(&self, fingerprint: &str) -> Result<bool, AppError> {
        DocumentRepository::contains_fingerprint(self, fingerprint).await
    }

    async fn save(&self, document: &NewDocument) -> Result<Uuid, AppError> {
        DocumentRepository::save(self, document).await
    }
}
