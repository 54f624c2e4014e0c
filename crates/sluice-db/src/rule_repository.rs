use sluice_core::error::AppError;
use sluice_core::selector::SelectionRule;
use sqlx::PgPool;

/// Persisted selection rules, returned in declaration order.
#[derive(Clone)]
pub struct RuleRepository {
    pool: PgPool,
}

impl RuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<SelectionRule>, AppError> {
        let rows: Vec<(String, String, i32)> = sqlx::query_as(
            "SELECT pattern, provider_name, priority FROM selection_rules ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(pattern, provider, priority)| SelectionRule::new(pattern, provider, priority))
            .collect())
    }

    pub async fn add(&self, rule: &SelectionRule) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO selection_rules (pattern, provider_name, priority) VALUES ($1, $2, $3)",
        )
        .bind(&rule.pattern)
        .bind(&rule.provider_name)
        .bind(rule.priority)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Replace every stored rule in one transaction.
    pub async fn replace_all(&self, rules: &[SelectionRule]) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query("DELETE FROM selection_rules")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        for rule in rules {
            sqlx::query(
                "INSERT INTO selection_rules (pattern, provider_name, priority) VALUES ($1, $2, $3)",
            )
            .bind(&rule.pattern)
            .bind(&rule.provider_name)
            .bind(rule.priority)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}
