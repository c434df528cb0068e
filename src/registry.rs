use async_trait::async_trait;
use sqlx::Row;

use crate::db::{now_timestamp, DbPool};
use crate::types::{ApiKey, FinanceError, ModelReference, Result};

/// Resolves model ids to upstream endpoints and credentials.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Fails with `NotFound` for unknown or deleted ids.
    async fn find_model(&self, id: i64) -> Result<ModelReference>;
}

#[derive(Debug, Clone)]
pub struct NewModel {
    pub name: String,
    pub base_url: String,
    pub api_key: ApiKey,
}

impl NewModel {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FinanceError::InvalidRequest("name is required".into()).into());
        }
        validate_base_url(&self.base_url)?;
        if self.api_key.is_empty() {
            return Err(FinanceError::InvalidRequest("api_key is required".into()).into());
        }
        Ok(())
    }
}

/// Partial edit of a registered model. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ModelUpdate {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<ApiKey>,
}

impl ModelUpdate {
    /// Blank values count as absent.
    pub fn from_fields(name: &str, base_url: &str, api_key: &str) -> Self {
        let present = |v: &str| {
            let v = v.trim();
            (!v.is_empty()).then(|| v.to_string())
        };
        Self {
            name: present(name),
            base_url: present(base_url),
            api_key: present(api_key).map(ApiKey::new),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(base_url) = &self.base_url {
            validate_base_url(base_url)?;
        }
        Ok(())
    }
}

fn validate_base_url(base_url: &str) -> Result<()> {
    let base_url = base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(FinanceError::InvalidRequest("base_url must be an http(s) URL".into()).into());
    }
    Ok(())
}

fn name_taken(name: &str) -> FinanceError {
    FinanceError::InvalidRequest(format!("model name '{}' already exists", name))
}

/// The live-name index rejects a concurrent duplicate that passed the
/// pre-check; report it as a name conflict.
fn map_name_conflict(err: sqlx::Error, name: &str) -> FinanceError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return name_taken(name);
        }
    }
    FinanceError::Database(err)
}

#[derive(Clone)]
pub struct SqliteModelRegistry {
    pool: DbPool,
}

impl SqliteModelRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create_model(&self, model: &NewModel) -> Result<ModelReference> {
        model.validate()?;
        let name = model.name.trim();

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM ai_models WHERE name = ? AND deleted_at IS NULL")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(name_taken(name).into());
        }

        let created_at = now_timestamp();
        let result = sqlx::query(
            "INSERT INTO ai_models (name, base_url, api_key, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(model.base_url.trim())
        .bind(model.api_key.expose())
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_name_conflict(e, name))?;

        let id = result.last_insert_rowid();
        tracing::info!(model_id = id, model = %name, "Registered model");
        Ok(ModelReference {
            id,
            name: name.to_string(),
            base_url: model.base_url.trim().to_string(),
            api_key: model.api_key.clone(),
            created_at,
        })
    }

    pub async fn list_models(&self) -> Result<Vec<ModelReference>> {
        let rows = sqlx::query(
            "SELECT id, name, base_url, api_key, created_at FROM ai_models
             WHERE deleted_at IS NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(model_from_row).collect())
    }

    /// Applies the present fields of `update`. Renaming onto another live
    /// model's name is rejected.
    pub async fn update_model(&self, id: i64, update: &ModelUpdate) -> Result<ModelReference> {
        update.validate()?;
        let current = self.find_model(id).await?;

        if let Some(name) = update.name.as_deref().filter(|n| *n != current.name) {
            let clash: Option<(i64,)> = sqlx::query_as(
                "SELECT id FROM ai_models WHERE name = ?1 AND id != ?2 AND deleted_at IS NULL",
            )
            .bind(name)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            if clash.is_some() {
                return Err(name_taken(name).into());
            }
        }

        let result = sqlx::query(
            "UPDATE ai_models
             SET name = COALESCE(?1, name),
                 base_url = COALESCE(?2, base_url),
                 api_key = COALESCE(?3, api_key)
             WHERE id = ?4 AND deleted_at IS NULL",
        )
        .bind(update.name.as_deref())
        .bind(update.base_url.as_deref())
        .bind(update.api_key.as_ref().map(ApiKey::expose))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_name_conflict(e, update.name.as_deref().unwrap_or(&current.name)))?;
        if result.rows_affected() == 0 {
            return Err(FinanceError::NotFound(format!("model {} not found", id)).into());
        }

        tracing::info!(
            model_id = id,
            renamed = update.name.is_some(),
            new_base_url = update.base_url.is_some(),
            new_key = update.api_key.is_some(),
            "Updated model"
        );
        self.find_model(id).await
    }

    pub async fn delete_model(&self, id: i64) -> Result<()> {
        let result =
            sqlx::query("UPDATE ai_models SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(now_timestamp())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(FinanceError::NotFound(format!("model {} not found", id)).into());
        }
        tracing::info!(model_id = id, "Deleted model");
        Ok(())
    }
}

#[async_trait]
impl ModelRegistry for SqliteModelRegistry {
    async fn find_model(&self, id: i64) -> Result<ModelReference> {
        let row = sqlx::query(
            "SELECT id, name, base_url, api_key, created_at FROM ai_models
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(model_from_row(&r)),
            None => Err(FinanceError::NotFound(format!("model {} not found", id)).into()),
        }
    }
}

fn model_from_row(row: &sqlx::sqlite::SqliteRow) -> ModelReference {
    ModelReference {
        id: row.get("id"),
        name: row.get("name"),
        base_url: row.get("base_url"),
        api_key: ApiKey::new(row.get::<String, _>("api_key")),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    #[tokio::test]
    async fn test_live_name_index_violation_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_db(dir.path().join("registry.db")).await.unwrap();

        let insert = "INSERT INTO ai_models (name, base_url, api_key, created_at)
                      VALUES ('dup', 'http://a', 'k', '2026-01-01T00:00:00Z')";
        sqlx::query(insert).execute(&pool).await.unwrap();
        let err = match sqlx::query(insert).execute(&pool).await {
            Err(e) => e,
            Ok(_) => panic!("live name index missing"),
        };

        assert!(matches!(
            map_name_conflict(err, "dup"),
            FinanceError::InvalidRequest(_)
        ));
    }
}
