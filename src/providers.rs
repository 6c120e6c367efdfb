//! LLM provider directory
//!
//! The core never owns model credentials; it consumes lookup functions
//! that resolve a provider name to an endpoint plus key, and a user's
//! embedding model registration to an embedding config.

use crate::error::{PlatformError, Result};
use crate::models::{EmbeddingConfig, LlmType, ProviderConfig};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

/// Read-only directory of provider credentials and model registrations
#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    /// `(provider, model, llm_type) → ProviderConfig`
    async fn provider_config(
        &self,
        provider: &str,
        model_name: &str,
        llm_type: LlmType,
    ) -> Result<ProviderConfig>;

    /// `(user, provider, model) → EmbeddingConfig` (model_type = embedding)
    async fn embedding_config(
        &self,
        user_id: Uuid,
        provider: &str,
        model: &str,
    ) -> Result<EmbeddingConfig>;
}

/// SQL-backed directory over `provider_configs` and `llms`
pub struct SqlProviderDirectory {
    pool: PgPool,
}

impl SqlProviderDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderDirectory for SqlProviderDirectory {
    async fn provider_config(
        &self,
        provider: &str,
        _model_name: &str,
        _llm_type: LlmType,
    ) -> Result<ProviderConfig> {
        let row = sqlx::query(
            "SELECT provider, api_base, api_key FROM provider_configs WHERE provider = $1 LIMIT 1",
        )
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;
        let row = row.ok_or(PlatformError::ProviderConfigNotFound)?;
        Ok(ProviderConfig {
            provider: row.get("provider"),
            api_base: row.get("api_base"),
            api_key: row.get("api_key"),
        })
    }

    async fn embedding_config(
        &self,
        user_id: Uuid,
        provider: &str,
        model: &str,
    ) -> Result<EmbeddingConfig> {
        let row = sqlx::query(
            r#"
            SELECT l.name, l.dimension, p.provider, p.api_base, p.api_key
            FROM llms l
            JOIN provider_configs p ON p.provider = l.provider
            WHERE l.user_id = $1 AND l.provider = $2 AND l.name = $3
              AND l.model_type = 'embedding'
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(model)
        .fetch_optional(&self.pool)
        .await?;
        let row = row.ok_or(PlatformError::EmbeddingConfigNotFound)?;
        let dimension: i32 = row.get("dimension");
        Ok(EmbeddingConfig {
            provider: ProviderConfig {
                provider: row.get("provider"),
                api_base: row.get("api_base"),
                api_key: row.get("api_key"),
            },
            model: row.get("name"),
            dimension: dimension as usize,
        })
    }
}
