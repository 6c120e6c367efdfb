//! Embedding clients
//!
//! The vector store adapters compute embeddings internally through this
//! trait; the concrete client is resolved from the knowledge base's
//! embedding provider and model.

use crate::error::{LlmError, Result};
use crate::models::EmbeddingConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Fixed embedding dimension; must match the embedding model output
pub const EMBEDDING_DIM: usize = 768;

/// Trait for embedding text into vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimension of the model
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Build the embedding client for a resolved embedding config.
/// `ollama` uses the native embeddings API; everything else speaks the
/// OpenAI-compatible `/embeddings` endpoint.
pub fn build_embedder(config: &EmbeddingConfig) -> Arc<dyn Embedder> {
    match config.provider.provider.as_str() {
        "ollama" => Arc::new(OllamaEmbedder::new(
            config.provider.api_base.clone(),
            config.model.clone(),
        )),
        _ => Arc::new(OpenAiEmbedder::new(
            config.provider.api_base.clone(),
            config.provider.api_key.clone(),
            config.model.clone(),
        )),
    }
}

/// OpenAI-compatible embeddings client
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(api_base: String, api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            api_base,
            api_key,
            model,
        }
    }

    fn url(&self) -> String {
        format!("{}/embeddings", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Embedding {} texts with {}", texts.len(), self.model);

        let request = OpenAiEmbedRequest {
            model: &self.model,
            input: texts,
        };
        let mut http_request = self.client.post(self.url()).json(&request);
        if !self.api_key.is_empty() {
            http_request = http_request.bearer_auth(&self.api_key);
        }
        let response = http_request
            .send()
            .await
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::EmbeddingFailed(error_text).into());
        }

        let parsed: OpenAiEmbedResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Native Ollama embeddings client
pub struct OllamaEmbedder {
    client: reqwest::Client,
    api_base: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(api_base: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            api_base,
            model,
        }
    }

    fn url(&self) -> String {
        format!("{}/api/embeddings", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            let request = OllamaEmbedRequest {
                model: &self.model,
                prompt: text,
            };
            let response = self
                .client
                .post(self.url())
                .json(&request)
                .send()
                .await
                .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

            if !response.status().is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(LlmError::EmbeddingFailed(error_text).into());
            }

            let parsed: OllamaEmbedResponse = response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
            embeddings.push(parsed.embedding);
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderConfig;
    use mockall::mock;

    mock! {
        pub TestEmbedder {}

        #[async_trait]
        impl Embedder for TestEmbedder {
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
        }
    }

    fn provider(name: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: ProviderConfig {
                provider: name.to_string(),
                api_base: "http://localhost:9999/v1".to_string(),
                api_key: String::new(),
            },
            model: "embed-test".to_string(),
            dimension: EMBEDDING_DIM,
        }
    }

    #[test]
    fn test_builder_dispatch() {
        let openai = build_embedder(&provider("openai"));
        assert_eq!(openai.dimension(), 768);
        let ollama = build_embedder(&provider("ollama"));
        assert_eq!(ollama.dimension(), 768);
    }

    #[test]
    fn test_openai_url() {
        let embedder = OpenAiEmbedder::new(
            "http://localhost:9999/v1/".to_string(),
            String::new(),
            "m".to_string(),
        );
        assert_eq!(embedder.url(), "http://localhost:9999/v1/embeddings");
    }

    #[tokio::test]
    async fn test_mock_embedder_defaults_to_fixed_dimension() {
        let mut mock = MockTestEmbedder::new();
        mock.expect_embed()
            .times(1)
            .returning(|texts| Ok(texts.iter().map(|_| vec![0.0; EMBEDDING_DIM]).collect()));

        let vectors = mock.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), mock.dimension());
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let embedder = OpenAiEmbedder::new(
            "http://localhost:9999/v1".to_string(),
            String::new(),
            "m".to_string(),
        );
        let result = embedder.embed(&[]).await.unwrap();
        assert!(result.is_empty());
    }
}
