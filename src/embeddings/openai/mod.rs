
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

use super::EmbeddingClient;
use crate::config::Config;
use crate::http::{RetryPolicy, send_with_retry};
use crate::{QaError, Result};

/// Embedding client for the OpenAI `/embeddings` endpoint and compatible servers
#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    endpoint: Url,
    api_key: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl std::fmt::Debug for OpenAiEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbeddingClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();
        let endpoint = config
            .openai
            .api_url()?
            .join("embeddings")
            .map_err(|e| QaError::InvalidConfiguration(format!("Invalid embeddings URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.openai.timeout_secs))
            .build()
            .map_err(|e| QaError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            api_key,
            model: config.openai.embedding_model.clone(),
            dimension: config.openai.embedding_dimension,
            client,
            retry: RetryPolicy::new(config.openai.retry_attempts),
        })
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate an embedding for a single text input.
    ///
    /// Dropping the future aborts the request and any pending retry.
    #[inline]
    pub async fn generate_embedding(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let request = EmbedRequest {
            model: &self.model,
            input: text,
        };

        let response_text = send_with_retry(&self.retry, self.endpoint.as_str(), || {
            self.client
                .post(self.endpoint.clone())
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
        })
        .await
        .context("Failed to generate embedding")?;

        let embed_response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        let embedding = embed_response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| anyhow!("Embedding response contained no data"))?;

        if embedding.len() != self.dimension {
            return Err(anyhow!(
                "Embedding has {} dimensions, expected {}",
                embedding.len(),
                self.dimension
            ));
        }

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.generate_embedding(text).await.map_err(|e| {
            error!("Embedding request to {} failed: {:#}", self.endpoint, e);
            QaError::EmbeddingFailure(format!("{:#}", e))
        })
    }
}
