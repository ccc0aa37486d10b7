use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use switchboard_core::RouterError;

use crate::EmbeddingProvider;

/// Client for OpenAI-compatible `/embeddings` endpoints. One request per text, no retries.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    dims: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
        dims: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        let model = model.into();
        anyhow::ensure!(!api_key.trim().is_empty(), "missing embedding API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing embedding model name");

        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("failed to build embedding HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            api_key,
            dims,
        })
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let payload = EmbeddingRequest {
            model: &self.model,
            input: [text],
            dimensions: Some(self.dims),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.trim())
            .json(&payload)
            .send()
            .await
            .context("embedding request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RouterError::ProviderUnavailable(format!(
                "{} returned {}: {}",
                self.endpoint,
                status.as_u16(),
                body
            ))
            .into());
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("failed to parse embedding response")?;
        let embedding = parsed
            .data
            .into_iter()
            .min_by_key(|entry| entry.index)
            .map(|entry| entry.embedding)
            .context("embedding response contained no vectors")?;

        anyhow::ensure!(
            embedding.len() == self.dims,
            "provider returned {} dimensions, expected {}",
            embedding.len(),
            self.dims
        );
        Ok(embedding)
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(self.request(text))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}
