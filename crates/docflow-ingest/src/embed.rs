//! Embedding providers.
//!
//! - `HttpEmbedder`: OpenAI-compatible `/v1/embeddings` endpoint
//! - `NoopEmbedder`: returns `None` for every text, so ingestion stores nothing

use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::{Error, ProviderConfig, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::traits::EmbeddingProvider;

/// Placeholder embedder that always returns None.
pub struct NoopEmbedder {
    dim: usize,
}

impl NoopEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl EmbeddingProvider for NoopEmbedder {
    async fn generate_batch(
        &self,
        texts: &[String],
        _organization_id: &str,
    ) -> Result<Vec<Option<Vec<f32>>>> {
        Ok(vec![None; texts.len()])
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedder backed by an OpenAI-compatible HTTP endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dim: usize,
}

impl HttpEmbedder {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = config.embedding_api_key.clone().ok_or_else(|| {
            Error::Config("HTTP embedder requires DOCFLOW_EMBEDDING_API_KEY".into())
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.embedding_endpoint.clone(),
            model: config.embedding_model.clone(),
            api_key,
            dim: config.embedding_dim,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn generate_batch(
        &self,
        texts: &[String],
        organization_id: &str,
    ) -> Result<Vec<Option<Vec<f32>>>> {
        let mut out = vec![None; texts.len()];

        // Blank inputs are rejected by most endpoints; leave them as None.
        let (positions, inputs): (Vec<usize>, Vec<&str>) = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, t)| (i, t.as_str()))
            .unzip();
        if inputs.is_empty() {
            return Ok(out);
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
            "user": organization_id,
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::Embedding(format!(
                "embedding endpoint returned {}: {}",
                status,
                resp.text().await.unwrap_or_default()
            )));
        }
        let parsed: EmbeddingResponse = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;

        for datum in parsed.data {
            let Some(&pos) = positions.get(datum.index) else {
                warn!(index = datum.index, "Embedding response index out of range");
                continue;
            };
            if datum.embedding.len() != self.dim {
                warn!(
                    got = datum.embedding.len(),
                    expected = self.dim,
                    "Discarding embedding with unexpected dimension"
                );
                continue;
            }
            out[pos] = Some(datum.embedding);
        }
        debug!(
            requested = texts.len(),
            returned = out.iter().filter(|e| e.is_some()).count(),
            "Embedding batch complete"
        );
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

/// Create the best available embedder for the configuration.
///
/// Uses the HTTP endpoint when an API key is configured, falls back to NoopEmbedder.
pub fn create_embedder(config: &ProviderConfig) -> Arc<dyn EmbeddingProvider> {
    match HttpEmbedder::new(config) {
        Ok(embedder) => {
            info!(
                "Using HTTP embedder {} (dim={})",
                config.embedding_model, config.embedding_dim
            );
            Arc::new(embedder)
        }
        Err(_) => {
            warn!(
                "No embedding API key configured. Chunks get no vectors, \
                 so ingestion stores none of them."
            );
            Arc::new(NoopEmbedder::new(config.embedding_dim))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_is_index_aligned() {
        let embedder = NoopEmbedder::new(8);
        let out = embedder
            .generate_batch(&["a".into(), "b".into(), "c".into()], "org")
            .await
            .unwrap();
        assert_eq!(out, vec![None, None, None]);
        assert_eq!(embedder.dimension(), 8);
    }

    #[test]
    fn test_create_embedder_falls_back_without_key() {
        let config = ProviderConfig {
            embedding_dim: 16,
            ..Default::default()
        };
        assert_eq!(create_embedder(&config).dimension(), 16);
        assert!(HttpEmbedder::new(&config).is_err());
    }
}
