use std::env;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use formfill_core::{HashEmbedder, HashEmbedderConfig};

use crate::error::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Hash,
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    /// Only used by the hash backend; remote models report their own width.
    pub dimensions: usize,
    pub base_url: Option<String>,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hash,
            model: "text-embedding-3-small".to_string(),
            dimensions: 384,
            base_url: None,
            batch_size: 64,
        }
    }
}

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbeddingClient),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let backend = match config.provider {
            EmbeddingProvider::OpenAi => EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new(
                &config.model,
                config.base_url.as_deref(),
            )?),
            EmbeddingProvider::Hash => EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig {
                dimensions: config.dimensions.max(1),
                ..HashEmbedderConfig::default()
            })),
        };
        Ok(Self {
            backend,
            batch_size: config.batch_size.max(1),
        })
    }

    pub fn hash() -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig::default())),
            batch_size: 64,
        }
    }

    pub fn model_name(&self) -> String {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => format!("hash-{}", embedder.dimensions()),
            EmbeddingBackend::OpenAi(client) => client.model.clone(),
        }
    }

    /// Embeds in batches of `batch_size`, preserving input order.
    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(embedder.embed_batch(inputs)),
            EmbeddingBackend::OpenAi(client) => {
                let mut out = Vec::with_capacity(inputs.len());
                for batch in inputs.chunks(self.batch_size) {
                    out.extend(client.embed_batch(batch)?);
                }
                Ok(out)
            }
        }
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let inputs = vec![text.to_string()];
        let mut output = self.embed_batch(&inputs)?;
        output
            .pop()
            .ok_or_else(|| RagError::Embedding("embedding backend returned no vector".into()))
    }
}

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    base_url: String,
    api_key: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(model: &str, base_url: Option<&str>) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                RagError::Embedding("OPENAI_API_KEY is required for openai embeddings".into())
            })?;
        Ok(Self {
            http: Client::new(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .map_err(|err| RagError::Embedding(err.to_string()))?;
        if !response.status().is_success() {
            return Err(RagError::Embedding(format!(
                "openai embeddings request failed: {}",
                response.status()
            )));
        }
        let mut parsed: OpenAiEmbeddingResponse = response
            .json()
            .map_err(|err| RagError::Embedding(err.to_string()))?;
        if parsed.data.len() != inputs.len() {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_backend_reports_width_in_model_name() {
        let client = EmbeddingClient::new(&EmbeddingConfig {
            dimensions: 32,
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(client.model_name(), "hash-32");
        assert_eq!(client.embed("姓名 张三").unwrap().len(), 32);
    }

    #[test]
    fn batches_keep_input_order() {
        let client = EmbeddingClient::new(&EmbeddingConfig {
            dimensions: 16,
            batch_size: 1,
            ..EmbeddingConfig::default()
        })
        .unwrap();
        let inputs = vec!["alpha".to_string(), "beta".to_string()];
        let batch = client.embed_batch(&inputs).unwrap();
        assert_eq!(batch[0], client.embed("alpha").unwrap());
        assert_eq!(batch[1], client.embed("beta").unwrap());
    }
}
