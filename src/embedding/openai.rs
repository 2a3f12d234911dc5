/// Embeddings over an OpenAI-compatible `/embeddings` endpoint.
///
/// All candidate texts of one query go out in a single request; the response
/// is reordered by its `index` field before it is returned.

use async_trait::async_trait;

use super::{EmbeddingError, EmbeddingProvider};

#[derive(serde::Serialize)]
struct EmbeddingsBody<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(serde::Deserialize)]
struct EmbeddingsReply {
    data: Vec<EmbeddingItem>,
}

#[derive(serde::Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Known output sizes of OpenAI embedding models. Unknown models report 0
/// until the first response arrives.
fn known_dimension(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        _ => 0,
    }
}

pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAIEmbeddingProvider {
    /// # Errors
    /// `EmbeddingError::NotConfigured` when `api_key` is blank.
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::NotConfigured(
                "the openai embedding provider needs an API key. \
                 Set LEXFUSE_FILTERING__OPENAI_API_KEY, OPENAI_API_KEY, or filtering.openai_api_key in lexfuse.toml"
                    .to_string(),
            ));
        }

        Ok(OpenAIEmbeddingProvider {
            client: reqwest::Client::new(),
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Generation("no vector in embeddings reply".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsBody {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::Generation(format!("embeddings request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut reply: EmbeddingsReply = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Generation(format!("unreadable embeddings reply: {}", e)))?;

        if reply.data.len() != texts.len() {
            return Err(EmbeddingError::Generation(format!(
                "{} vectors for {} inputs",
                reply.data.len(),
                texts.len()
            )));
        }

        reply.data.sort_by_key(|item| item.index);
        Ok(reply.data.into_iter().map(|item| item.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        known_dimension(&self.model)
    }
}
