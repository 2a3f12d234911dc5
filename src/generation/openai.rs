/// OpenAI-compatible text-generation provider
///
/// Calls any OpenAI-compatible Chat Completions API. The `n` parameter asks the
/// server for several independent completions in one request.
/// The base_url is configurable, so any compatible endpoint works. Requires an API key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationError, GenerationRequest, TextGenerationProvider};

// --- HTTP request/response structs ---

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    n: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// --- Provider ---

/// OpenAI-compatible text-generation provider.
pub struct OpenAIGenerationProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAIGenerationProvider {
    /// Create a new OpenAIGenerationProvider.
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.openai.com/v1")
    /// * `api_key` - API key (must be non-empty)
    /// * `model` - Model name (e.g., "gpt-4o-mini")
    ///
    /// # Errors
    /// Returns `GenerationError::NotConfigured` if api_key is empty.
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::NotConfigured(
                "OpenAI API key is required when using the openai generation provider. \
                 Set LEXFUSE_EXPANSION__OPENAI_API_KEY or OPENAI_API_KEY"
                    .to_string(),
            ));
        }

        Ok(OpenAIGenerationProvider {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl TextGenerationProvider for OpenAIGenerationProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>, GenerationError> {
        if request.n == 0 {
            return Ok(Vec::new());
        }

        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
            n: request.n,
            temperature: request.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Generation(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GenerationError::Api { status, message });
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            GenerationError::Generation(format!("Failed to parse OpenAI response: {}", e))
        })?;

        if chat_response.choices.is_empty() {
            return Err(GenerationError::Generation(
                "OpenAI returned empty choices list".to_string(),
            ));
        }

        Ok(chat_response
            .choices
            .into_iter()
            .filter_map(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_rejected() {
        let result = OpenAIGenerationProvider::new(
            "https://api.openai.com/v1".into(),
            "   ".into(),
            "gpt-4o-mini".into(),
        );
        assert!(matches!(result, Err(GenerationError::NotConfigured(_))));
    }

    #[test]
    fn test_request_serializes_n_and_temperature() {
        let body = ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "hi".into(),
            }],
            n: 4,
            temperature: 0.5,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["n"], 4);
        assert_eq!(json["temperature"], 0.5);
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
