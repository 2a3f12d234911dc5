/// Ollama text-generation provider
///
/// Calls the Ollama /api/chat endpoint. Ollama has no multi-completion
/// parameter, so a request for `n` completions issues `n` sequential calls.
/// No API key required. Targets self-hosted Ollama deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationError, GenerationRequest, TextGenerationProvider};

// --- HTTP request/response structs ---

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

// --- Provider ---

/// Ollama-backed text-generation provider.
pub struct OllamaGenerationProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaGenerationProvider {
    /// Create a new OllamaGenerationProvider.
    ///
    /// # Arguments
    /// * `base_url` - Ollama server base URL (e.g., "http://localhost:11434")
    /// * `model` - Model name (e.g., "llama3.2:3b")
    pub fn new(base_url: String, model: String) -> Self {
        OllamaGenerationProvider {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    /// POST one chat request to /api/chat, return the content string.
    async fn chat(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = OllamaChatRequest {
            model: self.model.clone(),
            messages: vec![
                OllamaMessage {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                OllamaMessage {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
            },
        };

        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
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

        let chat_response: OllamaChatResponse = response.json().await.map_err(|e| {
            GenerationError::Generation(format!("Failed to parse Ollama response: {}", e))
        })?;

        Ok(chat_response.message.content.trim().to_string())
    }
}

#[async_trait]
impl TextGenerationProvider for OllamaGenerationProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>, GenerationError> {
        let mut outputs = Vec::with_capacity(request.n);
        for _ in 0..request.n {
            match self.chat(request).await {
                Ok(content) => outputs.push(content),
                // Keep what earlier calls produced; fail only if nothing came back.
                Err(e) if !outputs.is_empty() => {
                    tracing::debug!(error = %e, collected = outputs.len(), "Ollama call failed mid-batch");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outputs)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
