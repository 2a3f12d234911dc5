/// Text-generation oracle trait and supporting types
///
/// Provides a pluggable interface for single-turn chat completions that can
/// return several candidate completions per call. Used by the expansion
/// generator and by the relevance labeler.
/// Supports OpenAI-compatible APIs (native multi-completion) and Ollama.

pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during a text-generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Transport or response parse failure
    #[error("Text generation error: {0}")]
    Generation(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key or model)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// A single-turn generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// System instruction
    pub system: String,
    /// User message
    pub user: String,
    /// Number of independent completions wanted
    pub n: usize,
    pub temperature: f32,
}

/// Core trait for text-generation oracles.
///
/// Implementations must be Send + Sync so one provider can be shared as
/// `Arc<dyn TextGenerationProvider>` across pipeline stages.
/// Outputs are non-deterministic; callers must not assume exactly `n` completions.
#[async_trait]
pub trait TextGenerationProvider: Send + Sync {
    /// Return up to `request.n` raw completions, in provider order.
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>, GenerationError>;

    /// Return the model name identifier used by this provider.
    fn model_name(&self) -> &str;
}
