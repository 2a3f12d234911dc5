/// In-process oracle fakes for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::generation::{GenerationError, GenerationRequest, TextGenerationProvider};

type Reply = Result<Vec<String>, String>;

/// Text generator that replays a fixed script of replies, one per call.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Reply>>,
    repeat: Option<Reply>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    /// Replies in order; once exhausted every call fails.
    pub fn new(replies: Vec<Reply>) -> Self {
        ScriptedGenerator {
            script: Mutex::new(replies.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The same reply forever.
    pub fn repeating(reply: Reply) -> Self {
        ScriptedGenerator {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requested_counts(&self) -> Vec<usize> {
        self.requests.lock().unwrap().iter().map(|r| r.n).collect()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerationProvider for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = match self.script.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => self
                .repeat
                .clone()
                .unwrap_or_else(|| Err("script exhausted".to_string())),
        };
        reply.map_err(GenerationError::Generation)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Embedder placing every text on the unit circle at a chosen cosine to `[1, 0]`.
///
/// The anchor text maps to `[1, 0]`; texts without a configured cosine map to `[0, 1]`.
pub struct FixedEmbedder {
    anchor: String,
    cosines: HashMap<String, f32>,
    fail: bool,
    calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(anchor: &str) -> Self {
        FixedEmbedder {
            anchor: anchor.to_string(),
            cosines: HashMap::new(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        FixedEmbedder {
            fail: true,
            ..FixedEmbedder::new("")
        }
    }

    pub fn with(mut self, text: &str, cos: f32) -> Self {
        self.cosines.insert(text.to_string(), cos);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        if text == self.anchor {
            return vec![1.0, 0.0];
        }
        let cos = self.cosines.get(text).copied().unwrap_or(0.0);
        // unnormalized on purpose; callers normalize
        vec![2.0 * cos, 2.0 * (1.0 - cos * cos).max(0.0).sqrt()]
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbeddingError::Generation("embedder offline".to_string()));
        }
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbeddingError::Generation("embedder offline".to_string()));
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dimension(&self) -> usize {
        2
    }
}
