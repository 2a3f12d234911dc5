/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: lexfuse.toml (in working directory, or the path given on the CLI)
/// 3. Environment variables: prefixed LEXFUSE_, nested keys split on `__`
///    (e.g., LEXFUSE_LOG_LEVEL=debug, LEXFUSE_EXPANSION__MODEL=gpt-4o)

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};

use crate::errors::LexfuseError;
use crate::evaluation::ExpansionSettings;
use crate::expansion::{CategoryCounts, FilterThresholds};
use crate::index::Bm25Params;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "lexfuse.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub expansion: ExpansionConfig,

    #[serde(default)]
    pub filtering: FilteringConfig,

    #[serde(default)]
    pub fusion: FusionConfig,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub labeling: LabelingConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            paths: PathsConfig::default(),
            retrieval: RetrievalConfig::default(),
            expansion: ExpansionConfig::default(),
            filtering: FilteringConfig::default(),
            fusion: FusionConfig::default(),
            oracle: OracleConfig::default(),
            labeling: LabelingConfig::default(),
        }
    }
}

// --- Sections ---

/// Dataset and artifact locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub corpus: PathBuf,
    pub queries: PathBuf,
    pub qrels: PathBuf,
    pub index_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            corpus: PathBuf::from("data/processed/wiki_subset.jsonl"),
            queries: PathBuf::from("data/queries.jsonl"),
            qrels: PathBuf::from("data/qrels.jsonl"),
            index_dir: PathBuf::from("data/index"),
            output_dir: PathBuf::from("data/results"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Depth of each BM25 ranking fed to fusion
    pub bm25_top_k: usize,
    pub k1: f64,
    pub b: f64,
    pub epsilon: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let params = Bm25Params::default();
        RetrievalConfig {
            bm25_top_k: 50,
            k1: params.k1,
            b: params.b,
            epsilon: params.epsilon,
        }
    }
}

impl RetrievalConfig {
    pub fn bm25_params(&self) -> Bm25Params {
        Bm25Params {
            k1: self.k1,
            b: self.b,
            epsilon: self.epsilon,
        }
    }
}

/// Text-generation provider and candidate pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    /// "openai" (any OpenAI-compatible endpoint) or "ollama"
    pub provider: String,
    pub model: String,
    pub openai_base_url: String,
    /// Falls back to the OPENAI_API_KEY env var when unset
    pub openai_api_key: Option<String>,
    pub ollama_base_url: String,
    pub temperature: f32,
    pub pool_size_paraphrase: usize,
    pub pool_size_entity: usize,
    pub pool_size_conceptual: usize,
    pub max_rounds: usize,
    pub max_paraphrase: usize,
    pub max_entity: usize,
    pub max_conceptual: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        ExpansionConfig {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_api_key: None,
            ollama_base_url: "http://localhost:11434".to_string(),
            temperature: 0.7,
            pool_size_paraphrase: 6,
            pool_size_entity: 6,
            pool_size_conceptual: 6,
            max_rounds: 5,
            max_paraphrase: 2,
            max_entity: 2,
            max_conceptual: 2,
        }
    }
}

impl ExpansionConfig {
    pub fn pool_sizes(&self) -> CategoryCounts {
        CategoryCounts {
            paraphrase: self.pool_size_paraphrase,
            entity: self.pool_size_entity,
            conceptual: self.pool_size_conceptual,
        }
    }

    pub fn keep_limits(&self) -> CategoryCounts {
        CategoryCounts {
            paraphrase: self.max_paraphrase,
            entity: self.max_entity,
            conceptual: self.max_conceptual,
        }
    }
}

/// Embedding provider and candidate filter thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilteringConfig {
    /// "local" (fastembed) or "openai"
    pub embedding_provider: String,
    /// fastembed model cache directory
    pub cache_dir: String,
    pub openai_api_key: Option<String>,
    /// Embeddings model for the openai provider
    pub openai_model: String,
    pub min_cos_sim: f64,
    pub max_cos_sim: f64,
    pub min_token_overlap: f64,
}

impl Default for FilteringConfig {
    fn default() -> Self {
        FilteringConfig {
            embedding_provider: "local".to_string(),
            cache_dir: ".fastembed_cache".to_string(),
            openai_api_key: None,
            openai_model: "text-embedding-3-small".to_string(),
            min_cos_sim: 0.4,
            max_cos_sim: 0.98,
            min_token_overlap: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub rrf_k: u32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        FusionConfig { rrf_k: 60 }
    }
}

/// Retry budget shared by every oracle call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl OracleConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

/// LLM relevance labeling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelingConfig {
    pub model: String,
    pub max_content_chars: usize,
    pub pool_top_k: usize,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        LabelingConfig {
            model: "gpt-4o-mini".to_string(),
            max_content_chars: 2000,
            pool_top_k: 30,
        }
    }
}

impl Config {
    /// Load configuration from defaults, `lexfuse.toml`, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: LEXFUSE_FUSION__RRF_K=30 overrides fusion.rrf_k in lexfuse.toml
    pub fn load() -> Result<Config, LexfuseError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Same as [`Config::load`] with an explicit TOML path. A missing file is
    /// not an error.
    pub fn load_from(path: &Path) -> Result<Config, LexfuseError> {
        let config = Self::from_figment(
            Self::base_figment()
                .merge(Toml::file(path))
                .merge(Env::prefixed("LEXFUSE_").split("__")),
        )?;
        config.validate()?;
        Ok(config)
    }

    fn base_figment() -> Figment {
        Figment::new().merge(Serialized::defaults(Config::default()))
    }

    fn from_figment(figment: Figment) -> Result<Config, LexfuseError> {
        figment
            .extract()
            .map_err(|e| LexfuseError::Config(format!("Failed to load config: {}", e)))
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), LexfuseError> {
        let f = &self.filtering;
        if !(-1.0..=1.0).contains(&f.min_cos_sim) || !(-1.0..=1.0).contains(&f.max_cos_sim) {
            return Err(LexfuseError::validation(
                "filtering.min_cos_sim",
                "cosine thresholds must lie in [-1, 1]",
            ));
        }
        if f.min_cos_sim > f.max_cos_sim {
            return Err(LexfuseError::validation(
                "filtering.min_cos_sim",
                "must not exceed filtering.max_cos_sim",
            ));
        }
        if !(0.0..=1.0).contains(&f.min_token_overlap) {
            return Err(LexfuseError::validation(
                "filtering.min_token_overlap",
                "must lie in [0, 1]",
            ));
        }
        if self.retrieval.bm25_top_k == 0 {
            return Err(LexfuseError::validation("retrieval.bm25_top_k", "must be at least 1"));
        }
        if self.retrieval.k1 < 0.0 || !(0.0..=1.0).contains(&self.retrieval.b) {
            return Err(LexfuseError::validation(
                "retrieval.b",
                "k1 must be non-negative and b must lie in [0, 1]",
            ));
        }
        if !matches!(self.expansion.provider.as_str(), "openai" | "ollama") {
            return Err(LexfuseError::validation(
                "expansion.provider",
                "must be \"openai\" or \"ollama\"",
            ));
        }
        if !matches!(self.filtering.embedding_provider.as_str(), "local" | "openai") {
            return Err(LexfuseError::validation(
                "filtering.embedding_provider",
                "must be \"local\" or \"openai\"",
            ));
        }
        Ok(())
    }

    pub fn filter_thresholds(&self) -> FilterThresholds {
        FilterThresholds {
            min_cos_sim: self.filtering.min_cos_sim,
            max_cos_sim: self.filtering.max_cos_sim,
            min_token_overlap: self.filtering.min_token_overlap,
            max_per_category: self.expansion.keep_limits(),
        }
    }

    pub fn expansion_settings(&self) -> ExpansionSettings {
        ExpansionSettings {
            bm25_top_k: self.retrieval.bm25_top_k,
            rrf_k: self.fusion.rrf_k,
            pools: self.expansion.pool_sizes(),
            thresholds: self.filter_thresholds(),
        }
    }

    /// OpenAI key for generation: config value, then OPENAI_API_KEY.
    pub fn generation_api_key(&self) -> Option<String> {
        self.expansion
            .openai_api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }

    /// OpenAI key for embeddings: filtering key, then the generation key.
    pub fn embedding_api_key(&self) -> Option<String> {
        self.filtering
            .openai_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.generation_api_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_figment(Config::base_figment()).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.retrieval.bm25_top_k, 50);
        assert_eq!(config.fusion.rrf_k, 60);
        assert_eq!(config.expansion.pool_sizes(), CategoryCounts::uniform(6));
        assert_eq!(config.filter_thresholds(), FilterThresholds::default());
        assert_eq!(config.oracle.retry_policy(), RetryPolicy::default());
        assert_eq!(config.labeling.pool_top_k, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides_nested_sections() {
        let toml = r#"
            log_level = "debug"

            [expansion]
            provider = "ollama"
            max_entity = 1

            [fusion]
            rrf_k = 30
        "#;
        let config = Config::from_figment(Config::base_figment().merge(Toml::string(toml))).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.expansion.provider, "ollama");
        assert_eq!(config.expansion.keep_limits().entity, 1);
        assert_eq!(config.expansion.keep_limits().paraphrase, 2);
        assert_eq!(config.expansion_settings().rrf_k, 30);
        // untouched sections keep defaults
        assert_eq!(config.retrieval.k1, 1.5);
    }

    #[test]
    fn test_validate_rejects_inverted_cosine_band() {
        let mut config = Config::from_figment(Config::base_figment()).unwrap();
        config.filtering.min_cos_sim = 0.9;
        config.filtering.max_cos_sim = 0.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, LexfuseError::Validation { .. }));
    }

    #[test]
    fn test_validate_rejects_unknown_provider() {
        let mut config = Config::from_figment(Config::base_figment()).unwrap();
        config.expansion.provider = "bard".to_string();
        assert!(config.validate().is_err());
    }
}
