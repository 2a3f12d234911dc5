/// LLM query expansion: candidate generation per semantic category.
///
/// For one original query, each category asks the text-generation oracle for
/// reformulations until its pool is full or the round budget runs out:
///   1. paraphrase: same intent, different wording
///   2. entity: key entities, synonyms, acronyms made explicit
///   3. conceptual: broader or neighboring topics
///
/// Candidates are deduplicated on a normalized form shared by all three
/// categories of one `generate` call. Oracle failures shorten a pool but never
/// fail the call.

pub mod filter;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::generation::{GenerationRequest, TextGenerationProvider};
use crate::retry::RetryPolicy;

pub use filter::{CandidateFilter, ExpansionCandidate, FilterOutcome, FilterThresholds};

/// Default cap on regeneration rounds per category.
pub const DEFAULT_MAX_ROUNDS: usize = 5;

/// Semantic category of a reformulation. Ordering is the generation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpansionCategory {
    Paraphrase,
    Entity,
    Conceptual,
}

impl ExpansionCategory {
    pub const ALL: [ExpansionCategory; 3] = [
        ExpansionCategory::Paraphrase,
        ExpansionCategory::Entity,
        ExpansionCategory::Conceptual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExpansionCategory::Paraphrase => "paraphrase",
            ExpansionCategory::Entity => "entity",
            ExpansionCategory::Conceptual => "conceptual",
        }
    }

    fn system_prompt(self) -> &'static str {
        match self {
            ExpansionCategory::Paraphrase => {
                "You rewrite search queries. Given a user query, generate alternative \
                 paraphrased versions using different wording but preserving meaning. \
                 Do NOT answer the question. Only rewrite it as a search-style query."
            }
            ExpansionCategory::Entity => {
                "You are a search query expansion assistant focused on entities and keywords. \
                 Given a user query, you identify important entities, technical terms, or \
                 keywords, and produce expanded queries that explicitly mention those terms \
                 and closely related entities or synonyms. Do NOT answer the question."
            }
            ExpansionCategory::Conceptual => {
                "You are a search query expansion assistant focusing on conceptual and \
                 broader-topic expansions. Given a user query, you generate related search \
                 queries that explore broader concepts, closely related ideas, or neighboring \
                 topics that a researcher might also want to retrieve. Do NOT answer the question."
            }
        }
    }

    fn user_instruction(self) -> &'static str {
        match self {
            ExpansionCategory::Paraphrase => {
                "Generate one paraphrased search query that preserves intent but \
                 uses different phrasing."
            }
            ExpansionCategory::Entity => {
                "Generate one expanded search query that focuses on key entities/keywords, \
                 possibly including alternative names, acronyms, or directly related entities. \
                 Keep it a single search-style query."
            }
            ExpansionCategory::Conceptual => {
                "Generate one conceptual or broader-topic search query that a user interested \
                 in this query might also search for. It should be clearly related, but it can \
                 be slightly more general or cover a neighboring concept. Keep it a single \
                 search-style query."
            }
        }
    }
}

impl fmt::Display for ExpansionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpansionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paraphrase" => Ok(ExpansionCategory::Paraphrase),
            "entity" => Ok(ExpansionCategory::Entity),
            "conceptual" => Ok(ExpansionCategory::Conceptual),
            other => Err(format!("Unknown expansion category: {}", other)),
        }
    }
}

/// One count per category (pool sizes, keep limits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub paraphrase: usize,
    pub entity: usize,
    pub conceptual: usize,
}

impl CategoryCounts {
    pub fn uniform(n: usize) -> Self {
        CategoryCounts {
            paraphrase: n,
            entity: n,
            conceptual: n,
        }
    }

    pub fn get(&self, category: ExpansionCategory) -> usize {
        match category {
            ExpansionCategory::Paraphrase => self.paraphrase,
            ExpansionCategory::Entity => self.entity,
            ExpansionCategory::Conceptual => self.conceptual,
        }
    }
}

/// Candidate texts per category, in generation order.
pub type CandidatePools = BTreeMap<ExpansionCategory, Vec<String>>;

/// Build the generation request for one category round.
pub fn build_request(original_query: &str, category: ExpansionCategory, n: usize, temperature: f32) -> GenerationRequest {
    GenerationRequest {
        system: category.system_prompt().to_string(),
        user: format!(
            "Original query: {}\n\n{}",
            original_query,
            category.user_instruction()
        ),
        n,
        temperature,
    }
}

/// Trim a raw completion and strip one pair of surrounding double quotes.
pub fn clean_completion(raw: &str) -> String {
    let s = raw.trim();
    if s.len() > 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].trim().to_string()
    } else {
        s.to_string()
    }
}

/// Dedup key: cleaned and lower-cased.
pub fn normalize_candidate(text: &str) -> String {
    clean_completion(text).to_lowercase()
}

/// Generates expansion candidates through a text-generation oracle.
pub struct CandidateGenerator {
    provider: Arc<dyn TextGenerationProvider>,
    temperature: f32,
    max_rounds: usize,
    retry: RetryPolicy,
}

impl CandidateGenerator {
    pub fn new(provider: Arc<dyn TextGenerationProvider>) -> Self {
        CandidateGenerator {
            provider,
            temperature: 0.7,
            max_rounds: DEFAULT_MAX_ROUNDS,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Generate up to `pools.get(c)` unique candidates for every category.
    ///
    /// Never fails: a category whose oracle keeps failing or returning
    /// duplicates comes back short.
    pub async fn generate(&self, original_query: &str, pools: CategoryCounts) -> CandidatePools {
        // shared across categories, scoped to this call
        let mut seen: HashSet<String> = HashSet::new();
        let mut result = CandidatePools::new();

        for category in ExpansionCategory::ALL {
            let pool = self
                .fill_pool(original_query, category, pools.get(category), &mut seen)
                .await;
            tracing::debug!(
                category = %category,
                wanted = pools.get(category),
                collected = pool.len(),
                "Expansion pool generated"
            );
            result.insert(category, pool);
        }

        result
    }

    async fn fill_pool(
        &self,
        original_query: &str,
        category: ExpansionCategory,
        pool_size: usize,
        seen: &mut HashSet<String>,
    ) -> Vec<String> {
        let mut pool: Vec<String> = Vec::new();
        let mut round = 0;

        while pool.len() < pool_size && round < self.max_rounds {
            round += 1;
            let needed = pool_size - pool.len();
            let request = build_request(original_query, category, needed, self.temperature);

            let outputs = match self
                .retry
                .run("text_generation", || self.provider.generate(&request))
                .await
            {
                Ok(outputs) => outputs,
                Err(e) => {
                    tracing::warn!(
                        category = %category,
                        round,
                        collected = pool.len(),
                        error = %e,
                        "Expansion generation failed, returning partial pool"
                    );
                    break;
                }
            };

            for raw in outputs {
                let text = clean_completion(&raw);
                let norm = text.to_lowercase();
                if norm.is_empty() || !seen.insert(norm) {
                    continue;
                }
                pool.push(text);
                if pool.len() >= pool_size {
                    break;
                }
            }
        }

        if pool.len() < pool_size {
            tracing::debug!(
                category = %category,
                wanted = pool_size,
                collected = pool.len(),
                rounds = round,
                "Expansion pool short after round budget"
            );
        }
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    fn generator(script: Arc<ScriptedGenerator>) -> CandidateGenerator {
        CandidateGenerator::new(script).with_retry(RetryPolicy::immediate(3))
    }

    #[test]
    fn test_clean_completion_strips_quotes_and_whitespace() {
        assert_eq!(clean_completion("  \" dogs and cats \"  "), "dogs and cats");
        assert_eq!(clean_completion("\"\""), "\"\"");
        assert_eq!(clean_completion("plain"), "plain");
    }

    #[test]
    fn test_normalize_candidate_is_case_insensitive() {
        assert_eq!(normalize_candidate("\"Dog Breeds\""), normalize_candidate(" dog breeds "));
    }

    #[test]
    fn test_request_embeds_original_query() {
        let req = build_request("history of rome", ExpansionCategory::Entity, 3, 0.7);
        assert!(req.user.starts_with("Original query: history of rome\n\n"));
        assert_eq!(req.n, 3);
        assert!(req.system.contains("entities"));
    }

    #[tokio::test]
    async fn test_pools_filled_in_category_order() {
        let script = Arc::new(ScriptedGenerator::new(vec![
            Ok(vec!["p1".into(), "p2".into()]),
            Ok(vec!["e1".into(), "e2".into()]),
            Ok(vec!["c1".into(), "c2".into()]),
        ]));
        let pools = generator(script.clone())
            .generate("q", CategoryCounts::uniform(2))
            .await;
        assert_eq!(pools[&ExpansionCategory::Paraphrase], vec!["p1", "p2"]);
        assert_eq!(pools[&ExpansionCategory::Entity], vec!["e1", "e2"]);
        assert_eq!(pools[&ExpansionCategory::Conceptual], vec!["c1", "c2"]);
        assert_eq!(script.requested_counts(), vec![2, 2, 2]);
    }

    #[tokio::test]
    async fn test_duplicates_across_categories_are_dropped_and_regenerated() {
        let script = Arc::new(ScriptedGenerator::new(vec![
            Ok(vec!["Dog breeds".into(), "\"dog breeds\"".into()]),
            Ok(vec!["canine types".into()]),
            // entity: first is a duplicate of a paraphrase
            Ok(vec!["DOG BREEDS ".into(), "labrador".into()]),
            Ok(vec!["retriever".into()]),
            Ok(vec!["pets".into(), "animals".into()]),
        ]));
        let pools = generator(script.clone())
            .generate("dogs", CategoryCounts::uniform(2))
            .await;
        assert_eq!(pools[&ExpansionCategory::Paraphrase], vec!["Dog breeds", "canine types"]);
        assert_eq!(pools[&ExpansionCategory::Entity], vec!["labrador", "retriever"]);
        assert_eq!(pools[&ExpansionCategory::Conceptual], vec!["pets", "animals"]);
        // second request in each short category asks only for the missing count
        assert_eq!(script.requested_counts(), vec![2, 1, 2, 1, 2]);

        let mut norms = HashSet::new();
        for texts in pools.values() {
            for t in texts {
                assert!(norms.insert(normalize_candidate(t)), "duplicate {}", t);
            }
        }
    }

    #[tokio::test]
    async fn test_round_budget_bounds_regeneration() {
        // oracle only ever repeats itself
        let script = Arc::new(ScriptedGenerator::repeating(Ok(vec!["same".into()])));
        let pools = generator(script.clone())
            .with_max_rounds(5)
            .generate("q", CategoryCounts { paraphrase: 3, entity: 2, conceptual: 0 })
            .await;
        assert_eq!(pools[&ExpansionCategory::Paraphrase], vec!["same"]);
        assert!(pools[&ExpansionCategory::Entity].is_empty());
        assert!(pools[&ExpansionCategory::Conceptual].is_empty());
        // 5 rounds for paraphrase, 5 for entity, none for an empty pool
        assert_eq!(script.call_count(), 10);
    }

    #[tokio::test]
    async fn test_oracle_failure_keeps_partial_pool_and_other_categories() {
        let script = Arc::new(ScriptedGenerator::new(vec![
            Ok(vec!["p1".into()]),
            Err("rate limited".into()),
            Err("rate limited".into()),
            Err("rate limited".into()),
            Ok(vec!["e1".into()]),
            Ok(vec!["c1".into()]),
        ]));
        let pools = generator(script.clone())
            .generate("q", CategoryCounts { paraphrase: 2, entity: 1, conceptual: 1 })
            .await;
        assert_eq!(pools[&ExpansionCategory::Paraphrase], vec!["p1"]);
        assert_eq!(pools[&ExpansionCategory::Entity], vec!["e1"]);
        assert_eq!(pools[&ExpansionCategory::Conceptual], vec!["c1"]);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let script = Arc::new(ScriptedGenerator::new(vec![
            Err("timeout".into()),
            Ok(vec!["p1".into()]),
        ]));
        let pools = generator(script)
            .generate("q", CategoryCounts { paraphrase: 1, entity: 0, conceptual: 0 })
            .await;
        assert_eq!(pools[&ExpansionCategory::Paraphrase], vec!["p1"]);
    }

    #[tokio::test]
    async fn test_empty_completions_are_ignored() {
        let script = Arc::new(ScriptedGenerator::new(vec![Ok(vec![
            "   ".into(),
            "\"\"".into(),
            "real".into(),
        ])]));
        let pools = generator(script)
            .with_max_rounds(1)
            .generate("q", CategoryCounts { paraphrase: 3, entity: 0, conceptual: 0 })
            .await;
        // "\"\"" is kept verbatim: stripping only applies past two characters
        assert_eq!(pools[&ExpansionCategory::Paraphrase], vec!["\"\"", "real"]);
    }
}
