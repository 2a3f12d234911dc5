/// Quality filter for expansion candidates.
///
/// Each candidate is scored against the original query on two signals:
/// - lexical: Jaccard overlap of the token sets (same tokenizer as the index)
/// - semantic: cosine similarity of L2-normalized embeddings
///
/// A candidate is eligible when its cosine lies inside `[min_cos_sim, max_cos_sim]`
/// and it is not simultaneously lexically distant and only barely similar.
/// Eligible candidates are ranked by `0.7 * cos + 0.3 * overlap` and the best
/// `max_per_category` per category are kept.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use super::{CandidatePools, CategoryCounts, ExpansionCategory};
use crate::embedding::{dot, l2_normalize, EmbeddingProvider};
use crate::index::tokenize;
use crate::retry::RetryPolicy;

const COS_WEIGHT: f64 = 0.7;
const OVERLAP_WEIGHT: f64 = 0.3;
/// Margin above `min_cos_sim` that rescues a low-overlap candidate.
const LOW_OVERLAP_COS_MARGIN: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, serde::Deserialize)]
pub struct FilterThresholds {
    pub min_cos_sim: f64,
    pub max_cos_sim: f64,
    pub min_token_overlap: f64,
    pub max_per_category: CategoryCounts,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        FilterThresholds {
            min_cos_sim: 0.4,
            max_cos_sim: 0.98,
            min_token_overlap: 0.1,
            max_per_category: CategoryCounts::uniform(2),
        }
    }
}

/// Per-candidate diagnostics. Non-eligible candidates carry `-inf` as rank score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpansionCandidate {
    pub text: String,
    pub category: ExpansionCategory,
    pub token_overlap: f64,
    pub cos_sim: f64,
    pub eligible: bool,
    pub kept: bool,
    pub rank_score: f64,
}

/// Result of one filter call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterOutcome {
    /// Kept texts per category, best first.
    pub kept: CandidatePools,
    /// Every candidate, in generation order.
    pub diagnostics: BTreeMap<ExpansionCategory, Vec<ExpansionCandidate>>,
}

impl FilterOutcome {
    pub fn kept_count(&self) -> usize {
        self.kept.values().map(Vec::len).sum()
    }
}

/// Jaccard similarity of the two token sets; 0.0 when either side has no tokens.
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let ta: HashSet<String> = tokenize(a).into_iter().collect();
    let tb: HashSet<String> = tokenize(b).into_iter().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    inter as f64 / union as f64
}

/// Comparisons are written so that a NaN similarity is never eligible.
pub fn is_eligible(cos_sim: f64, token_overlap: f64, thresholds: &FilterThresholds) -> bool {
    let in_band = cos_sim >= thresholds.min_cos_sim && cos_sim <= thresholds.max_cos_sim;
    let enough_overlap = token_overlap >= thresholds.min_token_overlap
        || cos_sim >= thresholds.min_cos_sim + LOW_OVERLAP_COS_MARGIN;
    in_band && enough_overlap
}

pub fn rank_score(cos_sim: f64, token_overlap: f64) -> f64 {
    COS_WEIGHT * cos_sim + OVERLAP_WEIGHT * token_overlap
}

/// Scores and selects expansion candidates with an embedding oracle.
pub struct CandidateFilter {
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
}

impl CandidateFilter {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        CandidateFilter {
            embedder,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Score every candidate and keep the best eligible ones per category.
    ///
    /// All texts are embedded in one batch. If that batch fails, every
    /// candidate is reported with `cos_sim = 0.0` and nothing is kept.
    pub async fn filter(
        &self,
        original_query: &str,
        candidates: &CandidatePools,
        thresholds: &FilterThresholds,
    ) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        let total: usize = candidates.values().map(Vec::len).sum();
        if total == 0 {
            for category in candidates.keys() {
                outcome.kept.insert(*category, Vec::new());
                outcome.diagnostics.insert(*category, Vec::new());
            }
            return outcome;
        }

        let similarities = self.cosine_similarities(original_query, candidates, total).await;

        let mut offset = 0;
        for (category, texts) in candidates {
            let scored: Vec<ExpansionCandidate> = texts
                .iter()
                .enumerate()
                .map(|(i, text)| {
                    let overlap = token_overlap(original_query, text);
                    let (cos_sim, eligible) = match &similarities {
                        Some(cos) => {
                            let c = cos[offset + i];
                            (c, is_eligible(c, overlap, thresholds))
                        }
                        None => (0.0, false),
                    };
                    ExpansionCandidate {
                        text: text.clone(),
                        category: *category,
                        token_overlap: overlap,
                        cos_sim,
                        eligible,
                        kept: false,
                        rank_score: if eligible {
                            rank_score(cos_sim, overlap)
                        } else {
                            f64::NEG_INFINITY
                        },
                    }
                })
                .collect();
            offset += texts.len();

            let (kept, diagnostics) = select(scored, thresholds.max_per_category.get(*category));
            tracing::debug!(
                category = %category,
                candidates = diagnostics.len(),
                eligible = diagnostics.iter().filter(|c| c.eligible).count(),
                kept = kept.len(),
                "Expansion candidates filtered"
            );
            outcome.kept.insert(*category, kept);
            outcome.diagnostics.insert(*category, diagnostics);
        }

        outcome
    }

    /// Cosine of every candidate against the original, flattened in category order.
    async fn cosine_similarities(
        &self,
        original_query: &str,
        candidates: &CandidatePools,
        total: usize,
    ) -> Option<Vec<f64>> {
        let mut texts = Vec::with_capacity(total + 1);
        texts.push(original_query.to_string());
        texts.extend(candidates.values().flatten().cloned());

        let vectors = match self
            .retry
            .run("embedding", || self.embedder.embed_batch(&texts))
            .await
        {
            Ok(v) if v.len() == texts.len() => v,
            Ok(v) => {
                tracing::warn!(
                    expected = texts.len(),
                    received = v.len(),
                    "Embedding batch size mismatch, keeping no expansions"
                );
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Embedding failed, keeping no expansions");
                return None;
            }
        };

        let mut vectors = vectors.into_iter();
        let mut anchor = vectors.next()?;
        l2_normalize(&mut anchor);
        Some(
            vectors
                .map(|mut v| {
                    l2_normalize(&mut v);
                    dot(&anchor, &v) as f64
                })
                .collect(),
        )
    }
}

/// Mark the top `max_keep` eligible candidates as kept.
///
/// Returns the kept texts best-first and the diagnostics in original order.
fn select(mut scored: Vec<ExpansionCandidate>, max_keep: usize) -> (Vec<String>, Vec<ExpansionCandidate>) {
    let mut order: Vec<usize> = (0..scored.len()).filter(|&i| scored[i].eligible).collect();
    // stable: ties stay in generation order
    order.sort_by(|&a, &b| {
        scored[b]
            .rank_score
            .partial_cmp(&scored[a].rank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(max_keep);

    let kept = order
        .iter()
        .map(|&i| {
            scored[i].kept = true;
            scored[i].text.clone()
        })
        .collect();
    (kept, scored)
}
