/// Ranking-quality metrics: Precision@k, Recall@k, nDCG@k.
///
/// Rankings are any slice of items exposing a doc id through `AsRef<str>`
/// (`RankedHit`, `FusedHit`, `String`, `&str`). Relevance comes from graded
/// judgments (0 = not, 1 = partially, 2 = highly relevant); a doc counts as
/// relevant for P/R when its grade is above 0.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::dataset::{Qrels, Relevance};

/// Metrics for one query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub ndcg_at_k: f64,
}

/// Unweighted mean of per-query metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub ndcg_at_k: f64,
    pub num_queries: usize,
}

/// Doc ids with a grade above 0.
pub fn relevant_ids(judgments: &HashMap<String, Relevance>) -> HashSet<&str> {
    judgments
        .iter()
        .filter(|(_, rel)| rel.is_relevant())
        .map(|(id, _)| id.as_str())
        .collect()
}

fn hits_at_k<S: AsRef<str>>(ranking: &[S], relevant: &HashSet<&str>, k: usize) -> usize {
    ranking
        .iter()
        .take(k)
        .filter(|doc| relevant.contains(doc.as_ref()))
        .count()
}

/// Fraction of the top-k positions holding a relevant doc. Divides by `k`
/// even when fewer than `k` docs were retrieved; 0 when `k == 0`.
pub fn precision_at_k<S: AsRef<str>>(ranking: &[S], relevant: &HashSet<&str>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    hits_at_k(ranking, relevant, k) as f64 / k as f64
}

/// Fraction of the relevant docs found in the top k; 0 with no relevant docs.
pub fn recall_at_k<S: AsRef<str>>(ranking: &[S], relevant: &HashSet<&str>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    hits_at_k(ranking, relevant, k) as f64 / relevant.len() as f64
}

fn discount(position: usize) -> f64 {
    // position is 1-based
    ((position + 1) as f64).log2()
}

/// Normalized discounted cumulative gain at k.
///
/// DCG sums `(2^rel - 1) / log2(i + 1)` over the actual top-k (unjudged docs
/// gain 0). The ideal DCG uses every judged grade for the query sorted
/// descending and cut at k, regardless of which docs were retrieved.
pub fn ndcg_at_k<S: AsRef<str>>(ranking: &[S], judgments: &HashMap<String, Relevance>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }

    let dcg: f64 = ranking
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, doc)| {
            let gain = judgments
                .get(doc.as_ref())
                .map(|rel| rel.gain())
                .unwrap_or(0.0);
            gain / discount(i + 1)
        })
        .sum();

    let mut ideal: Vec<Relevance> = judgments.values().copied().collect();
    ideal.sort_by(|a, b| b.cmp(a));
    let idcg: f64 = ideal
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, rel)| rel.gain() / discount(i + 1))
        .sum();

    if idcg == 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

/// All three metrics for one query. A qid absent from `qrels` scores zeros.
pub fn compute_for_query<S: AsRef<str>>(ranking: &[S], qid: &str, qrels: &Qrels, k: usize) -> QueryMetrics {
    let empty = HashMap::new();
    let judgments = qrels.get(qid).unwrap_or(&empty);
    let relevant = relevant_ids(judgments);
    QueryMetrics {
        precision_at_k: precision_at_k(ranking, &relevant, k),
        recall_at_k: recall_at_k(ranking, &relevant, k),
        ndcg_at_k: ndcg_at_k(ranking, judgments, k),
    }
}

/// Mean over queries; all zeros for an empty input.
pub fn aggregate<'a, I>(per_query: I) -> AggregateMetrics
where
    I: IntoIterator<Item = &'a QueryMetrics>,
{
    let mut sum = AggregateMetrics::default();
    for m in per_query {
        sum.precision_at_k += m.precision_at_k;
        sum.recall_at_k += m.recall_at_k;
        sum.ndcg_at_k += m.ndcg_at_k;
        sum.num_queries += 1;
    }
    if sum.num_queries == 0 {
        return sum;
    }
    let n = sum.num_queries as f64;
    AggregateMetrics {
        precision_at_k: sum.precision_at_k / n,
        recall_at_k: sum.recall_at_k / n,
        ndcg_at_k: sum.ndcg_at_k / n,
        num_queries: sum.num_queries,
    }
}
