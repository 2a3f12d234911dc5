/// Reciprocal Rank Fusion over labeled BM25 rankings.
///
/// Each hit at 1-based rank `r` in a ranking contributes `1/(rrf_k + r)` to its
/// document's fused score. Documents retrieved by several reformulations of a
/// query therefore outrank documents retrieved by only one of them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::index::RankedHit;

/// Default smoothing constant; damps the dominance of top-1 positions.
pub const DEFAULT_RRF_K: u32 = 60;

/// A fused search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedHit {
    pub doc_id: String,
    /// Sum of 1/(rrf_k + rank) over every ranking containing the doc
    pub fused_score: f64,
    pub title: String,
    pub contents: String,
    /// Labels of the rankings the doc appeared in, in processing order
    pub contributing_labels: Vec<String>,
}

impl AsRef<str> for FusedHit {
    fn as_ref(&self) -> &str {
        &self.doc_id
    }
}

/// Fuse labeled rankings via RRF.
///
/// # Arguments
/// - `rankings`: (label, hits) pairs; hits are in rank order
/// - `rrf_k`: smoothing constant
/// - `max_results`: output cap
///
/// # Returns
/// Hits sorted by fused score descending. Ties keep first-seen order.
/// Title and contents come from the first ranking containing the doc.
pub fn fuse(rankings: &[(String, Vec<RankedHit>)], rrf_k: u32, max_results: usize) -> Vec<FusedHit> {
    let k = rrf_k as f64;
    let mut fused: Vec<FusedHit> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for (label, hits) in rankings {
        for (i, hit) in hits.iter().enumerate() {
            let contribution = 1.0 / (k + (i + 1) as f64);
            match positions.get(hit.doc_id.as_str()) {
                Some(&pos) => {
                    let entry = &mut fused[pos];
                    entry.fused_score += contribution;
                    if !entry.contributing_labels.iter().any(|l| l == label) {
                        entry.contributing_labels.push(label.clone());
                    }
                }
                None => {
                    positions.insert(hit.doc_id.as_str(), fused.len());
                    fused.push(FusedHit {
                        doc_id: hit.doc_id.clone(),
                        fused_score: contribution,
                        title: hit.title.clone(),
                        contents: hit.contents.clone(),
                        contributing_labels: vec![label.clone()],
                    });
                }
            }
        }
    }

    // stable sort: equal scores stay in first-seen order
    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused.truncate(max_results);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str) -> RankedHit {
        RankedHit {
            doc_id: id.to_string(),
            score: 1.0,
            title: format!("title {}", id),
            contents: format!("contents {}", id),
        }
    }

    fn ranking(label: &str, ids: &[&str]) -> (String, Vec<RankedHit>) {
        (label.to_string(), ids.iter().map(|id| hit(id)).collect())
    }

    #[test]
    fn test_single_ranking_scores() {
        let out = fuse(&[ranking("original", &["A", "B", "C"])], 60, 10);
        let ids: Vec<&str> = out.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert!((out[0].fused_score - 1.0 / 61.0).abs() < 1e-12);
        assert!((out[1].fused_score - 1.0 / 62.0).abs() < 1e-12);
        assert!((out[2].fused_score - 1.0 / 63.0).abs() < 1e-12);
        assert_eq!(out[0].contributing_labels, vec!["original"]);
    }

    #[test]
    fn test_scores_sum_across_rankings() {
        let out = fuse(
            &[
                ranking("original", &["A", "B"]),
                ranking("paraphrase_1", &["C", "B"]),
            ],
            60,
            10,
        );
        assert_eq!(out[0].doc_id, "B");
        assert!((out[0].fused_score - (1.0 / 62.0 + 1.0 / 62.0)).abs() < 1e-12);
        assert_eq!(out[0].contributing_labels, vec!["original", "paraphrase_1"]);
        // A and C tie at 1/61; A was seen first
        assert_eq!(out[1].doc_id, "A");
        assert_eq!(out[2].doc_id, "C");
    }

    #[test]
    fn test_metadata_from_first_ranking() {
        let mut second = ranking("entity_1", &["A"]);
        second.1[0].title = "other title".to_string();
        let out = fuse(&[ranking("original", &["A"]), second], 60, 10);
        assert_eq!(out[0].title, "title A");
    }

    #[test]
    fn test_truncates_to_max_results() {
        let out = fuse(&[ranking("original", &["A", "B", "C"])], 60, 2);
        assert_eq!(out.len(), 2);
        assert!(fuse(&[ranking("original", &["A"])], 60, 0).is_empty());
    }

    #[test]
    fn test_no_rankings_is_empty() {
        assert!(fuse(&[], DEFAULT_RRF_K, 10).is_empty());
        assert!(fuse(&[ranking("original", &[])], DEFAULT_RRF_K, 10).is_empty());
    }
}
