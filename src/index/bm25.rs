/// Okapi BM25 scoring structures.
///
/// IDF follows the Okapi form `ln(N - n + 0.5) - ln(n + 0.5)`. Terms that occur
/// in more than half the corpus get a negative raw IDF; those are floored to
/// `epsilon * mean_idf` so common terms still contribute a small positive weight.
///
/// Scoring walks a term -> postings map, so cost is proportional to the postings
/// of the query terms rather than the corpus size.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Document length normalization.
    pub b: f64,
    /// Floor multiplier applied to the mean IDF for negative-IDF terms.
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Bm25Params {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Posting {
    doc: u32,
    tf: u32,
}

/// Term statistics for a tokenized corpus, keyed by document position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Scorer {
    params: Bm25Params,
    doc_lens: Vec<u32>,
    avgdl: f64,
    idf: HashMap<String, f64>,
    postings: HashMap<String, Vec<Posting>>,
}

impl Bm25Scorer {
    /// Build scoring structures from per-document token streams.
    ///
    /// Document `i` in `tokenized` is addressed as position `i` in every score vector.
    pub fn build(tokenized: &[Vec<String>], params: Bm25Params) -> Self {
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_lens = Vec::with_capacity(tokenized.len());
        let mut total_len: u64 = 0;

        for (pos, tokens) in tokenized.iter().enumerate() {
            doc_lens.push(tokens.len() as u32);
            total_len += tokens.len() as u64;

            let mut tf: HashMap<&str, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token.as_str()).or_default() += 1;
            }
            for (term, count) in tf {
                postings.entry(term.to_string()).or_default().push(Posting {
                    doc: pos as u32,
                    tf: count,
                });
            }
        }

        let num_docs = tokenized.len() as f64;
        let avgdl = if tokenized.is_empty() {
            0.0
        } else {
            total_len as f64 / num_docs
        };

        let mut idf: HashMap<String, f64> = HashMap::with_capacity(postings.len());
        let mut idf_sum = 0.0;
        let mut negative: Vec<String> = Vec::new();
        for (term, list) in &postings {
            let df = list.len() as f64;
            let value = (num_docs - df + 0.5).ln() - (df + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term.clone(), value);
        }

        let mean_idf = if idf.is_empty() {
            0.0
        } else {
            idf_sum / idf.len() as f64
        };
        let floor = params.epsilon * mean_idf;
        for term in negative {
            idf.insert(term, floor);
        }

        Bm25Scorer {
            params,
            doc_lens,
            avgdl,
            idf,
            postings,
        }
    }

    /// Number of documents the scorer was built over.
    pub fn num_docs(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// IDF of a term, `None` if the term never occurred at build time.
    pub fn idf(&self, term: &str) -> Option<f64> {
        self.idf.get(term).copied()
    }

    /// Score every document against the query tokens.
    ///
    /// Each query token contributes independently, so a repeated token counts twice.
    /// Returns one score per document position; non-matching documents score 0.
    pub fn scores(&self, query_tokens: &[String]) -> Vec<f64> {
        let mut scores = vec![0.0f64; self.doc_lens.len()];
        if self.avgdl <= 0.0 {
            return scores;
        }

        let Bm25Params { k1, b, .. } = self.params;
        for token in query_tokens {
            let (Some(idf), Some(list)) = (self.idf.get(token), self.postings.get(token)) else {
                continue;
            };
            for posting in list {
                let tf = posting.tf as f64;
                let dl = self.doc_lens[posting.doc as usize] as f64;
                let norm = k1 * (1.0 - b + b * dl / self.avgdl);
                scores[posting.doc as usize] += idf * (tf * (k1 + 1.0)) / (tf + norm);
            }
        }
        scores
    }
}
