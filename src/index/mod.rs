/// Lexical BM25 index over a document collection.
///
/// The index owns the document text and scoring structures for its lifetime and
/// is read-only after build, so one handle can serve every query of an
/// evaluation run. It persists as a single JSON artifact in an index directory.

pub mod bm25;
pub mod tokenize;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::Document;

pub use bm25::{Bm25Params, Bm25Scorer};
pub use tokenize::tokenize;

/// File name of the persisted index inside the index directory.
pub const INDEX_FILE: &str = "bm25_index.json";

/// Errors that can occur while building, loading, or saving the index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Build was called with no documents
    #[error("Cannot build an index over an empty corpus")]
    EmptyCorpus,

    /// No persisted index at the expected location
    #[error("BM25 index not found at {0}; build it first with `lexfuse index`")]
    NotFound(String),

    /// Persisted artifact is inconsistent with itself
    #[error("Corrupt index artifact: {0}")]
    Corrupt(String),

    #[error("Index I/O error: {0}")]
    Io(String),

    #[error("Index serialization error: {0}")]
    Serialization(String),
}

/// One entry of a BM25 ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    pub doc_id: String,
    pub score: f64,
    pub title: String,
    pub contents: String,
}

impl AsRef<str> for RankedHit {
    fn as_ref(&self) -> &str {
        &self.doc_id
    }
}

/// On-disk form: scoring structures plus document metadata by position.
#[derive(Serialize, Deserialize)]
struct IndexArtifact {
    version: u32,
    scorer: Bm25Scorer,
    documents: Vec<Document>,
}

const ARTIFACT_VERSION: u32 = 1;

/// Built BM25 index. Construct with [`LexicalIndex::build`] or [`LexicalIndex::load`].
#[derive(Debug, Clone)]
pub struct LexicalIndex {
    scorer: Bm25Scorer,
    documents: Vec<Document>,
    positions: HashMap<String, usize>,
}

impl LexicalIndex {
    /// Build an index with default BM25 parameters.
    pub fn build(documents: Vec<Document>) -> Result<Self, IndexError> {
        Self::build_with_params(documents, Bm25Params::default())
    }

    /// Build an index over `documents`, scoring their `contents`.
    pub fn build_with_params(documents: Vec<Document>, params: Bm25Params) -> Result<Self, IndexError> {
        if documents.is_empty() {
            return Err(IndexError::EmptyCorpus);
        }

        let tokenized: Vec<Vec<String>> = documents.iter().map(|d| tokenize(&d.contents)).collect();
        let scorer = Bm25Scorer::build(&tokenized, params);

        tracing::info!(
            documents = documents.len(),
            k1 = params.k1,
            b = params.b,
            "BM25 index built"
        );
        Ok(Self::from_parts(scorer, documents))
    }

    fn from_parts(scorer: Bm25Scorer, documents: Vec<Document>) -> Self {
        let mut positions = HashMap::with_capacity(documents.len());
        for (pos, doc) in documents.iter().enumerate() {
            if positions.contains_key(&doc.doc_id) {
                tracing::warn!(doc_id = %doc.doc_id, "Duplicate document id; lookups resolve to the first copy");
                continue;
            }
            positions.insert(doc.doc_id.clone(), pos);
        }
        LexicalIndex {
            scorer,
            documents,
            positions,
        }
    }

    /// Top-`k` documents for `query` by descending BM25 score.
    ///
    /// Equal scores keep corpus order, so results are deterministic for a given
    /// index. When no query term matches, every document scores 0 and the first
    /// `k` documents in corpus order are returned.
    pub fn search(&self, query: &str, k: usize) -> Vec<RankedHit> {
        if k == 0 {
            return Vec::new();
        }

        let tokens = tokenize(query);
        let scores = self.scorer.scores(&tokens);

        let mut order: Vec<usize> = (0..scores.len()).collect();
        // stable: ties stay in corpus order
        order.sort_by(|&a, &b| {
            scores[b]
                .partial_cmp(&scores[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        order
            .into_iter()
            .take(k)
            .map(|pos| {
                let doc = &self.documents[pos];
                RankedHit {
                    doc_id: doc.doc_id.clone(),
                    score: scores[pos],
                    title: doc.title.clone(),
                    contents: doc.contents.clone(),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.positions.contains_key(doc_id)
    }

    /// Document ids in corpus order.
    pub fn doc_ids(&self) -> impl Iterator<Item = &str> {
        self.documents.iter().map(|d| d.doc_id.as_str())
    }

    pub fn get(&self, doc_id: &str) -> Option<&Document> {
        self.positions.get(doc_id).map(|&pos| &self.documents[pos])
    }

    pub fn params(&self) -> Bm25Params {
        self.scorer.params()
    }

    /// Persist the index to `dir/bm25_index.json`, creating `dir` if needed.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, IndexError> {
        std::fs::create_dir_all(dir).map_err(|e| IndexError::Io(format!("{}: {}", dir.display(), e)))?;
        let path = dir.join(INDEX_FILE);

        let artifact = IndexArtifact {
            version: ARTIFACT_VERSION,
            scorer: self.scorer.clone(),
            documents: self.documents.clone(),
        };
        let file = std::fs::File::create(&path)
            .map_err(|e| IndexError::Io(format!("{}: {}", path.display(), e)))?;
        serde_json::to_writer(std::io::BufWriter::new(file), &artifact)
            .map_err(|e| IndexError::Serialization(e.to_string()))?;

        tracing::info!(path = %path.display(), documents = self.len(), "BM25 index saved");
        Ok(path)
    }

    /// Load a previously saved index from `dir`.
    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let path = dir.join(INDEX_FILE);
        if !path.exists() {
            return Err(IndexError::NotFound(path.display().to_string()));
        }

        let file = std::fs::File::open(&path)
            .map_err(|e| IndexError::Io(format!("{}: {}", path.display(), e)))?;
        let artifact: IndexArtifact = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| IndexError::Serialization(e.to_string()))?;

        if artifact.version != ARTIFACT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported artifact version {} (expected {})",
                artifact.version, ARTIFACT_VERSION
            )));
        }
        if artifact.scorer.num_docs() != artifact.documents.len() {
            return Err(IndexError::Corrupt(format!(
                "scorer covers {} documents but metadata has {}",
                artifact.scorer.num_docs(),
                artifact.documents.len()
            )));
        }
        if artifact.documents.is_empty() {
            return Err(IndexError::EmptyCorpus);
        }

        tracing::info!(path = %path.display(), documents = artifact.documents.len(), "BM25 index loaded");
        Ok(Self::from_parts(artifact.scorer, artifact.documents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_docs() -> Vec<Document> {
        vec![
            Document::new("A", "Pets", "cats and dogs"),
            Document::new("B", "Math", "fourier transform basics"),
            Document::new("C", "Vision", "image processing with dogs"),
        ]
    }

    #[test]
    fn test_build_empty_corpus_fails() {
        assert!(matches!(LexicalIndex::build(Vec::new()), Err(IndexError::EmptyCorpus)));
    }

    #[test]
    fn test_membership_accessors() {
        let index = LexicalIndex::build(sample_docs()).unwrap();
        assert_eq!(index.doc_ids().collect::<Vec<_>>(), vec!["A", "B", "C"]);
        assert!(index.contains("B"));
        assert!(!index.contains("X"));
        assert_eq!(index.get("C").map(|d| d.title.as_str()), Some("Vision"));
    }

    #[test]
    fn test_dogs_ranks_matching_documents_first() {
        let index = LexicalIndex::build(sample_docs()).unwrap();
        let hits = index.search("dogs", 2);
        assert_eq!(hits.len(), 2);
        let ids: Vec<&str> = hits.iter().map(|h| h.doc_id.as_str()).collect();
        assert!(ids.contains(&"A"));
        assert!(ids.contains(&"C"));
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_query_tokenized_like_documents() {
        let index = LexicalIndex::build(sample_docs()).unwrap();
        let hits = index.search("  FOURIER, Transform?", 1);
        assert_eq!(hits[0].doc_id, "B");
        assert_eq!(hits[0].title, "Math");
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn test_k_zero_returns_empty() {
        let index = LexicalIndex::build(sample_docs()).unwrap();
        assert!(index.search("dogs", 0).is_empty());
    }

    #[test]
    fn test_k_larger_than_corpus_returns_all() {
        let index = LexicalIndex::build(sample_docs()).unwrap();
        assert_eq!(index.search("dogs", 10).len(), 3);
    }

    #[test]
    fn test_no_overlap_is_deterministic_corpus_order() {
        let index = LexicalIndex::build(sample_docs()).unwrap();
        let first = index.search("quantum chromodynamics", 3);
        let second = index.search("quantum chromodynamics", 3);
        assert_eq!(first, second);
        assert!(first.iter().all(|h| h.score == 0.0));
        let ids: Vec<&str> = first.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_save_and_load_preserves_rankings() {
        let dir = tempfile::tempdir().unwrap();
        let index = LexicalIndex::build(sample_docs()).unwrap();
        index.save(dir.path()).unwrap();

        let loaded = LexicalIndex::load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded.contains("C"));
        assert_eq!(loaded.get("B").map(|d| d.title.as_str()), Some("Math"));
        assert_eq!(index.search("image dogs", 3), loaded.search("image dogs", 3));
    }

    #[test]
    fn test_load_missing_index_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            LexicalIndex::load(dir.path()),
            Err(IndexError::NotFound(_))
        ));
    }
}
