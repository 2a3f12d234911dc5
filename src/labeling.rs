/// Judgment pool building and LLM-assisted relevance labeling.
///
/// `build_judgment_pool` turns each query's BM25 top-k into `{qid, doc_id, 0}`
/// placeholders; `RelevanceLabeler` grades those pairs 0/1/2 with the
/// text-generation oracle.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::dataset::{Document, Judgment, Query, Relevance};
use crate::generation::{GenerationRequest, TextGenerationProvider};
use crate::index::LexicalIndex;
use crate::retry::RetryPolicy;

/// Default pool depth per query.
pub const DEFAULT_POOL_TOP_K: usize = 30;
/// Default cap on document characters sent to the judge.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 2000;

const LABEL_SYSTEM_PROMPT: &str = "You are an assistant that assigns relevance labels for an \
information retrieval evaluation.\n\
Given a query and a document, label:\n\
2 if the document is clearly about the query topic and very useful,\n\
1 if it is somewhat related or partially useful,\n\
0 if it is not really relevant.\n\
Respond with a single number: 0, 1, or 2. No explanation.";

/// Placeholder judgments (relevance 0) for every query's BM25 top-k.
pub fn build_judgment_pool(index: &LexicalIndex, queries: &[Query], top_k: usize) -> Vec<Judgment> {
    let mut pool = Vec::with_capacity(queries.len() * top_k.min(index.len()));
    for query in queries {
        for hit in index.search(&query.text, top_k) {
            pool.push(Judgment {
                qid: query.qid.clone(),
                doc_id: hit.doc_id,
                relevance: Relevance::NOT_RELEVANT,
            });
        }
    }
    tracing::info!(queries = queries.len(), top_k, judgments = pool.len(), "Judgment pool built");
    pool
}

/// First character of the reply in {0, 1, 2}, if any.
pub fn parse_label(reply: &str) -> Option<Relevance> {
    reply
        .chars()
        .find_map(|c| match c {
            '0' => Some(Relevance::NOT_RELEVANT),
            '1' => Some(Relevance::PARTIAL),
            '2' => Some(Relevance::HIGH),
            _ => None,
        })
}

/// Summary of a labeling pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelingOutcome {
    pub judgments: Vec<Judgment>,
    /// Template entries whose query or document is unknown
    pub skipped: usize,
    /// Pairs that fell back to 0 after every attempt failed
    pub defaulted: usize,
}

/// Grades (query, document) pairs with a text-generation oracle.
pub struct RelevanceLabeler {
    provider: Arc<dyn TextGenerationProvider>,
    retry: RetryPolicy,
    max_content_chars: usize,
}

impl RelevanceLabeler {
    pub fn new(provider: Arc<dyn TextGenerationProvider>) -> Self {
        RelevanceLabeler {
            provider,
            retry: RetryPolicy::default(),
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_content_chars(mut self, max_content_chars: usize) -> Self {
        self.max_content_chars = max_content_chars;
        self
    }

    fn request(&self, query: &str, doc: &Document) -> GenerationRequest {
        let contents: String = doc.contents.chars().take(self.max_content_chars).collect();
        GenerationRequest {
            system: LABEL_SYSTEM_PROMPT.to_string(),
            user: format!(
                "Query:\n{}\n\nDocument title:\n{}\n\nDocument contents (may be truncated):\n{}",
                query, doc.title, contents
            ),
            n: 1,
            temperature: 0.0,
        }
    }

    /// Grade one pair. Oracle errors and unparsable replies both use up an
    /// attempt; the last failure is returned.
    pub async fn try_label(&self, query: &str, doc: &Document) -> Result<Relevance, String> {
        let request = self.request(query, doc);
        self.retry
            .run("relevance_label", || async {
                let replies = self
                    .provider
                    .generate(&request)
                    .await
                    .map_err(|e| e.to_string())?;
                replies
                    .first()
                    .and_then(|r| parse_label(r))
                    .ok_or_else(|| format!("no label in reply {:?}", replies.first()))
            })
            .await
    }

    /// Grade one pair, falling back to 0 when no label could be obtained.
    pub async fn label(&self, query: &str, doc: &Document) -> Relevance {
        match self.try_label(query, doc).await {
            Ok(label) => label,
            Err(e) => {
                tracing::warn!(doc_id = %doc.doc_id, error = %e, "No valid relevance label, defaulting to 0");
                Relevance::NOT_RELEVANT
            }
        }
    }

    /// Label every template entry whose query and document are known.
    pub async fn label_pool(&self, template: &[Judgment], queries: &[Query], index: &LexicalIndex) -> LabelingOutcome {
        let query_text: HashMap<&str, &str> = queries
            .iter()
            .map(|q| (q.qid.as_str(), q.text.as_str()))
            .collect();
        let mut outcome = LabelingOutcome::default();

        for entry in template {
            let (Some(text), Some(doc)) = (query_text.get(entry.qid.as_str()), index.get(&entry.doc_id)) else {
                tracing::warn!(qid = %entry.qid, doc_id = %entry.doc_id, "Missing query or document, skipping");
                outcome.skipped += 1;
                continue;
            };

            let relevance = match self.try_label(text, doc).await {
                Ok(label) => label,
                Err(e) => {
                    tracing::warn!(
                        qid = %entry.qid,
                        doc_id = %entry.doc_id,
                        error = %e,
                        "No valid relevance label, defaulting to 0"
                    );
                    outcome.defaulted += 1;
                    Relevance::NOT_RELEVANT
                }
            };
            tracing::debug!(qid = %entry.qid, doc_id = %entry.doc_id, relevance = relevance.value(), "Labeled");
            outcome.judgments.push(Judgment {
                qid: entry.qid.clone(),
                doc_id: entry.doc_id.clone(),
                relevance,
            });
        }

        tracing::info!(
            labeled = outcome.judgments.len(),
            skipped = outcome.skipped,
            defaulted = outcome.defaulted,
            "Labeling complete"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    fn corpus() -> LexicalIndex {
        LexicalIndex::build(vec![
            Document::new("A", "Dogs", "cats and dogs"),
            Document::new("B", "Fourier", "fourier transform basics"),
            Document::new("C", "Imaging", "image processing with dogs"),
        ])
        .unwrap()
    }

    #[test]
    fn test_parse_label_takes_first_digit_in_range() {
        assert_eq!(parse_label("2"), Some(Relevance::HIGH));
        assert_eq!(parse_label("Label: 1 (partially)"), Some(Relevance::PARTIAL));
        assert_eq!(parse_label("5 or 0"), Some(Relevance::NOT_RELEVANT));
        assert_eq!(parse_label("relevant"), None);
    }

    #[test]
    fn test_pool_takes_top_k_per_query() {
        let index = corpus();
        let queries = vec![Query::new("q1", "dogs"), Query::new("q2", "fourier")];
        let pool = build_judgment_pool(&index, &queries, 2);
        assert_eq!(pool.len(), 4);
        let q1: Vec<&str> = pool
            .iter()
            .filter(|j| j.qid == "q1")
            .map(|j| j.doc_id.as_str())
            .collect();
        assert_eq!(q1, vec!["A", "C"]);
        assert!(pool.iter().all(|j| j.relevance == Relevance::NOT_RELEVANT));
    }

    #[tokio::test]
    async fn test_unparsable_replies_default_to_zero() {
        let script = Arc::new(ScriptedGenerator::repeating(Ok(vec!["very relevant".into()])));
        let labeler = RelevanceLabeler::new(script.clone()).with_retry(RetryPolicy::immediate(3));
        let doc = Document::new("A", "Dogs", "cats and dogs");
        assert_eq!(labeler.label("dogs", &doc).await, Relevance::NOT_RELEVANT);
        assert_eq!(script.call_count(), 3);
    }

    #[tokio::test]
    async fn test_request_truncates_contents() {
        let script = Arc::new(ScriptedGenerator::new(vec![Ok(vec!["1".into()])]));
        let labeler = RelevanceLabeler::new(script.clone())
            .with_retry(RetryPolicy::immediate(1))
            .with_max_content_chars(5);
        let doc = Document::new("A", "Dogs", "abcdefghij");
        assert_eq!(labeler.label("dogs", &doc).await, Relevance::PARTIAL);

        let request = &script.requests()[0];
        assert!(request.user.ends_with("contents (may be truncated):\nabcde"));
        assert_eq!(request.n, 1);
        assert_eq!(request.temperature, 0.0);
    }

    #[tokio::test]
    async fn test_label_pool_skips_unknown_entries() {
        let index = corpus();
        let queries = vec![Query::new("q1", "dogs")];
        let template = vec![
            Judgment {
                qid: "q1".into(),
                doc_id: "A".into(),
                relevance: Relevance::NOT_RELEVANT,
            },
            Judgment {
                qid: "q9".into(),
                doc_id: "A".into(),
                relevance: Relevance::NOT_RELEVANT,
            },
            Judgment {
                qid: "q1".into(),
                doc_id: "Z".into(),
                relevance: Relevance::NOT_RELEVANT,
            },
            Judgment {
                qid: "q1".into(),
                doc_id: "B".into(),
                relevance: Relevance::NOT_RELEVANT,
            },
        ];
        let script = Arc::new(ScriptedGenerator::new(vec![
            Ok(vec!["2".into()]),
            Err("timeout".into()),
        ]));
        let labeler = RelevanceLabeler::new(script).with_retry(RetryPolicy::immediate(2));

        let outcome = labeler.label_pool(&template, &queries, &index).await;
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.defaulted, 1);
        assert_eq!(outcome.judgments.len(), 2);
        assert_eq!(outcome.judgments[0].relevance, Relevance::HIGH);
        assert_eq!(outcome.judgments[1].relevance, Relevance::NOT_RELEVANT);
    }
}
