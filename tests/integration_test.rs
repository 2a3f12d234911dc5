use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Stdio};

use std::sync::Arc;

use async_trait::async_trait;

use lexfuse::dataset::{self, Document, Query};
use lexfuse::embedding::{EmbeddingError, EmbeddingProvider};
use lexfuse::evaluation::{report, EvaluationMode, Evaluator, ExpansionSettings};
use lexfuse::expansion::{CandidateFilter, CandidateGenerator, CategoryCounts, ExpansionCategory};
use lexfuse::fusion::fuse;
use lexfuse::generation::{GenerationError, GenerationRequest, TextGenerationProvider};
use lexfuse::index::LexicalIndex;
use lexfuse::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Fake oracles
// ---------------------------------------------------------------------------

/// Answers each category with a fixed reformulation, keyed on the system prompt.
struct CategoryGenerator {
    replies: Vec<(&'static str, &'static str)>,
}

#[async_trait]
impl TextGenerationProvider for CategoryGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>, GenerationError> {
        let reply = self
            .replies
            .iter()
            .find(|(marker, _)| request.system.contains(marker))
            .map(|(_, text)| vec![text.to_string()])
            .unwrap_or_default();
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        "category-fake"
    }
}

/// Bag-of-words embedder over a tiny fixed vocabulary.
struct VocabEmbedder {
    vocab: HashMap<&'static str, usize>,
}

impl VocabEmbedder {
    fn new(words: &[&'static str]) -> Self {
        VocabEmbedder {
            vocab: words.iter().enumerate().map(|(i, w)| (*w, i)).collect(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for VocabEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0.0f32; self.vocab.len() + 1];
        for word in text.to_lowercase().split_whitespace() {
            let slot = self.vocab.get(word).copied().unwrap_or(self.vocab.len());
            v[slot] += 1.0;
        }
        Ok(v)
    }

    fn model_name(&self) -> &str {
        "vocab-fake"
    }

    fn dimension(&self) -> usize {
        self.vocab.len() + 1
    }
}

fn write_lines(path: &Path, lines: &[&str]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, lines.join("\n") + "\n").unwrap();
}

fn write_dataset(root: &Path) {
    write_lines(
        &root.join("data/corpus.jsonl"),
        &[
            r#"{"id": "A", "title": "Pets", "contents": "cats and dogs"}"#,
            r#"{"id": "B", "title": "Signals", "contents": "fourier transform basics"}"#,
            r#"{"id": "C", "title": "Vision", "contents": "image processing with dogs"}"#,
            r#"{"id": "D", "title": "Canines", "contents": "puppy training for canine companions"}"#,
            r#"{"id": "E", "title": "Weather", "contents": "rainy weather forecast"}"#,
        ],
    );
    write_lines(
        &root.join("data/queries.jsonl"),
        &[
            r#"{"qid": "q1", "query": "dogs"}"#,
            r#"{"qid": "q2", "query": "fourier transform"}"#,
        ],
    );
    write_lines(
        &root.join("data/qrels.jsonl"),
        &[
            r#"{"qid": "q1", "doc_id": "A", "relevance": 2}"#,
            r#"{"qid": "q1", "doc_id": "D", "relevance": 1}"#,
            r#"{"qid": "q2", "doc_id": "B", "relevance": 2}"#,
            r#"{"qid": "q2", "doc_id": "X", "relevance": 1}"#,
            r#"{"qid": "q1", "doc_id": "C", "relevance": 7}"#,
        ],
    );
}

// ---------------------------------------------------------------------------
// Library pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pipeline_end_to_end_with_fakes() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());

    let documents = dataset::load_documents(&dir.path().join("data/corpus.jsonl")).unwrap();
    let index = LexicalIndex::build(documents).unwrap();
    let queries = dataset::load_queries(&dir.path().join("data/queries.jsonl")).unwrap();
    let (qrels, data_report) =
        dataset::load_qrels(&dir.path().join("data/qrels.jsonl"), &queries, |id| index.contains(id)).unwrap();

    // X is unknown, relevance 7 is malformed
    assert_eq!(data_report.accepted, 3);
    assert_eq!(data_report.unknown_document_count(), 1);
    assert_eq!(data_report.malformed_count(), 1);

    let baseline = Evaluator::new(&index, &queries, &qrels)
        .with_data_report(&data_report)
        .evaluate_baseline(2)
        .await
        .unwrap();
    assert_eq!(baseline.skipped_judgments, 2);
    // baseline never reaches D for "dogs"
    assert_eq!(baseline.per_query["q1"].recall_at_k, 0.5);

    let generator = CandidateGenerator::new(Arc::new(CategoryGenerator {
        replies: vec![
            ("paraphrase", "dogs canine companions"),
            ("entities", "dogs puppy"),
            ("conceptual", "fourier"),
        ],
    }))
    .with_retry(RetryPolicy::immediate(1))
    .with_max_rounds(1);
    let filter = CandidateFilter::new(Arc::new(VocabEmbedder::new(&[
        "dogs", "canine", "companions", "puppy", "fourier", "transform",
    ])))
    .with_retry(RetryPolicy::immediate(1));
    let settings = ExpansionSettings {
        pools: CategoryCounts::uniform(1),
        ..ExpansionSettings::default()
    };

    let q1_only = vec![Query::new("q1", "dogs")];
    let expanded = Evaluator::new(&index, &q1_only, &qrels)
        .with_expansion(generator, filter, settings)
        .evaluate_with_expansion(3)
        .await
        .unwrap();

    assert_eq!(expanded.mode, EvaluationMode::Expansion);
    let trace = &expanded.expansions["q1"];
    assert_eq!(trace.kept[&ExpansionCategory::Paraphrase], vec!["dogs canine companions"]);
    assert_eq!(trace.kept[&ExpansionCategory::Entity], vec!["dogs puppy"]);
    // orthogonal to the query, dropped by the filter
    assert!(trace.kept[&ExpansionCategory::Conceptual].is_empty());
    assert_eq!(trace.labels, vec!["original", "paraphrase_1", "entity_1"]);
    assert_eq!(expanded.per_query["q1"].recall_at_k, 1.0);

    let saved = report::save_report(&expanded, dir.path()).unwrap();
    let loaded = report::load_report(&saved).unwrap();
    assert_eq!(loaded.expansions["q1"].labels, trace.labels);
}

#[test]
fn test_fusion_rewards_agreement_between_rankings() {
    let index = LexicalIndex::build(vec![
        Document::new("A", "", "cats and dogs"),
        Document::new("B", "", "fourier transform basics"),
        Document::new("C", "", "image processing with dogs"),
    ])
    .unwrap();
    let rankings = vec![
        ("original".to_string(), index.search("dogs", 3)),
        ("paraphrase_1".to_string(), index.search("processing dogs", 3)),
        ("entity_1".to_string(), index.search("image processing", 3)),
    ];
    let fused = fuse(&rankings, 60, 3);
    // A leads only the original ranking; C leads the other two
    assert_eq!(fused[0].doc_id, "C");
    assert_eq!(fused[1].doc_id, "A");
    assert_eq!(fused[0].contributing_labels, vec!["original", "paraphrase_1", "entity_1"]);
    assert!(fused.iter().all(|h| h.fused_score > 0.0));
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

fn lexfuse(root: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_lexfuse"))
        .current_dir(root)
        .args(["--config", "lexfuse.toml"])
        .args(args)
        .env("RUST_LOG", "warn")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .expect("Failed to run lexfuse binary")
}

fn write_config(root: &Path) {
    std::fs::write(
        root.join("lexfuse.toml"),
        r#"
[paths]
corpus = "data/corpus.jsonl"
queries = "data/queries.jsonl"
qrels = "data/qrels.jsonl"
index_dir = "data/index"
output_dir = "data/results"
"#,
    )
    .unwrap();
}

#[test]
fn test_cli_index_search_and_baseline() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    write_config(dir.path());

    let out = lexfuse(dir.path(), &["index"]);
    assert!(out.status.success());
    assert!(dir.path().join("data/index/bm25_index.json").exists());

    let out = lexfuse(dir.path(), &["search", "fourier", "--k", "1"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("B"), "unexpected search output: {}", stdout);

    let out = lexfuse(dir.path(), &["check-qrels"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Malformed: 1"));
    assert!(stdout.contains("Unknown documents: 1"));

    let out = lexfuse(dir.path(), &["evaluate", "--k", "2"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("baseline@2"));
    let reports: Vec<_> = std::fs::read_dir(dir.path().join("data/results"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("baseline_k2_"))
        .collect();
    assert_eq!(reports.len(), 1);
}

#[test]
fn test_cli_search_without_index_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path());
    write_config(dir.path());

    let out = lexfuse(dir.path(), &["search", "dogs"]);
    assert!(!out.status.success());
}
