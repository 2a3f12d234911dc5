/// Corpus, query, and relevance-judgment types with their JSONL loaders.
///
/// File formats (one JSON object per line, blank lines ignored):
/// - corpus:    {"id": ..., "title": ..., "contents": ...}
/// - queries:   {"qid": ..., "query": ...}
/// - judgments: {"qid": ..., "doc_id": ..., "relevance": 0|1|2}
///
/// Corpus and query files are trusted inputs: a bad line aborts the load.
/// Judgment files are validated line by line and problems are collected into a
/// `DataReport` instead, so one bad label never sinks a whole evaluation run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while reading or writing dataset files.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Malformed record in {path} at line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
}

/// A corpus document. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "id")]
    pub doc_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub contents: String,
}

impl Document {
    pub fn new(doc_id: impl Into<String>, title: impl Into<String>, contents: impl Into<String>) -> Self {
        Document {
            doc_id: doc_id.into(),
            title: title.into(),
            contents: contents.into(),
        }
    }
}

/// An evaluation query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub qid: String,
    #[serde(rename = "query")]
    pub text: String,
}

impl Query {
    pub fn new(qid: impl Into<String>, text: impl Into<String>) -> Self {
        Query {
            qid: qid.into(),
            text: text.into(),
        }
    }
}

/// Graded relevance label. Only 0, 1 and 2 are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Relevance(u8);

impl Relevance {
    pub const NOT_RELEVANT: Relevance = Relevance(0);
    pub const PARTIAL: Relevance = Relevance(1);
    pub const HIGH: Relevance = Relevance(2);

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_relevant(self) -> bool {
        self.0 > 0
    }

    /// Exponential gain used by nDCG: `2^rel - 1`.
    pub fn gain(self) -> f64 {
        f64::from((1u32 << self.0) - 1)
    }
}

impl TryFrom<i64> for Relevance {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0..=2 => Ok(Relevance(value as u8)),
            other => Err(format!("relevance {} is outside {{0, 1, 2}}", other)),
        }
    }
}

impl From<Relevance> for u8 {
    fn from(r: Relevance) -> Self {
        r.0
    }
}

impl fmt::Display for Relevance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One (query, document, label) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub qid: String,
    pub doc_id: String,
    pub relevance: Relevance,
}

/// Judgments keyed `qid -> doc_id -> relevance`. Absent pairs mean relevance 0.
pub type Qrels = HashMap<String, HashMap<String, Relevance>>;

/// A judgment line that was skipped during loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JudgmentIssue {
    /// Unparsable line, missing field, or relevance outside {0, 1, 2}.
    Malformed { line: usize, reason: String },
    /// The judgment's qid is not in the query set.
    UnknownQuery { line: usize, qid: String },
    /// The judgment's doc_id is not in the corpus.
    UnknownDocument { line: usize, doc_id: String },
}

/// Data-integrity summary produced alongside loaded judgments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataReport {
    pub total_lines: usize,
    pub accepted: usize,
    pub issues: Vec<JudgmentIssue>,
    /// Count of accepted judgments per relevance label.
    pub label_counts: BTreeMap<u8, usize>,
    /// Known queries that have no judgment at all.
    pub queries_without_judgments: Vec<String>,
    /// Known queries that have judgments but none with relevance > 0.
    pub queries_without_relevant: Vec<String>,
}

impl DataReport {
    pub fn skipped(&self) -> usize {
        self.issues.len()
    }

    pub fn malformed_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| matches!(i, JudgmentIssue::Malformed { .. }))
            .count()
    }

    pub fn unknown_query_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| matches!(i, JudgmentIssue::UnknownQuery { .. }))
            .count()
    }

    pub fn unknown_document_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| matches!(i, JudgmentIssue::UnknownDocument { .. }))
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Generic JSONL helpers
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<BufReader<std::fs::File>, DatasetError> {
    let file = std::fs::File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DatasetError::NotFound(path.display().to_string())
        } else {
            DatasetError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            }
        }
    })?;
    Ok(BufReader::new(file))
}

/// Read every non-blank line of a JSONL file as `T`. The first bad line aborts.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, DatasetError> {
    let reader = open(path)?;
    let mut items = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| DatasetError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let item = serde_json::from_str(trimmed).map_err(|e| DatasetError::Parse {
            path: path.display().to_string(),
            line: idx + 1,
            message: e.to_string(),
        })?;
        items.push(item);
    }
    Ok(items)
}

/// Write items as JSONL, creating parent directories as needed.
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<(), DatasetError> {
    let io_err = |e: std::io::Error| DatasetError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut out = std::io::BufWriter::new(std::fs::File::create(path).map_err(io_err)?);
    for item in items {
        let line = serde_json::to_string(item).map_err(|e| DatasetError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        writeln!(out, "{}", line).map_err(io_err)?;
    }
    out.flush().map_err(io_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

/// Load the corpus.
pub fn load_documents(path: &Path) -> Result<Vec<Document>, DatasetError> {
    let docs: Vec<Document> = read_jsonl(path)?;
    tracing::info!(path = %path.display(), count = docs.len(), "Corpus loaded");
    Ok(docs)
}

/// Load the query set. Repeated qids keep their first occurrence.
pub fn load_queries(path: &Path) -> Result<Vec<Query>, DatasetError> {
    let raw: Vec<Query> = read_jsonl(path)?;
    let mut seen = HashSet::new();
    let mut queries = Vec::with_capacity(raw.len());
    for q in raw {
        if !seen.insert(q.qid.clone()) {
            tracing::warn!(qid = %q.qid, "Duplicate query id, keeping first occurrence");
            continue;
        }
        queries.push(q);
    }
    tracing::info!(path = %path.display(), count = queries.len(), "Queries loaded");
    Ok(queries)
}

/// Judgment line as it appears on disk, before validation.
#[derive(Deserialize)]
struct RawJudgment {
    qid: Option<String>,
    doc_id: Option<String>,
    relevance: Option<serde_json::Value>,
}

fn parse_relevance(value: &serde_json::Value) -> Result<Relevance, String> {
    let as_int = match value {
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Some(i),
            (None, Some(f)) if f.fract() == 0.0 => Some(f as i64),
            _ => None,
        },
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match as_int {
        Some(i) => Relevance::try_from(i),
        None => Err(format!("relevance {} is not an integer", value)),
    }
}

/// Load and validate judgments from a JSONL file.
///
/// Judgments referencing a qid outside `queries` or a doc id rejected by
/// `known_doc` are skipped and reported. Pass `|_| true` to skip the document check.
pub fn load_qrels(
    path: &Path,
    queries: &[Query],
    known_doc: impl Fn(&str) -> bool,
) -> Result<(Qrels, DataReport), DatasetError> {
    let reader = open(path)?;
    let (qrels, report) = parse_qrels(reader, queries, known_doc).map_err(|e| DatasetError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    tracing::info!(
        path = %path.display(),
        accepted = report.accepted,
        skipped = report.skipped(),
        "Judgments loaded"
    );
    if !report.is_clean() {
        tracing::warn!(
            malformed = report.malformed_count(),
            unknown_queries = report.unknown_query_count(),
            unknown_documents = report.unknown_document_count(),
            "Some judgments were skipped"
        );
    }
    Ok((qrels, report))
}

/// Validate judgments from any line reader. See [`load_qrels`].
pub fn parse_qrels<R: BufRead>(
    reader: R,
    queries: &[Query],
    known_doc: impl Fn(&str) -> bool,
) -> Result<(Qrels, DataReport), std::io::Error> {
    let known_queries: HashSet<&str> = queries.iter().map(|q| q.qid.as_str()).collect();
    let mut qrels: Qrels = HashMap::new();
    let mut report = DataReport::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let line_no = idx + 1;
        report.total_lines += 1;

        let raw: RawJudgment = match serde_json::from_str(trimmed) {
            Ok(raw) => raw,
            Err(e) => {
                report.issues.push(JudgmentIssue::Malformed {
                    line: line_no,
                    reason: format!("invalid JSON: {}", e),
                });
                continue;
            }
        };

        let (Some(qid), Some(doc_id), Some(rel_value)) = (raw.qid, raw.doc_id, raw.relevance) else {
            report.issues.push(JudgmentIssue::Malformed {
                line: line_no,
                reason: "missing one of qid, doc_id, relevance".to_string(),
            });
            continue;
        };

        let relevance = match parse_relevance(&rel_value) {
            Ok(r) => r,
            Err(reason) => {
                report.issues.push(JudgmentIssue::Malformed { line: line_no, reason });
                continue;
            }
        };

        if !known_queries.contains(qid.as_str()) {
            report.issues.push(JudgmentIssue::UnknownQuery { line: line_no, qid });
            continue;
        }
        if !known_doc(&doc_id) {
            report.issues.push(JudgmentIssue::UnknownDocument { line: line_no, doc_id });
            continue;
        }

        report.accepted += 1;
        *report.label_counts.entry(relevance.value()).or_default() += 1;
        let previous = qrels.entry(qid.clone()).or_default().insert(doc_id.clone(), relevance);
        if previous.is_some() {
            tracing::debug!(qid = %qid, doc_id = %doc_id, line = line_no, "Judgment overrides an earlier label");
        }
    }

    for q in queries {
        match qrels.get(&q.qid) {
            None => report.queries_without_judgments.push(q.qid.clone()),
            Some(labels) if !labels.values().any(|r| r.is_relevant()) => {
                report.queries_without_relevant.push(q.qid.clone())
            }
            Some(_) => {}
        }
    }

    Ok((qrels, report))
}
