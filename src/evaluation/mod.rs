/// Evaluation orchestrator: baseline BM25 vs expansion + fusion.
///
/// Runs every query through one of two pipelines and scores the result:
///   baseline:  search(original, k) -> metrics
///   expansion: generate -> filter -> search(original + kept, bm25_top_k)
///              -> fuse -> truncate(k) -> metrics
///
/// Queries run sequentially. With a checkpoint path configured, state is saved
/// after every query so an interrupted run can resume where it stopped.

pub mod report;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PathsConfig;
use crate::dataset::{self, DataReport, Qrels, Query};
use crate::errors::LexfuseError;
use crate::expansion::{CandidateFilter, CandidateGenerator, CandidatePools, CategoryCounts, FilterThresholds};
use crate::fusion::{fuse, DEFAULT_RRF_K};
use crate::index::{LexicalIndex, RankedHit};
use crate::metrics::{aggregate, compute_for_query, AggregateMetrics, QueryMetrics};

/// Default BM25 depth for each fused ranking.
pub const DEFAULT_BM25_TOP_K: usize = 50;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("No queries to evaluate")]
    NoQueries,

    #[error("Expansion mode requires a candidate generator and filter")]
    ExpansionUnavailable,

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    Baseline,
    Expansion,
}

impl EvaluationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationMode::Baseline => "baseline",
            EvaluationMode::Expansion => "expansion",
        }
    }
}

/// What the expansion pipeline did for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionTrace {
    /// Candidates produced by the generator across all categories
    pub generated: usize,
    /// Candidates that survived the filter, per category
    pub kept: CandidatePools,
    /// Ranking labels passed to fusion, in fusion order
    pub labels: Vec<String>,
}

/// Outcome of one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub mode: EvaluationMode,
    pub k: usize,
    pub timestamp: DateTime<Utc>,
    pub aggregate: AggregateMetrics,
    pub per_query: BTreeMap<String, QueryMetrics>,
    /// Judgment lines dropped while loading (malformed or unknown ids)
    pub skipped_judgments: usize,
    /// Evaluated queries with no judgments at all; they score zero
    pub queries_without_judgments: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expansions: BTreeMap<String, ExpansionTrace>,
}

/// Knobs of the expansion + fusion pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpansionSettings {
    pub bm25_top_k: usize,
    pub rrf_k: u32,
    pub pools: CategoryCounts,
    pub thresholds: FilterThresholds,
}

impl Default for ExpansionSettings {
    fn default() -> Self {
        ExpansionSettings {
            bm25_top_k: DEFAULT_BM25_TOP_K,
            rrf_k: DEFAULT_RRF_K,
            pools: CategoryCounts::uniform(6),
            thresholds: FilterThresholds::default(),
        }
    }
}

/// Checkpoint state for resumable runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationState {
    pub mode: EvaluationMode,
    pub k: usize,
    pub completed: BTreeMap<String, QueryMetrics>,
    #[serde(default)]
    pub expansions: BTreeMap<String, ExpansionTrace>,
    pub started_at: DateTime<Utc>,
}

impl EvaluationState {
    fn new(mode: EvaluationMode, k: usize) -> Self {
        EvaluationState {
            mode,
            k,
            completed: BTreeMap::new(),
            expansions: BTreeMap::new(),
            started_at: Utc::now(),
        }
    }
}

struct ExpansionPipeline {
    generator: CandidateGenerator,
    filter: CandidateFilter,
    settings: ExpansionSettings,
}

struct Checkpoint {
    path: PathBuf,
    resume: bool,
}

/// Everything an evaluation run reads from disk: the persisted index, the
/// query set, and the judgments validated against both.
pub struct EvaluationInputs {
    pub index: LexicalIndex,
    pub queries: Vec<Query>,
    pub qrels: Qrels,
    pub data_report: DataReport,
}

impl EvaluationInputs {
    pub fn load(paths: &PathsConfig) -> Result<Self, LexfuseError> {
        let index = LexicalIndex::load(&paths.index_dir)?;
        let queries = dataset::load_queries(&paths.queries)?;
        let (qrels, data_report) = dataset::load_qrels(&paths.qrels, &queries, |id| index.contains(id))?;
        Ok(EvaluationInputs {
            index,
            queries,
            qrels,
            data_report,
        })
    }

    /// Evaluator over these inputs, carrying the skipped-judgment count.
    pub fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.index, &self.queries, &self.qrels).with_data_report(&self.data_report)
    }
}

/// Runs queries against an index and scores them with the judgments.
pub struct Evaluator<'a> {
    index: &'a LexicalIndex,
    queries: &'a [Query],
    qrels: &'a Qrels,
    skipped_judgments: usize,
    expansion: Option<ExpansionPipeline>,
    checkpoint: Option<Checkpoint>,
    show_progress: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(index: &'a LexicalIndex, queries: &'a [Query], qrels: &'a Qrels) -> Self {
        Evaluator {
            index,
            queries,
            qrels,
            skipped_judgments: 0,
            expansion: None,
            checkpoint: None,
            show_progress: false,
        }
    }

    /// Carry the loader's skipped-judgment count into results.
    pub fn with_data_report(mut self, report: &DataReport) -> Self {
        self.skipped_judgments = report.skipped();
        self
    }

    pub fn with_expansion(
        mut self,
        generator: CandidateGenerator,
        filter: CandidateFilter,
        settings: ExpansionSettings,
    ) -> Self {
        self.expansion = Some(ExpansionPipeline {
            generator,
            filter,
            settings,
        });
        self
    }

    /// Save state to `path` after every query; with `resume`, continue from it.
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>, resume: bool) -> Self {
        self.checkpoint = Some(Checkpoint {
            path: path.into(),
            resume,
        });
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub async fn evaluate_baseline(&self, k: usize) -> Result<EvaluationResult, EvaluationError> {
        self.run(EvaluationMode::Baseline, k).await
    }

    pub async fn evaluate_with_expansion(&self, k: usize) -> Result<EvaluationResult, EvaluationError> {
        if self.expansion.is_none() {
            return Err(EvaluationError::ExpansionUnavailable);
        }
        self.run(EvaluationMode::Expansion, k).await
    }

    async fn run(&self, mode: EvaluationMode, k: usize) -> Result<EvaluationResult, EvaluationError> {
        if self.queries.is_empty() {
            return Err(EvaluationError::NoQueries);
        }

        let mut state = self.initial_state(mode, k)?;

        let pb = if self.show_progress {
            ProgressBar::new(self.queries.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{pos}/{len}] {msg} [{elapsed_precise} / {eta_precise}]")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let wanted: HashSet<&str> = self.queries.iter().map(|q| q.qid.as_str()).collect();
        state.completed.retain(|qid, _| wanted.contains(qid.as_str()));
        state.expansions.retain(|qid, _| state.completed.contains_key(qid));
        pb.set_position(state.completed.len() as u64);

        for query in self.queries {
            if state.completed.contains_key(&query.qid) {
                continue;
            }
            pb.set_message(query.qid.clone());

            let metrics = match mode {
                EvaluationMode::Baseline => {
                    let hits = self.index.search(&query.text, k);
                    compute_for_query(&hits, &query.qid, self.qrels, k)
                }
                EvaluationMode::Expansion => {
                    let (metrics, trace) = self.expand_and_score(query, k).await?;
                    state.expansions.insert(query.qid.clone(), trace);
                    metrics
                }
            };

            tracing::debug!(
                qid = %query.qid,
                mode = mode.as_str(),
                precision = metrics.precision_at_k,
                recall = metrics.recall_at_k,
                ndcg = metrics.ndcg_at_k,
                "Query evaluated"
            );
            state.completed.insert(query.qid.clone(), metrics);

            if let Some(checkpoint) = &self.checkpoint {
                save_checkpoint(&state, &checkpoint.path)?;
            }
            pb.inc(1);
        }

        pb.finish_with_message("done");

        let result = self.finish(state);
        tracing::info!(
            mode = mode.as_str(),
            k,
            queries = result.aggregate.num_queries,
            precision = result.aggregate.precision_at_k,
            recall = result.aggregate.recall_at_k,
            ndcg = result.aggregate.ndcg_at_k,
            "Evaluation complete"
        );
        Ok(result)
    }

    fn initial_state(&self, mode: EvaluationMode, k: usize) -> Result<EvaluationState, EvaluationError> {
        let Some(checkpoint) = self.checkpoint.as_ref().filter(|c| c.resume) else {
            return Ok(EvaluationState::new(mode, k));
        };
        match load_checkpoint(&checkpoint.path)? {
            Some(state) if state.mode == mode && state.k == k => {
                tracing::info!(
                    path = %checkpoint.path.display(),
                    completed = state.completed.len(),
                    "Resuming from checkpoint"
                );
                Ok(state)
            }
            Some(state) => {
                tracing::warn!(
                    path = %checkpoint.path.display(),
                    checkpoint_mode = state.mode.as_str(),
                    checkpoint_k = state.k,
                    "Checkpoint belongs to a different run, starting fresh"
                );
                Ok(EvaluationState::new(mode, k))
            }
            None => Ok(EvaluationState::new(mode, k)),
        }
    }

    async fn expand_and_score(&self, query: &Query, k: usize) -> Result<(QueryMetrics, ExpansionTrace), EvaluationError> {
        let pipeline = self
            .expansion
            .as_ref()
            .ok_or(EvaluationError::ExpansionUnavailable)?;
        let settings = &pipeline.settings;

        let candidates = pipeline.generator.generate(&query.text, settings.pools).await;
        let outcome = pipeline
            .filter
            .filter(&query.text, &candidates, &settings.thresholds)
            .await;

        let mut rankings: Vec<(String, Vec<RankedHit>)> = Vec::with_capacity(1 + outcome.kept_count());
        rankings.push((
            "original".to_string(),
            self.index.search(&query.text, settings.bm25_top_k),
        ));
        for (category, texts) in &outcome.kept {
            for (i, text) in texts.iter().enumerate() {
                rankings.push((
                    format!("{}_{}", category, i + 1),
                    self.index.search(text, settings.bm25_top_k),
                ));
            }
        }

        let mut fused = fuse(&rankings, settings.rrf_k, settings.bm25_top_k);
        fused.truncate(k);

        let trace = ExpansionTrace {
            generated: candidates.values().map(Vec::len).sum(),
            kept: outcome.kept,
            labels: rankings.into_iter().map(|(label, _)| label).collect(),
        };
        tracing::debug!(
            qid = %query.qid,
            generated = trace.generated,
            rankings = trace.labels.len(),
            "Expansion fused"
        );

        Ok((compute_for_query(&fused, &query.qid, self.qrels, k), trace))
    }

    fn finish(&self, state: EvaluationState) -> EvaluationResult {
        let queries_without_judgments = self
            .queries
            .iter()
            .filter(|q| self.qrels.get(&q.qid).map_or(true, |j| j.is_empty()))
            .map(|q| q.qid.clone())
            .collect();

        EvaluationResult {
            mode: state.mode,
            k: state.k,
            timestamp: Utc::now(),
            aggregate: aggregate(state.completed.values()),
            per_query: state.completed,
            skipped_judgments: self.skipped_judgments,
            queries_without_judgments,
            expansions: state.expansions,
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint persistence
// ---------------------------------------------------------------------------

/// Save evaluation state as JSON for checkpoint/resume.
pub fn save_checkpoint(state: &EvaluationState, path: &Path) -> Result<(), EvaluationError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| EvaluationError::Checkpoint(e.to_string()))?;
    }
    let json = serde_json::to_string_pretty(state).map_err(|e| EvaluationError::Checkpoint(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| EvaluationError::Checkpoint(format!("{}: {}", path.display(), e)))
}

/// Load a checkpoint. Returns None if the file does not exist.
pub fn load_checkpoint(path: &Path) -> Result<Option<EvaluationState>, EvaluationError> {
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(path)
        .map_err(|e| EvaluationError::Checkpoint(format!("{}: {}", path.display(), e)))?;
    let state = serde_json::from_str(&json).map_err(|e| EvaluationError::Checkpoint(e.to_string()))?;
    Ok(Some(state))
}
