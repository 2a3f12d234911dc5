use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use lexfuse::config::Config;
use lexfuse::dataset::{self, DataReport, JudgmentIssue, Judgment};
use lexfuse::embedding::EmbeddingProvider;
use lexfuse::embedding::local::LocalEmbeddingProvider;
use lexfuse::embedding::openai::OpenAIEmbeddingProvider;
use lexfuse::evaluation::{report, EvaluationInputs, EvaluationMode};
use lexfuse::expansion::{CandidateFilter, CandidateGenerator};
use lexfuse::generation::TextGenerationProvider;
use lexfuse::generation::ollama::OllamaGenerationProvider;
use lexfuse::generation::openai::OpenAIGenerationProvider;
use lexfuse::index::LexicalIndex;
use lexfuse::labeling::{build_judgment_pool, RelevanceLabeler};
use lexfuse::logging;

#[derive(Parser)]
#[command(name = "lexfuse", version, about = "BM25 retrieval with LLM query expansion and rank fusion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file
    #[arg(long, global = true, default_value = lexfuse::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the BM25 index from the corpus and persist it
    Index,
    /// Search the persisted index
    Search {
        text: String,
        #[arg(long, default_value_t = 10)]
        k: usize,
    },
    /// Generate and filter expansion candidates for one query, print diagnostics as JSON
    Expand {
        text: String,
    },
    /// Evaluate the query set against the judgments
    Evaluate {
        #[arg(long, default_value_t = 10)]
        k: usize,
        /// Run expansion + fusion instead of the BM25 baseline
        #[arg(long)]
        use_expansion: bool,
        /// Resume from checkpoint if available
        #[arg(long)]
        resume: bool,
        /// Print per-query metrics
        #[arg(long)]
        per_query: bool,
    },
    /// Compare saved evaluation reports side by side
    Compare {
        #[arg(required = true)]
        reports: Vec<PathBuf>,
    },
    /// Validate the judgment file against queries and corpus
    CheckQrels,
    /// Write a judgment template from each query's BM25 top-k
    Pool {
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long, default_value = "data/qrels_template.jsonl")]
        output: PathBuf,
    },
    /// Label a judgment template with the LLM judge
    Label {
        #[arg(long, default_value = "data/qrels_template.jsonl")]
        template: PathBuf,
        /// Defaults to paths.qrels
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Create the text-generation provider for `model` based on configuration.
fn create_generation_provider(config: &Config, model: &str) -> Result<Arc<dyn TextGenerationProvider>> {
    match config.expansion.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerationProvider::new(
            config.expansion.ollama_base_url.clone(),
            model.to_string(),
        ))),
        _ => {
            let api_key = config.generation_api_key()
                .ok_or_else(|| anyhow::anyhow!(
                    "OpenAI API key required when expansion provider is 'openai'. \
                     Set LEXFUSE_EXPANSION__OPENAI_API_KEY, OPENAI_API_KEY, or expansion.openai_api_key in lexfuse.toml"
                ))?;
            Ok(Arc::new(OpenAIGenerationProvider::new(
                config.expansion.openai_base_url.clone(),
                api_key,
                model.to_string(),
            )?))
        }
    }
}

/// Create the embedding provider based on configuration.
async fn create_embedding_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.filtering.embedding_provider.as_str() {
        "openai" => {
            let api_key = config.embedding_api_key()
                .ok_or_else(|| anyhow::anyhow!(
                    "OpenAI API key required when embedding provider is 'openai'. \
                     Set LEXFUSE_FILTERING__OPENAI_API_KEY or filtering.openai_api_key in lexfuse.toml"
                ))?;
            Ok(Arc::new(OpenAIEmbeddingProvider::new(
                config.expansion.openai_base_url.clone(),
                api_key,
                config.filtering.openai_model.clone(),
            )?))
        }
        _ => Ok(Arc::new(LocalEmbeddingProvider::new(&config.filtering.cache_dir).await?)),
    }
}

async fn create_expansion_stages(config: &Config) -> Result<(CandidateGenerator, CandidateFilter)> {
    let retry = config.oracle.retry_policy();
    let generator = CandidateGenerator::new(create_generation_provider(config, &config.expansion.model)?)
        .with_temperature(config.expansion.temperature)
        .with_max_rounds(config.expansion.max_rounds)
        .with_retry(retry);
    let filter = CandidateFilter::new(create_embedding_provider(config).await?).with_retry(retry);
    Ok((generator, filter))
}

fn load_index(config: &Config) -> Result<LexicalIndex> {
    let index = LexicalIndex::load(&config.paths.index_dir).map_err(|e| {
        anyhow::anyhow!("{} (run `lexfuse index` first)", e)
    })?;
    tracing::info!(documents = index.len(), path = %config.paths.index_dir.display(), "Index loaded");
    Ok(index)
}

fn print_data_report(report: &DataReport) {
    println!("=== Judgment Check ===");
    println!("Lines: {}", report.total_lines);
    println!("Accepted: {}", report.accepted);
    println!("Malformed: {}", report.malformed_count());
    println!("Unknown queries: {}", report.unknown_query_count());
    println!("Unknown documents: {}", report.unknown_document_count());
    println!("Label distribution:");
    for (label, count) in &report.label_counts {
        println!("  {}: {}", label, count);
    }
    if !report.queries_without_judgments.is_empty() {
        println!("Queries without judgments: {}", report.queries_without_judgments.join(", "));
    }
    if !report.queries_without_relevant.is_empty() {
        println!("Queries without relevant docs: {}", report.queries_without_relevant.join(", "));
    }
    for issue in &report.issues {
        match issue {
            JudgmentIssue::Malformed { line, reason } => println!("  line {}: malformed ({})", line, reason),
            JudgmentIssue::UnknownQuery { line, qid } => println!("  line {}: unknown qid {}", line, qid),
            JudgmentIssue::UnknownDocument { line, doc_id } => println!("  line {}: unknown doc_id {}", line, doc_id),
        }
    }
}

fn checkpoint_path(output_dir: &Path, mode: EvaluationMode, k: usize) -> PathBuf {
    output_dir.join(format!("checkpoint_{}_k{}.json", mode.as_str(), k))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load configuration
    let config = Config::load_from(&cli.config)?;

    // 3. Initialize logging (stderr only; stdout carries results)
    logging::init_logging(&config);

    match cli.command {
        Commands::Index => {
            let documents = dataset::load_documents(&config.paths.corpus)?;
            tracing::info!(documents = documents.len(), path = %config.paths.corpus.display(), "Corpus loaded");
            let index = LexicalIndex::build_with_params(documents, config.retrieval.bm25_params())?;
            let path = index.save(&config.paths.index_dir)?;
            println!("Indexed {} documents -> {}", index.len(), path.display());
        }

        Commands::Search { text, k } => {
            let index = load_index(&config)?;
            for (rank, hit) in index.search(&text, k).iter().enumerate() {
                println!("{:>3}. {:<20} {:>8.4}  {}", rank + 1, hit.doc_id, hit.score, hit.title);
            }
        }

        Commands::Expand { text } => {
            let (generator, filter) = create_expansion_stages(&config).await?;
            let candidates = generator.generate(&text, config.expansion.pool_sizes()).await;
            let outcome = filter.filter(&text, &candidates, &config.filter_thresholds()).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::Evaluate { k, use_expansion, resume, per_query } => {
            let inputs = EvaluationInputs::load(&config.paths)?;
            let data_report = &inputs.data_report;
            if !data_report.is_clean() {
                tracing::warn!(
                    skipped = data_report.skipped(),
                    malformed = data_report.malformed_count(),
                    unknown_queries = data_report.unknown_query_count(),
                    unknown_documents = data_report.unknown_document_count(),
                    "Judgment lines skipped, run `lexfuse check-qrels` for details"
                );
            }

            let mode = if use_expansion { EvaluationMode::Expansion } else { EvaluationMode::Baseline };
            let mut evaluator = inputs
                .evaluator()
                .with_checkpoint(checkpoint_path(&config.paths.output_dir, mode, k), resume)
                .with_progress(true);

            let result = if use_expansion {
                let (generator, filter) = create_expansion_stages(&config).await?;
                evaluator = evaluator.with_expansion(generator, filter, config.expansion_settings());
                evaluator.evaluate_with_expansion(k).await?
            } else {
                evaluator.evaluate_baseline(k).await?
            };

            report::print_report(&result, per_query);
            std::fs::create_dir_all(&config.paths.output_dir)?;
            let path = report::save_report(&result, &config.paths.output_dir)?;
            println!();
            println!("Report saved to {}", path.display());
        }

        Commands::Compare { reports } => {
            let loaded = reports
                .iter()
                .map(|p| report::load_report(p))
                .collect::<Result<Vec<_>>>()?;
            report::print_comparison(&loaded);
        }

        Commands::CheckQrels => {
            let documents = dataset::load_documents(&config.paths.corpus)?;
            let doc_ids: HashSet<&str> = documents.iter().map(|d| d.doc_id.as_str()).collect();
            let queries = dataset::load_queries(&config.paths.queries)?;
            let (_, data_report) =
                dataset::load_qrels(&config.paths.qrels, &queries, |id| doc_ids.contains(id))?;
            print_data_report(&data_report);
        }

        Commands::Pool { top_k, output } => {
            let index = load_index(&config)?;
            let queries = dataset::load_queries(&config.paths.queries)?;
            let pool = build_judgment_pool(&index, &queries, top_k.unwrap_or(config.labeling.pool_top_k));
            dataset::write_jsonl(&output, &pool)?;
            println!("Wrote {} judgment placeholders -> {}", pool.len(), output.display());
        }

        Commands::Label { template, output } => {
            let index = load_index(&config)?;
            let queries = dataset::load_queries(&config.paths.queries)?;
            let entries: Vec<Judgment> = dataset::read_jsonl(&template)?;
            let labeler = RelevanceLabeler::new(create_generation_provider(&config, &config.labeling.model)?)
                .with_retry(config.oracle.retry_policy())
                .with_max_content_chars(config.labeling.max_content_chars);

            let outcome = labeler.label_pool(&entries, &queries, &index).await;
            let output = output.unwrap_or_else(|| config.paths.qrels.clone());
            dataset::write_jsonl(&output, &outcome.judgments)?;
            println!(
                "Labeled {} pairs ({} skipped, {} defaulted to 0) -> {}",
                outcome.judgments.len(),
                outcome.skipped,
                outcome.defaulted,
                output.display()
            );
        }
    }

    Ok(())
}
