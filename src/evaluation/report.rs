/// Evaluation reporting: console summaries, JSON persistence, run comparison.

use std::path::{Path, PathBuf};

use super::EvaluationResult;

/// Label used for a run in comparison tables, e.g. `expansion@10`.
pub fn run_label(result: &EvaluationResult) -> String {
    format!("{}@{}", result.mode.as_str(), result.k)
}

/// Default file name for a saved report.
pub fn report_file_name(result: &EvaluationResult) -> String {
    format!(
        "{}_k{}_{}.json",
        result.mode.as_str(),
        result.k,
        result.timestamp.format("%Y%m%dT%H%M%SZ")
    )
}

/// Print a formatted report to stdout.
pub fn print_report(result: &EvaluationResult, per_query: bool) {
    println!("=== Evaluation Report: {} ===", run_label(result));
    println!("Date: {}", result.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Queries: {}", result.aggregate.num_queries);
    println!("Precision@{}: {:.4}", result.k, result.aggregate.precision_at_k);
    println!("Recall@{}:    {:.4}", result.k, result.aggregate.recall_at_k);
    println!("nDCG@{}:      {:.4}", result.k, result.aggregate.ndcg_at_k);
    println!();
    println!("Skipped judgments: {}", result.skipped_judgments);
    if !result.queries_without_judgments.is_empty() {
        println!(
            "Queries without judgments ({}): {}",
            result.queries_without_judgments.len(),
            result.queries_without_judgments.join(", ")
        );
    }

    if !result.expansions.is_empty() {
        let kept: usize = result
            .expansions
            .values()
            .map(|t| t.kept.values().map(Vec::len).sum::<usize>())
            .sum();
        let generated: usize = result.expansions.values().map(|t| t.generated).sum();
        println!(
            "Expansions kept: {}/{} ({:.2} per query)",
            kept,
            generated,
            kept as f64 / result.expansions.len() as f64
        );
    }

    if per_query {
        println!();
        println!("{:<16}| {:>9} | {:>9} | {:>9}", "qid", "P", "R", "nDCG");
        println!("{:-<16}|-{:-<9}-|-{:-<9}-|-{:-<9}", "", "", "", "");
        for (qid, m) in &result.per_query {
            println!(
                "{:<16}| {:>9.4} | {:>9.4} | {:>9.4}",
                qid, m.precision_at_k, m.recall_at_k, m.ndcg_at_k
            );
        }
    }
}

/// Metric rows for a comparison table: (name, value per report).
pub fn comparison_rows(reports: &[EvaluationResult]) -> Vec<(&'static str, Vec<f64>)> {
    vec![
        ("Precision", reports.iter().map(|r| r.aggregate.precision_at_k).collect()),
        ("Recall", reports.iter().map(|r| r.aggregate.recall_at_k).collect()),
        ("nDCG", reports.iter().map(|r| r.aggregate.ndcg_at_k).collect()),
    ]
}

/// Print a side-by-side comparison of multiple reports.
///
/// With exactly two reports a delta column (second minus first) is added.
pub fn print_comparison(reports: &[EvaluationResult]) {
    if reports.is_empty() {
        return;
    }

    let col_width = 14usize;
    let label_width = 12usize;
    let with_delta = reports.len() == 2;

    println!("=== Run Comparison ===");
    println!();

    let mut headers: Vec<String> = reports
        .iter()
        .map(|r| format!("{:>col_width$}", run_label(r), col_width = col_width))
        .collect();
    if with_delta {
        headers.push(format!("{:>col_width$}", "delta", col_width = col_width));
    }
    println!("{:<label_width$}| {}", "Metric", headers.join(" | "));

    let sep_cols: Vec<String> = (0..headers.len())
        .map(|_| format!("{:-<col_width$}", "", col_width = col_width))
        .collect();
    println!("{:-<label_width$}|-{}", "", sep_cols.join("-|-"));

    for (name, values) in comparison_rows(reports) {
        let mut cells: Vec<String> = values
            .iter()
            .map(|v| format!("{:>col_width$.4}", v, col_width = col_width))
            .collect();
        if with_delta {
            cells.push(format!("{:>+col_width$.4}", values[1] - values[0], col_width = col_width));
        }
        println!("{:<label_width$}| {}", name, cells.join(" | "));
    }

    let mismatched_k = reports.windows(2).any(|w| w[0].k != w[1].k);
    if mismatched_k {
        println!();
        println!("Note: runs were evaluated at different k values.");
    }
}

/// Save report as JSON. `path` may be a directory, in which case a timestamped
/// file name is used. Returns the written path.
pub fn save_report(result: &EvaluationResult, path: &Path) -> Result<PathBuf, anyhow::Error> {
    let target = if path.is_dir() {
        path.join(report_file_name(result))
    } else {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        path.to_path_buf()
    };
    let json = serde_json::to_string_pretty(result)?;
    std::fs::write(&target, json)?;
    Ok(target)
}

/// Load a previously saved report from JSON.
pub fn load_report(path: &Path) -> Result<EvaluationResult, anyhow::Error> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
