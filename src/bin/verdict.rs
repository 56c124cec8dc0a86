#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use verdict_harness::report::ReportSink;
use verdict_harness::{
    rows_from_results, BatchDriver, BatchOptions, CaseDocument, CaseResult, CaseStatus,
    InMemorySource, JsonlReportSink, MemoryMaskCache, PenaltyRule, ProviderHandle, ProviderKind,
    ProviderRegistry, ScoringConfig, ScoringEngine, ShutdownCoordinator,
};

#[derive(Parser)]
#[command(name = "verdict", version, about = "Legal-case LLM evaluation harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for a single case
    RunCase {
        /// JSON case file: {"case_id": {"title", "content", "judge_decision"}}
        #[arg(long)]
        cases: PathBuf,
        #[arg(long)]
        case_id: String,
        /// Provider answering the questions (deepseek, chatgpt, gemini, claude, qwen)
        #[arg(long, default_value = "deepseek")]
        provider: ProviderKind,
        #[arg(long, default_value_t = 5)]
        questions: usize,
        /// Output JSONL report
        #[arg(long)]
        out: PathBuf,
    },
    /// Run the pipeline over many cases with bounded concurrency
    RunBatch {
        #[arg(long)]
        cases: PathBuf,
        /// Case ids to process; all cases in the file when omitted
        #[arg(long, num_args = 1..)]
        case_ids: Option<Vec<String>>,
        #[arg(long, default_value = "deepseek")]
        provider: ProviderKind,
        #[arg(long, default_value_t = 5)]
        questions: usize,
        #[arg(long, default_value_t = 4)]
        case_workers: usize,
        #[arg(long, default_value_t = 5)]
        question_workers: usize,
        /// Compound same-tier penalties instead of the single-worst rule
        #[arg(long)]
        compound_penalties: bool,
        /// Memoize masking by content hash within this run
        #[arg(long)]
        cache_masking: bool,
        #[arg(long)]
        out: PathBuf,
    },
}

/// On-disk case entry, matching the document collaborator's export.
#[derive(Deserialize)]
struct CaseFileEntry {
    title: String,
    content: String,
    judge_decision: String,
}

fn load_cases(path: &PathBuf) -> Result<InMemorySource, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let entries: HashMap<String, CaseFileEntry> = serde_json::from_str(&raw)?;
    Ok(InMemorySource::new(entries.into_iter().map(
        |(case_id, entry)| CaseDocument {
            case_id,
            title: entry.title,
            body: entry.content,
            judge_decision: entry.judge_decision,
        },
    )))
}

/// The pipeline stages (masking, questions, judging) always run on
/// DeepSeek, matching the reference workflow; only answer generation
/// uses the selected provider.
fn build_driver(
    source: InMemorySource,
    provider: ProviderKind,
    coordinator: Arc<ShutdownCoordinator>,
    compound_penalties: bool,
    cache_masking: bool,
) -> Result<Arc<BatchDriver>, Box<dyn std::error::Error>> {
    let mut registry = ProviderRegistry::new();
    registry.insert(ProviderHandle::from_env(ProviderKind::DeepSeek)?);
    if provider != ProviderKind::DeepSeek {
        registry.insert(ProviderHandle::from_env(provider)?);
    }
    let pipeline = registry.get(ProviderKind::DeepSeek)?;
    let answerer = registry.get(provider)?;

    let engine = Arc::new(ScoringEngine::new(ScoringConfig {
        rule: if compound_penalties {
            PenaltyRule::Compound
        } else {
            PenaltyRule::WorstOnly
        },
        ..ScoringConfig::default()
    }));

    let mut driver = BatchDriver::new(
        Arc::new(source),
        pipeline,
        answerer,
        engine,
        coordinator,
    );
    if cache_masking {
        driver = driver.with_mask_cache(Arc::new(MemoryMaskCache::new()));
    }
    Ok(Arc::new(driver))
}

fn write_report(
    out: &PathBuf,
    results: &[CaseResult],
) -> Result<usize, Box<dyn std::error::Error>> {
    let rows = rows_from_results(results);
    let (sink, worker) = JsonlReportSink::create(out)?;
    let count = rows.len();
    for row in rows {
        sink.record(row)?;
    }
    drop(sink);
    worker.join()?;
    Ok(count)
}

fn print_summary(results: &[CaseResult]) {
    let done = results.iter().filter(|r| r.status == CaseStatus::Done).count();
    let degraded = results
        .iter()
        .filter(|r| r.status == CaseStatus::Degraded)
        .count();
    let failed = results
        .iter()
        .filter(|r| r.status == CaseStatus::Failed)
        .count();
    info!(done, degraded, failed, "cases");

    let scored: Vec<f64> = results
        .iter()
        .flat_map(|r| &r.rows)
        .filter_map(|row| row.evaluation.as_ref())
        .filter(|e| !e.parse_failed)
        .map(|e| e.breakdown.penalized_total)
        .collect();
    if !scored.is_empty() {
        let mean = scored.iter().sum::<f64>() / scored.len() as f64;
        let max = scored.iter().cloned().fold(f64::MIN, f64::max);
        let min = scored.iter().cloned().fold(f64::MAX, f64::min);
        info!(
            answers = scored.len(),
            mean = format!("{mean:.2}"),
            max = format!("{max:.2}"),
            min = format!("{min:.2}"),
            "penalized totals"
        );
    }

    let errored = results
        .iter()
        .flat_map(|r| &r.rows)
        .filter(|row| row.error.is_some())
        .count();
    if errored > 0 {
        info!(errored, "question slots carry an error");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let coordinator = Arc::new(ShutdownCoordinator::new());
    Arc::clone(&coordinator).install_signal_handler();

    match cli.command {
        Commands::RunCase {
            cases,
            case_id,
            provider,
            questions,
            out,
        } => {
            let source = load_cases(&cases)?;
            let driver = build_driver(source, provider, coordinator, false, false)?;
            let options = BatchOptions {
                num_questions: questions,
                ..BatchOptions::default()
            };
            let result = driver.run_case(&case_id, &options).await;
            print_summary(std::slice::from_ref(&result));
            let rows = write_report(&out, std::slice::from_ref(&result))?;
            info!(rows, out = %out.display(), "report written");
        }
        Commands::RunBatch {
            cases,
            case_ids,
            provider,
            questions,
            case_workers,
            question_workers,
            compound_penalties,
            cache_masking,
            out,
        } => {
            let source = load_cases(&cases)?;
            let ids = case_ids.unwrap_or_else(|| source.case_ids());
            if ids.is_empty() {
                return Err("no cases to process".into());
            }
            let driver = build_driver(
                source,
                provider,
                coordinator.clone(),
                compound_penalties,
                cache_masking,
            )?;
            let options = BatchOptions {
                num_questions: questions,
                max_case_workers: case_workers,
                max_question_workers: question_workers,
            };

            let handle = driver.run_batch(ids, options);
            loop {
                let progress = handle.poll();
                info!(
                    completed = progress.completed,
                    total = progress.total,
                    succeeded = progress.succeeded,
                    failed = progress.failed,
                    eta_seconds = progress.eta_seconds,
                    status = progress.status.as_str(),
                    "progress"
                );
                if progress.completed >= progress.total {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }

            let results = handle.join().await;
            print_summary(&results);
            let rows = write_report(&out, &results)?;
            info!(rows, out = %out.display(), "report written");

            coordinator.shutdown().await;
        }
    }

    Ok(())
}
