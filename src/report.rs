//! Flat report rows and the JSONL report sink.
//!
//! The audit guarantee of the whole system lives here: one row per
//! (case, question) slot, deterministically ordered by
//! (case_id, question_index), with failures visible in an explicit error
//! column rather than as missing rows.

use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;

use crate::orchestrator::types::CaseResult;
use crate::scoring::{Severity, DIMENSIONS};

/// One exported row.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub case_id: String,
    pub case_title: String,
    pub question_index: usize,
    pub question: String,
    pub provider: String,
    pub answer: String,
    pub reasoning: String,
    pub statutory_basis: Option<f64>,
    pub subsumption_alignment: Option<f64>,
    pub value_balancing: Option<f64>,
    pub fact_coverage: Option<f64>,
    pub remedy_consistency: Option<f64>,
    pub raw_total: Option<f64>,
    pub penalized_total: Option<f64>,
    pub percentage: Option<f64>,
    pub grade: String,
    pub minor_findings: String,
    pub moderate_findings: String,
    pub major_findings: String,
    pub rationale: String,
    pub scoring_parse_failed: bool,
    pub answer_truncated: bool,
    pub error: String,
}

/// Flatten case results into export rows sorted by
/// (case_id, question_index). Failed cases contribute no rows (they had
/// no questions); degraded cases contribute one row per question slot.
pub fn rows_from_results(results: &[CaseResult]) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = Vec::new();

    for case in results {
        for row in &case.rows {
            let mut dims: [Option<f64>; 5] = [None; 5];
            let mut raw_total = None;
            let mut penalized_total = None;
            let mut percentage = None;
            let mut grade = String::new();
            let mut rationale = String::new();
            let mut parse_failed = false;
            let mut findings_by_tier = [String::new(), String::new(), String::new()];

            if let Some(evaluation) = &row.evaluation {
                for score in &evaluation.breakdown.dimension_scores {
                    if let Some(i) = DIMENSIONS.iter().position(|d| *d == score.dimension) {
                        dims[i] = Some(score.value);
                    }
                }
                raw_total = Some(evaluation.breakdown.raw_total);
                penalized_total = Some(evaluation.breakdown.penalized_total);
                percentage = Some(evaluation.breakdown.percentage);
                grade = evaluation.breakdown.grade.clone();
                rationale = evaluation.rationale.clone();
                parse_failed = evaluation.parse_failed;

                for finding in &evaluation.findings {
                    let slot = match finding.severity {
                        Severity::Minor => &mut findings_by_tier[0],
                        Severity::Moderate => &mut findings_by_tier[1],
                        Severity::Major => &mut findings_by_tier[2],
                    };
                    if !slot.is_empty() {
                        slot.push_str("; ");
                    }
                    slot.push_str(&finding.description);
                }
            }

            let [minor_findings, moderate_findings, major_findings] = findings_by_tier;

            rows.push(ReportRow {
                case_id: case.case_id.clone(),
                case_title: case.title.clone(),
                question_index: row.question.index,
                question: row.question.text.clone(),
                provider: row.answer.provider.as_str().to_string(),
                answer: row.answer.answer.clone(),
                reasoning: row.answer.reasoning.clone().unwrap_or_default(),
                statutory_basis: dims[0],
                subsumption_alignment: dims[1],
                value_balancing: dims[2],
                fact_coverage: dims[3],
                remedy_consistency: dims[4],
                raw_total,
                penalized_total,
                percentage,
                grade,
                minor_findings,
                moderate_findings,
                major_findings,
                rationale,
                scoring_parse_failed: parse_failed,
                answer_truncated: row.answer.truncated,
                error: row.error.clone().unwrap_or_default(),
            });
        }
    }

    rows.sort_by(|a, b| {
        (a.case_id.as_str(), a.question_index).cmp(&(b.case_id.as_str(), b.question_index))
    });
    rows
}

// =============================================================================
// REPORT SINK
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("report channel closed")]
    Closed,
    #[error("report worker failed: {0}")]
    Join(String),
}

/// Destination for export rows. The core does not dictate the artifact's
/// format; sinks render rows however they like.
pub trait ReportSink: Send + Sync {
    fn record(&self, row: ReportRow) -> Result<(), ReportError>;
}

/// JSONL sink writing rows through a dedicated writer thread.
#[derive(Clone)]
pub struct JsonlReportSink {
    sender: mpsc::Sender<ReportRow>,
}

pub struct ReportWorker {
    handle: Option<std::thread::JoinHandle<Result<(), ReportError>>>,
}

impl ReportWorker {
    pub fn join(mut self) -> Result<(), ReportError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(ReportError::Join("report worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlReportSink {
    pub fn create(path: impl AsRef<Path>) -> Result<(Self, ReportWorker), ReportError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<ReportRow>();
        let handle = std::thread::spawn(move || write_rows_loop(file, receiver));
        Ok((
            Self { sender },
            ReportWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl ReportSink for JsonlReportSink {
    fn record(&self, row: ReportRow) -> Result<(), ReportError> {
        self.sender.send(row).map_err(|_| ReportError::Closed)
    }
}

fn write_rows_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<ReportRow>,
) -> Result<(), ReportError> {
    let mut writer = BufWriter::new(file);
    for row in receiver {
        let line = serde_json::to_string(&row).map_err(|e| ReportError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::types::{
        AnswerRecord, CaseResult, CaseStatus, Question, QuestionRow,
    };
    use crate::provider::ProviderKind;

    fn row(case_id: &str, index: usize) -> QuestionRow {
        QuestionRow {
            question: Question {
                case_id: case_id.to_string(),
                index,
                text: format!("question {index}"),
            },
            answer: AnswerRecord {
                case_id: case_id.to_string(),
                question_index: index,
                provider: ProviderKind::DeepSeek,
                answer: "answer".to_string(),
                reasoning: None,
                truncated: false,
                error: None,
            },
            evaluation: None,
            error: None,
        }
    }

    fn case(case_id: &str, indices: &[usize]) -> CaseResult {
        CaseResult {
            case_id: case_id.to_string(),
            title: "title".to_string(),
            status: CaseStatus::Done,
            rows: indices.iter().map(|i| row(case_id, *i)).collect(),
            question_shortfall: None,
            masking_degraded: false,
            failure: None,
        }
    }

    #[test]
    fn rows_sort_by_case_then_question() {
        let results = vec![case("case_b", &[2, 1]), case("case_a", &[3, 1, 2])];
        let rows = rows_from_results(&results);
        let order: Vec<(String, usize)> = rows
            .iter()
            .map(|r| (r.case_id.clone(), r.question_index))
            .collect();
        assert_eq!(
            order,
            vec![
                ("case_a".to_string(), 1),
                ("case_a".to_string(), 2),
                ("case_a".to_string(), 3),
                ("case_b".to_string(), 1),
                ("case_b".to_string(), 2),
            ]
        );
    }

    #[test]
    fn failed_cases_contribute_no_rows() {
        let results = vec![CaseResult::failed("case_x", "", "masking: transport_error")];
        assert!(rows_from_results(&results).is_empty());
    }

    #[test]
    fn error_rows_keep_empty_score_columns() {
        let mut degraded = case("case_a", &[1]);
        degraded.rows[0].error = Some("empty_answer".to_string());
        degraded.rows[0].answer.answer.clear();
        degraded.status = CaseStatus::Degraded;

        let rows = rows_from_results(&[degraded]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].error, "empty_answer");
        assert!(rows[0].answer.is_empty());
        assert!(rows[0].raw_total.is_none());
        assert!(rows[0].grade.is_empty());
    }

    #[test]
    fn jsonl_sink_writes_one_line_per_row() {
        let dir = std::env::temp_dir().join(format!("verdict-report-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rows.jsonl");

        let (sink, worker) = JsonlReportSink::create(&path).unwrap();
        for row in rows_from_results(&[case("case_a", &[1, 2])]) {
            sink.record(row).unwrap();
        }
        drop(sink);
        worker.join().unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 2);
        assert!(written.lines().all(|l| l.contains("\"case_id\":\"case_a\"")));
        std::fs::remove_dir_all(&dir).ok();
    }
}
