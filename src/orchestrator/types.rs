//! Data model for the case pipeline.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::provider::ProviderKind;
use crate::scoring::{Finding, ScoreBreakdown};

/// An extracted legal case, as handed over by the document collaborator.
/// Immutable once loaded; identified uniquely by `case_id`.
#[derive(Debug, Clone)]
pub struct CaseDocument {
    pub case_id: String,
    pub title: String,
    pub body: String,
    pub judge_decision: String,
}

/// A case after the Masking stage.
///
/// Model-generated, so not deterministic across runs. `degraded` marks a
/// fallback to the unmasked text after the masking provider returned
/// empty content.
#[derive(Debug, Clone)]
pub struct MaskedCase {
    pub case_id: String,
    pub title: String,
    pub body: String,
    pub decision: String,
    pub degraded: bool,
}

/// One generated question; `index` is 1-based and contiguous within a case.
#[derive(Debug, Clone)]
pub struct Question {
    pub case_id: String,
    pub index: usize,
    pub text: String,
}

/// The answer slot for one (case, question, provider) tuple.
///
/// Exactly one record exists per tuple per run. A failed Answer stage
/// leaves `answer` empty and `error` set rather than omitting the record.
#[derive(Debug, Clone)]
pub struct AnswerRecord {
    pub case_id: String,
    pub question_index: usize,
    pub provider: ProviderKind,
    pub answer: String,
    pub reasoning: Option<String>,
    pub truncated: bool,
    pub error: Option<String>,
}

impl AnswerRecord {
    /// Record for a question whose Answer stage failed.
    pub fn failed(
        case_id: impl Into<String>,
        question_index: usize,
        provider: ProviderKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            question_index,
            provider,
            answer: String::new(),
            reasoning: None,
            truncated: false,
            error: Some(error.into()),
        }
    }
}

/// The judged outcome for one answer. Immutable once written.
#[derive(Debug, Clone)]
pub struct EvaluationRecord {
    pub breakdown: ScoreBreakdown,
    pub findings: Vec<Finding>,
    pub rationale: String,
    /// Set when the judge's output could not be parsed; all scores are
    /// zero and must not be mistaken for a real verdict.
    pub parse_failed: bool,
}

/// One row of the per-case result: the question and whatever the fan-out
/// produced for it.
#[derive(Debug, Clone)]
pub struct QuestionRow {
    pub question: Question,
    pub answer: AnswerRecord,
    pub evaluation: Option<EvaluationRecord>,
    /// Error label for the row, when any stage of this question failed.
    pub error: Option<String>,
}

/// Terminal state of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    /// All questions answered and evaluated.
    Done,
    /// Some (possibly all) questions errored; rows exist for every slot.
    Degraded,
    /// A case-wide stage failed before any question rows could exist.
    Failed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Done => "done",
            CaseStatus::Degraded => "degraded",
            CaseStatus::Failed => "failed",
        }
    }
}

/// Result of running the full pipeline for one case.
#[derive(Debug, Clone)]
pub struct CaseResult {
    pub case_id: String,
    pub title: String,
    pub status: CaseStatus,
    /// Rows sorted by `question_index`, one per generated question.
    /// Empty when `status == Failed`.
    pub rows: Vec<QuestionRow>,
    /// Set when fewer questions than requested were generated.
    pub question_shortfall: Option<usize>,
    /// Set when masking fell back to the unmasked text.
    pub masking_degraded: bool,
    /// Failure description when `status == Failed`.
    pub failure: Option<String>,
}

impl CaseResult {
    pub fn failed(case_id: impl Into<String>, title: impl Into<String>, failure: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            title: title.into(),
            status: CaseStatus::Failed,
            rows: Vec::new(),
            question_shortfall: None,
            masking_degraded: false,
            failure: Some(failure.into()),
        }
    }
}

// =============================================================================
// DOCUMENT SOURCE
// =============================================================================

/// Error from the document collaborator.
#[derive(Debug, thiserror::Error)]
#[error("document source error: {0}")]
pub struct SourceError(pub String);

/// External collaborator handing us extracted cases.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch a case by id. `Ok(None)` means the case does not exist; the
    /// orchestrator records it as failed before Masking starts.
    async fn fetch(&self, case_id: &str) -> Result<Option<CaseDocument>, SourceError>;
}

/// In-memory source over a preloaded case map. The CLI fills one from a
/// JSON case file; tests construct it directly.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    cases: HashMap<String, CaseDocument>,
}

impl InMemorySource {
    pub fn new(cases: impl IntoIterator<Item = CaseDocument>) -> Self {
        Self {
            cases: cases
                .into_iter()
                .map(|c| (c.case_id.clone(), c))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn case_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cases.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl DocumentSource for InMemorySource {
    async fn fetch(&self, case_id: &str) -> Result<Option<CaseDocument>, SourceError> {
        Ok(self.cases.get(case_id).cloned())
    }
}
