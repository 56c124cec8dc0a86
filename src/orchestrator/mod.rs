//! Per-case orchestration of the four-stage pipeline.
//!
//! State machine per case:
//! `Pending → Masking → QuestionGen → AnsweringAndScoring → Aggregating →
//! Done | Degraded | Failed`.
//!
//! Masking and question generation are case-wide: their failure fails the
//! whole case with zero question rows. Stages 3-4 fan out per question on
//! a bounded pool; a question's failure never cancels its siblings, and
//! every generated question yields exactly one row. Aggregation re-sorts
//! rows by question index, restoring submission order regardless of
//! completion order.

pub mod batch;
pub mod types;

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::mask_cache::MaskCache;
use crate::scoring::ScoringEngine;
use crate::shutdown::{PoolHandle, ShutdownSignal};
use crate::stages::{
    evaluate::parse_failure_record, evaluate_answer, generate_answer, generate_questions,
    mask_case, ProviderHandle, StageError,
};

use types::{
    AnswerRecord, CaseDocument, CaseResult, CaseStatus, MaskedCase, Question, QuestionRow,
};

pub use batch::{BatchDriver, BatchHandle, BatchOptions, BatchStatus, ProgressSnapshot};

/// Per-case orchestration settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Questions to generate per case (N).
    pub num_questions: usize,
    /// Bound of the question-level worker pool.
    pub max_question_workers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            num_questions: 5,
            max_question_workers: 5,
        }
    }
}

/// Drives the four stages for one case and reassembles ordered results.
pub struct CaseOrchestrator {
    /// Provider for the case-wide stages and the judge (masking,
    /// question generation, evaluation).
    pipeline: Arc<ProviderHandle>,
    /// Provider under evaluation (answer generation).
    answerer: Arc<ProviderHandle>,
    engine: Arc<ScoringEngine>,
    config: OrchestratorConfig,
    signal: ShutdownSignal,
    mask_cache: Option<Arc<dyn MaskCache>>,
    question_pool: Option<PoolHandle>,
    job_id: Option<Uuid>,
}

impl CaseOrchestrator {
    pub fn new(
        pipeline: Arc<ProviderHandle>,
        answerer: Arc<ProviderHandle>,
        engine: Arc<ScoringEngine>,
        config: OrchestratorConfig,
        signal: ShutdownSignal,
    ) -> Self {
        Self {
            pipeline,
            answerer,
            engine,
            config,
            signal,
            mask_cache: None,
            question_pool: None,
            job_id: None,
        }
    }

    pub fn with_mask_cache(mut self, cache: Arc<dyn MaskCache>) -> Self {
        self.mask_cache = Some(cache);
        self
    }

    pub fn with_question_pool(mut self, pool: PoolHandle) -> Self {
        self.question_pool = Some(pool);
        self
    }

    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Run the full pipeline for one case.
    pub async fn run_case(&self, doc: CaseDocument) -> CaseResult {
        let case_id = doc.case_id.clone();
        let title = doc.title.clone();

        // Stage 1/4: masking.
        debug!(case_id = %case_id, "masking");
        let cache = self.mask_cache.as_deref();
        let (masked, masking_degraded) =
            match mask_case(&self.pipeline, cache, &doc, self.job_id).await {
                Ok(masked) => (masked, false),
                Err(StageError::EmptyAnswer) => {
                    // The provider refused to produce masked text; an
                    // unmasked-but-flagged case beats aborting it.
                    warn!(case_id = %case_id, "masking returned empty, using unmasked fallback");
                    (
                        MaskedCase {
                            case_id: case_id.clone(),
                            title: doc.title.clone(),
                            body: doc.body.clone(),
                            decision: doc.judge_decision.clone(),
                            degraded: true,
                        },
                        true,
                    )
                }
                Err(e) => {
                    warn!(case_id = %case_id, error = %e, "masking failed, case aborted");
                    return CaseResult::failed(case_id, title, format!("masking: {}", e.label()));
                }
            };

        // Stage 2/4: question generation.
        debug!(case_id = %case_id, "generating questions");
        let (questions, shortfall) = match generate_questions(
            &self.pipeline,
            &masked,
            self.config.num_questions,
            self.job_id,
        )
        .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(case_id = %case_id, error = %e, "question generation failed, case aborted");
                return CaseResult::failed(
                    case_id,
                    title,
                    format!("question_generation: {}", e.label()),
                );
            }
        };

        // Stages 3-4: per-question fan-out, collected in completion order.
        debug!(case_id = %case_id, questions = questions.len(), "answering and scoring");
        let mut rows: Vec<QuestionRow> = stream::iter(questions)
            .map(|question| {
                let masked = &masked;
                async move { self.run_question(masked, question).await }
            })
            .buffer_unordered(self.config.max_question_workers.max(1))
            .collect()
            .await;

        // Aggregation: restore submission order.
        rows.sort_by_key(|row| row.question.index);

        let errored = rows.iter().filter(|r| r.error.is_some()).count();
        let status = if errored == 0 {
            CaseStatus::Done
        } else {
            CaseStatus::Degraded
        };
        debug!(case_id = %case_id, status = status.as_str(), errored, "case finished");

        CaseResult {
            case_id,
            title,
            status,
            rows,
            question_shortfall: shortfall,
            masking_degraded,
            failure: None,
        }
    }

    /// Answer and evaluate one question. Exactly one task exists per
    /// (case_id, question_index, provider) tuple, so at most one answer
    /// call is ever in flight for it.
    async fn run_question(&self, masked: &MaskedCase, question: Question) -> QuestionRow {
        if self.signal.is_triggered() {
            let answer = AnswerRecord::failed(
                &question.case_id,
                question.index,
                self.answerer.kind(),
                StageError::Cancelled.label(),
            );
            return QuestionRow {
                question,
                answer,
                evaluation: None,
                error: Some(StageError::Cancelled.label().to_string()),
            };
        }

        let _guard = self.question_pool.as_ref().map(|p| p.task_started());

        let answer = match generate_answer(&self.answerer, masked, &question, self.job_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    case_id = %question.case_id,
                    question_index = question.index,
                    error = %e,
                    "answer generation failed"
                );
                let answer = AnswerRecord::failed(
                    &question.case_id,
                    question.index,
                    self.answerer.kind(),
                    e.label(),
                );
                return QuestionRow {
                    question,
                    answer,
                    evaluation: None,
                    error: Some(e.label().to_string()),
                };
            }
        };

        match evaluate_answer(
            &self.pipeline,
            &self.engine,
            &answer,
            masked,
            &question,
            self.job_id,
        )
        .await
        {
            Ok(evaluation) => QuestionRow {
                question,
                answer,
                evaluation: Some(evaluation),
                error: None,
            },
            Err(StageError::ScoringParse(msg)) => {
                warn!(
                    case_id = %question.case_id,
                    question_index = question.index,
                    error = %msg,
                    "judge output unparseable, recording zeroed result"
                );
                QuestionRow {
                    question,
                    answer,
                    evaluation: Some(parse_failure_record(&self.engine)),
                    error: Some("scoring_parse".to_string()),
                }
            }
            Err(e) => {
                warn!(
                    case_id = %question.case_id,
                    question_index = question.index,
                    error = %e,
                    "evaluation failed"
                );
                QuestionRow {
                    question,
                    answer,
                    evaluation: None,
                    error: Some(e.label().to_string()),
                }
            }
        }
    }
}
