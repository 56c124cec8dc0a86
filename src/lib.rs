#![forbid(unsafe_code)]

//! # verdict-harness
//!
//! Concurrent multi-stage evaluation pipeline for legal-case reasoning.
//!
//! For each case the pipeline masks sensitive entities, generates
//! contested legal questions, asks a candidate model to answer them, and
//! scores each answer against the authoritative judge decision with an
//! LLM-as-judge rubric. It runs many cases and questions concurrently
//! against rate-limited, unreliable chat-completion endpoints while
//! guaranteeing that no question slot is ever silently dropped, no
//! duplicate answer is produced, and the exported report keeps
//! deterministic row ordering despite out-of-order completion.

pub mod gateway;
pub mod mask_cache;
pub mod orchestrator;
pub mod prompts;
pub mod provider;
pub mod report;
pub mod scoring;
pub mod shutdown;
pub mod stages;

pub use gateway::{
    ChatEndpoint, ClientConfig, ProviderError, RateLimitConfig, RateLimitWindow, RateLimitedClient,
};
pub use mask_cache::{MaskCache, MaskCacheKey, MemoryMaskCache};
pub use orchestrator::types::{
    AnswerRecord, CaseDocument, CaseResult, CaseStatus, DocumentSource, EvaluationRecord,
    InMemorySource, MaskedCase, Question, QuestionRow,
};
pub use orchestrator::{
    BatchDriver, BatchHandle, BatchOptions, BatchStatus, CaseOrchestrator, OrchestratorConfig,
    ProgressSnapshot,
};
pub use provider::{adapter_for, ProviderAdapter, ProviderKind, Stage};
pub use report::{rows_from_results, JsonlReportSink, ReportRow, ReportSink, ReportWorker};
pub use scoring::{
    Finding, GradeTable, PenaltyRule, PenaltyTable, ScoreBreakdown, ScoringConfig, ScoringEngine,
    Severity, DIMENSIONS,
};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use stages::{ProviderHandle, ProviderRegistry, StageError};
