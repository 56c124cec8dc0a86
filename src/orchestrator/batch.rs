//! Batch driver: case-level worker pool, progress polling, shutdown
//! integration.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::mask_cache::MaskCache;
use crate::scoring::ScoringEngine;
use crate::shutdown::ShutdownCoordinator;
use crate::stages::{ProviderHandle, StageError};

use super::types::{CaseResult, CaseStatus, DocumentSource};
use super::{CaseOrchestrator, OrchestratorConfig};

/// Pool bounds and question count for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub num_questions: usize,
    pub max_case_workers: usize,
    pub max_question_workers: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            num_questions: 5,
            max_case_workers: 4,
            max_question_workers: 5,
        }
    }
}

/// Driver state of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Running,
    Completed,
    /// The driver was interrupted; per-question failures alone never
    /// fail a batch.
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

/// Point-in-time progress of a batch run.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub status: BatchStatus,
    pub eta_seconds: Option<u64>,
}

struct ProgressState {
    total: usize,
    completed: usize,
    succeeded: usize,
    failed: usize,
    status: BatchStatus,
    started: Instant,
}

/// Handle to an in-flight batch, pollable for progress.
pub struct BatchHandle {
    id: Uuid,
    state: Arc<Mutex<ProgressState>>,
    join: JoinHandle<Vec<CaseResult>>,
}

impl BatchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current progress. ETA extrapolates from the mean completed-case
    /// duration and is absent until the first case completes.
    pub fn poll(&self) -> ProgressSnapshot {
        let state = self.state.lock().expect("progress state poisoned");
        let eta_seconds = if state.status == BatchStatus::Running && state.completed > 0 {
            let elapsed = state.started.elapsed().as_secs_f64();
            let per_case = elapsed / state.completed as f64;
            let remaining = (state.total - state.completed) as f64;
            Some((per_case * remaining).round() as u64)
        } else {
            None
        };
        ProgressSnapshot {
            total: state.total,
            completed: state.completed,
            succeeded: state.succeeded,
            failed: state.failed,
            status: state.status,
            eta_seconds,
        }
    }

    /// Wait for the run to finish and take its results, ordered by the
    /// input case-id order.
    pub async fn join(self) -> Vec<CaseResult> {
        match self.join.await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "batch driver task failed");
                let mut state = self.state.lock().expect("progress state poisoned");
                state.status = BatchStatus::Failed;
                Vec::new()
            }
        }
    }
}

/// Wires the shared pieces of a run and exposes the core entry points.
pub struct BatchDriver {
    source: Arc<dyn DocumentSource>,
    pipeline: Arc<ProviderHandle>,
    answerer: Arc<ProviderHandle>,
    engine: Arc<ScoringEngine>,
    coordinator: Arc<ShutdownCoordinator>,
    mask_cache: Option<Arc<dyn MaskCache>>,
}

impl BatchDriver {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        pipeline: Arc<ProviderHandle>,
        answerer: Arc<ProviderHandle>,
        engine: Arc<ScoringEngine>,
        coordinator: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            source,
            pipeline,
            answerer,
            engine,
            coordinator,
            mask_cache: None,
        }
    }

    pub fn with_mask_cache(mut self, cache: Arc<dyn MaskCache>) -> Self {
        self.mask_cache = Some(cache);
        self
    }

    fn orchestrator(&self, options: &BatchOptions, job_id: Option<Uuid>) -> CaseOrchestrator {
        let config = OrchestratorConfig {
            num_questions: options.num_questions,
            max_question_workers: options.max_question_workers,
        };
        let mut orchestrator = CaseOrchestrator::new(
            self.pipeline.clone(),
            self.answerer.clone(),
            self.engine.clone(),
            config,
            self.coordinator.signal(),
        );
        if let Some(cache) = &self.mask_cache {
            orchestrator = orchestrator.with_mask_cache(cache.clone());
        }
        if let Some(job_id) = job_id {
            orchestrator = orchestrator.with_job(job_id);
        }
        orchestrator
    }

    async fn fetch_and_run(&self, orchestrator: &CaseOrchestrator, case_id: &str) -> CaseResult {
        match self.source.fetch(case_id).await {
            Ok(Some(doc)) => orchestrator.run_case(doc).await,
            Ok(None) => {
                warn!(case_id = %case_id, "case not found in document source");
                CaseResult::failed(case_id, "", "case_not_found")
            }
            Err(e) => {
                warn!(case_id = %case_id, error = %e, "document source failed");
                CaseResult::failed(case_id, "", "source_error")
            }
        }
    }

    /// Synchronous facade over the full 4-stage pipeline for one case.
    pub async fn run_case(&self, case_id: &str, options: &BatchOptions) -> CaseResult {
        let orchestrator = self.orchestrator(options, None);
        self.fetch_and_run(&orchestrator, case_id).await
    }

    /// Run a batch asynchronously; returns a handle pollable for
    /// progress.
    ///
    /// The case-level pool is bounded by `max_case_workers`; each case
    /// internally fans out a question-level pool. Both levels share the
    /// same per-provider clients, so real outbound throughput is capped
    /// by the rate windows, independent of thread counts.
    pub fn run_batch(self: Arc<Self>, case_ids: Vec<String>, options: BatchOptions) -> BatchHandle {
        let id = Uuid::new_v4();
        let total = case_ids.len();
        let state = Arc::new(Mutex::new(ProgressState {
            total,
            completed: 0,
            succeeded: 0,
            failed: 0,
            status: BatchStatus::Running,
            started: Instant::now(),
        }));

        let driver = self;
        let progress = Arc::clone(&state);

        let join = tokio::spawn(async move {
            info!(job_id = %id, cases = total, "batch started");
            let signal = driver.coordinator.signal();
            let case_pool = driver.coordinator.register_pool(format!("cases:{id}"));
            let question_pool = driver.coordinator.register_pool(format!("questions:{id}"));
            let options = Arc::new(options);

            let mut indexed: Vec<(usize, CaseResult)> =
                stream::iter(case_ids.into_iter().enumerate())
                    .map(|(index, case_id)| {
                        let driver = driver.clone();
                        let signal = signal.clone();
                        let case_pool = case_pool.clone();
                        let question_pool = question_pool.clone();
                        let progress = progress.clone();
                        let options = options.clone();
                        async move {
                            // Shutdown stops new submissions; cases never
                            // dispatched are recorded, not dropped.
                            let result = if signal.is_triggered() {
                                CaseResult::failed(&case_id, "", StageError::Cancelled.label())
                            } else {
                                let _guard = case_pool.task_started();
                                let orchestrator = driver
                                    .orchestrator(&options, Some(id))
                                    .with_question_pool(question_pool);
                                driver.fetch_and_run(&orchestrator, &case_id).await
                            };

                            {
                                let mut state =
                                    progress.lock().expect("progress state poisoned");
                                state.completed += 1;
                                if result.status == CaseStatus::Failed {
                                    state.failed += 1;
                                } else {
                                    state.succeeded += 1;
                                }
                            }
                            (index, result)
                        }
                    })
                    .buffer_unordered(options.max_case_workers.max(1))
                    .collect()
                    .await;

            indexed.sort_by_key(|(index, _)| *index);
            let results: Vec<CaseResult> = indexed.into_iter().map(|(_, r)| r).collect();

            let final_status = if driver.coordinator.is_triggered() {
                BatchStatus::Failed
            } else {
                BatchStatus::Completed
            };
            progress.lock().expect("progress state poisoned").status = final_status;
            info!(job_id = %id, status = final_status.as_str(), "batch finished");

            results
        });

        BatchHandle { id, state, join }
    }
}
