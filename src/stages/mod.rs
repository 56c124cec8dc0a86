//! The four pipeline stages: masking, question generation, answer
//! generation, evaluation.
//!
//! Each stage is a pure async function of (input, provider handle); all
//! shared state lives in the handle's rate-limited client. Stage failures
//! attach to the specific question or case, never to the batch.

pub mod answer;
pub mod evaluate;
pub mod mask;
pub mod questions;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::gateway::{
    Attribution, ChatEndpoint, ClientConfig, NoopUsageSink, ProviderError, RateLimitConfig,
    RateLimitedClient,
};
use crate::provider::{adapter_for, ProviderAdapter, ProviderKind, StageReply, StageRequest};

pub use answer::generate_answer;
pub use evaluate::{evaluate_answer, parse_judge_verdict, JudgeVerdict};
pub use mask::mask_case;
pub use questions::{generate_questions, parse_question_lines};

/// Error from one stage invocation.
#[derive(Debug, Error)]
pub enum StageError {
    /// Client-level failure after its retry budget: transport, rate
    /// limit, malformed wire response.
    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),

    /// The provider's content filter suppressed the response. Not
    /// retried: a refused prompt stays refused.
    #[error("response suppressed by provider content filter")]
    ContentFiltered,

    /// The provider returned empty content. Not retried automatically.
    #[error("provider returned empty content")]
    EmptyAnswer,

    /// The judge's output could not be parsed into scores and findings.
    /// The caller records a zeroed result; scores are never invented.
    #[error("judge output could not be parsed: {0}")]
    ScoringParse(String),

    /// Shutdown was requested before the task was dispatched.
    #[error("shutdown requested before dispatch")]
    Cancelled,
}

impl StageError {
    /// Short label for report rows and logs.
    pub fn label(&self) -> &'static str {
        match self {
            StageError::Provider(e) => e.code(),
            StageError::ContentFiltered => "content_filter",
            StageError::EmptyAnswer => "empty_answer",
            StageError::ScoringParse(_) => "scoring_parse",
            StageError::Cancelled => "cancelled",
        }
    }
}

/// One provider wired for use by the stages: its adapter plus the shared
/// rate-limited client. Cheap to clone via `Arc`.
pub struct ProviderHandle {
    adapter: Arc<dyn ProviderAdapter>,
    client: Arc<RateLimitedClient>,
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

impl ProviderHandle {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, client: Arc<RateLimitedClient>) -> Self {
        Self { adapter, client }
    }

    /// Wire a handle for `kind` from environment configuration
    /// (`<PROVIDER>_API_KEY`, default base URL, default limits).
    pub fn from_env(kind: ProviderKind) -> Result<Self, ProviderError> {
        let api_key = std::env::var(kind.api_key_env())
            .map_err(|_| ProviderError::config(format!("{} not set", kind.api_key_env())))?;
        let endpoint = ChatEndpoint::new(
            kind.as_str(),
            api_key,
            kind.default_base_url(),
            Duration::from_secs(180),
        )?;
        let client = RateLimitedClient::new(
            kind.as_str(),
            Arc::new(endpoint),
            RateLimitConfig::default(),
            Arc::new(NoopUsageSink),
            ClientConfig::default(),
        );
        Ok(Self::new(adapter_for(kind), Arc::new(client)))
    }

    pub fn kind(&self) -> ProviderKind {
        self.adapter.kind()
    }

    pub fn adapter(&self) -> &dyn ProviderAdapter {
        self.adapter.as_ref()
    }

    /// Build, send and normalize one stage call.
    ///
    /// Content-filtered and empty replies surface as stage errors here so
    /// every stage handles them uniformly.
    pub async fn invoke(
        &self,
        request: &StageRequest<'_>,
        attribution: Attribution,
    ) -> Result<StageOutput, StageError> {
        let chat = self.adapter.build_request(request, attribution);
        let resp = self.client.send(chat).await?;
        if resp.content_filtered {
            return Err(StageError::ContentFiltered);
        }
        let reply = self.adapter.parse_reply(request.stage(), &resp);
        if reply.answer.is_empty() {
            return Err(StageError::EmptyAnswer);
        }
        Ok(StageOutput {
            reply,
            truncated: resp.truncated,
        })
    }
}

/// Normalized output of one stage call.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub reply: StageReply,
    pub truncated: bool,
}

/// Providers wired for a run, keyed by kind.
///
/// All stages for a given provider share one handle, so one rate window
/// governs real outbound throughput regardless of pool sizes.
#[derive(Default)]
pub struct ProviderRegistry {
    handles: HashMap<ProviderKind, Arc<ProviderHandle>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ProviderHandle) -> &mut Self {
        self.handles.insert(handle.kind(), Arc::new(handle));
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<ProviderHandle>, ProviderError> {
        self.handles
            .get(&kind)
            .cloned()
            .ok_or_else(|| ProviderError::config(format!("provider {kind} not registered")))
    }
}
