//! Per-provider adapters between abstract pipeline stages and concrete
//! chat requests.
//!
//! Each provider declares its model identifiers, per-stage sampling
//! parameters and capability set, and normalizes replies into one shape
//! consumed uniformly by all stages. Stage code never branches on the
//! provider name.

use std::str::FromStr;
use std::sync::Arc;

use crate::gateway::{Attribution, ChatRequest, ChatResponse};
use crate::prompts;

// =============================================================================
// STAGES
// =============================================================================

/// The four pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Masking,
    QuestionGeneration,
    AnswerGeneration,
    Evaluation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Masking => "masking",
            Stage::QuestionGeneration => "question_generation",
            Stage::AnswerGeneration => "answer_generation",
            Stage::Evaluation => "evaluation",
        }
    }
}

/// Which part of a case a masking call covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskUnit {
    Title,
    Body,
    Decision,
}

impl MaskUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaskUnit::Title => "title",
            MaskUnit::Body => "body",
            MaskUnit::Decision => "decision",
        }
    }
}

/// Abstract request for one stage invocation.
#[derive(Debug, Clone, Copy)]
pub enum StageRequest<'a> {
    Mask {
        unit: MaskUnit,
        text: &'a str,
    },
    Questions {
        case_text: &'a str,
        num_questions: usize,
    },
    Answer {
        case_text: &'a str,
        question: &'a str,
    },
    Evaluate {
        question: &'a str,
        case_text: &'a str,
        judge_decision: &'a str,
        answer: &'a str,
        dimension_max: u8,
    },
}

impl StageRequest<'_> {
    pub fn stage(&self) -> Stage {
        match self {
            StageRequest::Mask { .. } => Stage::Masking,
            StageRequest::Questions { .. } => Stage::QuestionGeneration,
            StageRequest::Answer { .. } => Stage::AnswerGeneration,
            StageRequest::Evaluate { .. } => Stage::Evaluation,
        }
    }
}

/// Normalized stage result: the answer text plus an optional reasoning
/// trace for providers that emit one.
#[derive(Debug, Clone)]
pub struct StageReply {
    pub answer: String,
    pub reasoning: Option<String>,
}

/// Sampling parameters for one stage.
#[derive(Debug, Clone, Copy)]
pub struct StageParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

// =============================================================================
// PROVIDER KINDS
// =============================================================================

/// The supported chat-completion providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    DeepSeek,
    ChatGpt,
    Gemini,
    Claude,
    Qwen,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::DeepSeek,
        ProviderKind::ChatGpt,
        ProviderKind::Gemini,
        ProviderKind::Claude,
        ProviderKind::Qwen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::ChatGpt => "chatgpt",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Claude => "claude",
            ProviderKind::Qwen => "qwen",
        }
    }

    /// Environment variable holding the provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::DeepSeek => "DEEPSEEK_API_KEY",
            ProviderKind::ChatGpt => "OPENAI_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Claude => "ANTHROPIC_API_KEY",
            ProviderKind::Qwen => "QWEN_API_KEY",
        }
    }

    /// Default OpenAI-compatible base URL for the provider.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::DeepSeek => "https://api.deepseek.com/v1",
            ProviderKind::ChatGpt => "https://api.openai.com/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            ProviderKind::Claude => "https://api.anthropic.com/v1",
            ProviderKind::Qwen => "https://dashscope.aliyuncs.com/compatible-mode/v1",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deepseek" => Ok(ProviderKind::DeepSeek),
            "chatgpt" | "gpt4o" | "openai" => Ok(ProviderKind::ChatGpt),
            "gemini" => Ok(ProviderKind::Gemini),
            "claude" => Ok(ProviderKind::Claude),
            "qwen" => Ok(ProviderKind::Qwen),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

// =============================================================================
// ADAPTER TRAIT
// =============================================================================

/// Translation layer between abstract stage invocations and concrete
/// provider requests.
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model identifier for the given stage.
    fn model_for(&self, stage: Stage) -> &str;

    /// Whether this provider returns a reasoning trace alongside answers.
    /// Providers without one return an empty reasoning field, never an
    /// error.
    fn supports_reasoning_trace(&self) -> bool {
        false
    }

    /// Whether to request `response_format=json_object` for the
    /// Evaluation stage. Only reliably honored by the ChatGPT family.
    fn json_mode_for_evaluation(&self) -> bool {
        false
    }

    /// Per-stage sampling defaults, shared across providers unless
    /// overridden.
    fn stage_params(&self, stage: Stage) -> StageParams {
        match stage {
            Stage::Masking => StageParams {
                temperature: 0.3,
                max_tokens: 4_000,
            },
            Stage::QuestionGeneration => StageParams {
                temperature: 0.7,
                max_tokens: 2_000,
            },
            Stage::AnswerGeneration => StageParams {
                temperature: 0.3,
                max_tokens: 3_000,
            },
            Stage::Evaluation => StageParams {
                temperature: 0.2,
                max_tokens: 2_500,
            },
        }
    }

    /// Map an abstract stage request onto a concrete chat request.
    fn build_request(&self, request: &StageRequest<'_>, attribution: Attribution) -> ChatRequest {
        let stage = request.stage();
        let params = self.stage_params(stage);

        let instance = match *request {
            StageRequest::Mask { unit, text } => match unit {
                MaskUnit::Title => prompts::MASK_TITLE.render(&[("text", text)]),
                MaskUnit::Body | MaskUnit::Decision => prompts::MASK_BODY.render(&[("text", text)]),
            },
            StageRequest::Questions {
                case_text,
                num_questions,
            } => prompts::QUESTIONS.render(&[
                ("num_questions", num_questions.to_string().as_str()),
                ("case_text", case_text),
            ]),
            StageRequest::Answer {
                case_text,
                question,
            } => prompts::ANSWER.render(&[("case_text", case_text), ("question", question)]),
            StageRequest::Evaluate {
                question,
                case_text,
                judge_decision,
                answer,
                dimension_max,
            } => prompts::EVALUATE.render(&[
                ("question", question),
                ("case_text", case_text),
                ("judge_decision", judge_decision),
                ("answer", answer),
                ("dimension_max", dimension_max.to_string().as_str()),
            ]),
        };

        let mut chat = ChatRequest::new(self.model_for(stage), instance.to_messages(), attribution)
            .temperature(params.temperature)
            .max_tokens(params.max_tokens);
        if stage == Stage::Evaluation && self.json_mode_for_evaluation() {
            chat = chat.json();
        }
        chat
    }

    /// Normalize a raw response into `{answer, reasoning}`.
    fn parse_reply(&self, _stage: Stage, resp: &ChatResponse) -> StageReply {
        StageReply {
            answer: resp.content.trim().to_string(),
            reasoning: if self.supports_reasoning_trace() {
                resp.reasoning.as_ref().map(|r| r.trim().to_string())
            } else {
                None
            },
        }
    }
}

// =============================================================================
// PROVIDER IMPLEMENTATIONS
// =============================================================================

/// DeepSeek: the pipeline default. Uses the reasoner model for answer
/// generation, which emits a reasoning trace.
#[derive(Debug, Clone, Default)]
pub struct DeepSeekAdapter;

impl ProviderAdapter for DeepSeekAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DeepSeek
    }

    fn model_for(&self, stage: Stage) -> &str {
        match stage {
            Stage::AnswerGeneration => "deepseek-reasoner",
            _ => "deepseek-chat",
        }
    }

    fn supports_reasoning_trace(&self) -> bool {
        true
    }
}

/// ChatGPT family. The model is selectable (gpt-4o, gpt-4.1, o3, ...).
#[derive(Debug, Clone)]
pub struct ChatGptAdapter {
    model: String,
}

impl ChatGptAdapter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for ChatGptAdapter {
    fn default() -> Self {
        Self::new("gpt-4o")
    }
}

impl ProviderAdapter for ChatGptAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ChatGpt
    }

    fn model_for(&self, _stage: Stage) -> &str {
        &self.model
    }

    fn json_mode_for_evaluation(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeminiAdapter;

impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model_for(&self, _stage: Stage) -> &str {
        "gemini-2.5-flash"
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClaudeAdapter;

impl ProviderAdapter for ClaudeAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn model_for(&self, _stage: Stage) -> &str {
        "claude-opus-4-20250514"
    }
}

/// Qwen family. The model is selectable (qwen-turbo, qwen-plus, qwen-max).
#[derive(Debug, Clone)]
pub struct QwenAdapter {
    model: String,
}

impl QwenAdapter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for QwenAdapter {
    fn default() -> Self {
        Self::new("qwen-max")
    }
}

impl ProviderAdapter for QwenAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Qwen
    }

    fn model_for(&self, _stage: Stage) -> &str {
        &self.model
    }
}

/// Default adapter for a provider kind.
pub fn adapter_for(kind: ProviderKind) -> Arc<dyn ProviderAdapter> {
    match kind {
        ProviderKind::DeepSeek => Arc::new(DeepSeekAdapter),
        ProviderKind::ChatGpt => Arc::new(ChatGptAdapter::default()),
        ProviderKind::Gemini => Arc::new(GeminiAdapter),
        ProviderKind::Claude => Arc::new(ClaudeAdapter),
        ProviderKind::Qwen => Arc::new(QwenAdapter::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{FinishReason, TokenUsage};
    use std::time::Duration;

    fn response(content: &str, reasoning: Option<&str>) -> ChatResponse {
        ChatResponse {
            content: content.to_string(),
            reasoning: reasoning.map(|s| s.to_string()),
            finish_reason: FinishReason::Stop,
            usage: Some(TokenUsage::default()),
            latency: Duration::from_millis(1),
            truncated: false,
            content_filtered: false,
        }
    }

    #[test]
    fn deepseek_uses_reasoner_only_for_answers() {
        let adapter = DeepSeekAdapter;
        assert_eq!(adapter.model_for(Stage::AnswerGeneration), "deepseek-reasoner");
        assert_eq!(adapter.model_for(Stage::Masking), "deepseek-chat");
        assert_eq!(adapter.model_for(Stage::Evaluation), "deepseek-chat");
    }

    #[test]
    fn reasoning_trace_gated_by_capability() {
        let resp = response("answer", Some("chain of thought"));

        let reply = DeepSeekAdapter.parse_reply(Stage::AnswerGeneration, &resp);
        assert_eq!(reply.reasoning.as_deref(), Some("chain of thought"));

        let reply = GeminiAdapter.parse_reply(Stage::AnswerGeneration, &resp);
        assert!(reply.reasoning.is_none());
        assert_eq!(reply.answer, "answer");
    }

    #[test]
    fn only_chatgpt_requests_json_for_evaluation() {
        let req = StageRequest::Evaluate {
            question: "q",
            case_text: "c",
            judge_decision: "j",
            answer: "a",
            dimension_max: 4,
        };
        let chat = ChatGptAdapter::default().build_request(&req, Attribution::new("test"));
        assert!(chat.json_mode);

        let chat = DeepSeekAdapter.build_request(&req, Attribution::new("test"));
        assert!(!chat.json_mode);
    }

    #[test]
    fn build_request_applies_stage_params() {
        let req = StageRequest::Questions {
            case_text: "masked case",
            num_questions: 5,
        };
        let chat = DeepSeekAdapter.build_request(&req, Attribution::new("test"));
        assert!((chat.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(chat.max_tokens, 2_000);
        assert!(chat.messages.iter().any(|m| m.content.contains("masked case")));
    }

    #[test]
    fn provider_kind_round_trips_from_str() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
        assert_eq!("gpt4o".parse::<ProviderKind>().unwrap(), ProviderKind::ChatGpt);
        assert!("grok".parse::<ProviderKind>().is_err());
    }
}
