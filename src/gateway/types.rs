//! Core types for the chat-completion gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Attribution for usage accounting and debugging.
///
/// Every request through the gateway carries attribution so usage records
/// can answer: which pipeline stage made this call, and for which batch job.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    /// Batch job this request is part of, if any.
    pub job_id: Option<Uuid>,
    /// Which code path made this call.
    /// Use a static string like "stages::mask" or "stages::evaluate".
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

// =============================================================================
// CHAT TYPES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Request for one chat completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Provider-side model identifier, e.g. "deepseek-chat".
    pub model: String,
    /// Messages in the conversation.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Whether to request JSON output (`response_format=json_object`).
    pub json_mode: bool,
    /// Attribution for usage accounting.
    pub attribution: Attribution,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>, attribution: Attribution) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.0,
            max_tokens: 2_000,
            json_mode: false,
            attribution,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            Some("stop") | None => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Unknown(other.to_string()),
        }
    }
}

/// Token counts reported by the provider, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Normalized response from a chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated content. Empty when the provider filtered the response.
    pub content: String,
    /// Reasoning trace, for providers that emit one alongside the answer.
    pub reasoning: Option<String>,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
    /// Token usage, when the provider reports it.
    pub usage: Option<TokenUsage>,
    /// Time taken for the request.
    pub latency: Duration,
    /// Set when the response was cut off by the token budget and the
    /// escalated resubmission was still cut off (or recovery was disabled).
    pub truncated: bool,
    /// Set when the provider's content filter suppressed the response.
    pub content_filtered: bool,
}

impl ChatResponse {
    /// Empty response used for usage records of failed calls.
    pub(crate) fn empty() -> Self {
        Self {
            content: String::new(),
            reasoning: None,
            finish_reason: FinishReason::Unknown("error".to_string()),
            usage: None,
            latency: Duration::from_millis(0),
            truncated: false,
            content_filtered: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_from_wire_strings() {
        assert_eq!(
            FinishReason::from(Some("stop".to_string())),
            FinishReason::Stop
        );
        assert_eq!(
            FinishReason::from(Some("length".to_string())),
            FinishReason::Length
        );
        assert_eq!(
            FinishReason::from(Some("content_filter".to_string())),
            FinishReason::ContentFilter
        );
        assert_eq!(FinishReason::from(None), FinishReason::Stop);
        assert!(matches!(
            FinishReason::from(Some("tool_calls".to_string())),
            FinishReason::Unknown(_)
        ));
    }

    #[test]
    fn chat_request_builder_defaults() {
        let req = ChatRequest::new(
            "deepseek-chat",
            vec![Message::user("hi")],
            Attribution::new("test"),
        );
        assert!(!req.json_mode);
        assert_eq!(req.max_tokens, 2_000);

        let req = req.temperature(0.7).max_tokens(4_000).json();
        assert!(req.json_mode);
        assert_eq!(req.max_tokens, 4_000);
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
    }
}
