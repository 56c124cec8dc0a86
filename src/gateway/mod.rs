//! Rate-limited, retrying client for one chat-completion endpoint.

pub mod endpoint;
pub mod error;
pub mod limiter;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use endpoint::ChatApi;
use usage::{CallRecord, UsageSink};

pub use endpoint::ChatEndpoint;
pub use error::{ErrorContext, ProviderError, RateLimitSource};
pub use limiter::{RateLimitConfig, RateLimitWindow};
pub use types::*;
pub use usage::{CallStatus, NoopUsageSink, StderrUsageSink};

/// Retry and recovery policy for one client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Transport-retry budget (attempts, not retries).
    pub max_attempts: u32,
    /// Base delay for linearly increasing backoff: `base * attempt`.
    pub retry_base_delay: Duration,
    /// Whether a `finish_reason=length` response triggers one escalated
    /// resubmission with doubled `max_tokens`.
    pub recover_truncation: bool,
    /// Ceiling for the escalated `max_tokens`.
    pub max_tokens_ceiling: u32,
    /// How many provider 429s to honor (sleep and re-attempt) before the
    /// rate-limit error is surfaced. These waits never consume the
    /// transport-retry budget.
    pub max_rate_limit_waits: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            recover_truncation: true,
            max_tokens_ceiling: 16_000,
            max_rate_limit_waits: 5,
        }
    }
}

/// Client for one provider endpoint: owns the shared rate window, the
/// transport-retry loop and truncated-response recovery.
///
/// One instance exists per provider per process and is shared by every
/// worker task, so the [`RateLimitWindow`] governs real outbound
/// throughput independent of pool sizes. Only the limiter state is
/// synchronized; the HTTP calls themselves overlap freely.
pub struct RateLimitedClient {
    api: Arc<dyn ChatApi>,
    limiter: RateLimitWindow,
    usage_sink: Arc<dyn UsageSink>,
    config: ClientConfig,
    provider: &'static str,
}

impl RateLimitedClient {
    pub fn new(
        provider: &'static str,
        api: Arc<dyn ChatApi>,
        rate_config: RateLimitConfig,
        usage_sink: Arc<dyn UsageSink>,
        config: ClientConfig,
    ) -> Self {
        Self {
            api,
            limiter: RateLimitWindow::new(rate_config),
            usage_sink,
            config,
            provider,
        }
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    /// Send one request through the rate gate with retries.
    ///
    /// Returned responses may carry `truncated` or `content_filtered`
    /// metadata instead of an error: a second truncation is accepted
    /// as-is, and a filtered response is never retried (retrying a
    /// refused prompt is futile).
    pub async fn send(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut req = req;
        let mut escalated = false;
        let mut attempt: u32 = 0;
        let mut rate_limit_waits: u32 = 0;

        loop {
            self.limiter.acquire().await;

            match self.api.chat(&req).await {
                Ok(mut resp) => match resp.finish_reason {
                    FinishReason::Length if self.config.recover_truncation && !escalated => {
                        escalated = true;
                        let doubled = req.max_tokens.saturating_mul(2);
                        req.max_tokens = doubled.min(self.config.max_tokens_ceiling);
                        debug!(
                            provider = self.provider,
                            max_tokens = req.max_tokens,
                            "response truncated, resubmitting with raised token budget"
                        );
                    }
                    FinishReason::Length => {
                        resp.truncated = true;
                        warn!(
                            provider = self.provider,
                            max_tokens = req.max_tokens,
                            "response still truncated after escalation, accepting as-is"
                        );
                        self.record(&req, &resp, CallStatus::Success, None).await;
                        return Ok(resp);
                    }
                    FinishReason::ContentFilter => {
                        resp.content_filtered = true;
                        resp.content.clear();
                        self.record(&req, &resp, CallStatus::Success, Some("content_filter".into()))
                            .await;
                        return Ok(resp);
                    }
                    _ => {
                        self.record(&req, &resp, CallStatus::Success, None).await;
                        return Ok(resp);
                    }
                },
                Err(ProviderError::RateLimited { retry_after, .. })
                    if rate_limit_waits < self.config.max_rate_limit_waits =>
                {
                    rate_limit_waits += 1;
                    warn!(
                        provider = self.provider,
                        wait_secs = retry_after.as_secs(),
                        "provider rate limit hit, honoring retry-after hint"
                    );
                    sleep(retry_after).await;
                }
                Err(err) => {
                    self.record(&req, &ChatResponse::empty(), CallStatus::Error, Some(err.code().into()))
                        .await;

                    attempt += 1;
                    if !err.is_retryable() || attempt >= self.config.max_attempts {
                        return Err(err);
                    }

                    let delay = self.config.retry_base_delay * attempt;
                    warn!(
                        provider = self.provider,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %err,
                        "transport failure, backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn record(
        &self,
        req: &ChatRequest,
        resp: &ChatResponse,
        status: CallStatus,
        error_code: Option<String>,
    ) {
        let usage = resp.usage.unwrap_or_default();
        let record = CallRecord::new(self.provider, req.model.clone(), req.attribution.caller)
            .tokens(usage.input_tokens, usage.output_tokens)
            .job(req.attribution.job_id)
            .latency(resp.latency.as_millis() as u64);

        let record = match (status, error_code) {
            (CallStatus::Error, Some(code)) => record.error(code),
            (CallStatus::Success, Some(code)) => record.error(code),
            _ => record,
        };

        self.usage_sink.record(record).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedApi {
        responses: Mutex<VecDeque<Result<ChatResponse, ProviderError>>>,
        calls: AtomicUsize,
        seen_max_tokens: Mutex<Vec<u32>>,
    }

    impl ScriptedApi {
        fn new(responses: Vec<Result<ChatResponse, ProviderError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
                seen_max_tokens: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatApi for ScriptedApi {
        async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_max_tokens.lock().unwrap().push(req.max_tokens);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted")
        }
    }

    fn reply(content: &str, finish_reason: FinishReason) -> ChatResponse {
        ChatResponse {
            content: content.to_string(),
            reasoning: None,
            finish_reason,
            usage: Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 10,
            }),
            latency: Duration::from_millis(1),
            truncated: false,
            content_filtered: false,
        }
    }

    fn unlimited() -> RateLimitConfig {
        RateLimitConfig {
            max_rpm: 1_000_000,
            max_rps: 1_000_000,
            min_interval: Duration::ZERO,
        }
    }

    fn client(api: Arc<ScriptedApi>, config: ClientConfig) -> RateLimitedClient {
        RateLimitedClient::new(
            "deepseek",
            api,
            unlimited(),
            Arc::new(NoopUsageSink),
            config,
        )
    }

    fn request() -> ChatRequest {
        ChatRequest::new(
            "deepseek-chat",
            vec![Message::user("hi")],
            Attribution::new("test"),
        )
        .max_tokens(2_000)
    }

    #[tokio::test]
    async fn truncation_recovers_once_with_doubled_budget() {
        let api = Arc::new(ScriptedApi::new(vec![
            Ok(reply("partial", FinishReason::Length)),
            Ok(reply("full", FinishReason::Stop)),
        ]));
        let c = client(api.clone(), ClientConfig::default());

        let resp = c.send(request()).await.unwrap();
        assert_eq!(resp.content, "full");
        assert!(!resp.truncated);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*api.seen_max_tokens.lock().unwrap(), vec![2_000, 4_000]);
    }

    #[tokio::test]
    async fn second_truncation_is_accepted_and_flagged() {
        let api = Arc::new(ScriptedApi::new(vec![
            Ok(reply("partial", FinishReason::Length)),
            Ok(reply("still partial", FinishReason::Length)),
        ]));
        let c = client(api.clone(), ClientConfig::default());

        let resp = c.send(request()).await.unwrap();
        assert!(resp.truncated);
        assert_eq!(resp.content, "still partial");
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn escalated_budget_respects_ceiling() {
        let api = Arc::new(ScriptedApi::new(vec![
            Ok(reply("partial", FinishReason::Length)),
            Ok(reply("full", FinishReason::Stop)),
        ]));
        let c = client(api.clone(), ClientConfig::default());

        c.send(request().max_tokens(12_000)).await.unwrap();
        assert_eq!(*api.seen_max_tokens.lock().unwrap(), vec![12_000, 16_000]);
    }

    #[tokio::test]
    async fn content_filter_returns_empty_marked_response_without_retry() {
        let api = Arc::new(ScriptedApi::new(vec![Ok(reply(
            "ignored",
            FinishReason::ContentFilter,
        ))]));
        let c = client(api.clone(), ClientConfig::default());

        let resp = c.send(request()).await.unwrap();
        assert!(resp.content_filtered);
        assert!(resp.content.is_empty());
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_errors_retry_then_surface() {
        let api = Arc::new(ScriptedApi::new(vec![
            Err(ProviderError::transport("timeout")),
            Err(ProviderError::transport("timeout")),
            Err(ProviderError::transport("timeout")),
        ]));
        let config = ClientConfig {
            retry_base_delay: Duration::from_millis(1),
            ..ClientConfig::default()
        };
        let c = client(api.clone(), config);

        let err = c.send(request()).await.unwrap_err();
        assert_eq!(err.code(), "transport_error");
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn remote_429_does_not_consume_retry_budget() {
        let api = Arc::new(ScriptedApi::new(vec![
            Err(ProviderError::rate_limited_remote(
                Duration::from_millis(1),
                ErrorContext::new(),
            )),
            Err(ProviderError::transport("timeout")),
            Err(ProviderError::transport("timeout")),
            Ok(reply("ok", FinishReason::Stop)),
        ]));
        let config = ClientConfig {
            retry_base_delay: Duration::from_millis(1),
            ..ClientConfig::default()
        };
        let c = client(api.clone(), config);

        // One 429 wait plus two transport failures still leaves one
        // attempt in the budget of three.
        let resp = c.send(request()).await.unwrap();
        assert_eq!(resp.content, "ok");
        assert_eq!(api.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let api = Arc::new(ScriptedApi::new(vec![Err(ProviderError::api(
            "deepseek",
            "bad request",
            false,
        ))]));
        let c = client(api.clone(), ClientConfig::default());

        let err = c.send(request()).await.unwrap_err();
        assert_eq!(err.code(), "api_error");
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }
}
