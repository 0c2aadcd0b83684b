use super::LlmBackend;
use crate::config::ModelConfig;
use crate::retry::RetryPolicy;
use crate::stream::{ChunkStream, SseDecoder, SseEvent, StreamChunk};
use colloquy_core::{
    ColloquyError, ColloquyResult, Message, NoTools, ToolDefinition, ToolDefinitionProvider,
    WireMessage,
};
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Largest request body sent to the endpoint (1 MiB).
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Request/error counters and timings of a [`StreamingClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    /// Calls to `stream_request`.
    pub requests: u64,
    /// Calls that ended in a final failure.
    pub errors: u64,
    /// Wall-clock time of the most recently completed call.
    pub last_elapsed_ms: u64,
    /// Sum of wall-clock time over completed calls.
    pub total_elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    errors: AtomicU64,
    last_elapsed_ms: AtomicU64,
    total_elapsed_ms: AtomicU64,
}

impl Counters {
    fn record_elapsed(&self, started: Instant) {
        let ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_elapsed_ms.store(ms, Ordering::Relaxed);
        self.total_elapsed_ms.fetch_add(ms, Ordering::Relaxed);
    }

    fn record_failure(&self, started: Instant) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.record_elapsed(started);
    }

    fn snapshot(&self) -> ClientStats {
        ClientStats {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_elapsed_ms: self.last_elapsed_ms.load(Ordering::Relaxed),
            total_elapsed_ms: self.total_elapsed_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
///
/// Works with OpenAI, OpenRouter, DeepSeek, Ollama, and any other provider
/// speaking the chat completions protocol, streamed (SSE) or not.
pub struct StreamingClient {
    config: ModelConfig,
    http: reqwest::Client,
    tools: Arc<dyn ToolDefinitionProvider>,
    counters: Arc<Counters>,
}

impl StreamingClient {
    pub fn new(config: ModelConfig) -> ColloquyResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect())
            .read_timeout(config.timeouts.read())
            .build()
            .map_err(|e| ColloquyError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            http,
            tools: Arc::new(NoTools),
            counters: Arc::default(),
        })
    }

    /// Attach the provider whose tool definitions go out with every request.
    pub fn with_tools(mut self, tools: Arc<dyn ToolDefinitionProvider>) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Tool definitions the next request would carry.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.tool_definitions()
    }

    pub fn stats(&self) -> ClientStats {
        self.counters.snapshot()
    }

    /// Serialized request body for `messages`.
    pub fn build_request_body(&self, messages: &[Message], stream: bool) -> ColloquyResult<Vec<u8>> {
        let tools = self.tools.tool_definitions();
        let tool_choice = (!tools.is_empty()).then_some("auto");
        let request = ChatRequest {
            model: &self.config.model_id,
            messages: messages.iter().map(Message::to_wire).collect(),
            stream,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            tools,
            tool_choice,
        };
        Ok(serde_json::to_vec(&request)?)
    }
}

impl LlmBackend for StreamingClient {
    fn stream_request(
        &self,
        messages: &[Message],
        stream: bool,
        throw_on_error: bool,
    ) -> ChunkStream {
        let prepared = prepare(
            self.build_request_body(messages, stream),
            self.config.endpoint(),
        );
        let http = self.http.clone();
        let api_key = self.config.api_key.clone();
        let total_timeout = self.config.timeouts.total();
        let policy: RetryPolicy = self.config.retry.clone();
        let counters = Arc::clone(&self.counters);
        let message_count = messages.len();

        Box::pin(async_stream::stream! {
            counters.requests.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();

            let (endpoint, payload) = match prepared {
                Ok(prepared) => prepared,
                Err(e) => {
                    counters.record_failure(started);
                    warn!(error = %e, "Chat request rejected before sending");
                    yield Err(e);
                    return;
                }
            };

            let max_attempts = policy.effective_max_attempts();
            let mut attempts = 0;
            let mut last_error = None;

            for attempt in 1..=max_attempts {
                attempts = attempt;
                debug!(
                    attempt,
                    bytes = payload.len(),
                    messages = message_count,
                    stream,
                    "Sending chat request"
                );

                let failure = 'attempt: {
                    let response = match send_once(
                        &http,
                        &endpoint,
                        api_key.as_deref(),
                        total_timeout,
                        payload.clone(),
                    )
                    .await
                    {
                        Ok(response) => response,
                        Err(e) => break 'attempt e,
                    };

                    if is_event_stream(&response) {
                        let mut body = response.bytes_stream();
                        let mut decoder = SseDecoder::new();
                        let mut delivered = 0usize;
                        loop {
                            let (events, ended) = match body.next().await {
                                Some(Ok(bytes)) => (decoder.push(&bytes), false),
                                Some(Err(e)) => {
                                    let err = ColloquyError::Transport(format!("stream read error: {e}"));
                                    if delivered == 0 {
                                        break 'attempt err;
                                    }
                                    // Chunks already reached the caller; retrying would repeat them.
                                    counters.record_failure(started);
                                    error!(attempt, chunks = delivered, error = %err, "Stream broke mid-response");
                                    if throw_on_error {
                                        yield Err(err);
                                    }
                                    return;
                                }
                                None => (decoder.finish(), true),
                            };
                            for event in events {
                                match event {
                                    SseEvent::Chunk(chunk) => {
                                        delivered += 1;
                                        yield Ok(chunk);
                                    }
                                    SseEvent::Done => break,
                                }
                            }
                            if ended || decoder.is_done() {
                                counters.record_elapsed(started);
                                debug!(attempt, chunks = delivered, "Chat stream completed");
                                return;
                            }
                        }
                    } else {
                        let bytes = match response.bytes().await {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                break 'attempt ColloquyError::Transport(format!(
                                    "failed to read response body: {e}"
                                ))
                            }
                        };
                        match StreamChunk::from_completion(&bytes) {
                            Ok(chunk) => {
                                counters.record_elapsed(started);
                                debug!(attempt, "Chat completion received");
                                yield Ok(chunk);
                                return;
                            }
                            Err(e) => {
                                break 'attempt ColloquyError::Transport(format!(
                                    "malformed completion body: {e}"
                                ))
                            }
                        }
                    }
                };

                if !failure.is_retryable() || attempt == max_attempts {
                    last_error = Some(failure);
                    break;
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %failure,
                    "Chat request failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            counters.record_failure(started);
            let last = last_error
                .unwrap_or_else(|| ColloquyError::Transport("no attempt was made".into()));
            error!(attempts, error = %last, "Chat request failed");
            if throw_on_error {
                yield Err(ColloquyError::AllAttemptsFailed {
                    attempts,
                    last: Box::new(last),
                });
            }
        })
    }
}

fn prepare(
    body: ColloquyResult<Vec<u8>>,
    endpoint: ColloquyResult<String>,
) -> ColloquyResult<(String, Vec<u8>)> {
    let body = body?;
    if body.len() > MAX_REQUEST_BYTES {
        return Err(ColloquyError::RequestTooLarge {
            size: body.len(),
            limit: MAX_REQUEST_BYTES,
        });
    }
    Ok((endpoint?, body))
}

fn add_headers(request: reqwest::RequestBuilder, api_key: Option<&str>) -> reqwest::RequestBuilder {
    let request = request.header(CONTENT_TYPE, "application/json");
    match api_key.filter(|key| !key.is_empty()) {
        Some(key) => request.header(AUTHORIZATION, format!("Bearer {key}")),
        None => request,
    }
}

async fn send_once(
    http: &reqwest::Client,
    endpoint: &str,
    api_key: Option<&str>,
    timeout: Duration,
    payload: Vec<u8>,
) -> ColloquyResult<reqwest::Response> {
    let response = add_headers(http.post(endpoint), api_key)
        .timeout(timeout)
        .body(payload)
        .send()
        .await
        .map_err(|e| ColloquyError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        return Err(ColloquyError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            let value = value.to_ascii_lowercase();
            value.starts_with("text/event-stream") || value.starts_with("text/plain")
        })
        .unwrap_or(false)
}
