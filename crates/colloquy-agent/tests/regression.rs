//! Regression tests for colloquy-agent: StreamingClient over HTTP, compaction through a live client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use colloquy_agent::stream::collect_stream;
use colloquy_agent::{
    ContextConfig, LlmBackend, MessageHistory, ModelConfig, RetryPolicy, StreamingClient,
    MAX_REQUEST_BYTES,
};
use colloquy_core::{ColloquyError, Message, ToolDefinition};
use futures_util::StreamExt;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SSE_HI: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n";

fn client_for(server: &MockServer) -> StreamingClient {
    let mut config = ModelConfig::new("test-model");
    config.api_base_url = format!("{}/v1", server.uri());
    config.api_key = Some("sk-test".into());
    config.retry = RetryPolicy::immediate(3);
    StreamingClient::new(config).unwrap()
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream")
}

fn completion(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "cmpl-1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
    }))
}

async fn received(server: &MockServer) -> Vec<wiremock::Request> {
    server.received_requests().await.unwrap_or_default()
}

// --- streaming ---

#[tokio::test]
async fn sse_stream_yields_chunk_then_ends() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(header("content-type", "application/json"))
        .respond_with(sse(SSE_HI))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let items: Vec<_> = client
        .stream_request(&[Message::user("hello")], true, true)
        .collect()
        .await;

    assert_eq!(items.len(), 1);
    let chunk = items[0].as_ref().unwrap();
    assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi"));

    let stats = client.stats();
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn dropping_a_stream_early_leaves_the_client_usable() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"one \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"two \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"three\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse(body))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut stream = client.stream_request(&[Message::user("count")], true, true);
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.content(), Some("one "));
    drop(stream);

    let acc = collect_stream(client.stream_request(&[Message::user("again")], true, true))
        .await
        .unwrap();
    assert_eq!(acc.text(), "one two three");

    let stats = client.stats();
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn malformed_sse_lines_are_skipped() {
    let server = MockServer::start().await;
    let body = concat!(
        ": keep-alive\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {not json\n\n",
        "event: ping\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
    );
    Mock::given(method("POST"))
        .respond_with(sse(body))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let acc = collect_stream(client.stream_request(&[Message::user("hi")], true, true))
        .await
        .unwrap();
    assert_eq!(acc.text(), "Hello");
    assert_eq!(acc.chunk_count(), 2);
    assert_eq!(acc.finish_reason(), Some("stop"));
}

#[tokio::test]
async fn streamed_tool_calls_reassemble_by_index() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"read_file\",\"arguments\":\"\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"path\\\":\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"a.rs\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .respond_with(sse(body))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let acc = collect_stream(client.stream_request(&[Message::user("read")], true, true))
        .await
        .unwrap();
    let message = acc.into_message();
    let calls = message.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_1");
    assert_eq!(calls[0].index, Some(0));
    assert_eq!(calls[0].function.name, "read_file");
    assert_eq!(calls[0].function.arguments, r#"{"path":"a.rs"}"#);
}

// --- non-streaming ---

#[tokio::test]
async fn json_reply_is_reshaped_into_one_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion("All done."))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let items: Vec<_> = client
        .stream_request(&[Message::user("hello")], false, true)
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    let chunk = items[0].as_ref().unwrap();
    assert_eq!(chunk.content(), Some("All done."));
    assert_eq!(chunk.finish_reason(), Some("stop"));
    assert_eq!(chunk.usage.unwrap().total_tokens, 16);

    let body: serde_json::Value = serde_json::from_slice(&received(&server).await[0].body).unwrap();
    assert_eq!(body["stream"], false);
    assert_eq!(body["messages"][0]["content"], "hello");
}

#[tokio::test]
async fn request_carries_tool_definitions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("ok"))
        .mount(&server)
        .await;

    let tools = vec![ToolDefinition::function(
        "shell",
        "Run a command",
        json!({"type": "object", "properties": {"cmd": {"type": "string"}}}),
    )];
    let client = client_for(&server).with_tools(Arc::new(tools));
    let _ = collect_stream(client.stream_request(&[Message::user("ls")], false, true))
        .await
        .unwrap();

    let body: serde_json::Value = serde_json::from_slice(&received(&server).await[0].body).unwrap();
    assert_eq!(body["tool_choice"], "auto");
    assert_eq!(body["tools"][0]["type"], "function");
    assert_eq!(body["tools"][0]["function"]["name"], "shell");
}

// --- retry ---

#[tokio::test]
async fn server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(sse(SSE_HI))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let acc = collect_stream(client.stream_request(&[Message::user("hi")], true, true))
        .await
        .unwrap();
    assert_eq!(acc.text(), "Hi");
    assert_eq!(received(&server).await.len(), 2);
    assert_eq!(client.stats().errors, 0);
}

#[tokio::test]
async fn exhausted_attempts_in_strict_mode() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let items: Vec<_> = client
        .stream_request(&[Message::user("hi")], true, true)
        .collect()
        .await;

    assert_eq!(items.len(), 1);
    match &items[0] {
        Err(ColloquyError::AllAttemptsFailed { attempts, last }) => {
            assert_eq!(*attempts, 3);
            match last.as_ref() {
                ColloquyError::HttpStatus { status, body } => {
                    assert_eq!(*status, 503);
                    assert_eq!(body, "overloaded");
                }
                other => panic!("unexpected last error: {other:?}"),
            }
        }
        other => panic!("unexpected item: {other:?}"),
    }
    assert_eq!(client.stats().errors, 1);
}

#[tokio::test]
async fn exhausted_attempts_in_lenient_mode_end_silently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = ModelConfig::new("m");
    config.api_base_url = format!("{}/v1", server.uri());
    config.retry = RetryPolicy::immediate(2);
    let client = StreamingClient::new(config).unwrap();

    let items: Vec<_> = client
        .stream_request(&[Message::user("hi")], true, false)
        .collect()
        .await;
    assert!(items.is_empty());
    let stats = client.stats();
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.errors, 1);
}

#[tokio::test]
async fn malformed_completion_body_is_retried_then_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"not json".to_vec(), "application/json"))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let items: Vec<_> = client
        .stream_request(&[Message::user("hi")], false, true)
        .collect()
        .await;
    assert!(matches!(
        items[..],
        [Err(ColloquyError::AllAttemptsFailed { attempts: 3, .. })]
    ));
}

// --- size limit ---

/// A single user message padded so the serialized body is exactly `target` bytes.
fn message_for_body_size(client: &StreamingClient, target: usize) -> Message {
    let base = client
        .build_request_body(&[Message::user("")], true)
        .unwrap()
        .len();
    let message = Message::user("x".repeat(target - base));
    assert_eq!(
        client.build_request_body(&[message.clone()], true).unwrap().len(),
        target
    );
    message
}

#[tokio::test]
async fn oversized_request_never_reaches_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(SSE_HI))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let message = message_for_body_size(&client, MAX_REQUEST_BYTES + 1);
    let items: Vec<_> = client.stream_request(&[message], true, false).collect().await;

    match &items[..] {
        [Err(ColloquyError::RequestTooLarge { size, limit })] => {
            assert_eq!(*size, 1_048_577);
            assert_eq!(*limit, 1_048_576);
        }
        other => panic!("unexpected items: {other:?}"),
    }
    assert!(received(&server).await.is_empty());
}

#[tokio::test]
async fn request_at_the_limit_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(SSE_HI))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let message = message_for_body_size(&client, MAX_REQUEST_BYTES);
    let acc = collect_stream(client.stream_request(&[message], true, true))
        .await
        .unwrap();
    assert_eq!(acc.text(), "Hi");
}

// --- compaction through the client ---

#[tokio::test]
async fn history_compacts_through_a_live_endpoint() {
    let server = MockServer::start().await;
    let summary = "The user asked Q1 and the assistant answered A1; continue with Q2.";
    Mock::given(method("POST"))
        .respond_with(completion(summary))
        .expect(1)
        .mount(&server)
        .await;

    let client: Arc<dyn LlmBackend> = Arc::new(client_for(&server));
    let config = ContextConfig {
        compact_protect_rounds: 1,
        ..ContextConfig::default()
    };
    let mut history = MessageHistory::new(config, client);
    history.add_system_message("S");
    history.add_user_message("Q1");
    history.add_assistant_message(Some("A1".into()), vec![]);
    history.add_user_message("Q2");
    history.add_assistant_message(Some("A2".into()), vec![]);

    let report = history.compact_memory().await.unwrap();
    assert!(report.summarized);
    let messages = history.messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].summary_text(), Some(summary));
    assert_eq!(messages[2].text(), "Q2");
    assert_eq!(messages[3].text(), "A2");

    let body: serde_json::Value = serde_json::from_slice(&received(&server).await[0].body).unwrap();
    assert_eq!(body["stream"], false);
    assert_eq!(body["messages"][0]["role"], "system");
    let transcript = body["messages"][1]["content"].as_str().unwrap();
    assert!(transcript.contains("user: Q1"));
    assert!(!transcript.contains("Q2"));
}

#[tokio::test]
async fn compaction_failure_leaves_history_intact() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client: Arc<dyn LlmBackend> = Arc::new(client_for(&server));
    let config = ContextConfig {
        compact_protect_rounds: 1,
        ..ContextConfig::default()
    };
    let mut history = MessageHistory::new(config, client);
    history.add_system_message("S");
    history.add_user_message("Q1");
    history.add_assistant_message(Some("A1".into()), vec![]);
    history.add_user_message("Q2");
    history.add_assistant_message(Some("A2".into()), vec![]);
    let before = history.messages().to_vec();

    let err = history.compact_memory().await.unwrap_err();
    assert!(matches!(err, ColloquyError::AllAttemptsFailed { .. }));
    assert_eq!(history.messages(), &before[..]);
}
