//! Scripted backend for unit tests.

use super::LlmBackend;
use crate::stream::{ChunkChoice, ChunkDelta, ChunkStream, StreamChunk};
use colloquy_core::{ColloquyResult, Message};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Replies with queued texts or errors, one per request, and records every request.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    replies: Mutex<VecDeque<ColloquyResult<String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    pub(crate) fn replying(replies: impl IntoIterator<Item = ColloquyResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::default(),
        }
    }

    pub(crate) fn text(text: &str) -> Self {
        Self::replying([Ok(text.to_string())])
    }

    pub(crate) fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().clone()
    }
}

pub(crate) fn text_chunk(text: &str) -> StreamChunk {
    StreamChunk {
        choices: vec![ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: Some("assistant".into()),
                content: Some(text.to_string()),
                tool_calls: None,
            },
            finish_reason: Some("stop".into()),
        }],
        usage: None,
    }
}

impl LlmBackend for ScriptedBackend {
    fn stream_request(&self, messages: &[Message], _stream: bool, _throw: bool) -> ChunkStream {
        self.requests.lock().push(messages.to_vec());
        let item = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok("Conversation continues with the same plan.".into()));
        Box::pin(futures_util::stream::iter(vec![item.map(|t| text_chunk(&t))]))
    }
}

/// Holds its single reply until `release` fires, so tests can act mid-request.
pub(crate) struct GatedBackend {
    gate: Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
    reply: String,
    calls: std::sync::atomic::AtomicUsize,
}

impl GatedBackend {
    pub(crate) fn new(reply: &str) -> (Self, tokio::sync::oneshot::Sender<()>) {
        let (release, gate) = tokio::sync::oneshot::channel();
        let backend = Self {
            gate: Mutex::new(Some(gate)),
            reply: reply.to_string(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        (backend, release)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl LlmBackend for GatedBackend {
    fn stream_request(&self, _messages: &[Message], _stream: bool, _throw: bool) -> ChunkStream {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let gate = self.gate.lock().take();
        let chunk = text_chunk(&self.reply);
        Box::pin(async_stream::stream! {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            yield Ok(chunk);
        })
    }
}
