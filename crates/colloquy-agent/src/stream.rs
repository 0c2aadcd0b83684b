use colloquy_core::{ColloquyResult, Message, ToolCall};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use tracing::warn;

/// Lazy sequence of chunks produced by one chat-completion exchange.
///
/// Dropping the stream releases the underlying HTTP response.
pub type ChunkStream = Pin<Box<dyn Stream<Item = ColloquyResult<StreamChunk>> + Send>>;

/// One incremental unit of a model response.
///
/// Streaming responses yield one per SSE `data:` line; non-streaming
/// responses are reshaped into exactly one chunk of the same form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Choices carried by this chunk (normally one).
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Token usage, usually only on the final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A choice within a [`StreamChunk`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Choice index.
    #[serde(default)]
    pub index: u32,
    /// Incremental message content.
    #[serde(default)]
    pub delta: ChunkDelta,
    /// Set on the last chunk of a choice (`stop`, `tool_calls`, `length`, ...).
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental message fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Author role, typically only on the first chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Text fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool call fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Fragment of a tool call; fragments sharing `index` belong to the same call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call in the response's `tool_calls` array.
    #[serde(default)]
    pub index: u32,
    /// Call id, present on the first fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Call type (`function`).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    /// Function name and argument fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

/// Function part of a [`ToolCallDelta`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionDelta {
    /// Function name, present on the first fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Next piece of the JSON argument text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Token usage reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the request.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens generated.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Sum of both.
    #[serde(default)]
    pub total_tokens: u64,
}

impl StreamChunk {
    /// First choice, if any.
    pub fn first_choice(&self) -> Option<&ChunkChoice> {
        self.choices.first()
    }

    /// Text fragment of the first choice.
    pub fn content(&self) -> Option<&str> {
        self.first_choice()?.delta.content.as_deref()
    }

    /// Finish reason of the first choice.
    pub fn finish_reason(&self) -> Option<&str> {
        self.first_choice()?.finish_reason.as_deref()
    }

    /// Reshape a non-streaming completion body into a single chunk.
    ///
    /// `choices[0].message` becomes the delta; full tool calls become
    /// fragments whose `index` is their position in the array.
    pub fn from_completion(body: &[u8]) -> ColloquyResult<Self> {
        let completion: Completion = serde_json::from_slice(body)?;
        let choices = completion
            .choices
            .into_iter()
            .take(1)
            .map(|choice| {
                let tool_calls = choice.message.tool_calls.map(|calls| {
                    calls
                        .into_iter()
                        .enumerate()
                        .map(|(position, call)| ToolCallDelta {
                            index: call.index.unwrap_or(position as u32),
                            id: Some(call.id),
                            call_type: Some(call.call_type),
                            function: Some(FunctionDelta {
                                name: Some(call.function.name),
                                arguments: Some(call.function.arguments),
                            }),
                        })
                        .collect()
                });
                ChunkChoice {
                    index: choice.index,
                    delta: ChunkDelta {
                        role: choice.message.role,
                        content: choice.message.content,
                        tool_calls,
                    },
                    finish_reason: choice.finish_reason,
                }
            })
            .collect();
        Ok(Self {
            choices,
            usage: completion.usage,
        })
    }
}

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct CompletionMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

// ---------------------------------------------------------------------------
// SSE decoding
// ---------------------------------------------------------------------------

/// A decoded server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// A parsed `data:` payload.
    Chunk(StreamChunk),
    /// The `data: [DONE]` terminator.
    Done,
}

impl SseEvent {
    /// The chunk carried by this event, if any.
    pub fn into_chunk(self) -> Option<StreamChunk> {
        match self {
            SseEvent::Chunk(chunk) => Some(chunk),
            SseEvent::Done => None,
        }
    }
}

/// Incremental decoder for `data: <json>` framed event streams.
///
/// Bytes are buffered until a `\n` arrives, so multi-byte characters and
/// lines split across network reads decode correctly. The trailing partial
/// line is kept for the next [`SseDecoder::push`].
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning events for every complete line.
    ///
    /// Nothing is returned after [`SseEvent::Done`] has been seen.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            if let Some(event) = self.decode_line(&line[..end]) {
                let finished = event == SseEvent::Done;
                events.push(event);
                if finished {
                    self.done = true;
                    self.buffer.clear();
                    break;
                }
            }
        }
        events
    }

    /// Decode whatever is left in the buffer once the body has ended.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.done || self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line).into_iter().collect()
    }

    /// Whether the `[DONE]` terminator was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(&self, raw: &[u8]) -> Option<SseEvent> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return None;
        }
        let data = line.strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data);
        if data.trim() == "[DONE]" {
            return Some(SseEvent::Done);
        }
        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => Some(SseEvent::Chunk(chunk)),
            Err(e) => {
                warn!(error = %e, line = %data, "Skipping malformed SSE line");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// Folds tool call fragments into complete calls, keyed by stream index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, ToolCall>,
}

impl ToolCallAccumulator {
    /// Merge one fragment.
    pub fn push(&mut self, delta: &ToolCallDelta) {
        let call = self
            .calls
            .entry(delta.index)
            .or_insert_with(|| ToolCall::new("", "", "").with_index(delta.index));
        if let Some(id) = &delta.id {
            call.id.clone_from(id);
        }
        if let Some(call_type) = &delta.call_type {
            call.call_type.clone_from(call_type);
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                call.function.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                call.function.arguments.push_str(arguments);
            }
        }
    }

    /// Whether no fragment has been seen.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed calls in stream-index order.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls.into_values().collect()
    }
}

/// Accumulates a whole response from its chunks.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    tool_calls: ToolCallAccumulator,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    chunks: usize,
}

impl StreamAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one chunk (first choice only).
    pub fn push(&mut self, chunk: &StreamChunk) {
        self.chunks += 1;
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        let Some(choice) = chunk.first_choice() else {
            return;
        };
        if let Some(content) = &choice.delta.content {
            self.text.push_str(content);
        }
        for delta in choice.delta.tool_calls.iter().flatten() {
            self.tool_calls.push(delta);
        }
        if let Some(reason) = &choice.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Finish reason of the response, if reported.
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Usage of the response, if reported.
    pub fn usage(&self) -> Option<Usage> {
        self.usage
    }

    /// Number of chunks merged.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Build the assistant message for the history.
    pub fn into_message(self) -> Message {
        let content = (!self.text.is_empty()).then_some(self.text);
        Message::assistant_with_tool_calls(content, self.tool_calls.finish())
    }
}

/// Drain a chunk stream into an accumulator, stopping at the first error.
pub async fn collect_stream(mut stream: ChunkStream) -> ColloquyResult<StreamAccumulator> {
    use futures_util::StreamExt;

    let mut acc = StreamAccumulator::new();
    while let Some(item) = stream.next().await {
        acc.push(&item?);
    }
    Ok(acc)
}
