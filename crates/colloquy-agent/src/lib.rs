//! Context engine: conversation history, compaction, token estimation and a
//! streaming chat-completions client.

pub mod backends;
pub mod compaction;
pub mod config;
pub mod context;
pub mod retry;
pub mod stream;
pub mod tokens;

pub use backends::openai::{ClientStats, StreamingClient, MAX_REQUEST_BYTES};
pub use backends::LlmBackend;
pub use compaction::{CompactionService, MessageGroup};
pub use config::{ContextConfig, ModelConfig, TimeoutConfig};
pub use context::{CompactionReport, CompactionRequest, MessageHistory, PruneReport, SharedHistory};
pub use retry::RetryPolicy;
pub use stream::{ChunkStream, StreamAccumulator, StreamChunk, ToolCallAccumulator};
pub use tokens::{estimate_tokens, estimate_tool_definitions_tokens, TokenEstimator};
