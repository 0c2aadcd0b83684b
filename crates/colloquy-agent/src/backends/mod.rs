#[cfg(test)]
pub(crate) mod mock;
pub mod openai;

use crate::stream::ChunkStream;
use colloquy_core::Message;

/// Trait for chat-completion backends.
///
/// The streaming client implements it against a real endpoint; compaction
/// only depends on this seam, so tests can substitute canned responses.
pub trait LlmBackend: Send + Sync {
    /// Run one logical chat-completion exchange.
    ///
    /// With `stream = false` the sequence holds exactly one synthetic chunk.
    /// When every attempt fails, `throw_on_error` decides between a final
    /// `Err` item and silently ending the sequence.
    fn stream_request(&self, messages: &[Message], stream: bool, throw_on_error: bool)
        -> ChunkStream;
}
