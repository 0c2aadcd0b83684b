//! Core types and error definitions for the colloquy context engine.
//!
//! This crate provides the foundational types shared across all colloquy crates.
//!
//! # Main types
//!
//! - [`ColloquyError`]: Unified error enum for all colloquy subsystems.
//! - [`ColloquyResult`]: Convenience alias for `Result<T, ColloquyError>`.
//! - [`Role`]: Message role (system, user, assistant, tool).
//! - [`Message`]: A single turn of a conversation.
//! - [`ToolCall`]: A model-initiated tool invocation request.
//! - [`ToolDefinition`]: A tool schema offered to the model.

/// Error types.
pub mod error;
/// Conversation message types.
pub mod message;
/// Tool call and tool definition types.
pub mod tool;

pub use error::{ColloquyError, ColloquyResult};
pub use message::{Message, MessageKind, Role, WireMessage, SUMMARY_PREFIX};
pub use tool::{
    FunctionCall, FunctionDefinition, NoTools, ToolCall, ToolDefinition, ToolDefinitionProvider,
    ToolResult,
};
