//! Conversation persistence: reading and writing message files.

pub mod codec;

pub use codec::{load_messages, parse_messages, save_messages, serialize_messages, SessionFormat};
