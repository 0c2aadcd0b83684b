//! Reading and writing a bare message sequence.
//!
//! Three layouts are accepted on load: a JSON array of messages, a JSON object
//! with a `messages` array (other top-level fields are ignored), and JSONL
//! with one message per line. Legacy messages without an `id` get a fresh
//! one; the `[SUMMARY] ` prefix is recognised on load.

use colloquy_core::{ColloquyError, ColloquyResult, Message};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// On-disk layout for [`save_messages`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionFormat {
    /// Pretty-printed `{"messages": [...]}`.
    #[default]
    Json,
    /// One compact message object per line.
    Jsonl,
}

impl SessionFormat {
    /// `Jsonl` for `.jsonl` files, `Json` otherwise.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("jsonl") => Self::Jsonl,
            _ => Self::Json,
        }
    }
}

#[derive(Deserialize)]
struct MessagesDocument {
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct MessagesDocumentRef<'a> {
    messages: &'a [Message],
}

/// Parse any accepted layout, detected from the content.
pub fn parse_messages(text: &str) -> ColloquyResult<Vec<Message>> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| ColloquyError::Session(format!("invalid message array: {e}")));
    }
    if let Ok(document) = serde_json::from_str::<MessagesDocument>(trimmed) {
        return Ok(document.messages);
    }
    parse_jsonl(text)
}

fn parse_jsonl(text: &str) -> ColloquyResult<Vec<Message>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                ColloquyError::Session(format!("invalid message on line {}: {e}", i + 1))
            })
        })
        .collect()
}

/// Render `messages` in `format`.
pub fn serialize_messages(messages: &[Message], format: SessionFormat) -> ColloquyResult<String> {
    match format {
        SessionFormat::Json => {
            let mut out = serde_json::to_string_pretty(&MessagesDocumentRef { messages })?;
            out.push('\n');
            Ok(out)
        }
        SessionFormat::Jsonl => {
            let mut out = String::new();
            for message in messages {
                out.push_str(&serde_json::to_string(message)?);
                out.push('\n');
            }
            Ok(out)
        }
    }
}

/// Load a message file in any accepted layout.
pub async fn load_messages(path: &Path) -> ColloquyResult<Vec<Message>> {
    let text = tokio::fs::read_to_string(path).await?;
    let messages = parse_messages(&text)?;
    debug!(path = %path.display(), messages = messages.len(), "Loaded messages");
    Ok(messages)
}

/// Write `messages` to `path`, replacing the file.
pub async fn save_messages(
    path: &Path,
    messages: &[Message],
    format: SessionFormat,
) -> ColloquyResult<()> {
    let text = serialize_messages(messages, format)?;
    tokio::fs::write(path, text).await?;
    debug!(path = %path.display(), messages = messages.len(), ?format, "Saved messages");
    Ok(())
}
