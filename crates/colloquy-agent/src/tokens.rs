//! Heuristic token estimation.
//!
//! Not a real tokenizer: characters are bucketed into letters, digits,
//! punctuation, whitespace and everything else, and each bucket is weighted.
//! The weights must stay fixed so estimates are comparable across sessions.

use colloquy_core::{Message, ToolDefinition};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// The 31 characters counted as punctuation.
const PUNCTUATION: &str = ".,;:!?'\"()[]{}<>-_/\\|@#$%^&*+=~";

const CHARS_PER_LETTER_TOKEN: f64 = 4.2;
const CHARS_PER_DIGIT_TOKEN: f64 = 3.5;
const CHARS_PER_OTHER_TOKEN: f64 = 3.0;
const TOKENS_PER_PUNCTUATION: f64 = 1.0;
const TOKENS_PER_WHITESPACE: f64 = 0.15;

#[derive(Debug, Default, Clone, Copy)]
struct CharClasses {
    letters: usize,
    digits: usize,
    punctuation: usize,
    whitespace: usize,
    other: usize,
}

impl CharClasses {
    fn of(text: &str) -> Self {
        let mut classes = Self::default();
        for c in text.chars() {
            if c.is_ascii_alphabetic() {
                classes.letters += 1;
            } else if c.is_ascii_digit() {
                classes.digits += 1;
            } else if PUNCTUATION.contains(c) {
                classes.punctuation += 1;
            } else if c.is_whitespace() {
                classes.whitespace += 1;
            } else {
                classes.other += 1;
            }
        }
        classes
    }

    fn weighted(&self) -> f64 {
        self.letters as f64 / CHARS_PER_LETTER_TOKEN
            + self.digits as f64 / CHARS_PER_DIGIT_TOKEN
            + self.punctuation as f64 * TOKENS_PER_PUNCTUATION
            + self.whitespace as f64 * TOKENS_PER_WHITESPACE
            + self.other as f64 / CHARS_PER_OTHER_TOKEN
    }
}

/// Estimate the token count of arbitrary text.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    CharClasses::of(text).weighted().max(0.0).round() as usize
}

/// Estimate a single message from its canonical (request) serialization.
pub fn estimate_message_tokens(message: &Message) -> usize {
    match serde_json::to_string(&message.to_wire()) {
        Ok(canonical) => estimate_tokens(&canonical),
        Err(_) => estimate_tokens(message.text()),
    }
}

/// Estimate the size of the tool schemas sent with every request.
pub fn estimate_tool_definitions_tokens(definitions: &[ToolDefinition]) -> usize {
    if definitions.is_empty() {
        return 0;
    }
    serde_json::to_string(definitions)
        .map(|json| estimate_tokens(&json))
        .unwrap_or(0)
}

/// Per-history token estimator with a message cache keyed by [`Message::id`].
///
/// The cache lives with the owning history so entries disappear with it;
/// [`TokenEstimator::retain`] drops entries for messages that left the sequence.
#[derive(Debug, Default)]
pub struct TokenEstimator {
    cache: HashMap<Uuid, usize>,
    tool_definitions_tokens: usize,
}

impl TokenEstimator {
    /// Create an empty estimator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of cached per-message estimates plus the tool-definitions estimate.
    pub fn estimate_messages(&mut self, messages: &[Message]) -> usize {
        let mut total = 0;
        for message in messages {
            total += *self
                .cache
                .entry(message.id)
                .or_insert_with(|| estimate_message_tokens(message));
        }
        total + self.tool_definitions_tokens
    }

    /// Record the token cost of the tool schemas attached to requests.
    pub fn set_tool_definitions_tokens(&mut self, tokens: usize) {
        self.tool_definitions_tokens = tokens;
    }

    /// Last recorded tool-definitions estimate.
    pub fn tool_definitions_tokens(&self) -> usize {
        self.tool_definitions_tokens
    }

    /// Forget one message, e.g. after its content was rewritten in place.
    pub fn invalidate(&mut self, id: &Uuid) {
        self.cache.remove(id);
    }

    /// Keep only entries for messages still present in `messages`.
    pub fn retain(&mut self, messages: &[Message]) {
        let live: HashSet<Uuid> = messages.iter().map(|m| m.id).collect();
        self.cache.retain(|id, _| live.contains(id));
    }

    /// Drop every cached message estimate.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Number of cached message estimates.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
