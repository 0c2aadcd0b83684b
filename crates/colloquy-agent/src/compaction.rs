//! History compaction: replaces old conversation turns with one AI-written summary.
//!
//! Messages are first partitioned into [`MessageGroup`]s, atomic units that keep
//! an assistant's tool calls together with their results. The most recent
//! groups are protected; everything older is summarized through a
//! non-streaming call to the configured [`LlmBackend`].

use crate::backends::LlmBackend;
use crate::stream::collect_stream;
use colloquy_core::{ColloquyResult, Message, Role};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inputs of this many messages or fewer are never compacted.
pub const MIN_COMPACTABLE_MESSAGES: usize = 3;

/// Tool results longer than this (in chars) are truncated in the summary transcript.
pub const TOOL_RESULT_PREVIEW_CHARS: usize = 500;

/// Summaries shorter than this (in chars) are logged as low quality.
pub const MIN_SUMMARY_CHARS: usize = 50;

/// Used when the model returns an empty summary.
pub const FALLBACK_SUMMARY: &str = "Conversation summarized";

const SUMMARY_INSTRUCTION: &str = "You are compacting a conversation so it can be continued \
later with less context. Summarize the transcript below for continuation. Cover: what was \
done, what is still in progress, which files were read or modified, and what should happen \
next. Keep concrete names, paths, commands and decisions. Reply with the summary only.";

/// An atomic unit of compaction.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroup {
    /// Messages of the group, in conversation order.
    pub messages: Vec<Message>,
    /// Whether the group is a previous summary (never re-summarized).
    pub is_summary: bool,
}

impl MessageGroup {
    fn new(messages: Vec<Message>) -> Self {
        let is_summary = messages.first().is_some_and(Message::is_summary);
        Self {
            messages,
            is_summary,
        }
    }
}

/// Partition `messages` into groups, scanning left to right.
///
/// A group closes after a `tool` message once every tool call issued inside the
/// group has been answered, or just before a `user` message when the group
/// already holds other messages (that user message seeds the next group).
pub fn group_messages(messages: &[Message]) -> Vec<MessageGroup> {
    let mut groups = Vec::new();
    let mut current: Vec<Message> = Vec::new();
    let mut pending: HashSet<&str> = HashSet::new();

    for message in messages {
        current.push(message.clone());
        match message.role {
            Role::Assistant => {
                pending.extend(message.tool_calls().iter().map(|call| call.id.as_str()));
            }
            Role::Tool => {
                if let Some(id) = message.tool_call_id.as_deref() {
                    pending.remove(id);
                }
                if pending.is_empty() {
                    groups.push(MessageGroup::new(std::mem::take(&mut current)));
                }
            }
            Role::User if current.len() > 1 => {
                let seed = current.pop();
                groups.push(MessageGroup::new(std::mem::take(&mut current)));
                pending.clear();
                current.extend(seed);
            }
            _ => {}
        }
    }
    if !current.is_empty() {
        groups.push(MessageGroup::new(current));
    }
    groups
}

/// Split `messages` into rounds: each user message and everything up to the next one.
///
/// System and summary messages belong to no round. Messages ahead of the
/// first user message (an assistant greeting, say) join the first round.
pub fn identify_rounds(messages: &[Message]) -> Vec<Vec<Message>> {
    let mut rounds = Vec::new();
    let mut current: Vec<Message> = Vec::new();
    let mut has_user = false;
    for message in messages {
        if message.role == Role::System || message.is_summary() {
            continue;
        }
        if message.role == Role::User {
            if has_user {
                rounds.push(std::mem::take(&mut current));
            }
            has_user = true;
        }
        current.push(message.clone());
    }
    if !current.is_empty() {
        rounds.push(current);
    }
    rounds
}

/// Render messages as the numbered transcript sent to the summarizer.
pub fn format_for_summary(messages: &[Message]) -> String {
    let total = messages.len();
    let mut out = String::new();
    for (i, message) in messages.iter().enumerate() {
        let position = i + 1;
        let _ = write!(
            out,
            "[{position}/{total}] ({}) {}",
            recency_label(position, total),
            message.role.as_str()
        );
        match message.role {
            Role::Tool => {
                if let Some(id) = &message.tool_call_id {
                    let _ = write!(out, " (call {id})");
                }
                let _ = writeln!(out, ": {}", preview(message.text()));
            }
            _ => {
                let _ = writeln!(out, ": {}", message.text());
                for call in message.tool_calls() {
                    let _ = writeln!(
                        out,
                        "  -> tool call {}({})",
                        call.function.name, call.function.arguments
                    );
                }
            }
        }
    }
    out
}

fn recency_label(position: usize, total: usize) -> &'static str {
    let ratio = position as f64 / total.max(1) as f64;
    if ratio >= 0.8 {
        "very recent"
    } else if ratio >= 0.6 {
        "recent"
    } else if ratio >= 0.3 {
        "middle"
    } else {
        "old"
    }
}

fn preview(content: &str) -> String {
    let len = content.chars().count();
    if len <= TOOL_RESULT_PREVIEW_CHARS {
        return content.to_string();
    }
    let head: String = content.chars().take(TOOL_RESULT_PREVIEW_CHARS).collect();
    format!("{head}... [truncated {} chars]", len - TOOL_RESULT_PREVIEW_CHARS)
}

/// Locate `span` inside `messages` as an inclusive index range.
///
/// Matches by message id; falls back to the first `(role, content)` match for
/// each end when an id is not present (e.g. messages rebuilt outside the history).
fn locate_span(messages: &[Message], span: &[Message]) -> Option<(usize, usize)> {
    let first = span.first()?;
    let last = span.last()?;
    let by_id = |target: &Message| messages.iter().position(|m| m.id == target.id);
    let by_content = |target: &Message, from: usize| {
        messages
            .iter()
            .skip(from)
            .position(|m| m.role == target.role && m.content == target.content)
            .map(|i| i + from)
    };
    let start = by_id(first).or_else(|| by_content(first, 0))?;
    let end = by_id(last).or_else(|| by_content(last, start))?;
    (start <= end).then_some((start, end))
}

/// Summarizes old history through an [`LlmBackend`].
pub struct CompactionService {
    backend: Arc<dyn LlmBackend>,
    protect_rounds: usize,
}

impl CompactionService {
    /// `protect_rounds` is the number of most recent groups never compacted.
    pub fn new(backend: Arc<dyn LlmBackend>, protect_rounds: usize) -> Self {
        Self {
            backend,
            protect_rounds,
        }
    }

    pub fn protect_rounds(&self) -> usize {
        self.protect_rounds
    }

    /// Sliding-window compaction.
    ///
    /// Output: `[first, previous summaries.., new summary, protected groups..]`.
    /// The first message is carried over unchanged whatever its role. Returns
    /// the input unchanged when it is too short or every group is protected.
    /// Summarizer errors are returned as-is.
    pub async fn compact(&self, messages: &[Message]) -> ColloquyResult<Vec<Message>> {
        if messages.len() <= MIN_COMPACTABLE_MESSAGES {
            return Ok(messages.to_vec());
        }
        let Some((first, rest)) = messages.split_first() else {
            return Ok(Vec::new());
        };
        let (summaries, to_compact): (Vec<Message>, Vec<Message>) =
            rest.iter().cloned().partition(Message::is_summary);

        let mut groups = group_messages(&to_compact);
        if groups.len() <= self.protect_rounds {
            debug!(
                groups = groups.len(),
                protected = self.protect_rounds,
                "Nothing old enough to compact"
            );
            return Ok(messages.to_vec());
        }
        let recent = groups.split_off(groups.len() - self.protect_rounds);
        let old: Vec<Message> = groups.into_iter().flat_map(|g| g.messages).collect();

        let summary = self.summarize(&old).await?;

        let mut out = Vec::with_capacity(2 + summaries.len() + recent.len());
        out.push(first.clone());
        out.extend(summaries);
        out.push(summary);
        out.extend(recent.into_iter().flat_map(|g| g.messages));
        info!(
            before = messages.len(),
            after = out.len(),
            summarized = old.len(),
            "Compacted conversation"
        );
        Ok(out)
    }

    /// Summarize the first `rounds` rounds, splicing the summary where they were.
    pub async fn force_compact_rounds(
        &self,
        messages: &[Message],
        rounds: usize,
    ) -> ColloquyResult<Vec<Message>> {
        let span: Vec<Message> = identify_rounds(messages)
            .into_iter()
            .take(rounds)
            .flatten()
            .filter(|m| !m.is_summary())
            .collect();
        self.splice_summary(messages, &span).await
    }

    /// Summarize the first `count` non-system, non-summary messages.
    ///
    /// The selection extends past `count` while the next message is a tool
    /// result, so a result is never separated from its call.
    pub async fn force_compact_messages(
        &self,
        messages: &[Message],
        count: usize,
    ) -> ColloquyResult<Vec<Message>> {
        if count == 0 {
            return Ok(messages.to_vec());
        }
        let eligible: Vec<&Message> = messages
            .iter()
            .filter(|m| m.role != Role::System && !m.is_summary())
            .collect();
        let mut end = count.min(eligible.len());
        while end < eligible.len() && eligible[end].role == Role::Tool {
            end += 1;
        }
        let span: Vec<Message> = eligible[..end].iter().map(|m| (*m).clone()).collect();
        self.splice_summary(messages, &span).await
    }

    async fn splice_summary(
        &self,
        messages: &[Message],
        span: &[Message],
    ) -> ColloquyResult<Vec<Message>> {
        if span.is_empty() {
            return Ok(messages.to_vec());
        }
        let Some((start, end)) = locate_span(messages, span) else {
            warn!(span = span.len(), "Could not locate messages to compact");
            return Ok(messages.to_vec());
        };

        let summary = self.summarize(span).await?;

        // System messages and earlier summaries inside the span are kept ahead of the new summary.
        let kept = messages[start..=end]
            .iter()
            .filter(|m| m.role == Role::System || m.is_summary())
            .cloned();
        let mut out = Vec::with_capacity(messages.len() - (end - start));
        out.extend_from_slice(&messages[..start]);
        out.extend(kept);
        out.push(summary);
        out.extend_from_slice(&messages[end + 1..]);
        info!(
            before = messages.len(),
            after = out.len(),
            summarized = span.len(),
            "Force-compacted conversation"
        );
        Ok(out)
    }

    /// Ask the model for a summary of `messages` and wrap it as a summary message.
    pub async fn summarize(&self, messages: &[Message]) -> ColloquyResult<Message> {
        let request = [
            Message::system(SUMMARY_INSTRUCTION),
            Message::user(format_for_summary(messages)),
        ];
        let response = collect_stream(self.backend.stream_request(&request, false, true)).await?;
        let text = response.text().trim();

        let text = if text.is_empty() {
            warn!("Summarizer returned an empty response");
            FALLBACK_SUMMARY
        } else {
            let chars = text.chars().count();
            if chars < MIN_SUMMARY_CHARS {
                warn!(chars, min = MIN_SUMMARY_CHARS, "Summary is suspiciously short");
            }
            text
        };
        Ok(Message::summary(text))
    }
}
