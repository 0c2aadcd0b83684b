use crate::tool::ToolCall;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content prefix that marks a synthetic summary message on the wire and on disk.
pub const SUMMARY_PREFIX: &str = "[SUMMARY] ";

/// The role of the participant that authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system-level instruction or prompt.
    System,
    /// A human end-user.
    User,
    /// The AI assistant.
    Assistant,
    /// Output produced by a tool invocation.
    Tool,
}

impl Role {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Distinguishes ordinary turns from compaction summaries.
///
/// Not serialized: it is recovered from [`SUMMARY_PREFIX`] when a message is
/// deserialized, so sessions written by older versions load unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    /// A normal conversation turn.
    #[default]
    Regular,
    /// Synthetic summary of previously compacted history.
    Summary,
}

impl MessageKind {
    fn classify(role: Role, content: Option<&str>) -> Self {
        match (role, content) {
            (Role::User, Some(text)) if text.starts_with(SUMMARY_PREFIX) => MessageKind::Summary,
            _ => MessageKind::Regular,
        }
    }
}

/// A single turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MessageRecord")]
pub struct Message {
    /// Stable identifier, assigned on creation or on load.
    pub id: Uuid,
    /// The role of the message author.
    pub role: Role,
    /// Text content; absent on assistant turns that only carry tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls requested by an assistant turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// On `tool` messages, the call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip)]
    kind: MessageKind,
}

/// On-disk form of a message; `id` is optional for legacy sessions.
#[derive(Deserialize)]
struct MessageRecord {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    tool_call_id: Option<String>,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        let kind = MessageKind::classify(record.role, record.content.as_deref());
        Self {
            id: record.id,
            role: record.role,
            content: record.content,
            tool_calls: record.tool_calls,
            tool_call_id: record.tool_call_id,
            kind,
        }
    }
}

impl Message {
    fn new(role: Role, content: Option<String>) -> Self {
        let kind = MessageKind::classify(role, content.as_deref());
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            kind,
        }
    }

    /// Creates a message with [`Role::System`].
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, Some(content.into()))
    }

    /// Creates a message with [`Role::User`].
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, Some(content.into()))
    }

    /// Creates a message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Some(content.into()))
    }

    /// Creates an assistant turn that requests tool execution.
    ///
    /// Empty `content` is stored as `None`.
    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content.filter(|c| !c.is_empty()));
        if !tool_calls.is_empty() {
            msg.tool_calls = Some(tool_calls);
        }
        msg
    }

    /// Creates a tool result message answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, Some(content.into()));
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Creates a summary message (role `user`, content prefixed with [`SUMMARY_PREFIX`]).
    pub fn summary(text: impl AsRef<str>) -> Self {
        Self::new(
            Role::User,
            Some(format!("{SUMMARY_PREFIX}{}", text.as_ref())),
        )
    }

    /// Regular turn or compaction summary.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Whether this message is a compaction summary.
    pub fn is_summary(&self) -> bool {
        self.kind == MessageKind::Summary
    }

    /// Content text, or `""` when absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    /// Summary body without the prefix, if this is a summary message.
    pub fn summary_text(&self) -> Option<&str> {
        if self.is_summary() {
            self.content
                .as_deref()
                .and_then(|c| c.strip_prefix(SUMMARY_PREFIX))
        } else {
            None
        }
    }

    /// Tool calls carried by this message, empty if none.
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    /// Whether this is an assistant turn with at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// Borrowed request form of this message.
    pub fn to_wire(&self) -> WireMessage<'_> {
        WireMessage::from(self)
    }
}

/// The subset of a [`Message`] sent to the chat-completions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage<'a> {
    /// Author role.
    pub role: Role,
    /// Text content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<&'a str>,
    /// Tool calls of an assistant turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<&'a [ToolCall]>,
    /// Call answered by a tool turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(msg: &'a Message) -> Self {
        Self {
            role: msg.role,
            content: msg.content.as_deref(),
            tool_calls: msg.tool_calls.as_deref(),
            tool_call_id: msg.tool_call_id.as_deref(),
        }
    }
}
