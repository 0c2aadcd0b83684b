use serde::{Deserialize, Serialize};

fn function_type() -> String {
    "function".to_string()
}

/// A tool invocation requested by the assistant.
///
/// Serializes to the chat-completions shape
/// `{"id", "type": "function", "function": {"name", "arguments"}, "index"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the model; tool results refer back to it.
    pub id: String,
    /// Always `"function"` for chat completions.
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    /// Function name and JSON-encoded arguments.
    pub function: FunctionCall,
    /// Position of the call in the streamed `tool_calls` array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// Function name plus its arguments as a raw JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments exactly as the model produced them (JSON text).
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    /// Creates a function tool call without a stream index.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
            index: None,
        }
    }

    /// Sets the stream index.
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }
}

/// Output of an executed tool, appended to the history as a `tool` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The [`ToolCall::id`] this result answers.
    pub tool_call_id: String,
    /// Textual output produced by the tool.
    pub content: String,
}

impl ToolResult {
    /// Creates a tool result for the given call.
    pub fn new(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

/// Schema of a callable tool, sent verbatim in the request's `tools` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Always `"function"`.
    #[serde(rename = "type", default = "function_type")]
    pub tool_type: String,
    /// Name, description and JSON-schema parameters.
    pub function: FunctionDefinition,
}

/// The `function` member of a [`ToolDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Tool name the model uses to call it.
    pub name: String,
    /// Human-readable description for the model.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Creates a function tool definition.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: function_type(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Supplies the tool definitions attached to every chat request.
///
/// Typically backed by a tool registry. An empty list means the request is
/// sent without `tools`/`tool_choice`.
pub trait ToolDefinitionProvider: Send + Sync {
    /// Ordered list of tool definitions.
    fn tool_definitions(&self) -> Vec<ToolDefinition>;
}

impl ToolDefinitionProvider for Vec<ToolDefinition> {
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.clone()
    }
}

/// A provider with no tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTools;

impl ToolDefinitionProvider for NoTools {
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }
}
