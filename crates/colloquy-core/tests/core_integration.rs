#![allow(clippy::unwrap_used, clippy::expect_used)]

use colloquy_core::*;

// ---------------------------------------------------------------------------
// 1. Conversation round-trips through JSON with tool linkage intact
// ---------------------------------------------------------------------------

#[test]
fn conversation_serialization_roundtrip() {
    let conversation = vec![
        Message::system("You are a coding assistant."),
        Message::user("List the files"),
        Message::assistant_with_tool_calls(
            Some("Checking.".into()),
            vec![ToolCall::new("call_abc123", "list_files", r#"{"dir":"."}"#).with_index(0)],
        ),
        Message::tool("call_abc123", "main.rs\nlib.rs"),
        Message::assistant("There are two files."),
    ];

    let json = serde_json::to_string_pretty(&conversation).unwrap();
    let back: Vec<Message> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, conversation);

    let call = &back[2].tool_calls()[0];
    assert_eq!(back[3].tool_call_id.as_deref(), Some(call.id.as_str()));
    assert_eq!(call.index, Some(0));
}

// ---------------------------------------------------------------------------
// 2. Tool results map onto tool messages
// ---------------------------------------------------------------------------

#[test]
fn tool_result_to_message() {
    let result = ToolResult::new("call_1", "Found 42 results");
    let msg = Message::tool(&result.tool_call_id, &result.content);
    assert_eq!(msg.role, Role::Tool);
    assert_eq!(msg.text(), "Found 42 results");
    assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
}

// ---------------------------------------------------------------------------
// 3. Role wire names
// ---------------------------------------------------------------------------

#[test]
fn role_wire_names() {
    for role in [Role::System, Role::User, Role::Assistant, Role::Tool] {
        let json = serde_json::to_string(&role).unwrap();
        assert_eq!(json, format!("\"{}\"", role.as_str()));
    }
}

// ---------------------------------------------------------------------------
// 4. Error conversions
// ---------------------------------------------------------------------------

#[test]
fn json_error_converts() {
    let err: ColloquyError = serde_json::from_str::<Message>("not json").unwrap_err().into();
    assert!(matches!(err, ColloquyError::Json(_)));
    assert!(!err.is_retryable());
}

#[test]
fn io_error_converts() {
    let err: ColloquyError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(err.to_string().contains("gone"));
}
