//! Shared conversation types.
//!
//! These types define the contracts between the driver, the dispatcher and the
//! oracle. They serialize to the JSON shapes used in transcripts and on the
//! oracle bridge's stdin.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured request to run one tool, as proposed by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Argument mapping. Anything other than a JSON object is rejected by the
    /// dispatcher.
    pub arguments: Value,
}

/// Classification of a failed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Validation,
    PathViolation,
    NotFound,
    Conflict,
    CompletionInvariant,
    SessionClosed,
    Internal,
}

/// Structured error carried by a failed [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolErrorKind,
    pub message: String,
}

/// Outcome of dispatching one [`ToolCall`].
///
/// Exactly one of `data` and `error` is set, matching `success`; use the
/// constructors to keep that true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, data: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(call: &ToolCall, kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            success: false,
            data: None,
            error: Some(ToolFailure {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Body of a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    Action {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        call: ToolCall,
    },
    Result { result: ToolResult },
}

/// One entry of the append-only session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// Id of the tool call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    pub fn action(text: Option<String>, call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Action { text, call },
            tool_call_id: None,
        }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        let call_id = result.call_id.clone();
        Self {
            role: Role::Tool,
            content: MessageContent::Result { result },
            tool_call_id: Some(call_id),
        }
    }

    /// Tool-role feedback that does not answer a specific call.
    pub fn correction(text: impl Into<String>) -> Self {
        Self::text(Role::Tool, text)
    }

    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text { text: text.into() },
            tool_call_id: None,
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Planning,
    /// Transient: a tool call is being dispatched.
    Executing,
    Completed,
    Failed,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
