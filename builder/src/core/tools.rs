//! The closed tool contract offered to the oracle.
//!
//! Every tool has a JSON Schema for its arguments. [`validate_call`] checks a
//! raw [`ToolCall`] against that contract and turns it into a typed
//! [`ToolRequest`]; nothing is executed here.

use std::fmt;
use std::str::FromStr;

use jsonschema::validator_for;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::core::types::{SessionStatus, ToolCall, ToolErrorKind};
use crate::core::workspace::WorkspaceError;

/// The enumerated tool set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    CreateDirectory,
    CreateFile,
    UpdateFile,
    FetchCode,
    StoreCode,
    RetrieveCode,
    ListAllFunctions,
    TaskCompleted,
}

impl ToolName {
    pub const ALL: [ToolName; 8] = [
        ToolName::CreateDirectory,
        ToolName::CreateFile,
        ToolName::UpdateFile,
        ToolName::FetchCode,
        ToolName::StoreCode,
        ToolName::RetrieveCode,
        ToolName::ListAllFunctions,
        ToolName::TaskCompleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateDirectory => "create_directory",
            Self::CreateFile => "create_file",
            Self::UpdateFile => "update_file",
            Self::FetchCode => "fetch_code",
            Self::StoreCode => "store_code",
            Self::RetrieveCode => "retrieve_code",
            Self::ListAllFunctions => "list_all_functions",
            Self::TaskCompleted => "task_completed",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::CreateDirectory => {
                "Create a directory (and any missing parents) at the given workspace path. No-op if it already exists."
            }
            Self::CreateFile => {
                "Create a file at the given workspace path with the given content, overwriting it if it exists."
            }
            Self::UpdateFile => "Replace the content of an existing file.",
            Self::FetchCode => "Return the current content of a file in the workspace.",
            Self::StoreCode => {
                "Store a reusable code fragment in code memory and return its content-derived id. Storing identical code again returns the existing id."
            }
            Self::RetrieveCode => "Return the code fragment stored under the given id.",
            Self::ListAllFunctions => {
                "List every stored code fragment with its id, name and description, oldest first."
            }
            Self::TaskCompleted => {
                "Declare the application finished. Rejected while required entry points are missing."
            }
        }
    }

    /// JSON Schema for the tool's arguments.
    pub fn parameters(self) -> Value {
        let path = json!({"type": "string", "description": "Path relative to the workspace root."});
        let content = json!({"type": "string", "description": "Full file or code content."});
        match self {
            Self::CreateDirectory | Self::FetchCode => object_schema(json!({"path": path}), &["path"]),
            Self::CreateFile | Self::UpdateFile => object_schema(
                json!({"path": path, "content": content}),
                &["path", "content"],
            ),
            Self::StoreCode => object_schema(
                json!({
                    "content": content,
                    "name": {"type": "string", "description": "Optional function name."},
                    "description": {"type": "string", "description": "Optional one-line summary."}
                }),
                &["content"],
            ),
            Self::RetrieveCode => object_schema(
                json!({"id": {"type": "string", "description": "Id returned by store_code."}}),
                &["id"],
            ),
            Self::ListAllFunctions | Self::TaskCompleted => object_schema(json!({}), &[]),
        }
    }

    pub fn spec(self) -> ToolSpec {
        ToolSpec {
            name: self.as_str().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = ToolName::ALL.iter().map(|t| t.as_str()).collect();
                ToolError::Validation(format!(
                    "unknown tool '{s}'; available tools: {}",
                    known.join(", ")
                ))
            })
    }
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

/// Tool description exported to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The full contract, in a stable order.
pub fn tool_contract() -> Vec<ToolSpec> {
    ToolName::ALL.into_iter().map(ToolName::spec).collect()
}

/// Recoverable tool-level failures. Always reported back to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("invalid tool call: {0}")]
    Validation(String),
    #[error("path violation for '{path}': {reason}")]
    PathViolation { path: String, reason: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("completion rejected, missing required files: {}", missing.join(", "))]
    CompletionInvariant { missing: Vec<String> },
    #[error("session is {0}; no further tool calls are accepted")]
    SessionClosed(SessionStatus),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ToolError {
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::Validation(_) => ToolErrorKind::Validation,
            Self::PathViolation { .. } => ToolErrorKind::PathViolation,
            Self::NotFound(_) => ToolErrorKind::NotFound,
            Self::Conflict(_) => ToolErrorKind::Conflict,
            Self::CompletionInvariant { .. } => ToolErrorKind::CompletionInvariant,
            Self::SessionClosed(_) => ToolErrorKind::SessionClosed,
            Self::Internal(_) => ToolErrorKind::Internal,
        }
    }
}

impl From<WorkspaceError> for ToolError {
    fn from(err: WorkspaceError) -> Self {
        match err {
            WorkspaceError::PathViolation { path, reason } => Self::PathViolation { path, reason },
            WorkspaceError::NotFound { path } => Self::NotFound(format!("file '{path}'")),
            WorkspaceError::Conflict { .. } => Self::Conflict(err.to_string()),
            WorkspaceError::Io { .. } => Self::Internal(err.to_string()),
        }
    }
}

/// A validated, typed tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRequest {
    CreateDirectory { path: String },
    CreateFile { path: String, content: String },
    UpdateFile { path: String, content: String },
    FetchCode { path: String },
    StoreCode {
        content: String,
        name: Option<String>,
        description: Option<String>,
    },
    RetrieveCode { id: String },
    ListAllFunctions,
    TaskCompleted,
}

impl ToolRequest {
    pub fn tool(&self) -> ToolName {
        match self {
            Self::CreateDirectory { .. } => ToolName::CreateDirectory,
            Self::CreateFile { .. } => ToolName::CreateFile,
            Self::UpdateFile { .. } => ToolName::UpdateFile,
            Self::FetchCode { .. } => ToolName::FetchCode,
            Self::StoreCode { .. } => ToolName::StoreCode,
            Self::RetrieveCode { .. } => ToolName::RetrieveCode,
            Self::ListAllFunctions => ToolName::ListAllFunctions,
            Self::TaskCompleted => ToolName::TaskCompleted,
        }
    }
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct FileArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct StoreArgs {
    content: String,
    name: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct IdArgs {
    id: String,
}

/// Check `call` against the contract: known tool, object arguments, schema.
pub fn validate_call(call: &ToolCall) -> Result<ToolRequest, ToolError> {
    let tool: ToolName = call.name.parse()?;
    let arguments = match &call.arguments {
        Value::Object(map) => Value::Object(map.clone()),
        // Some providers send `null` for argument-less calls.
        Value::Null => Value::Object(Map::new()),
        Value::String(raw) => {
            return Err(ToolError::Validation(format!(
                "arguments for '{tool}' must be a JSON object, got unparseable text: {}",
                preview(raw)
            )));
        }
        other => {
            return Err(ToolError::Validation(format!(
                "arguments for '{tool}' must be a JSON object, got {}",
                json_type(other)
            )));
        }
    };
    check_schema(tool, &arguments)?;

    let request = match tool {
        ToolName::CreateDirectory => {
            let args: PathArgs = typed(tool, arguments)?;
            ToolRequest::CreateDirectory { path: args.path }
        }
        ToolName::CreateFile => {
            let args: FileArgs = typed(tool, arguments)?;
            ToolRequest::CreateFile {
                path: args.path,
                content: args.content,
            }
        }
        ToolName::UpdateFile => {
            let args: FileArgs = typed(tool, arguments)?;
            ToolRequest::UpdateFile {
                path: args.path,
                content: args.content,
            }
        }
        ToolName::FetchCode => {
            let args: PathArgs = typed(tool, arguments)?;
            ToolRequest::FetchCode { path: args.path }
        }
        ToolName::StoreCode => {
            let args: StoreArgs = typed(tool, arguments)?;
            ToolRequest::StoreCode {
                content: args.content,
                name: args.name,
                description: args.description,
            }
        }
        ToolName::RetrieveCode => {
            let args: IdArgs = typed(tool, arguments)?;
            ToolRequest::RetrieveCode { id: args.id }
        }
        ToolName::ListAllFunctions => ToolRequest::ListAllFunctions,
        ToolName::TaskCompleted => ToolRequest::TaskCompleted,
    };
    Ok(request)
}

fn check_schema(tool: ToolName, arguments: &Value) -> Result<(), ToolError> {
    let schema = tool.parameters();
    let validator = validator_for(&schema)
        .map_err(|err| ToolError::Internal(format!("invalid schema for '{tool}': {err}")))?;
    let messages: Vec<String> = validator
        .iter_errors(arguments)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        return Ok(());
    }
    Err(ToolError::Validation(format!(
        "arguments for '{tool}' do not match its schema: {}",
        messages.join("; ")
    )))
}

fn typed<T: DeserializeOwned>(tool: ToolName, arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments)
        .map_err(|err| ToolError::Validation(format!("arguments for '{tool}': {err}")))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn preview(raw: &str) -> String {
    const LIMIT: usize = 80;
    match raw.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &raw[..idx]),
        None => raw.to_string(),
    }
}
