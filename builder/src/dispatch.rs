//! Tool dispatch: validate one tool call and execute it against the sandbox or
//! code memory.
//!
//! Every outcome, including validation failures, comes back as a
//! [`ToolResult`]; nothing here returns an error to the caller.

use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::session::Session;
use crate::core::termination::{CompletionPolicy, try_complete};
use crate::core::tools::{ToolError, ToolRequest, validate_call};
use crate::core::types::{ToolCall, ToolResult};
use crate::io::code_store::{CodeMetadata, CodeStore};
use crate::io::sandbox::{Sandbox, WriteEffect};

/// Everything a tool handler may touch.
pub struct ToolContext<'a> {
    pub sandbox: &'a mut Sandbox,
    pub store: &'a CodeStore,
    pub completion: &'a CompletionPolicy,
}

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub result: ToolResult,
    /// The call was an accepted `task_completed`.
    pub completed: bool,
}

/// Validate and execute `call`.
#[instrument(skip_all, fields(session = session.id(), tool = %call.name, call_id = %call.id))]
pub fn dispatch(session: &mut Session, call: &ToolCall, ctx: &mut ToolContext<'_>) -> Dispatch {
    if session.is_terminal() {
        let err = ToolError::SessionClosed(session.status());
        warn!(status = %session.status(), "tool call on closed session");
        return failed(call, &err);
    }

    let request = match validate_call(call) {
        Ok(request) => request,
        Err(err) => {
            debug!(err = %err, "tool call rejected");
            return failed(call, &err);
        }
    };

    let completing = matches!(request, ToolRequest::TaskCompleted);
    match execute(session, request, ctx) {
        Ok(data) => {
            info!("tool call succeeded");
            Dispatch {
                result: ToolResult::ok(call, data),
                completed: completing,
            }
        }
        Err(err) => {
            debug!(kind = ?err.kind(), err = %err, "tool call failed");
            failed(call, &err)
        }
    }
}

fn failed(call: &ToolCall, err: &ToolError) -> Dispatch {
    Dispatch {
        result: ToolResult::failed(call, err.kind(), err.to_string()),
        completed: false,
    }
}

fn execute(
    session: &mut Session,
    request: ToolRequest,
    ctx: &mut ToolContext<'_>,
) -> Result<Value, ToolError> {
    match request {
        ToolRequest::CreateDirectory { path } => {
            let (path, created) = ctx.sandbox.create_dir(&path)?;
            let message = if created {
                format!("Created directory {path}")
            } else {
                format!("Directory {path} already exists")
            };
            Ok(json!({"path": path, "message": message}))
        }
        ToolRequest::CreateFile { path, content } => {
            let (path, effect) = ctx.sandbox.write(&path, &content)?;
            let message = match effect {
                WriteEffect::Created => format!("Created file {path}"),
                WriteEffect::Updated => format!("Updated file {path}"),
            };
            Ok(json!({"path": path, "message": message}))
        }
        ToolRequest::UpdateFile { path, content } => {
            let path = ctx.sandbox.update(&path, &content)?;
            Ok(json!({"path": path, "message": format!("Updated file {path}")}))
        }
        ToolRequest::FetchCode { path } => {
            let (path, content) = ctx.sandbox.read(&path)?;
            Ok(json!({"path": path, "content": content}))
        }
        ToolRequest::StoreCode {
            content,
            name,
            description,
        } => {
            let stored = ctx
                .store
                .store(&content, CodeMetadata { name, description })
                .map_err(|err| ToolError::Internal(format!("{err:#}")))?;
            Ok(json!({"id": stored.record.id, "reused": stored.reused}))
        }
        ToolRequest::RetrieveCode { id } => {
            let record = ctx
                .store
                .retrieve(&id)
                .map_err(|err| ToolError::Internal(format!("{err:#}")))?
                .ok_or_else(|| ToolError::NotFound(format!("stored code '{id}'")))?;
            Ok(json!({"id": record.id, "content": record.source}))
        }
        ToolRequest::ListAllFunctions => {
            let summaries: Vec<_> = ctx.store.list_all().collect();
            serde_json::to_value(summaries)
                .map_err(|err| ToolError::Internal(format!("serialize summaries: {err}")))
        }
        ToolRequest::TaskCompleted => {
            try_complete(session, ctx.sandbox.tree(), ctx.completion)?;
            Ok(json!({"message": "Task completed"}))
        }
    }
}
