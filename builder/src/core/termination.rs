//! Completion invariant checked before a session may end.

use crate::core::path::WorkspacePath;
use crate::core::session::Session;
use crate::core::tools::ToolError;
use crate::core::types::SessionStatus;
use crate::core::workspace::Workspace;

/// Files that must exist before `task_completed` is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionPolicy {
    pub entry_points: Vec<WorkspacePath>,
}

impl CompletionPolicy {
    pub fn new(entry_points: Vec<WorkspacePath>) -> Self {
        Self { entry_points }
    }

    /// Entry points that are not files in `workspace`.
    pub fn missing(&self, workspace: &Workspace) -> Vec<String> {
        self.entry_points
            .iter()
            .filter(|path| !workspace.is_file(path))
            .map(ToString::to_string)
            .collect()
    }
}

/// Accept or reject a completion request.
///
/// On success the session moves to `Completed`. On failure the session is left
/// untouched so the loop can continue.
pub fn try_complete(
    session: &mut Session,
    workspace: &Workspace,
    policy: &CompletionPolicy,
) -> Result<(), ToolError> {
    if session.is_terminal() {
        return Err(ToolError::SessionClosed(session.status()));
    }
    let missing = policy.missing(workspace);
    if !missing.is_empty() {
        return Err(ToolError::CompletionInvariant { missing });
    }
    if session.status() == SessionStatus::Planning {
        session
            .transition(SessionStatus::Executing)
            .map_err(|err| ToolError::Internal(err.to_string()))?;
    }
    session
        .transition(SessionStatus::Completed)
        .map_err(|err| ToolError::Internal(err.to_string()))
}
