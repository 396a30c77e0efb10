//! Workspace path normalization and sandbox escape rules.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::workspace::WorkspaceError;

/// A normalized, `/`-separated path relative to the workspace root.
///
/// The empty path denotes the root itself. Every value of this type has
/// already passed the escape checks in [`WorkspacePath::parse`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspacePath(String);

impl WorkspacePath {
    /// The workspace root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Normalize `raw` against the sandbox.
    ///
    /// Backslashes are treated as separators, `.` and empty segments are
    /// dropped. A `..` segment, a NUL byte, a drive prefix, or an absolute
    /// path that does not lie under `sandbox_root` is a path violation.
    pub fn parse(raw: &str, sandbox_root: Option<&Path>) -> Result<Self, WorkspaceError> {
        let violation = |reason: &str| WorkspaceError::PathViolation {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.contains('\0') {
            return Err(violation("path contains a NUL byte"));
        }
        let unified = raw.replace('\\', "/");
        if has_drive_prefix(&unified) {
            return Err(violation("drive-qualified paths are not allowed"));
        }

        let relative = if unified.starts_with('/') {
            strip_sandbox_prefix(&unified, sandbox_root)
                .ok_or_else(|| violation("absolute path outside the workspace root"))?
        } else {
            unified.as_str()
        };

        let mut segments = Vec::new();
        for segment in relative.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(violation("parent-directory traversal is not allowed")),
                name => segments.push(name),
            }
        }
        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Parent directory, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Proper ancestors from the outermost (excluding the root) down to the
    /// immediate parent.
    pub fn ancestors(&self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(path) = current {
            if path.is_root() {
                break;
            }
            current = path.parent();
            out.push(path);
        }
        out.reverse();
        out
    }

    /// Path segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str(".")
        } else {
            f.write_str(&self.0)
        }
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn strip_sandbox_prefix<'a>(path: &'a str, sandbox_root: Option<&Path>) -> Option<&'a str> {
    let root = sandbox_root?.to_str()?.replace('\\', "/");
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return None;
    }
    let rest = path.strip_prefix(root)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        // `/srv/app-other` must not match root `/srv/app`.
        None
    }
}
