//! Session transcripts under `.builder/sessions/<id>/transcript.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::path::WorkspacePath;
use crate::core::session::Session;
use crate::core::types::{Message, SessionStatus};
use crate::core::workspace::Workspace;

/// `session-<utc timestamp>-<6 alphanumerics>`.
pub fn new_session_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("session-{stamp}-{suffix}")
}

pub fn transcript_path(sessions_dir: &Path, session_id: &str) -> PathBuf {
    sessions_dir.join(session_id).join("transcript.json")
}

/// Everything needed to inspect a session after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub description: String,
    pub status: SessionStatus,
    pub iteration: u32,
    pub max_iterations: u32,
    pub updated_at: String,
    pub files: Vec<WorkspacePath>,
    pub messages: Vec<Message>,
}

impl SessionSnapshot {
    pub fn capture(session: &Session, max_iterations: u32, workspace: &Workspace) -> Self {
        Self {
            id: session.id().to_string(),
            description: session.description().to_string(),
            status: session.status(),
            iteration: session.iteration(),
            max_iterations,
            updated_at: Utc::now().to_rfc3339(),
            files: workspace.files().cloned().collect(),
            messages: session.messages().to_vec(),
        }
    }
}

/// Atomically write a transcript (temp file + rename).
pub fn write_transcript(path: &Path, snapshot: &SessionSnapshot) -> Result<()> {
    debug!(path = %path.display(), status = %snapshot.status, iteration = snapshot.iteration, "writing transcript");
    let mut buf = serde_json::to_string_pretty(snapshot).context("serialize transcript")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("transcript path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp transcript {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace transcript {}", path.display()))
}

pub fn load_transcript(path: &Path) -> Result<SessionSnapshot> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read transcript {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse transcript {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_follow_the_documented_shape() {
        let id = new_session_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3, "{id}");
        assert_eq!(parts[0], "session");
        assert_eq!(parts[1].len(), "20261017T120000Z".len());
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(new_session_id(), new_session_id());
    }

    #[test]
    fn transcript_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = transcript_path(temp.path(), "session-1");

        let session = Session::new("session-1", "a todo app", "system");
        let mut workspace = Workspace::new();
        workspace
            .write(
                &WorkspacePath::parse("templates/index.html", None).expect("path"),
                "<html></html>",
            )
            .expect("write");

        let snapshot = SessionSnapshot::capture(&session, 50, &workspace);
        write_transcript(&path, &snapshot).expect("write");
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = load_transcript(&path).expect("load");
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.files.len(), 1);
        assert_eq!(loaded.messages.len(), 2);
    }
}
