//! In-memory workspace tree.
//!
//! The tree is the single source of truth for what has been built so far. It
//! performs no I/O: mutations are first *planned* (validated against the tree
//! and returned as a [`Mutation`]) and then *applied*. The sandbox in
//! `io::sandbox` uses the split to put a mutation on disk before committing it
//! to memory.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::core::path::WorkspacePath;

/// Errors raised by workspace operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkspaceError {
    #[error("path violation for '{path}': {reason}")]
    PathViolation { path: String, reason: String },
    #[error("not found: {path}")]
    NotFound { path: String },
    #[error("conflict at '{path}': {reason}")]
    Conflict { path: String, reason: String },
    #[error("sandbox i/o failed for '{path}': {message}")]
    Io { path: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File,
}

/// A single node of the workspace tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceNode {
    pub path: WorkspacePath,
    pub kind: NodeKind,
    /// `None` for directories and for files that are not UTF-8 text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Directory,
    File(String),
    /// A file found on disk whose bytes are not UTF-8 text.
    Opaque,
}

/// A validated change that has not been applied yet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mutation {
    /// Directories that do not exist yet, outermost first.
    pub create_dirs: Vec<WorkspacePath>,
    /// File to write, if any.
    pub write: Option<(WorkspacePath, String)>,
    /// Whether `write` replaces an existing file.
    pub overwrites: bool,
}

impl Mutation {
    pub fn is_noop(&self) -> bool {
        self.create_dirs.is_empty() && self.write.is_none()
    }
}

/// The project tree under construction. The root directory is implicit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workspace {
    entries: BTreeMap<WorkspacePath, Entry>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan `create_directory`: no-op when the directory already exists.
    pub fn plan_create_dir(&self, path: &WorkspacePath) -> Result<Mutation, WorkspaceError> {
        if path.is_root() {
            return Ok(Mutation::default());
        }
        let mut create_dirs = self.missing_parents(path)?;
        match self.entries.get(path) {
            Some(Entry::Directory) => {}
            Some(Entry::File(_) | Entry::Opaque) => {
                return Err(conflict(path, "a file already exists at this path"));
            }
            None => create_dirs.push(path.clone()),
        }
        Ok(Mutation {
            create_dirs,
            write: None,
            overwrites: false,
        })
    }

    /// Plan `create_file`: creates missing parents and overwrites existing content.
    pub fn plan_write(
        &self,
        path: &WorkspacePath,
        content: &str,
    ) -> Result<Mutation, WorkspaceError> {
        if path.is_root() {
            return Err(conflict(path, "the workspace root is a directory"));
        }
        let create_dirs = self.missing_parents(path)?;
        let overwrites = match self.entries.get(path) {
            Some(Entry::Directory) => {
                return Err(conflict(path, "a directory already exists at this path"));
            }
            Some(Entry::File(_) | Entry::Opaque) => true,
            None => false,
        };
        Ok(Mutation {
            create_dirs,
            write: Some((path.clone(), content.to_string())),
            overwrites,
        })
    }

    /// Plan `update_file`: the file must already exist.
    pub fn plan_update(
        &self,
        path: &WorkspacePath,
        content: &str,
    ) -> Result<Mutation, WorkspaceError> {
        match self.entries.get(path) {
            Some(Entry::File(_) | Entry::Opaque) => Ok(Mutation {
                create_dirs: Vec::new(),
                write: Some((path.clone(), content.to_string())),
                overwrites: true,
            }),
            Some(Entry::Directory) => Err(conflict(path, "cannot update a directory")),
            None if path.is_root() => Err(conflict(path, "cannot update the workspace root")),
            None => Err(WorkspaceError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Commit a planned mutation.
    pub fn apply(&mut self, mutation: Mutation) {
        for dir in mutation.create_dirs {
            self.entries.insert(dir, Entry::Directory);
        }
        if let Some((path, content)) = mutation.write {
            self.entries.insert(path, Entry::File(content));
        }
    }

    pub fn create_dir(&mut self, path: &WorkspacePath) -> Result<(), WorkspaceError> {
        let mutation = self.plan_create_dir(path)?;
        self.apply(mutation);
        Ok(())
    }

    pub fn write(&mut self, path: &WorkspacePath, content: &str) -> Result<(), WorkspaceError> {
        let mutation = self.plan_write(path, content)?;
        self.apply(mutation);
        Ok(())
    }

    pub fn update(&mut self, path: &WorkspacePath, content: &str) -> Result<(), WorkspaceError> {
        let mutation = self.plan_update(path, content)?;
        self.apply(mutation);
        Ok(())
    }

    /// Record a file that exists but cannot be read as text. Overwriting it
    /// later replaces it with a regular file.
    pub fn insert_opaque(&mut self, path: &WorkspacePath) -> Result<(), WorkspaceError> {
        let mutation = self.plan_write(path, "")?;
        for dir in mutation.create_dirs {
            self.entries.insert(dir, Entry::Directory);
        }
        self.entries.insert(path.clone(), Entry::Opaque);
        Ok(())
    }

    /// Read a file's content.
    pub fn read(&self, path: &WorkspacePath) -> Result<&str, WorkspaceError> {
        match self.entries.get(path) {
            Some(Entry::File(content)) => Ok(content),
            Some(Entry::Opaque) => Err(conflict(path, "file is not UTF-8 text")),
            Some(Entry::Directory) => Err(conflict(path, "path is a directory")),
            None if path.is_root() => Err(conflict(path, "path is the workspace root")),
            None => Err(WorkspaceError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    pub fn is_file(&self, path: &WorkspacePath) -> bool {
        matches!(self.entries.get(path), Some(Entry::File(_) | Entry::Opaque))
    }

    pub fn is_dir(&self, path: &WorkspacePath) -> bool {
        path.is_root() || matches!(self.entries.get(path), Some(Entry::Directory))
    }

    /// File paths in lexicographic order.
    pub fn files(&self) -> impl Iterator<Item = &WorkspacePath> {
        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::File(_) | Entry::Opaque))
            .map(|(path, _)| path)
    }

    /// Directory paths (excluding the root) in lexicographic order.
    pub fn directories(&self) -> impl Iterator<Item = &WorkspacePath> {
        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Directory))
            .map(|(path, _)| path)
    }

    /// Inspect a single node.
    pub fn get(&self, path: &WorkspacePath) -> Option<WorkspaceNode> {
        self.entries.get(path).map(|entry| node(path, entry))
    }

    /// Snapshot of every node.
    pub fn nodes(&self) -> Vec<WorkspaceNode> {
        self.entries
            .iter()
            .map(|(path, entry)| node(path, entry))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn missing_parents(&self, path: &WorkspacePath) -> Result<Vec<WorkspacePath>, WorkspaceError> {
        let mut missing = Vec::new();
        for ancestor in path.ancestors() {
            match self.entries.get(&ancestor) {
                Some(Entry::Directory) => {}
                Some(Entry::File(_) | Entry::Opaque) => {
                    return Err(conflict(
                        path,
                        &format!("parent '{ancestor}' is a file"),
                    ));
                }
                None => missing.push(ancestor),
            }
        }
        Ok(missing)
    }
}

fn node(path: &WorkspacePath, entry: &Entry) -> WorkspaceNode {
    match entry {
        Entry::Directory => WorkspaceNode {
            path: path.clone(),
            kind: NodeKind::Directory,
            content: None,
        },
        Entry::File(content) => WorkspaceNode {
            path: path.clone(),
            kind: NodeKind::File,
            content: Some(content.clone()),
        },
        Entry::Opaque => WorkspaceNode {
            path: path.clone(),
            kind: NodeKind::File,
            content: None,
        },
    }
}

fn conflict(path: &WorkspacePath, reason: &str) -> WorkspaceError {
    WorkspaceError::Conflict {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: &str) -> WorkspacePath {
        WorkspacePath::parse(raw, None).expect("valid path")
    }

    #[test]
    fn write_creates_intermediate_directories() {
        let mut ws = Workspace::new();
        ws.write(&p("templates/partials/nav.html"), "<nav/>")
            .expect("write");

        let dirs: Vec<&str> = ws.directories().map(|d| d.as_str()).collect();
        assert_eq!(dirs, vec!["templates", "templates/partials"]);
        assert_eq!(ws.read(&p("templates/partials/nav.html")).expect("read"), "<nav/>");
    }

    #[test]
    fn write_is_idempotent_under_overwrite() {
        let mut ws = Workspace::new();
        ws.write(&p("a.txt"), "one").expect("first");
        let plan = ws.plan_write(&p("a.txt"), "two").expect("plan");
        assert!(plan.overwrites);
        ws.apply(plan);
        ws.write(&p("a.txt"), "two").expect("again");
        assert_eq!(ws.read(&p("a.txt")).expect("read"), "two");
        assert_eq!(ws.files().count(), 1);
    }

    #[test]
    fn create_dir_is_noop_when_present() {
        let mut ws = Workspace::new();
        ws.create_dir(&p("routes")).expect("create");
        let plan = ws.plan_create_dir(&p("routes")).expect("plan");
        assert!(plan.is_noop());
        assert!(ws.is_dir(&p("routes")));
    }

    #[test]
    fn update_missing_file_is_not_found_and_leaves_tree_unchanged() {
        let mut ws = Workspace::new();
        ws.create_dir(&p("routes")).expect("create");
        let before = ws.clone();

        let err = ws.update(&p("routes/todos.py"), "x").expect_err("missing");
        assert!(matches!(err, WorkspaceError::NotFound { .. }));
        assert_eq!(ws, before);
    }

    #[test]
    fn read_missing_is_not_found() {
        let ws = Workspace::new();
        let err = ws.read(&p("nope.txt")).expect_err("missing");
        assert_eq!(
            err,
            WorkspaceError::NotFound {
                path: "nope.txt".to_string()
            }
        );
    }

    #[test]
    fn kind_conflicts_are_rejected() {
        let mut ws = Workspace::new();
        ws.write(&p("file.txt"), "x").expect("write");
        ws.create_dir(&p("dir")).expect("dir");

        assert!(matches!(
            ws.create_dir(&p("file.txt")),
            Err(WorkspaceError::Conflict { .. })
        ));
        assert!(matches!(
            ws.write(&p("dir"), "x"),
            Err(WorkspaceError::Conflict { .. })
        ));
        assert!(matches!(
            ws.write(&p("file.txt/child"), "x"),
            Err(WorkspaceError::Conflict { .. })
        ));
        assert!(matches!(
            ws.write(&WorkspacePath::root(), "x"),
            Err(WorkspaceError::Conflict { .. })
        ));
    }

    #[test]
    fn every_node_has_a_parent_directory() {
        let mut ws = Workspace::new();
        ws.write(&p("a/b/c.txt"), "c").expect("write");
        ws.create_dir(&p("x/y")).expect("dir");

        for node in ws.nodes() {
            let parent = node.path.parent().expect("non-root");
            assert!(ws.is_dir(&parent), "missing parent for {}", node.path);
        }
    }

    #[test]
    fn get_inspects_without_side_effects() {
        let mut ws = Workspace::new();
        ws.write(&p("static/app.css"), "body {}").expect("write");

        let file = ws.get(&p("static/app.css")).expect("file");
        assert_eq!(file.kind, NodeKind::File);
        assert_eq!(file.content.as_deref(), Some("body {}"));
        assert_eq!(ws.get(&p("static")).expect("dir").kind, NodeKind::Directory);
        assert!(ws.get(&p("missing")).is_none());
        assert_eq!(ws.len(), 2);
    }

    #[test]
    fn opaque_files_exist_but_cannot_be_read() {
        let mut ws = Workspace::new();
        ws.insert_opaque(&p("static/logo.png")).expect("insert");

        assert!(ws.is_file(&p("static/logo.png")));
        assert!(ws.is_dir(&p("static")));
        assert!(matches!(
            ws.read(&p("static/logo.png")),
            Err(WorkspaceError::Conflict { .. })
        ));
        assert_eq!(ws.get(&p("static/logo.png")).expect("node").content, None);

        let plan = ws.plan_write(&p("static/logo.png"), "svg").expect("plan");
        assert!(plan.overwrites);
        ws.apply(plan);
        assert_eq!(ws.read(&p("static/logo.png")).expect("read"), "svg");
    }
}
