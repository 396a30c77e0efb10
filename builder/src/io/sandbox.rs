//! Sandbox: the workspace tree mirrored onto a real directory.
//!
//! Every mutation is planned against the in-memory [`Workspace`], applied to
//! disk, and only then committed to memory, so a failed disk write leaves both
//! sides unchanged. No path outside the sandbox root is ever touched.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::path::WorkspacePath;
use crate::core::workspace::{Mutation, Workspace, WorkspaceError};

/// What a write did, for tool feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEffect {
    Created,
    Updated,
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: Option<PathBuf>,
    tree: Workspace,
}

impl Sandbox {
    /// A sandbox with no disk mirror.
    pub fn in_memory() -> Self {
        Self {
            root: None,
            tree: Workspace::new(),
        }
    }

    /// Open (or create) a sandbox rooted at `root`, loading existing files.
    ///
    /// Symbolic links and entries whose names are not valid workspace paths are
    /// skipped; links are never followed. Files that are not UTF-8 text are
    /// loaded as present but unreadable.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("create sandbox {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("canonicalize sandbox {}", root.display()))?;

        let mut tree = Workspace::new();
        let mut walker = WalkDir::new(&root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.with_context(|| format!("walk sandbox {}", root.display()))?;
            let file_type = entry.file_type();
            let relative = entry
                .path()
                .strip_prefix(&root)
                .with_context(|| format!("strip sandbox prefix {}", entry.path().display()))?;
            let Some(raw) = relative.to_str() else {
                warn!(path = %entry.path().display(), "skipping non-utf8 path");
                skip_subtree(&mut walker, file_type.is_dir());
                continue;
            };
            if file_type.is_symlink() {
                warn!(path = raw, "skipping symlink in sandbox");
                continue;
            }
            let path = match WorkspacePath::parse(raw, None) {
                Ok(path) => path,
                Err(err) => {
                    warn!(path = raw, err = %err, "skipping sandbox entry");
                    skip_subtree(&mut walker, file_type.is_dir());
                    continue;
                }
            };
            if file_type.is_dir() {
                tree.create_dir(&path)
                    .with_context(|| format!("load sandbox directory {raw}"))?;
            } else if file_type.is_file() {
                let bytes = fs::read(entry.path())
                    .with_context(|| format!("read sandbox file {raw}"))?;
                match String::from_utf8(bytes) {
                    Ok(content) => tree.write(&path, &content),
                    Err(_) => {
                        debug!(path = raw, "loading non-utf8 file as opaque");
                        tree.insert_opaque(&path)
                    }
                }
                .with_context(|| format!("load sandbox file {raw}"))?;
            }
        }
        debug!(root = %root.display(), nodes = tree.len(), "sandbox opened");
        Ok(Self {
            root: Some(root),
            tree,
        })
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Inspect the tree without side effects.
    pub fn tree(&self) -> &Workspace {
        &self.tree
    }

    /// Normalize and validate `raw` against the sandbox root.
    pub fn resolve(&self, raw: &str) -> Result<WorkspacePath, WorkspaceError> {
        WorkspacePath::parse(raw, self.root.as_deref())
    }

    pub fn create_dir(&mut self, raw: &str) -> Result<(WorkspacePath, bool), WorkspaceError> {
        let path = self.resolve(raw)?;
        let mutation = self.tree.plan_create_dir(&path)?;
        let created = !mutation.is_noop();
        self.commit(mutation)?;
        Ok((path, created))
    }

    pub fn write(
        &mut self,
        raw: &str,
        content: &str,
    ) -> Result<(WorkspacePath, WriteEffect), WorkspaceError> {
        let path = self.resolve(raw)?;
        let mutation = self.tree.plan_write(&path, content)?;
        let effect = if mutation.overwrites {
            WriteEffect::Updated
        } else {
            WriteEffect::Created
        };
        self.commit(mutation)?;
        Ok((path, effect))
    }

    pub fn update(&mut self, raw: &str, content: &str) -> Result<WorkspacePath, WorkspaceError> {
        let path = self.resolve(raw)?;
        let mutation = self.tree.plan_update(&path, content)?;
        self.commit(mutation)?;
        Ok(path)
    }

    pub fn read(&self, raw: &str) -> Result<(WorkspacePath, &str), WorkspaceError> {
        let path = self.resolve(raw)?;
        let content = self.tree.read(&path)?;
        Ok((path, content))
    }

    fn commit(&mut self, mutation: Mutation) -> Result<(), WorkspaceError> {
        if let Some(root) = &self.root {
            apply_to_disk(root, &mutation)?;
        }
        self.tree.apply(mutation);
        Ok(())
    }
}

fn skip_subtree(walker: &mut walkdir::IntoIter, is_dir: bool) {
    if is_dir {
        walker.skip_current_dir();
    }
}

fn apply_to_disk(root: &Path, mutation: &Mutation) -> Result<(), WorkspaceError> {
    for dir in &mutation.create_dirs {
        let target = disk_path(root, dir)?;
        fs::create_dir_all(&target).map_err(|err| io_error(dir, &err))?;
    }
    if let Some((path, content)) = &mutation.write {
        let target = disk_path(root, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| io_error(path, &err))?;
        }
        write_atomic(&target, content).map_err(|err| io_error(path, &err))?;
    }
    Ok(())
}

/// Map a workspace path to disk, refusing to go through symlinks.
fn disk_path(root: &Path, path: &WorkspacePath) -> Result<PathBuf, WorkspaceError> {
    let mut target = root.to_path_buf();
    for segment in path.segments() {
        target.push(segment);
        if let Ok(meta) = fs::symlink_metadata(&target)
            && meta.file_type().is_symlink()
        {
            return Err(WorkspaceError::PathViolation {
                path: path.to_string(),
                reason: format!("'{segment}' is a symbolic link"),
            });
        }
    }
    Ok(target)
}

fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)
}

fn io_error(path: &WorkspacePath, err: &std::io::Error) -> WorkspaceError {
    WorkspaceError::Io {
        path: path.to_string(),
        message: err.to_string(),
    }
}
