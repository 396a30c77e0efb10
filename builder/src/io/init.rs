//! Project layout and `.builder/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{BuilderConfig, WorkspaceConfig, write_config};

/// Canonical paths within `.builder/` for a project root.
#[derive(Debug, Clone)]
pub struct BuilderPaths {
    pub root: PathBuf,
    pub builder_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
}

impl BuilderPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let builder_dir = root.join(".builder");
        Self {
            root,
            sessions_dir: builder_dir.join("sessions"),
            gitignore_path: builder_dir.join(".gitignore"),
            config_path: builder_dir.join("config.toml"),
            builder_dir,
        }
    }

    /// Resolve a config-relative path against the project root.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config.
    pub force: bool,
}

/// Scaffold directories written by `builder init`.
pub const DEFAULT_SCAFFOLD: [&str; 3] = ["templates", "static", "routes"];

/// Create `.builder/` in `root` with a starter config.
///
/// Fails if a config already exists unless `options.force` is set. Stored
/// functions and transcripts are never touched.
pub fn init_builder(root: &Path, options: &InitOptions) -> Result<BuilderPaths> {
    let paths = BuilderPaths::new(root);
    if paths.builder_dir.exists() && !paths.builder_dir.is_dir() {
        return Err(anyhow!(
            "builder init: .builder exists but is not a directory"
        ));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "builder init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.sessions_dir)
        .with_context(|| format!("create directory {}", paths.sessions_dir.display()))?;
    fs::write(&paths.gitignore_path, BUILDER_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &starter_config())?;

    Ok(paths)
}

fn starter_config() -> BuilderConfig {
    BuilderConfig {
        workspace: WorkspaceConfig {
            scaffold: DEFAULT_SCAFFOLD.iter().map(ToString::to_string).collect(),
            ..WorkspaceConfig::default()
        },
        ..BuilderConfig::default()
    }
}

const BUILDER_GITIGNORE: &str = "sessions/\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_builder(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.sessions_dir.is_dir());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("gitignore"),
            BUILDER_GITIGNORE
        );
        let cfg = load_config(&paths.config_path).expect("config");
        assert_eq!(cfg.workspace.scaffold, vec!["templates", "static", "routes"]);
        assert_eq!(cfg.max_iterations, 50);
    }

    #[test]
    fn init_without_force_refuses_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_builder(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_builder(temp.path(), &InitOptions { force: false }).expect_err("exists");
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_restores_config_and_keeps_memory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_builder(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "max_iterations = 3\n").expect("customize");
        let memory = paths.builder_dir.join("functions.jsonl");
        fs::write(&memory, "").expect("memory");

        init_builder(temp.path(), &InitOptions { force: true }).expect("re-init");
        let cfg = load_config(&paths.config_path).expect("config");
        assert_eq!(cfg.max_iterations, 50);
        assert!(memory.exists());
    }
}
