//! Builder configuration stored under `.builder/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::RetryPolicy;
use crate::core::path::WorkspacePath;
use crate::core::termination::CompletionPolicy;

/// Builder configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to the
/// values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuilderConfig {
    /// Maximum oracle consultations per session.
    pub max_iterations: u32,

    /// Consecutive replies without a usable tool call tolerated before the
    /// session fails.
    pub max_corrections: u32,

    /// Optional path (relative to the project root) to a custom system prompt
    /// template.
    pub instructions: Option<PathBuf>,

    pub oracle: OracleConfig,
    pub workspace: WorkspaceConfig,
    pub completion: CompletionConfig,
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Bridge command that answers one oracle request per invocation.
    pub command: Vec<String>,
    /// Wall-clock limit for a single oracle call.
    pub timeout_secs: u64,
    /// Retries after a failed oracle call.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Truncate bridge stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Sandbox directory, relative to the project root.
    pub dir: PathBuf,
    /// Directories created before the first iteration.
    pub scaffold: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompletionConfig {
    /// Files that must exist before `task_completed` is accepted. At least
    /// one is required.
    pub entry_points: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Code memory log, relative to the project root.
    pub path: PathBuf,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_corrections: 3,
            instructions: None,
            oracle: OracleConfig::default(),
            workspace: WorkspaceConfig::default(),
            completion: CompletionConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: vec!["builder-oracle".to_string()],
            timeout_secs: 120,
            max_retries: 4,
            backoff_base_ms: 2_000,
            backoff_max_ms: 30_000,
            output_limit_bytes: 4_000_000,
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("app"),
            scaffold: Vec::new(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            entry_points: vec!["templates/index.html".to_string()],
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".builder/functions.jsonl"),
        }
    }
}

impl BuilderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.oracle.command.is_empty() || self.oracle.command[0].trim().is_empty() {
            return Err(anyhow!("oracle.command must be a non-empty array"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.oracle.backoff_max_ms < self.oracle.backoff_base_ms {
            return Err(anyhow!("oracle.backoff_max_ms must be >= oracle.backoff_base_ms"));
        }
        if self.oracle.output_limit_bytes == 0 {
            return Err(anyhow!("oracle.output_limit_bytes must be > 0"));
        }
        if self.workspace.dir.as_os_str().is_empty() {
            return Err(anyhow!("workspace.dir must not be empty"));
        }
        for dir in &self.workspace.scaffold {
            WorkspacePath::parse(dir, None)
                .map_err(|err| anyhow!("workspace.scaffold: {err}"))?;
        }
        self.completion_policy()?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.oracle.max_retries,
            base_delay: Duration::from_millis(self.oracle.backoff_base_ms),
            max_delay: Duration::from_millis(self.oracle.backoff_max_ms),
        }
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle.timeout_secs)
    }

    pub fn completion_policy(&self) -> Result<CompletionPolicy> {
        if self.completion.entry_points.is_empty() {
            return Err(anyhow!(
                "completion.entry_points must name at least one file"
            ));
        }
        let mut entry_points = Vec::with_capacity(self.completion.entry_points.len());
        for raw in &self.completion.entry_points {
            let path = WorkspacePath::parse(raw, None)
                .map_err(|err| anyhow!("completion.entry_points: {err}"))?;
            if path.is_root() {
                return Err(anyhow!(
                    "completion.entry_points: '{raw}' resolves to the workspace root"
                ));
            }
            entry_points.push(path);
        }
        Ok(CompletionPolicy::new(entry_points))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BuilderConfig::default()`.
pub fn load_config(path: &Path) -> Result<BuilderConfig> {
    if !path.exists() {
        let cfg = BuilderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BuilderConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BuilderConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, BuilderConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = BuilderConfig {
            max_iterations: 7,
            workspace: WorkspaceConfig {
                scaffold: vec!["routes".to_string(), "static".to_string()],
                ..WorkspaceConfig::default()
            },
            ..BuilderConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 5\n[oracle]\ntimeout_secs = 9\n").expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 5);
        assert_eq!(cfg.oracle.timeout_secs, 9);
        assert_eq!(cfg.oracle.max_retries, OracleConfig::default().max_retries);
        assert_eq!(cfg.completion, CompletionConfig::default());
    }

    #[test]
    fn rejects_escaping_entry_point() {
        let cfg = BuilderConfig {
            completion: CompletionConfig {
                entry_points: vec!["../index.html".to_string()],
            },
            ..BuilderConfig::default()
        };
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("completion.entry_points"));
    }

    #[test]
    fn rejects_empty_entry_points() {
        let cfg = BuilderConfig {
            completion: CompletionConfig {
                entry_points: Vec::new(),
            },
            ..BuilderConfig::default()
        };
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn rejects_zero_iteration_budget() {
        let cfg = BuilderConfig {
            max_iterations: 0,
            ..BuilderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn retry_policy_uses_millisecond_fields() {
        let policy = BuilderConfig::default().retry_policy();
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.max_retries, 4);
    }
}
