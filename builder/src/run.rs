//! Orchestration for `builder run`: load the project, drive one session to a
//! terminal status and leave a transcript behind.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::driver::{Driver, DriverConfig, SessionOutcome, Sleeper, Step, start_session};
use crate::io::code_store::CodeStore;
use crate::io::config::load_config;
use crate::io::init::BuilderPaths;
use crate::io::oracle::Oracle;
use crate::io::prompt::PromptEngine;
use crate::io::sandbox::Sandbox;
use crate::io::transcript::{new_session_id, transcript_path};

/// Per-invocation overrides on top of `.builder/config.toml`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_iterations: Option<u32>,
}

/// Run one session in the project at `root`.
pub fn run_session<O: Oracle, S: Sleeper>(
    root: &Path,
    description: &str,
    options: &RunOptions,
    oracle: O,
    sleeper: S,
    on_step: impl FnMut(&Step),
) -> Result<SessionOutcome> {
    let paths = BuilderPaths::new(root);
    let mut cfg = load_config(&paths.config_path)?;
    if let Some(max) = options.max_iterations {
        cfg.max_iterations = max;
        cfg.validate().context("--max-iterations")?;
    }

    let completion = cfg.completion_policy()?;
    let prompts = match &cfg.instructions {
        Some(path) => PromptEngine::with_template_file(&paths.resolve(path))?,
        None => PromptEngine::new(),
    };
    let sandbox = Sandbox::open(&paths.resolve(&cfg.workspace.dir))?;
    let store = Arc::new(CodeStore::open(&paths.resolve(&cfg.memory.path))?);

    let session = start_session(new_session_id(), description, &prompts, &completion, &store)?;
    let transcript = transcript_path(&paths.sessions_dir, session.id());
    info!(session = session.id(), transcript = %transcript.display(), "starting session");

    let mut driver = Driver::new(
        session,
        sandbox,
        store,
        oracle,
        sleeper,
        DriverConfig::from_config(&cfg),
        completion,
    )?
    .with_transcript(transcript);
    driver.run(on_step)
}
