//! System prompt rendering.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, Value, context};
use tracing::debug;

use crate::core::termination::CompletionPolicy;
use crate::core::tools::ToolName;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

/// Inputs for the system prompt.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub description: &'a str,
    pub completion: &'a CompletionPolicy,
    pub stored_functions: usize,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
    custom: Option<String>,
}

impl PromptEngine {
    /// Engine using the built-in system template.
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        Self { env, custom: None }
    }

    /// Engine using a custom template file in place of the built-in one.
    pub fn with_template_file(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("read instructions {}", path.display()))?;
        let mut engine = Self::new();
        engine.custom = Some(source);
        Ok(engine)
    }

    pub fn render_system(&self, input: &PromptInputs<'_>) -> Result<String> {
        let ctx = self.context(input);
        let rendered = match &self.custom {
            Some(source) => self
                .env
                .render_str(source, ctx)
                .context("render custom instructions")?,
            None => self
                .env
                .get_template("system")?
                .render(ctx)
                .context("render system prompt")?,
        };
        debug!(bytes = rendered.len(), custom = self.custom.is_some(), "system prompt rendered");
        Ok(rendered)
    }

    fn context(&self, input: &PromptInputs<'_>) -> Value {
        let tools: Vec<&str> = ToolName::ALL.iter().map(|tool| tool.as_str()).collect();
        let entry_points: Vec<String> = input
            .completion
            .entry_points
            .iter()
            .map(ToString::to_string)
            .collect();
        context! {
            description => input.description.trim(),
            tools => tools,
            entry_points => entry_points,
            stored_functions => input.stored_functions,
        }
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}
