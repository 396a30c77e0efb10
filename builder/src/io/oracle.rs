//! Oracle abstraction for model consultation.
//!
//! The [`Oracle`] trait decouples the driver loop from the model provider.
//! [`CommandOracle`] reaches the provider through a bridge command that reads
//! one JSON request on stdin and answers with one JSON reply on stdout. Tests
//! use scripted oracles that return queued replies without spawning processes.

use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::tools::ToolSpec;
use crate::core::types::{Message, ToolCall};
use crate::io::process::run_command_with_timeout;

/// One consultation: the full history plus the tool contract.
#[derive(Debug, Clone, Serialize)]
pub struct OracleRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    #[serde(skip)]
    pub timeout: Duration,
}

/// What the oracle said. Interpretation is left to the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl OracleReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn call(call: ToolCall) -> Self {
        Self {
            content: None,
            tool_calls: vec![call],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("oracle timed out after {after:?}")]
    Timeout { after: Duration },
    #[error("oracle transport failure: {0}")]
    Transport(String),
    #[error("oracle rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("oracle rejected the request: {0}")]
    Rejected(String),
}

impl OracleError {
    /// Rejections are final; everything else may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Abstraction over model backends.
pub trait Oracle {
    fn complete(&self, request: &OracleRequest) -> Result<OracleReply, OracleError>;
}

impl<T: Oracle + ?Sized> Oracle for &T {
    fn complete(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        (**self).complete(request)
    }
}

/// Oracle that spawns a bridge command per request.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandOracle {
    pub fn new(command: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            command,
            output_limit_bytes,
        }
    }
}

impl Oracle for CommandOracle {
    #[instrument(skip_all, fields(messages = request.messages.len(), timeout_secs = request.timeout.as_secs()))]
    fn complete(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(OracleError::Rejected("oracle command is empty".to_string()));
        };
        let stdin = serde_json::to_vec(request)
            .map_err(|err| OracleError::Rejected(format!("serialize request: {err}")))?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        info!(program = %program, "consulting oracle");
        let output = run_command_with_timeout(cmd, stdin, request.timeout, self.output_limit_bytes)
            .map_err(|err| OracleError::Transport(format!("{err:#}")))?;

        if output.timed_out {
            return Err(OracleError::Timeout {
                after: request.timeout,
            });
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "oracle bridge failed");
            return Err(OracleError::Transport(format!(
                "bridge exited with status {:?}: {}",
                output.status.code(),
                output.stderr_tail(400)
            )));
        }
        if output.stdout_truncated > 0 {
            return Err(OracleError::Transport(format!(
                "bridge reply exceeded {} bytes",
                self.output_limit_bytes
            )));
        }
        let reply = parse_reply(&output.stdout)?;
        debug!(
            tool_calls = reply.tool_calls.len(),
            has_content = reply.content.is_some(),
            "oracle replied"
        );
        Ok(reply)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireReply {
    Error { error: WireError },
    Reply {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        tool_calls: Vec<WireToolCall>,
    },
}

#[derive(Deserialize)]
struct WireError {
    kind: WireErrorKind,
    #[serde(default)]
    message: String,
    #[serde(default)]
    retry_after_secs: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireErrorKind {
    RateLimited,
    Transport,
    Rejected,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Decode one bridge reply.
///
/// Argument strings holding JSON are decoded; anything else is kept verbatim
/// so tool validation can report it.
pub fn parse_reply(stdout: &[u8]) -> Result<OracleReply, OracleError> {
    let wire: WireReply = serde_json::from_slice(stdout)
        .map_err(|err| OracleError::Transport(format!("unparseable bridge reply: {err}")))?;
    match wire {
        WireReply::Error { error } => Err(match error.kind {
            WireErrorKind::RateLimited => OracleError::RateLimited {
                retry_after: error
                    .retry_after_secs
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(Duration::from_secs_f64),
            },
            WireErrorKind::Transport => OracleError::Transport(error.message),
            WireErrorKind::Rejected => OracleError::Rejected(error.message),
        }),
        WireReply::Reply {
            content,
            tool_calls,
        } => Ok(OracleReply {
            content: content.filter(|text| !text.trim().is_empty()),
            tool_calls: tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments: decode_arguments(call.arguments),
                })
                .collect(),
        }),
    }
}

fn decode_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(decoded @ (Value::Object(_) | Value::Null)) => decoded,
            _ => Value::String(raw),
        },
        other => other,
    }
}
