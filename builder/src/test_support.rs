//! Test-only helpers: scripted oracles, recorded sleeps and temporary
//! projects.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

use crate::core::types::ToolCall;
use crate::driver::Sleeper;
use crate::io::init::{BuilderPaths, InitOptions, init_builder};
use crate::io::oracle::{Oracle, OracleError, OracleReply, OracleRequest};

/// Oracle answering from a queue. An exhausted queue is a rejection.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<OracleReply, OracleError>>>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: OracleReply) {
        self.replies.lock().expect("replies lock").push_back(Ok(reply));
    }

    pub fn push_error(&self, err: OracleError) {
        self.replies.lock().expect("replies lock").push_back(Err(err));
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().expect("replies lock").len()
    }
}

impl Oracle for ScriptedOracle {
    fn complete(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Rejected("script exhausted".to_string())))
    }
}

/// Sleeper that records durations instead of sleeping.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("sleeps lock").clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("sleeps lock").push(duration);
    }
}

/// Tool call with an id derived from its name.
pub fn call(name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: format!("call-{name}"),
        name: name.to_string(),
        arguments,
    }
}

/// Reply holding exactly one tool call.
pub fn tool_reply(name: &str, arguments: Value) -> OracleReply {
    OracleReply::call(call(name, arguments))
}

/// Reply holding only text.
pub fn text_reply(text: &str) -> OracleReply {
    OracleReply::text(text)
}

/// Initialized project in a temporary directory.
pub struct TestProject {
    temp: TempDir,
    pub paths: BuilderPaths,
}

impl TestProject {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_builder(temp.path(), &InitOptions { force: false }).expect("init");
        Self { temp, paths }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
