//! Conversation driver: one oracle consultation and at most one tool call per
//! iteration, until the session reaches a terminal status.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::{RetryPolicy, has_iteration_left};
use crate::core::session::Session;
use crate::core::termination::CompletionPolicy;
use crate::core::tools::tool_contract;
use crate::core::types::{Message, SessionStatus, ToolCall, ToolResult};
use crate::dispatch::{ToolContext, dispatch};
use crate::io::code_store::CodeStore;
use crate::io::config::BuilderConfig;
use crate::io::oracle::{Oracle, OracleError, OracleReply, OracleRequest};
use crate::io::prompt::{PromptEngine, PromptInputs};
use crate::io::sandbox::Sandbox;
use crate::io::transcript::{SessionSnapshot, write_transcript};

/// Blocking pause between oracle retries.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

impl<T: Sleeper + ?Sized> Sleeper for &T {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Loop limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub max_iterations: u32,
    pub max_corrections: u32,
    pub retry: RetryPolicy,
    pub oracle_timeout: Duration,
    /// Directories created in the sandbox before the first iteration.
    pub scaffold: Vec<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from_config(&BuilderConfig::default())
    }
}

impl DriverConfig {
    pub fn from_config(cfg: &BuilderConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            max_corrections: cfg.max_corrections,
            retry: cfg.retry_policy(),
            oracle_timeout: cfg.oracle_timeout(),
            scaffold: cfg.workspace.scaffold.clone(),
        }
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    BudgetExceeded { iterations: u32, max: u32 },
    OracleExhausted { attempts: u32, last_error: String },
    CorrectionsExhausted { count: u32 },
}

/// A reply that did not hold exactly one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyProblem {
    TextOnly,
    Empty,
    MultipleCalls(usize),
}

impl ReplyProblem {
    fn correction(self) -> String {
        match self {
            Self::TextOnly => {
                "No tool call received. Respond with exactly one tool call.".to_string()
            }
            Self::Empty => "Empty reply. Respond with exactly one tool call.".to_string(),
            Self::MultipleCalls(count) => format!(
                "Received {count} tool calls; none were executed. Respond with exactly one tool call per turn."
            ),
        }
    }
}

/// What one `advance` did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    /// The session was already terminal.
    Idle,
    Dispatched(ToolResult),
    Corrected(ReplyProblem),
    Stopped(StopReason),
}

/// Progress snapshot handed to `run` callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub status: SessionStatus,
    pub iteration: u32,
    pub max_iterations: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub progress: Progress,
    pub event: StepEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    pub iterations: u32,
    pub stop: StopReason,
}

/// Build a fresh session with the rendered system prompt.
pub fn start_session(
    id: String,
    description: &str,
    prompts: &PromptEngine,
    completion: &CompletionPolicy,
    store: &CodeStore,
) -> Result<Session> {
    let system = prompts.render_system(&PromptInputs {
        description,
        completion,
        stored_functions: store.len()?,
    })?;
    Ok(Session::new(id, description, &system))
}

enum Interpreted {
    Action { text: Option<String>, call: ToolCall },
    Problem { text: Option<String>, problem: ReplyProblem },
}

fn interpret(reply: OracleReply) -> Interpreted {
    let OracleReply {
        content,
        mut tool_calls,
    } = reply;
    let count = tool_calls.len();
    if count == 1
        && let Some(call) = tool_calls.pop()
    {
        return Interpreted::Action {
            text: content,
            call,
        };
    }
    let problem = match count {
        0 if content.is_some() => ReplyProblem::TextOnly,
        0 => ReplyProblem::Empty,
        n => ReplyProblem::MultipleCalls(n),
    };
    Interpreted::Problem {
        text: content,
        problem,
    }
}

/// Owns one session and everything it mutates.
pub struct Driver<O, S = ThreadSleeper> {
    session: Session,
    sandbox: Sandbox,
    store: Arc<CodeStore>,
    oracle: O,
    sleeper: S,
    config: DriverConfig,
    completion: CompletionPolicy,
    corrections: u32,
    stop: Option<StopReason>,
    transcript: Option<PathBuf>,
}

impl<O: Oracle, S: Sleeper> Driver<O, S> {
    /// Create a driver and apply the scaffold directories.
    pub fn new(
        session: Session,
        mut sandbox: Sandbox,
        store: Arc<CodeStore>,
        oracle: O,
        sleeper: S,
        config: DriverConfig,
        completion: CompletionPolicy,
    ) -> Result<Self> {
        for dir in &config.scaffold {
            sandbox
                .create_dir(dir)
                .with_context(|| format!("scaffold directory {dir}"))?;
        }
        Ok(Self {
            session,
            sandbox,
            store,
            oracle,
            sleeper,
            config,
            completion,
            corrections: 0,
            stop: None,
            transcript: None,
        })
    }

    /// Rewrite a transcript at `path` after every advance.
    pub fn with_transcript(mut self, path: PathBuf) -> Self {
        self.transcript = Some(path);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn store(&self) -> &CodeStore {
        &self.store
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop.as_ref()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            status: self.session.status(),
            iteration: self.session.iteration(),
            max_iterations: self.config.max_iterations,
        }
    }

    /// Run one iteration.
    #[instrument(skip_all, fields(session = self.session.id(), iteration = self.session.iteration()))]
    pub fn advance(&mut self) -> Result<Step> {
        if self.session.is_terminal() {
            return Ok(self.step(StepEvent::Idle));
        }

        if !has_iteration_left(self.session.iteration(), self.config.max_iterations) {
            let reason = StopReason::BudgetExceeded {
                iterations: self.session.iteration(),
                max: self.config.max_iterations,
            };
            warn!(max = self.config.max_iterations, "iteration budget exhausted");
            return self.finish(SessionStatus::Aborted, reason);
        }

        let iteration = self.session.begin_iteration();
        info!(iteration, max = self.config.max_iterations, "consulting oracle");
        let reply = match self.consult() {
            Ok(reply) => reply,
            Err((attempts, err)) => {
                warn!(attempts, err = %err, "oracle unavailable");
                let reason = StopReason::OracleExhausted {
                    attempts,
                    last_error: err.to_string(),
                };
                return self.finish(SessionStatus::Failed, reason);
            }
        };

        let event = match interpret(reply) {
            Interpreted::Action { text, call } => {
                self.corrections = 0;
                self.session.push(Message::action(text, call.clone()));
                self.session.transition(SessionStatus::Executing)?;
                let mut ctx = ToolContext {
                    sandbox: &mut self.sandbox,
                    store: &self.store,
                    completion: &self.completion,
                };
                let outcome = dispatch(&mut self.session, &call, &mut ctx);
                self.session.push(Message::tool_result(outcome.result.clone()));
                if outcome.completed {
                    info!(iteration, "completion accepted");
                    self.stop = Some(StopReason::Completed);
                    self.persist()?;
                    return Ok(self.step(StepEvent::Stopped(StopReason::Completed)));
                }
                self.session.transition(SessionStatus::Planning)?;
                StepEvent::Dispatched(outcome.result)
            }
            Interpreted::Problem { text, problem } => {
                if let Some(text) = text {
                    self.session.push(Message::assistant(text));
                }
                self.session.push(Message::correction(problem.correction()));
                self.corrections += 1;
                debug!(?problem, corrections = self.corrections, "reply needs correction");
                if self.corrections > self.config.max_corrections {
                    warn!(count = self.corrections, "correction budget exhausted");
                    let reason = StopReason::CorrectionsExhausted {
                        count: self.corrections,
                    };
                    return self.finish(SessionStatus::Failed, reason);
                }
                StepEvent::Corrected(problem)
            }
        };

        self.persist()?;
        Ok(self.step(event))
    }

    /// Advance until the session is terminal.
    pub fn run(&mut self, mut on_step: impl FnMut(&Step)) -> Result<SessionOutcome> {
        while !self.session.is_terminal() {
            let step = self.advance()?;
            on_step(&step);
        }
        self.store.flush()?;
        let stop = self
            .stop
            .clone()
            .ok_or_else(|| anyhow!("session {} ended without a stop reason", self.session.id()))?;
        info!(status = %self.session.status(), iterations = self.session.iteration(), "session finished");
        Ok(SessionOutcome {
            session_id: self.session.id().to_string(),
            status: self.session.status(),
            iterations: self.session.iteration(),
            stop,
        })
    }

    /// Call the oracle, retrying retryable failures with backoff.
    ///
    /// Returns the number of attempts alongside the last error.
    fn consult(&self) -> Result<OracleReply, (u32, OracleError)> {
        let request = OracleRequest {
            messages: self.session.messages().to_vec(),
            tools: tool_contract(),
            timeout: self.config.oracle_timeout,
        };
        let policy = &self.config.retry;
        let mut retry = 0u32;
        loop {
            match self.oracle.complete(&request) {
                Ok(reply) => return Ok(reply),
                Err(err) if err.is_retryable() && retry < policy.max_retries => {
                    let delay = policy.delay(retry, err.retry_after());
                    warn!(retry, delay_ms = delay.as_millis() as u64, err = %err, "oracle call failed, backing off");
                    self.sleeper.sleep(delay);
                    retry += 1;
                }
                Err(err) => return Err((retry + 1, err)),
            }
        }
    }

    fn finish(&mut self, status: SessionStatus, reason: StopReason) -> Result<Step> {
        self.session.transition(status)?;
        self.stop = Some(reason.clone());
        self.persist()?;
        Ok(self.step(StepEvent::Stopped(reason)))
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.transcript else {
            return Ok(());
        };
        let snapshot =
            SessionSnapshot::capture(&self.session, self.config.max_iterations, self.sandbox.tree());
        write_transcript(path, &snapshot)
    }

    fn step(&self, event: StepEvent) -> Step {
        Step {
            progress: self.progress(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::path::WorkspacePath;
    use crate::test_support::{RecordingSleeper, ScriptedOracle, call, text_reply, tool_reply};
    use serde_json::json;

    fn completion() -> CompletionPolicy {
        CompletionPolicy::new(vec![
            WorkspacePath::parse("templates/index.html", None).expect("path"),
        ])
    }

    fn driver<'a>(
        oracle: &'a ScriptedOracle,
        sleeper: &'a RecordingSleeper,
        config: DriverConfig,
    ) -> Driver<&'a ScriptedOracle, &'a RecordingSleeper> {
        Driver::new(
            Session::new("session-test", "todo app", "system"),
            Sandbox::in_memory(),
            Arc::new(CodeStore::in_memory()),
            oracle,
            sleeper,
            config,
            completion(),
        )
        .expect("driver")
    }

    fn config(max_iterations: u32) -> DriverConfig {
        DriverConfig {
            max_iterations,
            ..DriverConfig::default()
        }
    }

    #[test]
    fn interpret_discriminates_reply_shapes() {
        let one = interpret(OracleReply::call(call("task_completed", json!({}))));
        assert!(matches!(one, Interpreted::Action { .. }));

        let text = interpret(OracleReply::text("thinking"));
        assert!(matches!(
            text,
            Interpreted::Problem {
                problem: ReplyProblem::TextOnly,
                ..
            }
        ));

        let empty = interpret(OracleReply::default());
        assert!(matches!(
            empty,
            Interpreted::Problem {
                problem: ReplyProblem::Empty,
                ..
            }
        ));

        let many = interpret(OracleReply {
            content: None,
            tool_calls: vec![
                call("list_all_functions", json!({})),
                call("task_completed", json!({})),
            ],
        });
        assert!(matches!(
            many,
            Interpreted::Problem {
                problem: ReplyProblem::MultipleCalls(2),
                ..
            }
        ));
    }

    #[test]
    fn scaffold_is_applied_before_the_first_iteration() {
        let oracle = ScriptedOracle::new();
        let sleeper = RecordingSleeper::default();
        let driver = driver(
            &oracle,
            &sleeper,
            DriverConfig {
                scaffold: vec!["templates".to_string(), "static".to_string()],
                ..DriverConfig::default()
            },
        );
        let dirs: Vec<&str> = driver
            .sandbox()
            .tree()
            .directories()
            .map(WorkspacePath::as_str)
            .collect();
        assert_eq!(dirs, vec!["static", "templates"]);
        assert!(oracle.requests().is_empty());
    }

    #[test]
    fn dispatch_returns_to_planning_and_records_history() {
        let oracle = ScriptedOracle::new();
        oracle.push(tool_reply(
            "create_file",
            json!({"path": "app.py", "content": "app = None"}),
        ));
        let sleeper = RecordingSleeper::default();
        let mut driver = driver(&oracle, &sleeper, config(5));

        let step = driver.advance().expect("advance");
        assert!(matches!(step.event, StepEvent::Dispatched(ref r) if r.success));
        assert_eq!(step.progress.status, SessionStatus::Planning);
        assert_eq!(step.progress.iteration, 1);
        // system, user, action, result
        assert_eq!(driver.session().messages().len(), 4);

        let requests = oracle.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[0].tools.len(), 8);
    }

    #[test]
    fn failed_tool_call_keeps_the_session_planning() {
        let oracle = ScriptedOracle::new();
        oracle.push(tool_reply("fetch_code", json!({"path": "missing.py"})));
        let sleeper = RecordingSleeper::default();
        let mut driver = driver(&oracle, &sleeper, config(5));

        let step = driver.advance().expect("advance");
        assert!(matches!(step.event, StepEvent::Dispatched(ref r) if !r.success));
        assert_eq!(driver.session().status(), SessionStatus::Planning);
    }

    #[test]
    fn budget_aborts_without_consulting() {
        let oracle = ScriptedOracle::new();
        for _ in 0..3 {
            oracle.push(tool_reply("list_all_functions", json!({})));
        }
        let sleeper = RecordingSleeper::default();
        let mut driver = driver(&oracle, &sleeper, config(2));

        let outcome = driver.run(|_| {}).expect("run");
        assert_eq!(outcome.status, SessionStatus::Aborted);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(
            outcome.stop,
            StopReason::BudgetExceeded {
                iterations: 2,
                max: 2
            }
        );
        assert_eq!(oracle.requests().len(), 2);

        let step = driver.advance().expect("idle");
        assert_eq!(step.event, StepEvent::Idle);
        assert_eq!(oracle.requests().len(), 2);
    }

    #[test]
    fn retries_back_off_then_succeed() {
        let oracle = ScriptedOracle::new();
        oracle.push_error(OracleError::Transport("reset".to_string()));
        oracle.push_error(OracleError::RateLimited {
            retry_after: Some(Duration::from_secs(10)),
        });
        oracle.push(tool_reply("list_all_functions", json!({})));
        let sleeper = RecordingSleeper::default();
        let mut driver = driver(&oracle, &sleeper, config(5));

        let step = driver.advance().expect("advance");
        assert!(matches!(step.event, StepEvent::Dispatched(_)));
        assert_eq!(
            sleeper.sleeps(),
            vec![Duration::from_secs(2), Duration::from_secs(10)]
        );
        assert_eq!(driver.session().iteration(), 1);
    }

    #[test]
    fn rejection_fails_immediately() {
        let oracle = ScriptedOracle::new();
        oracle.push_error(OracleError::Rejected("invalid api key".to_string()));
        let sleeper = RecordingSleeper::default();
        let mut driver = driver(&oracle, &sleeper, config(5));

        let outcome = driver.run(|_| {}).expect("run");
        assert_eq!(outcome.status, SessionStatus::Failed);
        assert_eq!(
            outcome.stop,
            StopReason::OracleExhausted {
                attempts: 1,
                last_error: "oracle rejected the request: invalid api key".to_string()
            }
        );
        assert!(sleeper.sleeps().is_empty());
    }

    #[test]
    fn text_reply_is_recorded_and_corrected() {
        let oracle = ScriptedOracle::new();
        oracle.push(text_reply("I will now create the files."));
        oracle.push(tool_reply("list_all_functions", json!({})));
        let sleeper = RecordingSleeper::default();
        let mut driver = driver(&oracle, &sleeper, config(5));

        let step = driver.advance().expect("advance");
        assert_eq!(step.event, StepEvent::Corrected(ReplyProblem::TextOnly));
        let messages = driver.session().messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, crate::core::types::Role::Assistant);
        assert_eq!(messages[3].role, crate::core::types::Role::Tool);

        driver.advance().expect("advance");
        assert_eq!(driver.session().status(), SessionStatus::Planning);
    }

    #[test]
    fn corrections_reset_after_a_tool_call() {
        let oracle = ScriptedOracle::new();
        oracle.push(OracleReply::default());
        oracle.push(tool_reply("list_all_functions", json!({})));
        oracle.push(OracleReply::default());
        oracle.push(OracleReply::default());
        let sleeper = RecordingSleeper::default();
        let mut driver = driver(
            &oracle,
            &sleeper,
            DriverConfig {
                max_corrections: 2,
                max_iterations: 4,
                ..DriverConfig::default()
            },
        );

        let outcome = driver.run(|_| {}).expect("run");
        assert_eq!(outcome.status, SessionStatus::Aborted);
    }

    #[test]
    fn on_step_sees_every_advance() {
        let oracle = ScriptedOracle::new();
        oracle.push(tool_reply(
            "create_file",
            json!({"path": "templates/index.html", "content": "<h1>Todo</h1>"}),
        ));
        oracle.push(tool_reply("task_completed", json!({})));
        let sleeper = RecordingSleeper::default();
        let mut driver = driver(&oracle, &sleeper, config(5));

        let mut seen = Vec::new();
        let outcome = driver
            .run(|step| seen.push(step.progress.clone()))
            .expect("run");
        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(
            seen.iter().map(|p| p.iteration).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(seen[1].status, SessionStatus::Completed);
        assert_eq!(seen[1].max_iterations, 5);
    }
}
