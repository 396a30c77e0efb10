//! Autonomous application builder.
//!
//! A session repeatedly consults an oracle (a language model behind a bridge
//! command) for the next construction step, executes exactly one tool call
//! per iteration against a sandboxed workspace, and stops once completion is
//! accepted or a budget runs out. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (paths, workspace tree, tool
//!   contract, session state machine, completion invariant). No I/O.
//! - **[`io`]**: Side-effecting adapters (sandbox directory, code memory log,
//!   oracle bridge process, config, transcripts).
//!
//! Orchestration modules ([`dispatch`], [`driver`], [`run`]) combine the two
//! to implement the CLI commands.

pub mod core;
pub mod dispatch;
pub mod driver;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
