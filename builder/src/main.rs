//! Autonomous application builder CLI.
//!
//! Builds a project under `<root>/<workspace.dir>` by consulting an oracle
//! bridge command one tool call at a time. State lives in `<root>/.builder/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use builder::core::types::SessionStatus;
use builder::driver::{Step, StepEvent, StopReason, ThreadSleeper};
use builder::exit_codes;
use builder::io::code_store::{CodeMetadata, CodeStore};
use builder::io::config::load_config;
use builder::io::init::{BuilderPaths, InitOptions, init_builder};
use builder::io::oracle::CommandOracle;
use builder::io::transcript::{load_transcript, transcript_path};
use builder::logging;
use builder::run::{RunOptions, run_session};

#[derive(Parser)]
#[command(
    name = "builder",
    version,
    about = "Autonomous application builder driven by a language model"
)]
struct Cli {
    /// Project root containing `.builder/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Raise log verbosity when RUST_LOG is unset (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.builder/config.toml` with starter settings.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Build an application from a description.
    Run {
        description: String,
        /// Override `max_iterations` from the config.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Inspect or seed code memory.
    Functions {
        #[command(subcommand)]
        command: FunctionsCommand,
    },
    /// Summarize a session transcript.
    Inspect { session_id: String },
}

#[derive(Subcommand)]
enum FunctionsCommand {
    /// List stored functions, oldest first.
    List,
    /// Print the source stored under an id.
    Show { id: String },
    /// Store the contents of a file.
    Add {
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match dispatch(cli) {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("{err:#}");
            exit_code(exit_codes::INVALID)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn dispatch(cli: Cli) -> Result<i32> {
    let root = cli.root.as_path();
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::Run {
            description,
            max_iterations,
        } => cmd_run(root, &description, max_iterations),
        Command::Functions { command } => cmd_functions(root, command),
        Command::Inspect { session_id } => cmd_inspect(root, &session_id),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_builder(root, &InitOptions { force })?;
    println!("initialized {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, description: &str, max_iterations: Option<u32>) -> Result<i32> {
    if description.trim().is_empty() {
        bail!("description must not be empty");
    }
    let paths = BuilderPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let oracle = CommandOracle::new(cfg.oracle.command.clone(), cfg.oracle.output_limit_bytes);

    let outcome = run_session(
        root,
        description,
        &RunOptions { max_iterations },
        oracle,
        ThreadSleeper,
        print_step,
    )?;

    println!(
        "{}: {} after {} iteration(s)",
        outcome.session_id, outcome.status, outcome.iterations
    );
    match &outcome.stop {
        StopReason::Completed => {}
        StopReason::BudgetExceeded { max, .. } => println!("iteration budget of {max} exhausted"),
        StopReason::OracleExhausted {
            attempts,
            last_error,
        } => println!("oracle unavailable after {attempts} attempt(s): {last_error}"),
        StopReason::CorrectionsExhausted { count } => {
            println!("{count} consecutive replies without a usable tool call");
        }
    }
    Ok(match outcome.status {
        SessionStatus::Completed => exit_codes::OK,
        SessionStatus::Aborted => exit_codes::ABORTED,
        _ => exit_codes::FAILED,
    })
}

fn print_step(step: &Step) {
    let progress = &step.progress;
    let prefix = format!("[{}/{}]", progress.iteration, progress.max_iterations);
    match &step.event {
        StepEvent::Idle => {}
        StepEvent::Dispatched(result) => match &result.error {
            None => println!("{prefix} {}: ok", result.tool),
            Some(failure) => println!("{prefix} {}: {}", result.tool, failure.message),
        },
        StepEvent::Corrected(problem) => println!("{prefix} no usable tool call ({problem:?})"),
        StepEvent::Stopped(StopReason::Completed) => println!("{prefix} task_completed: ok"),
        StepEvent::Stopped(_) => println!("{prefix} {}", progress.status),
    }
}

fn cmd_functions(root: &Path, command: FunctionsCommand) -> Result<i32> {
    let paths = BuilderPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let store = CodeStore::open(&paths.resolve(&cfg.memory.path))?;

    match command {
        FunctionsCommand::List => {
            for summary in store.list_all() {
                println!(
                    "{}  {}  {}",
                    summary.id,
                    summary.name.as_deref().unwrap_or("-"),
                    summary.description.as_deref().unwrap_or("")
                );
            }
        }
        FunctionsCommand::Show { id } => {
            let Some(record) = store.retrieve(&id)? else {
                bail!("no stored function with id {id}");
            };
            print!("{}", record.source);
            if !record.source.ends_with('\n') {
                println!();
            }
        }
        FunctionsCommand::Add {
            file,
            name,
            description,
        } => {
            let source = fs::read_to_string(&file)
                .with_context(|| format!("read {}", file.display()))?;
            let stored = store.store(&source, CodeMetadata { name, description })?;
            let verb = if stored.reused { "exists" } else { "stored" };
            println!("{verb} {}", stored.record.id);
        }
    }
    store.close()?;
    Ok(exit_codes::OK)
}

fn cmd_inspect(root: &Path, session_id: &str) -> Result<i32> {
    let paths = BuilderPaths::new(root);
    let snapshot = load_transcript(&transcript_path(&paths.sessions_dir, session_id))?;

    println!("session:     {}", snapshot.id);
    println!("description: {}", snapshot.description);
    println!("status:      {}", snapshot.status);
    println!(
        "iterations:  {}/{}",
        snapshot.iteration, snapshot.max_iterations
    );
    println!("updated:     {}", snapshot.updated_at);
    println!("messages:    {}", snapshot.messages.len());
    println!("files:");
    for file in &snapshot.files {
        println!("  {file}");
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["builder", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_run_with_budget_and_root() {
        let cli = Cli::parse_from([
            "builder",
            "--root",
            "/tmp/proj",
            "run",
            "a todo app",
            "--max-iterations",
            "7",
        ]);
        assert_eq!(cli.root, PathBuf::from("/tmp/proj"));
        match cli.command {
            Command::Run {
                description,
                max_iterations,
            } => {
                assert_eq!(description, "a todo app");
                assert_eq!(max_iterations, Some(7));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_functions_add() {
        let cli = Cli::parse_from(["builder", "functions", "add", "util.py", "--name", "slugify"]);
        match cli.command {
            Command::Functions {
                command: FunctionsCommand::Add { file, name, .. },
            } => {
                assert_eq!(file, PathBuf::from("util.py"));
                assert_eq!(name.as_deref(), Some("slugify"));
            }
            _ => panic!("expected functions add"),
        }
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::parse_from(["builder", "-vv", "inspect", "session-1"]);
        assert_eq!(cli.verbose, 2);
    }
}
