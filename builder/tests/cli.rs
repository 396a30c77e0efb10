//! CLI tests: spawn the builder binary and check exit codes and output.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use builder::exit_codes;
use builder::io::config::{BuilderConfig, OracleConfig, load_config, write_config};
use builder::test_support::TestProject;

fn builder(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_builder"))
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("spawn builder")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Point the project at a shell bridge that prints `reply` for every request.
#[cfg(unix)]
fn use_bridge(root: &Path, reply: &str) {
    let config_path = root.join(".builder/config.toml");
    let cfg = BuilderConfig {
        oracle: OracleConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("cat >/dev/null; printf '%s' '{reply}'"),
            ],
            ..OracleConfig::default()
        },
        ..load_config(&config_path).expect("config")
    };
    write_config(&config_path, &cfg).expect("write config");
}

#[test]
fn init_twice_requires_force() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = builder(temp.path(), &["init"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    assert!(temp.path().join(".builder/config.toml").is_file());

    let second = builder(temp.path(), &["init"]);
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&second.stderr).contains("already exists"));

    let forced = builder(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn functions_add_list_show() {
    let project = TestProject::new();
    let file = project.root().join("slug.py");
    fs::write(
        &file,
        "def slugify(text):\n    \"\"\"Lowercase and dash-join words.\"\"\"\n    return '-'.join(text.lower().split())\n",
    )
    .expect("write source");
    let file_arg = file.to_str().expect("utf8 path");

    let added = builder(project.root(), &["functions", "add", file_arg]);
    assert_eq!(added.status.code(), Some(exit_codes::OK));
    let added_out = stdout(&added);
    let id = added_out
        .trim()
        .strip_prefix("stored ")
        .expect("stored line")
        .to_string();
    assert_eq!(id.len(), 64);

    let again = builder(project.root(), &["functions", "add", file_arg]);
    assert_eq!(stdout(&again).trim(), format!("exists {id}"));

    let listed = stdout(&builder(project.root(), &["functions", "list"]));
    assert_eq!(listed.lines().count(), 1);
    assert!(listed.contains("slugify"));
    assert!(listed.contains("Lowercase and dash-join words."));

    let shown = stdout(&builder(project.root(), &["functions", "show", &id]));
    assert!(shown.starts_with("def slugify(text):"));

    let missing = builder(project.root(), &["functions", "show", "nope"]);
    assert_eq!(missing.status.code(), Some(exit_codes::INVALID));
}

#[cfg(unix)]
#[test]
fn run_completes_and_inspect_reads_the_transcript() {
    let project = TestProject::new();
    use_bridge(
        project.root(),
        r#"{"tool_calls": [{"id": "c1", "name": "task_completed", "arguments": "{}"}]}"#,
    );
    let index = project.root().join("app/templates/index.html");
    fs::create_dir_all(index.parent().expect("parent")).expect("create templates");
    fs::write(&index, "<h1>empty</h1>").expect("write index");

    let run = builder(project.root(), &["run", "an empty app"]);
    assert_eq!(run.status.code(), Some(exit_codes::OK), "{}", stdout(&run));
    let out = stdout(&run);
    assert!(out.contains("[1/50] task_completed: ok"), "{out}");

    let session_id = out
        .lines()
        .last()
        .and_then(|line| line.split(':').next())
        .expect("summary line")
        .to_string();
    assert!(session_id.starts_with("session-"), "{session_id}");

    let inspect = builder(project.root(), &["inspect", &session_id]);
    assert_eq!(inspect.status.code(), Some(exit_codes::OK));
    let summary = stdout(&inspect);
    assert!(summary.contains("status:      completed"), "{summary}");
    assert!(summary.contains("iterations:  1/50"), "{summary}");
}

#[cfg(unix)]
#[test]
fn rejected_oracle_exits_with_failed() {
    let project = TestProject::new();
    use_bridge(
        project.root(),
        r#"{"error": {"kind": "rejected", "message": "no credentials"}}"#,
    );

    let run = builder(project.root(), &["run", "anything"]);
    assert_eq!(run.status.code(), Some(exit_codes::FAILED));
    assert!(stdout(&run).contains("no credentials"));
}

#[cfg(unix)]
#[test]
fn text_only_oracle_is_aborted_by_the_budget() {
    let project = TestProject::new();
    use_bridge(project.root(), r#"{"content": "thinking"}"#);
    let config_path = project.root().join(".builder/config.toml");
    let mut cfg = load_config(&config_path).expect("config");
    cfg.max_corrections = 10;
    write_config(&config_path, &cfg).expect("write");

    let run = builder(project.root(), &["run", "anything", "--max-iterations", "2"]);
    assert_eq!(run.status.code(), Some(exit_codes::ABORTED));
}
