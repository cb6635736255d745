use crate::commands::{ConsoleAction, parse_console_action};
use crate::config::Config;
use crate::environment::{is_header_line, parse_environment_table, split_columns};
use crate::process::{
    FailureKind, InvokeOptions, ToolOutput, ToolResult, first_line, run_tool, tool_available,
};
use crate::session::{SendOutcome, SessionPort, send_session_command, session_busy};
use crate::shell::{compose_command, quote_arg};
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn invoke_options(timeout_ms: u64) -> InvokeOptions<'static> {
    InvokeOptions {
        timeout: Duration::from_millis(timeout_ms),
        cwd: None,
    }
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// --- tabular output parsing ---

#[test]
fn test_parse_table_extracts_rows_in_order() {
    let raw = "ID              TITLE                     CREATED       UPDATED\n\
               fancy-mallard   Fix login bug             2 hours ago   5 minutes ago\n\
               quiet-heron     Refactor parser module    1 day ago     3 hours ago\n";
    let environments = parse_environment_table(raw);
    assert_eq!(environments.len(), 2);
    assert_eq!(environments[0].id, "fancy-mallard");
    assert_eq!(environments[0].title, "Fix login bug");
    assert_eq!(environments[0].created.as_deref(), Some("2 hours ago"));
    assert_eq!(environments[0].updated.as_deref(), Some("5 minutes ago"));
    assert_eq!(environments[1].id, "quiet-heron");
    assert_eq!(environments[1].title, "Refactor parser module");
}

#[test]
fn test_parse_table_round_trip() {
    let raw = "fancy-mallard   Fix login bug\nquiet-heron     Refactor parser module\n";
    let first = parse_environment_table(raw);
    assert_eq!(first.len(), 2);
    let rejoined = first
        .iter()
        .map(|environment| format!("{}  {}", environment.id, environment.title))
        .collect::<Vec<_>>()
        .join("\n");
    let second = parse_environment_table(&rejoined);
    assert_eq!(first, second);
}

#[test]
fn test_parse_table_skips_blank_lines_and_repeated_headers() {
    let raw = "\nID    TITLE    CREATED    UPDATED\n\n\
               env-a    First task    now    now\n\
               ID    TITLE    CREATED    UPDATED\n\
               env-b    Second task    now    now\n\n";
    let environments = parse_environment_table(raw);
    assert_eq!(environments.len(), 2);
    assert_eq!(environments[0].id, "env-a");
    assert_eq!(environments[1].id, "env-b");
}

#[test]
fn test_parse_table_drops_rows_without_a_title_column() {
    let raw = "ID    TITLE\nlonely-token\nenv-a    Real row\n";
    let environments = parse_environment_table(raw);
    assert_eq!(environments.len(), 1);
    assert_eq!(environments[0].id, "env-a");
}

#[test]
fn test_parse_table_ignores_columns_past_updated() {
    let raw = "env-a    Title here    created    updated    extra    more\n";
    let environments = parse_environment_table(raw);
    assert_eq!(environments.len(), 1);
    assert_eq!(environments[0].created.as_deref(), Some("created"));
    assert_eq!(environments[0].updated.as_deref(), Some("updated"));
}

#[test]
fn test_parse_table_empty_and_header_only_inputs() {
    assert!(parse_environment_table("").is_empty());
    assert!(parse_environment_table("   \n\n").is_empty());
    assert!(parse_environment_table("ID    TITLE    CREATED    UPDATED\n").is_empty());
}

#[test]
fn test_parse_table_row_without_timestamps() {
    let raw = "env-a    Just a title\n";
    let environments = parse_environment_table(raw);
    assert_eq!(environments.len(), 1);
    assert_eq!(environments[0].created, None);
    assert_eq!(environments[0].updated, None);
}

#[test]
fn test_split_columns_keeps_single_spaces_inside_a_column() {
    let columns = split_columns("fancy-mallard   Fix the login bug   2 hours ago");
    assert_eq!(
        columns,
        vec!["fancy-mallard", "Fix the login bug", "2 hours ago"]
    );
}

#[test]
fn test_split_columns_handles_tabs_and_surrounding_whitespace() {
    let columns = split_columns("  env-a\t\tmulti word title  ");
    assert_eq!(columns, vec!["env-a", "multi word title"]);
}

#[test]
fn test_is_header_line_requires_id_token_and_column_keyword() {
    assert!(is_header_line("ID    TITLE    CREATED    UPDATED"));
    assert!(is_header_line("ID  TITLE"));
    assert!(!is_header_line("IDLE    TITLE"));
    assert!(!is_header_line("env-a    TITLE is a word here"));
    assert!(!is_header_line("ID    something unrelated"));
}

// --- process invocation ---

#[cfg(unix)]
#[test]
fn test_run_tool_success_captures_stdout() {
    let result = run_tool(
        "sh",
        &["-c", "printf 'hello from tool'"],
        &invoke_options(5_000),
    )
    .unwrap();
    assert!(result.is_success());
    assert_eq!(result.output().stdout, "hello from tool");
    assert_eq!(result.output().exit_code, 0);
}

#[cfg(unix)]
#[test]
fn test_run_tool_nonzero_exit_keeps_code_and_stderr() {
    let result = run_tool(
        "sh",
        &["-c", "echo 'bad arg' >&2; exit 2"],
        &invoke_options(5_000),
    )
    .unwrap();
    let ToolResult::Failure { kind, output } = result else {
        panic!("expected failure");
    };
    assert_eq!(kind, FailureKind::NonZeroExit);
    assert_eq!(output.exit_code, 2);
    assert_eq!(output.stderr, "bad arg");
}

#[cfg(unix)]
#[test]
fn test_run_tool_kills_on_timeout() {
    let started = Instant::now();
    let result = run_tool("sh", &["-c", "sleep 30"], &invoke_options(200)).unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    let ToolResult::Failure { kind, output } = result else {
        panic!("expected failure");
    };
    assert_eq!(kind, FailureKind::Timeout);
    assert_eq!(output.exit_code, -1);
    assert!(output.stderr.contains("timed out after 200 ms"));
}

#[cfg(unix)]
#[test]
fn test_run_tool_timeout_returns_despite_lingering_grandchild() {
    // The shell's background child inherits the output pipe and outlives the
    // kill; the invoker must not wait for it to release the stream.
    let started = Instant::now();
    let result = run_tool(
        "sh",
        &["-c", "echo started; sleep 10 & wait"],
        &invoke_options(200),
    )
    .unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "invoker blocked on a grandchild holding the pipe"
    );
    let ToolResult::Failure { kind, output } = result else {
        panic!("expected failure");
    };
    assert_eq!(kind, FailureKind::Timeout);
    assert!(output.stdout.contains("started"));
    assert!(output.stderr.contains("timed out after 200 ms"));
}

#[test]
fn test_run_tool_reports_launch_failure() {
    let result = run_tool(
        "/nonexistent/corral-test-binary",
        &[],
        &invoke_options(1_000),
    )
    .unwrap();
    let ToolResult::Failure { kind, output } = result else {
        panic!("expected failure");
    };
    assert_eq!(kind, FailureKind::Launch);
    assert!(!output.stderr.is_empty());
}

#[test]
fn test_run_tool_rejects_missing_working_directory() {
    let options = InvokeOptions {
        timeout: Duration::from_secs(1),
        cwd: Some(Path::new("/nonexistent/corral-test-dir")),
    };
    assert!(run_tool("sh", &["-c", "true"], &options).is_err());
}

#[test]
fn test_diagnostic_prefers_stderr_over_stdout() {
    let result = ToolResult::Failure {
        kind: FailureKind::NonZeroExit,
        output: ToolOutput {
            stdout: "partial output".to_string(),
            stderr: "real error".to_string(),
            exit_code: 1,
        },
    };
    assert_eq!(result.diagnostic(), "real error");

    let result = ToolResult::Failure {
        kind: FailureKind::NonZeroExit,
        output: ToolOutput {
            stdout: "only stdout".to_string(),
            stderr: String::new(),
            exit_code: 1,
        },
    };
    assert_eq!(result.diagnostic(), "only stdout");
}

#[cfg(unix)]
#[test]
fn test_tool_available_requires_marker_in_help_output() {
    let dir = tempfile::tempdir().unwrap();
    let genuine = write_script(
        dir.path(),
        "genuine",
        "#!/bin/sh\necho 'container-use: manage container environments'\n",
    );
    let impostor = write_script(dir.path(), "impostor", "#!/bin/sh\necho 'something else'\n");
    let timeout = Duration::from_secs(5);
    assert!(tool_available(genuine.to_str().unwrap(), timeout));
    assert!(!tool_available(impostor.to_str().unwrap(), timeout));
    assert!(!tool_available("/nonexistent/corral-test-binary", timeout));
}

#[test]
fn test_first_line_picks_first_nonempty_line() {
    assert_eq!(first_line("\n  \nreal message\nsecond"), "real message");
    assert_eq!(first_line(""), "unknown error");
}

// --- session send policy ---

struct FakeSession {
    sends: Vec<String>,
    probe: Option<bool>,
    probes: Cell<usize>,
}

impl FakeSession {
    fn new(probe: Option<bool>) -> Self {
        Self {
            sends: Vec::new(),
            probe,
            probes: Cell::new(0),
        }
    }
}

impl SessionPort for FakeSession {
    fn send_text(&mut self, text: &str) {
        self.sends.push(text.to_string());
    }

    fn execution_probe(&self) -> Option<bool> {
        self.probes.set(self.probes.get() + 1);
        self.probe
    }
}

#[test]
fn test_busy_session_declined_sends_nothing() {
    let mut session = FakeSession::new(Some(true));
    let asked = Cell::new(false);
    let outcome = send_session_command(&mut session, "cu terminal env-1", false, || {
        asked.set(true);
        false
    });
    assert_eq!(outcome, SendOutcome::Declined);
    assert!(asked.get());
    assert!(session.sends.is_empty());
}

#[test]
fn test_busy_session_confirmed_runs_interrupt_sequence_in_order() {
    let mut session = FakeSession::new(Some(true));
    let outcome = send_session_command(&mut session, "cu terminal env-1", false, || true);
    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(
        session.sends,
        vec![
            "\u{3}",
            "\u{3}",
            "\u{15}",
            "exit\r",
            "clear\r",
            "cu terminal env-1\r",
        ]
    );
}

#[test]
fn test_idle_session_sends_without_confirmation() {
    let mut session = FakeSession::new(Some(false));
    let outcome = send_session_command(&mut session, "cu log env-1", false, || {
        panic!("must not ask")
    });
    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(session.sends, vec!["cu log env-1\r"]);
}

#[test]
fn test_unknown_execution_state_is_treated_as_idle() {
    let session = FakeSession::new(None);
    assert!(!session_busy(&session));

    let mut session = FakeSession::new(None);
    let outcome = send_session_command(&mut session, "cu watch", false, || {
        panic!("must not ask")
    });
    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(session.sends, vec!["cu watch\r"]);
}

#[test]
fn test_fresh_session_is_never_probed() {
    let mut session = FakeSession::new(Some(true));
    let outcome = send_session_command(&mut session, "cu terminal env-1", true, || {
        panic!("must not ask")
    });
    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(session.probes.get(), 0);
    assert_eq!(session.sends, vec!["cu terminal env-1\r"]);
}

// --- shell composition ---

#[test]
fn test_quote_arg_passes_safe_strings_through() {
    assert_eq!(quote_arg("fancy-mallard"), "fancy-mallard");
    assert_eq!(quote_arg("path/to.file_v2"), "path/to.file_v2");
}

#[test]
fn test_quote_arg_wraps_and_escapes_unsafe_strings() {
    assert_eq!(quote_arg("two words"), "'two words'");
    assert_eq!(quote_arg("it's"), "'it'\"'\"'s'");
    assert_eq!(quote_arg(""), "''");
}

#[test]
fn test_compose_command_joins_quoted_parts() {
    assert_eq!(
        compose_command("cu", &["terminal", "fancy-mallard"]),
        "cu terminal fancy-mallard"
    );
    assert_eq!(
        compose_command("cu", &["delete", "odd name"]),
        "cu delete 'odd name'"
    );
}

// --- config ---

#[test]
fn test_config_defaults() {
    let config = Config::default();
    assert_eq!(config.tool_bin, "cu");
    assert_eq!(config.workspace_root, None);
    assert_eq!(config.run_timeout, Duration::from_millis(30_000));
    assert_eq!(config.list_timeout, Duration::from_millis(10_000));
    assert_eq!(config.probe_timeout, Duration::from_millis(5_000));
}

#[test]
fn test_config_overrides_from_toml() {
    let config = Config::from_toml(
        "tool_bin = \"container-use\"\n\
         workspace_root = \"/srv/work\"\n\
         run_timeout_ms = 1000\n\
         list_timeout_ms = 2000\n",
    )
    .unwrap();
    assert_eq!(config.tool_bin, "container-use");
    assert_eq!(config.workspace_root, Some(PathBuf::from("/srv/work")));
    assert_eq!(config.run_timeout, Duration::from_millis(1_000));
    assert_eq!(config.list_timeout, Duration::from_millis(2_000));
    assert_eq!(config.probe_timeout, Duration::from_millis(5_000));
}

#[test]
fn test_config_ignores_blank_tool_bin() {
    let config = Config::from_toml("tool_bin = \"  \"\n").unwrap();
    assert_eq!(config.tool_bin, "cu");
}

#[test]
fn test_config_rejects_malformed_toml() {
    assert!(Config::from_toml("tool_bin = [").is_err());
}

// --- console actions ---

#[test]
fn test_console_action_quit_and_refresh() {
    assert_eq!(parse_console_action("q", 3), Ok(ConsoleAction::Quit));
    assert_eq!(parse_console_action("quit", 3), Ok(ConsoleAction::Quit));
    assert_eq!(parse_console_action("r", 3), Ok(ConsoleAction::Refresh));
    assert_eq!(parse_console_action("", 3), Ok(ConsoleAction::Refresh));
    assert_eq!(parse_console_action("   ", 3), Ok(ConsoleAction::Refresh));
}

#[test]
fn test_console_action_indexed_commands() {
    assert_eq!(
        parse_console_action("t 2", 3),
        Ok(ConsoleAction::Interactive {
            subcommand: "terminal",
            index: Some(2),
        })
    );
    assert_eq!(
        parse_console_action("log 1", 3),
        Ok(ConsoleAction::Interactive {
            subcommand: "log",
            index: Some(1),
        })
    );
    assert_eq!(
        parse_console_action("d 3", 3),
        Ok(ConsoleAction::OneShot {
            subcommand: "delete",
            index: 3,
        })
    );
    assert_eq!(
        parse_console_action("m 1", 3),
        Ok(ConsoleAction::OneShot {
            subcommand: "merge",
            index: 1,
        })
    );
    assert_eq!(
        parse_console_action("c 1", 3),
        Ok(ConsoleAction::OneShot {
            subcommand: "checkout",
            index: 1,
        })
    );
}

#[test]
fn test_console_action_watch_takes_no_index() {
    assert_eq!(
        parse_console_action("w", 3),
        Ok(ConsoleAction::Interactive {
            subcommand: "watch",
            index: None,
        })
    );
    assert!(parse_console_action("w 1", 3).is_err());
}

#[test]
fn test_console_action_rejects_bad_input() {
    assert!(parse_console_action("t", 3).is_err());
    assert!(parse_console_action("t abc", 3).is_err());
    assert!(parse_console_action("t 0", 3).is_err());
    assert!(parse_console_action("t 4", 3).is_err());
    assert!(parse_console_action("t 1", 0).is_err());
    assert!(parse_console_action("x 1", 3).is_err());
    assert!(parse_console_action("t 1 2", 3).is_err());
}

// --- doctor checks ---

#[test]
fn test_doctor_check_lines_distinguish_notes_from_passes() {
    use crate::commands::Check;

    let passed = Check::ok("Workspace root", "using /src/repo");
    assert_eq!(passed.line(), "[OK] Workspace root: using /src/repo");

    let note = Check::note("Terminal mode", "non-interactive environment detected");
    assert_eq!(
        note.line(),
        "[NOTE] Terminal mode: non-interactive environment detected"
    );

    let failed = Check::fail("Environment tool installed", "`cu` is missing", None);
    assert_eq!(
        failed.line(),
        "[FAIL] Environment tool installed: `cu` is missing"
    );
}

// --- command line ---

#[test]
fn test_cli_parses_subcommands_and_aliases() {
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    let cli = Cli::try_parse_from(["corral", "list", "--json"]).unwrap();
    assert!(matches!(cli.command, Commands::List { json: true }));

    let cli = Cli::try_parse_from(["corral", "ls"]).unwrap();
    assert!(matches!(cli.command, Commands::List { json: false }));

    let cli = Cli::try_parse_from(["corral", "rm", "env-1"]).unwrap();
    assert!(matches!(cli.command, Commands::Delete { id } if id == "env-1"));

    let cli = Cli::try_parse_from(["corral", "--workspace", "/tmp", "watch"]).unwrap();
    assert_eq!(cli.workspace, Some(PathBuf::from("/tmp")));
    assert!(matches!(cli.command, Commands::Watch));

    assert!(Cli::try_parse_from(["corral"]).is_err());
    assert!(Cli::try_parse_from(["corral", "terminal"]).is_err());
}

// --- end to end against a fake tool ---

#[cfg(unix)]
#[test]
fn test_fake_tool_list_then_reclaim_then_delete() {
    let dir = tempfile::tempdir().unwrap();
    let tool = write_script(
        dir.path(),
        "cu",
        "#!/bin/sh\n\
         case \"$1\" in\n\
           list)\n\
             echo 'ID              TITLE                     CREATED       UPDATED'\n\
             echo 'fancy-mallard   Fix login bug             2 hours ago   5 minutes ago'\n\
             echo 'quiet-heron     Refactor parser module    1 day ago     3 hours ago'\n\
             ;;\n\
           delete)\n\
             echo \"deleted $2\"\n\
             ;;\n\
           *)\n\
             echo 'unknown subcommand' >&2\n\
             exit 1\n\
             ;;\n\
         esac\n",
    );
    let tool = tool.to_str().unwrap();
    let options = InvokeOptions {
        timeout: Duration::from_secs(5),
        cwd: Some(dir.path()),
    };

    let result = run_tool(tool, &["list"], &options).unwrap();
    assert!(result.is_success());
    let environments = parse_environment_table(&result.output().stdout);
    assert_eq!(environments.len(), 2);
    assert_eq!(environments[1].id, "quiet-heron");

    // The shared session is busy; reclaim it and run the terminal command for
    // the first listed environment.
    let command = compose_command(tool, &["terminal", &environments[0].id]);
    let mut session = FakeSession::new(Some(true));
    let outcome = send_session_command(&mut session, &command, false, || true);
    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(session.sends.last().unwrap(), &format!("{command}\r"));

    let result = run_tool(tool, &["delete", &environments[1].id], &options).unwrap();
    assert!(result.is_success());
    assert_eq!(result.output().stdout, "deleted quiet-heron");

    let result = run_tool(tool, &["bogus"], &options).unwrap();
    let ToolResult::Failure { kind, output } = result else {
        panic!("expected failure");
    };
    assert_eq!(kind, FailureKind::NonZeroExit);
    assert_eq!(output.stderr, "unknown subcommand");
}
