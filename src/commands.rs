use crate::cli::Commands;
use crate::config::Config;
use crate::constants::SHARED_SESSION_NAME;
use crate::environment::{Environment, parse_environment_table};
use crate::process::{InvokeOptions, ToolResult, first_line, run_tool, tool_available};
use crate::session::{SendOutcome, SessionManager, send_session_command};
use crate::shell::compose_command;
use crate::ui::{self, LineInput, progress};
use anyhow::{Context, Result, bail};
use std::env;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;

/// Everything command handlers share: configuration, the workspace override
/// from the command line, and the shared interactive sessions. Owned by
/// `main` for the life of the process.
pub(crate) struct App {
    pub(crate) config: Config,
    workspace_override: Option<PathBuf>,
    pub(crate) sessions: SessionManager,
}

impl App {
    pub(crate) fn new(config: Config, workspace_override: Option<PathBuf>) -> Self {
        Self {
            config,
            workspace_override,
            sessions: SessionManager::new(),
        }
    }

    pub(crate) fn workspace_root(&self) -> Result<PathBuf> {
        let root = match &self.workspace_override {
            Some(dir) => dir.clone(),
            None => match &self.config.workspace_root {
                Some(dir) => dir.clone(),
                None => env::current_dir().context("failed to resolve current directory")?,
            },
        };
        if !root.is_dir() {
            bail!("workspace root does not exist: {}", root.display());
        }
        Ok(root)
    }
}

pub(crate) fn run(command: Commands, app: &mut App) -> Result<()> {
    match command {
        Commands::Doctor => cmd_doctor(app),
        Commands::List { json } => cmd_list(app, json),
        Commands::Delete { id } => cmd_one_shot(app, "delete", &id),
        Commands::Merge { id } => cmd_one_shot(app, "merge", &id),
        Commands::Checkout { id } => cmd_one_shot(app, "checkout", &id),
        Commands::Terminal { id } => cmd_session(app, &["terminal", &id]),
        Commands::Log { id } => cmd_session(app, &["log", &id]),
        Commands::Watch => cmd_session(app, &["watch"]),
        Commands::Console => cmd_console(app),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckState {
    Ok,
    /// Informational only: a degraded mode, not something to fix.
    Note,
    Fail,
}

#[derive(Debug)]
pub(crate) struct Check {
    name: String,
    state: CheckState,
    detail: String,
    fix: Option<String>,
}

impl Check {
    pub(crate) fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: CheckState::Ok,
            detail: detail.into(),
            fix: None,
        }
    }

    pub(crate) fn note(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: CheckState::Note,
            detail: detail.into(),
            fix: None,
        }
    }

    pub(crate) fn fail(
        name: impl Into<String>,
        detail: impl Into<String>,
        fix: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            state: CheckState::Fail,
            detail: detail.into(),
            fix,
        }
    }

    pub(crate) fn line(&self) -> String {
        let state = match self.state {
            CheckState::Ok => "OK",
            CheckState::Note => "NOTE",
            CheckState::Fail => "FAIL",
        };
        format!("[{state}] {}: {}", self.name, self.detail)
    }

    fn print(&self) {
        println!("{}", self.line());
        if let Some(fix) = &self.fix {
            println!("      fix: {fix}");
        }
    }
}

fn cmd_doctor(app: &App) -> Result<()> {
    progress("doctor: running environment checks");
    let mut checks = Vec::new();
    let mut failed = false;

    match app.workspace_root() {
        Ok(root) => checks.push(Check::ok(
            "Workspace root",
            format!("using {}", root.display()),
        )),
        Err(err) => {
            failed = true;
            checks.push(Check::fail(
                "Workspace root",
                first_line(&format!("{err:#}")),
                Some("set `workspace_root` in the config file or pass --workspace".to_string()),
            ));
        }
    }

    let bin = &app.config.tool_bin;
    if tool_available(bin, app.config.probe_timeout) {
        checks.push(Check::ok(
            "Environment tool installed",
            format!("`{bin} --help` identifies container-use"),
        ));
    } else {
        failed = true;
        checks.push(Check::fail(
            "Environment tool installed",
            format!("`{bin}` is missing or is not the container-use tool"),
            Some(format!(
                "install container-use and ensure `{bin}` is on PATH"
            )),
        ));
    }

    if std::io::stdin().is_terminal() && std::io::stdout().is_terminal() {
        checks.push(Check::ok(
            "Terminal mode",
            "terminal, log, watch, and console will attach in this terminal".to_string(),
        ));
    } else {
        checks.push(Check::note(
            "Terminal mode",
            "non-interactive environment detected; session commands will not be usable".to_string(),
        ));
    }

    for check in checks {
        check.print();
    }

    if failed {
        bail!("doctor found failing checks")
    } else {
        Ok(())
    }
}

fn fetch_environments(app: &App) -> Result<Vec<Environment>> {
    let root = app.workspace_root()?;
    let options = InvokeOptions {
        timeout: app.config.list_timeout,
        cwd: Some(&root),
    };
    let result = run_tool(&app.config.tool_bin, &["list"], &options)?;
    match result {
        ToolResult::Success(output) => Ok(parse_environment_table(&output.stdout)),
        failure => bail!(failure_message(&app.config.tool_bin, &["list"], &failure)),
    }
}

fn failure_message(bin: &str, args: &[&str], result: &ToolResult) -> String {
    let invocation = format!("{bin} {}", args.join(" "));
    let diagnostic = result.diagnostic();
    if diagnostic.is_empty() {
        format!(
            "`{invocation}` failed with exit code {}",
            result.output().exit_code
        )
    } else {
        format!("`{invocation}` failed: {diagnostic}")
    }
}

fn cmd_list(app: &App, as_json: bool) -> Result<()> {
    progress("list: querying environments");
    let environments = fetch_environments(app)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&environments)?);
        return Ok(());
    }

    if environments.is_empty() {
        println!("No environments found");
        return Ok(());
    }

    println!("{:<16} {:<28} {:<20} UPDATED", "ID", "TITLE", "CREATED");
    for environment in &environments {
        println!(
            "{:<16} {:<28} {:<20} {}",
            environment.id,
            environment.title,
            environment.created.as_deref().unwrap_or("-"),
            environment.updated.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}

fn cmd_one_shot(app: &App, subcommand: &str, id: &str) -> Result<()> {
    let root = app.workspace_root()?;
    let bin = &app.config.tool_bin;
    progress(&format!("{subcommand}: running `{bin} {subcommand} {id}`"));
    let options = InvokeOptions {
        timeout: app.config.run_timeout,
        cwd: Some(&root),
    };
    let result = run_tool(bin, &[subcommand, id], &options)?;
    match result {
        ToolResult::Success(output) => {
            if !output.stdout.is_empty() {
                println!("{}", output.stdout);
            }
            progress(&format!("{subcommand}: done"));
            Ok(())
        }
        failure => bail!(failure_message(bin, &[subcommand, id], &failure)),
    }
}

fn cmd_session(app: &mut App, tool_args: &[&str]) -> Result<()> {
    let input = LineInput::spawn();
    run_in_session(app, tool_args, &input)
}

fn run_in_session(app: &mut App, tool_args: &[&str], input: &LineInput) -> Result<()> {
    let root = app.workspace_root()?;
    let command = compose_command(&app.config.tool_bin, tool_args);
    let (session, created) = app.sessions.find_or_create(SHARED_SESSION_NAME, &root)?;
    let outcome = send_session_command(session, &command, created, || {
        ui::confirm(
            input,
            &format!(
                "Session `{SHARED_SESSION_NAME}` is still running a command. Interrupt it and run `{command}`?"
            ),
        )
    });
    match outcome {
        SendOutcome::Declined => {
            println!("left the running command alone; nothing was sent");
            Ok(())
        }
        SendOutcome::Sent => ui::attach(session, input),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ConsoleAction {
    Quit,
    Refresh,
    OneShot {
        subcommand: &'static str,
        index: usize,
    },
    Interactive {
        subcommand: &'static str,
        index: Option<usize>,
    },
}

/// Parse a console menu line like `t 2`, `d 1`, `w`, or `q`. Indexes are
/// 1-based against the table shown to the user.
pub(crate) fn parse_console_action(
    line: &str,
    environment_count: usize,
) -> Result<ConsoleAction, String> {
    let mut parts = line.split_whitespace();
    let action = match parts.next() {
        Some(action) => action,
        None => return Ok(ConsoleAction::Refresh),
    };
    let index = parts.next();
    if parts.next().is_some() {
        return Err("expected at most an action and an environment index".to_string());
    }

    let parse_index = |raw: Option<&str>| -> Result<usize, String> {
        let raw = raw.ok_or_else(|| format!("`{action}` needs an environment index"))?;
        let index: usize = raw
            .parse()
            .map_err(|_| format!("`{raw}` is not an environment index"))?;
        if index == 0 || index > environment_count {
            return Err(format!(
                "pick an environment index between 1 and {environment_count}"
            ));
        }
        Ok(index)
    };

    match action {
        "q" | "quit" => Ok(ConsoleAction::Quit),
        "r" | "refresh" => Ok(ConsoleAction::Refresh),
        "d" | "delete" => Ok(ConsoleAction::OneShot {
            subcommand: "delete",
            index: parse_index(index)?,
        }),
        "m" | "merge" => Ok(ConsoleAction::OneShot {
            subcommand: "merge",
            index: parse_index(index)?,
        }),
        "c" | "checkout" => Ok(ConsoleAction::OneShot {
            subcommand: "checkout",
            index: parse_index(index)?,
        }),
        "t" | "terminal" => Ok(ConsoleAction::Interactive {
            subcommand: "terminal",
            index: Some(parse_index(index)?),
        }),
        "l" | "log" => Ok(ConsoleAction::Interactive {
            subcommand: "log",
            index: Some(parse_index(index)?),
        }),
        "w" | "watch" => {
            if index.is_some() {
                return Err("`watch` takes no environment index".to_string());
            }
            Ok(ConsoleAction::Interactive {
                subcommand: "watch",
                index: None,
            })
        }
        other => Err(format!("unknown action `{other}`")),
    }
}

fn print_console_table(environments: &[Environment]) {
    if environments.is_empty() {
        println!("No environments found");
        return;
    }
    println!(
        "{:<4} {:<16} {:<28} {:<20} UPDATED",
        "IDX", "ID", "TITLE", "CREATED"
    );
    for (offset, environment) in environments.iter().enumerate() {
        println!(
            "{:<4} {:<16} {:<28} {:<20} {}",
            offset + 1,
            environment.id,
            environment.title,
            environment.created.as_deref().unwrap_or("-"),
            environment.updated.as_deref().unwrap_or("-"),
        );
    }
}

fn cmd_console(app: &mut App) -> Result<()> {
    if !std::io::stdin().is_terminal() || !std::io::stdout().is_terminal() {
        bail!("console requires an interactive terminal");
    }

    let input = LineInput::spawn();
    loop {
        let environments = match fetch_environments(app) {
            Ok(environments) => environments,
            Err(err) => {
                eprintln!("error: {err:#}");
                Vec::new()
            }
        };
        print_console_table(&environments);
        println!(
            "actions: [t]erminal <idx>, [l]og <idx>, [w]atch, [d]elete <idx>, [m]erge <idx>, [c]heckout <idx>, [r]efresh, [q]uit"
        );
        print!("corral> ");
        let _ = std::io::stdout().flush();

        let Some(line) = input.next_line() else {
            return Ok(());
        };
        match parse_console_action(&line, environments.len()) {
            Ok(ConsoleAction::Quit) => return Ok(()),
            Ok(ConsoleAction::Refresh) => {}
            Ok(ConsoleAction::OneShot { subcommand, index }) => {
                if let Err(err) = cmd_one_shot(app, subcommand, &environments[index - 1].id) {
                    eprintln!("error: {err:#}");
                }
            }
            Ok(ConsoleAction::Interactive { subcommand, index }) => {
                let mut tool_args = vec![subcommand];
                if let Some(index) = index {
                    tool_args.push(&environments[index - 1].id);
                }
                if let Err(err) = run_in_session(app, &tool_args, &input) {
                    eprintln!("error: {err:#}");
                }
            }
            Err(message) => println!("{message}"),
        }
    }
}
