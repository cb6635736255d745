use crate::constants::DEFAULT_SHELL;
use std::env;

pub(crate) fn preferred_shell() -> String {
    env::var("SHELL")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SHELL.to_string())
}

/// Compose a single shell command line from a program and its arguments,
/// quoting anything the shell would otherwise split or expand.
pub(crate) fn compose_command(program: &str, args: &[&str]) -> String {
    let mut parts = vec![quote_arg(program)];
    parts.extend(args.iter().map(|arg| quote_arg(arg)));
    parts.join(" ")
}

pub(crate) fn quote_arg(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || "@%_+=:,./-".contains(ch))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}
