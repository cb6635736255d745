use crate::constants::{
    EXIT_COMMAND, INTERRUPT_SIGNAL, LINE_CLEAR, SCREEN_CLEAR_COMMAND, SESSION_COLS, SESSION_ROWS,
    SETTLE_LONG_MS, SETTLE_SHORT_MS,
};
use crate::shell::preferred_shell;
use anyhow::{Context, Result};
#[cfg(not(unix))]
use portable_pty::ChildKiller;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// What the send/reclaim policy needs from an interactive session: a
/// fire-and-forget text sink and whatever execution introspection the host
/// can offer. Sending has no failure channel on purpose.
pub(crate) trait SessionPort {
    fn send_text(&mut self, text: &str);
    /// Best-effort introspection: `Some(true)` when something is known to be
    /// running, `Some(false)` when known idle, `None` when the host cannot
    /// tell.
    fn execution_probe(&self) -> Option<bool>;
}

/// Busy detection with an optimistic default: when introspection is absent
/// the session is treated as idle. Missing a running command costs one wasted
/// keystroke; a spurious takeover prompt blocks routine use.
pub(crate) fn session_busy(port: &impl SessionPort) -> bool {
    port.execution_probe().unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Sent,
    Declined,
}

/// Send `command` into the shared session, reclaiming it first when it is
/// busy and the user agrees. A freshly created session cannot be busy and is
/// never probed. Declining aborts with nothing sent.
pub(crate) fn send_session_command(
    port: &mut impl SessionPort,
    command: &str,
    freshly_created: bool,
    confirm_takeover: impl FnOnce() -> bool,
) -> SendOutcome {
    if !freshly_created && session_busy(port) {
        if !confirm_takeover() {
            debug!("takeover declined; leaving session untouched");
            return SendOutcome::Declined;
        }
        run_interrupt_sequence(port);
    }
    port.send_text(&format!("{command}\r"));
    SendOutcome::Sent
}

/// Reclaim a busy session. The steps are strictly ordered: each one assumes
/// the session has settled from the previous. Two interrupts cover programs
/// that swallow the first; `exit` pops a nested subshell the busy command may
/// have left behind; `clear` keeps stale output away from the next command.
fn run_interrupt_sequence(port: &mut impl SessionPort) {
    debug!("reclaiming busy session");
    for _ in 0..2 {
        port.send_text(INTERRUPT_SIGNAL);
        thread::sleep(Duration::from_millis(SETTLE_SHORT_MS));
    }
    port.send_text(LINE_CLEAR);
    port.send_text(&format!("{EXIT_COMMAND}\r"));
    thread::sleep(Duration::from_millis(SETTLE_LONG_MS));
    port.send_text(&format!("{SCREEN_CLEAR_COMMAND}\r"));
    thread::sleep(Duration::from_millis(SETTLE_LONG_MS));
}

/// A named shell running in a PTY. Output is drained continuously into a
/// buffer so nothing is lost while the session is not being shown.
pub(crate) struct PtySession {
    name: String,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send>,
    output: Arc<Mutex<Vec<u8>>>,
    cursor: usize,
}

impl PtySession {
    pub(crate) fn spawn(name: &str, cwd: &Path) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: SESSION_ROWS,
                cols: SESSION_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("failed to open a pty for the shared session")?;

        let shell = preferred_shell();
        let mut command = CommandBuilder::new(&shell);
        command.cwd(cwd);
        command.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(command)
            .with_context(|| format!("failed to spawn `{shell}` in the shared session"))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .context("failed to clone the session reader")?;
        let writer = pair
            .master
            .take_writer()
            .context("failed to take the session writer")?;

        debug!(name, shell = %shell, cwd = %cwd.display(), "spawned shared session");

        let output = Arc::new(Mutex::new(Vec::new()));
        let buffer = Arc::clone(&output);
        thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let mut guard = buffer.lock().unwrap_or_else(|e| e.into_inner());
                        guard.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        });

        Ok(Self {
            name: name.to_string(),
            master: pair.master,
            writer,
            child,
            output,
            cursor: 0,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Write output accumulated since the last flush to `out`.
    pub(crate) fn flush_output(&mut self, out: &mut impl Write) -> Result<()> {
        let pending = {
            let guard = self.output.lock().unwrap_or_else(|e| e.into_inner());
            guard[self.cursor.min(guard.len())..].to_vec()
        };
        if pending.is_empty() {
            return Ok(());
        }
        self.cursor += pending.len();
        out.write_all(&pending)
            .context("failed to write session output")?;
        out.flush().context("failed to flush session output")?;
        Ok(())
    }
}

impl SessionPort for PtySession {
    fn send_text(&mut self, text: &str) {
        if let Err(err) = self
            .writer
            .write_all(text.as_bytes())
            .and_then(|()| self.writer.flush())
        {
            debug!(name = %self.name, error = %err, "dropped write to session");
        }
    }

    #[cfg(unix)]
    fn execution_probe(&self) -> Option<bool> {
        let foreground = self.master.process_group_leader()?;
        let shell_pid = self.child.process_id()?;
        Some(foreground != shell_pid as libc::pid_t)
    }

    #[cfg(not(unix))]
    fn execution_probe(&self) -> Option<bool> {
        None
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        // Kill the whole process group so commands the shell spawned do not
        // outlive the CLI.
        #[cfg(unix)]
        if let Some(pid) = self.child.process_id() {
            unsafe {
                libc::kill(-(pid as libc::pid_t), libc::SIGTERM);
                thread::sleep(Duration::from_millis(SETTLE_SHORT_MS));
                libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Owns the shared interactive sessions for the life of the process. Lookup
/// is by name on every call so a session the user closed in the meantime is
/// replaced instead of reused.
pub(crate) struct SessionManager {
    sessions: Vec<PtySession>,
}

impl SessionManager {
    pub(crate) fn new() -> Self {
        Self {
            sessions: Vec::new(),
        }
    }

    /// Return the first live session with this name, creating one when none
    /// exists. The flag reports whether the session was freshly created.
    pub(crate) fn find_or_create(
        &mut self,
        name: &str,
        cwd: &Path,
    ) -> Result<(&mut PtySession, bool)> {
        self.sessions.retain_mut(|session| !session.has_exited());
        if let Some(index) = self
            .sessions
            .iter()
            .position(|session| session.name() == name)
        {
            return Ok((&mut self.sessions[index], false));
        }
        let session = PtySession::spawn(name, cwd)?;
        let index = self.sessions.len();
        self.sessions.push(session);
        Ok((&mut self.sessions[index], true))
    }
}
