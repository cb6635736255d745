use crate::constants::{ATTACH_POLL_MS, DETACH_SEQUENCE};
use crate::session::{PtySession, SessionPort};
use anyhow::Result;
use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

pub(crate) fn progress(message: &str) {
    eprintln!("corral: {message}");
}

pub(crate) enum LinePoll {
    Line(String),
    Eof,
    Idle,
}

/// Single reader for stdin. Menu prompts, takeover confirmations, and the
/// attach loop all consume from the same channel so they never compete for
/// the stream.
pub(crate) struct LineInput {
    rx: mpsc::Receiver<Option<String>>,
}

impl LineInput {
    pub(crate) fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let message = line.ok();
                let closed = message.is_none();
                if tx.send(message).is_err() || closed {
                    return;
                }
            }
            let _ = tx.send(None);
        });
        Self { rx }
    }

    /// Block until the user enters a line; `None` on end of input.
    pub(crate) fn next_line(&self) -> Option<String> {
        self.rx.recv().ok().flatten()
    }

    pub(crate) fn poll(&self, wait: Duration) -> LinePoll {
        match self.rx.recv_timeout(wait) {
            Ok(Some(line)) => LinePoll::Line(line),
            Ok(None) | Err(mpsc::RecvTimeoutError::Disconnected) => LinePoll::Eof,
            Err(mpsc::RecvTimeoutError::Timeout) => LinePoll::Idle,
        }
    }
}

pub(crate) fn confirm(input: &LineInput, prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    let _ = io::stdout().flush();
    match input.next_line() {
        Some(answer) => {
            let answer = answer.trim();
            answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
        }
        None => false,
    }
}

/// Show the shared session: replay buffered output, then stream live output
/// while forwarding typed lines into it. `~.` on its own line or end of
/// input detaches; the session keeps running either way.
pub(crate) fn attach(session: &mut PtySession, input: &LineInput) -> Result<()> {
    println!(
        "[attached to session `{}`; type `{DETACH_SEQUENCE}` on its own line or Ctrl-D to detach]",
        session.name()
    );
    let mut stdout = io::stdout();
    loop {
        session.flush_output(&mut stdout)?;
        if session.has_exited() {
            session.flush_output(&mut stdout)?;
            println!("\n[session `{}` closed]", session.name());
            return Ok(());
        }
        match input.poll(Duration::from_millis(ATTACH_POLL_MS)) {
            LinePoll::Line(line) if line.trim() == DETACH_SEQUENCE => {
                println!("\n[detached; session `{}` keeps running]", session.name());
                return Ok(());
            }
            LinePoll::Line(line) => session.send_text(&format!("{line}\r")),
            LinePoll::Eof => {
                println!("\n[detached; session `{}` keeps running]", session.name());
                return Ok(());
            }
            LinePoll::Idle => {}
        }
    }
}
