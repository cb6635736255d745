use crate::constants::{AVAILABILITY_MARKER, SENTINEL_EXIT_CODE, STREAM_DRAIN_GRACE_MS};
use anyhow::{Context, Result, bail};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;
use wait_timeout::ChildExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ToolOutput {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) exit_code: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    /// The process could not be spawned at all.
    Launch,
    /// The process outlived its allotted window and was killed.
    Timeout,
    /// The process ran to completion and reported failure.
    NonZeroExit,
}

/// Outcome of one tool invocation. Tool-level failure is encoded here rather
/// than raised; `run_tool` only returns `Err` for caller misuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ToolResult {
    Success(ToolOutput),
    Failure {
        kind: FailureKind,
        output: ToolOutput,
    },
}

impl ToolResult {
    pub(crate) fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub(crate) fn output(&self) -> &ToolOutput {
        match self {
            Self::Success(output) => output,
            Self::Failure { output, .. } => output,
        }
    }

    /// The tool's own error text: stderr when present, stdout otherwise.
    pub(crate) fn diagnostic(&self) -> &str {
        let output = self.output();
        if output.stderr.is_empty() {
            &output.stdout
        } else {
            &output.stderr
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct InvokeOptions<'a> {
    pub(crate) timeout: Duration,
    pub(crate) cwd: Option<&'a Path>,
}

pub(crate) fn run_tool(program: &str, args: &[&str], options: &InvokeOptions) -> Result<ToolResult> {
    if let Some(cwd) = options.cwd
        && !cwd.is_dir()
    {
        bail!("working directory does not exist: {}", cwd.display());
    }

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = options.cwd {
        command.current_dir(cwd);
    }

    debug!(program, ?args, timeout_ms = options.timeout.as_millis() as u64, "spawning tool");
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            debug!(program, error = %err, "tool failed to launch");
            return Ok(ToolResult::Failure {
                kind: FailureKind::Launch,
                output: ToolOutput {
                    stdout: String::new(),
                    stderr: err.to_string(),
                    exit_code: err.raw_os_error().unwrap_or(SENTINEL_EXIT_CODE),
                },
            });
        }
    };

    let stdout_capture = capture_stream(child.stdout.take());
    let stderr_capture = capture_stream(child.stderr.take());

    let status = child
        .wait_timeout(options.timeout)
        .with_context(|| format!("failed to wait for `{program}`"))?;

    let Some(status) = status else {
        child
            .kill()
            .with_context(|| format!("failed to kill timed-out `{program}`"))?;
        child
            .wait()
            .with_context(|| format!("failed to reap timed-out `{program}`"))?;
        let stdout = stdout_capture.finish();
        let mut stderr = stderr_capture.finish();
        if !stderr.is_empty() {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "`{program}` timed out after {} ms",
            options.timeout.as_millis()
        ));
        debug!(program, "tool timed out and was killed");
        return Ok(ToolResult::Failure {
            kind: FailureKind::Timeout,
            output: ToolOutput {
                stdout,
                stderr,
                exit_code: SENTINEL_EXIT_CODE,
            },
        });
    };

    let output = ToolOutput {
        stdout: stdout_capture.finish(),
        stderr: stderr_capture.finish(),
        exit_code: status.code().unwrap_or(SENTINEL_EXIT_CODE),
    };
    debug!(program, exit_code = output.exit_code, "tool exited");

    if status.success() {
        Ok(ToolResult::Success(output))
    } else {
        Ok(ToolResult::Failure {
            kind: FailureKind::NonZeroExit,
            output,
        })
    }
}

/// Check that `bin` is the expected environment tool, not merely some binary
/// sharing its name: the help output must carry the marker token.
pub(crate) fn tool_available(bin: &str, timeout: Duration) -> bool {
    let options = InvokeOptions { timeout, cwd: None };
    match run_tool(bin, &["--help"], &options) {
        Ok(result) => {
            let output = result.output();
            output.stdout.contains(AVAILABILITY_MARKER)
                || output.stderr.contains(AVAILABILITY_MARKER)
        }
        Err(_) => false,
    }
}

/// A stream being drained into a shared buffer. The reader thread is never
/// joined unconditionally: the tool's own children inherit the pipe's write
/// end, and a lingering grandchild would keep it open past the tool's death,
/// so waiting for EOF can block long after the tool is gone.
struct StreamCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    handle: thread::JoinHandle<()>,
}

impl StreamCapture {
    /// Give the reader a short grace window to reach EOF, then take whatever
    /// has been buffered so far.
    fn finish(self) -> String {
        let deadline = Instant::now() + Duration::from_millis(STREAM_DRAIN_GRACE_MS);
        while !self.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if self.handle.is_finished() {
            let _ = self.handle.join();
        }
        let guard = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&guard).trim().to_string()
    }
}

fn capture_stream<R: Read + Send + 'static>(stream: Option<R>) -> StreamCapture {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let handle = thread::spawn(move || {
        let Some(mut stream) = stream else {
            return;
        };
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut guard = sink.lock().unwrap_or_else(|e| e.into_inner());
                    guard.extend_from_slice(&chunk[..n]);
                }
            }
        }
    });
    StreamCapture { buffer, handle }
}

pub(crate) fn first_line(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("unknown error")
        .to_string()
}
