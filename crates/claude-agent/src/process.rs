use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::types::{Message, PermissionMode, QueryOptions};
use crate::{ClaudeAgentError, Result};

// ─── ClaudeProcess ────────────────────────────────────────────────────────

/// A running `claude -p --output-format stream-json` subprocess.
///
/// Spawned with stdin held open so it can sit idle in the pool until a
/// prompt arrives. The prompt is written as plain text and stdin closed;
/// responses are read as JSONL from stdout. Stderr is captured in a
/// background task and surfaced on process exit errors.
pub struct ClaudeProcess {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stdin: Option<ChildStdin>,
    /// Stderr output collected by a background reader task.
    stderr_buf: Arc<Mutex<String>>,
}

impl ClaudeProcess {
    /// Spawn the real `claude` binary configured by `opts`, without a prompt.
    ///
    /// `CLAUDECODE` is removed from the environment so this works both from a
    /// terminal and from inside a running Claude session.
    pub fn spawn(opts: &QueryOptions) -> Result<Self> {
        let mut cmd = build_command(opts);
        cmd.env_remove("CLAUDECODE");
        for (k, v) in &opts.env {
            cmd.env(k, v);
        }
        Self::from_command(cmd)
    }

    /// Spawn an arbitrary command with piped stdio.
    ///
    /// Lets callers (and tests) stand in a mock that emits stream-json lines.
    /// Must be called from within a Tokio runtime.
    pub fn from_command(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let executable = cmd.as_std().get_program().to_string_lossy().into_owned();
        let mut child = cmd
            .spawn()
            .map_err(|source| ClaudeAgentError::Spawn { executable, source })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClaudeAgentError::Process("stdout not captured".into()))?;

        let stdin = child.stdin.take();

        // Drain stderr into a buffer; surfaced when the process exits with an error.
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(&line);
                    }
                }
            });
        }

        let lines = BufReader::new(stdout).lines();
        Ok(Self {
            child,
            lines,
            stdin,
            stderr_buf,
        })
    }

    /// OS process id, if the process has not been reaped yet.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// `true` while the process has not exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Write the prompt to stdin and close it (single-turn mode).
    pub async fn send_prompt(&mut self, prompt: &str) -> Result<()> {
        let mut stdin = self
            .stdin
            .take()
            .ok_or_else(|| ClaudeAgentError::Process("stdin already closed".into()))?;
        stdin.write_all(prompt.as_bytes()).await?;
        if !prompt.ends_with('\n') {
            stdin.write_all(b"\n").await?;
        }
        stdin.flush().await?;
        // Dropping `stdin` closes the pipe.
        Ok(())
    }

    /// Read the next stream-json message from stdout.
    ///
    /// Blank lines are skipped. Lines that are not valid JSON, or are JSON in
    /// a shape we can't read, are logged and skipped rather than ending the
    /// stream. Returns `Ok(None)` on EOF.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(trimmed) {
                Ok(Message::Unknown) => continue,
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => {
                    tracing::warn!(error = %e, line = %truncate(trimmed, 200), "skipping malformed stream-json line");
                }
            }
        }
    }

    /// Wait for the child to exit and return an error if the exit code is
    /// non-zero or the process was killed by a signal.
    pub async fn wait_exit_error(&mut self) -> Option<ClaudeAgentError> {
        let status = match self.child.wait().await {
            Ok(s) => s,
            Err(e) => return Some(ClaudeAgentError::Io(e)),
        };

        if status.success() {
            return None;
        }

        let stderr = self.stderr();
        let msg = match status.code() {
            Some(code) if stderr.is_empty() => format!("claude process exited with code {code}"),
            Some(code) => format!("claude process exited with code {code}\nstderr: {stderr}"),
            None if stderr.is_empty() => "claude process terminated by signal".to_string(),
            None => format!("claude process terminated by signal\nstderr: {stderr}"),
        };

        Some(ClaudeAgentError::Process(msg))
    }

    /// Captured stderr so far.
    pub fn stderr(&self) -> String {
        self.stderr_buf
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    /// Graceful terminate: close stdin and give the process `grace` to exit,
    /// then force-kill. Always reaps the child.
    pub async fn terminate(&mut self, grace: Duration) {
        self.stdin.take();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                tracing::debug!(pid = ?self.child.id(), "process ignored stdin close, killing");
                self.kill().await;
            }
        }
    }

    /// Kill the subprocess (best-effort; errors are silently ignored).
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

impl std::fmt::Debug for ClaudeProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeProcess")
            .field("pid", &self.child.id())
            .field("stdin_open", &self.stdin.is_some())
            .finish()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ─── Command builder ──────────────────────────────────────────────────────

fn build_command(opts: &QueryOptions) -> Command {
    let exe = opts.path_to_executable.as_deref().unwrap_or("claude");
    let mut cmd = Command::new(exe);

    // Non-interactive, line-delimited JSON out. The prompt arrives on stdin.
    cmd.arg("-p")
        .arg("--output-format")
        .arg("stream-json")
        .arg("--verbose");

    if let Some(model) = &opts.model {
        cmd.arg("--model").arg(model);
    }

    if let Some(max_turns) = opts.max_turns {
        cmd.arg("--max-turns").arg(max_turns.to_string());
    }

    if !opts.allowed_tools.is_empty() {
        cmd.arg("--allowed-tools").args(&opts.allowed_tools);
    }

    if !opts.disallowed_tools.is_empty() {
        cmd.arg("--disallowed-tools").args(&opts.disallowed_tools);
    }

    if opts.permission_mode != PermissionMode::Default {
        cmd.arg("--permission-mode")
            .arg(opts.permission_mode.as_str());
    }

    if let Some(cwd) = &opts.cwd {
        cmd.current_dir(cwd);
    }

    cmd
}
