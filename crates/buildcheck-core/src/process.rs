//! External process execution with interleaved output capture.
//!
//! stdout and stderr are read line by line on two tasks that feed one
//! channel, so [`InvocationResult::output`] records lines in arrival order.
//! Order within one stream is exact; order across the two streams is
//! best effort.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::error::ProcessError;

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One captured line, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// A fully specified process launch.
///
/// `env` is the complete child environment; nothing is inherited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

/// Result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub exit_code: i32,
    pub output: Vec<OutputLine>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl InvocationResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// All captured lines joined with `\n`.
    pub fn output_text(&self) -> String {
        self.output
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Lines from a single stream.
    pub fn lines(&self, stream: OutputStream) -> impl Iterator<Item = &str> {
        self.output
            .iter()
            .filter(move |line| line.stream == stream)
            .map(|line| line.text.as_str())
    }
}

/// Run `spec` to completion.
///
/// A missing or non-executable program is reported as
/// [`ProcessError::Start`]. Stdin is closed so a tool that prompts fails
/// instead of hanging.
pub async fn execute(spec: &InvocationSpec) -> Result<InvocationResult, ProcessError> {
    let started_at = Utc::now();
    let start = Instant::now();

    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(&spec.working_dir)
        .env_clear()
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Start {
            program: spec.program.clone(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ProcessError::Capture("stdout was not piped".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ProcessError::Capture("stderr was not piped".into()))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stdout_task = tokio::spawn(pump(stdout, OutputStream::Stdout, tx.clone()));
    let stderr_task = tokio::spawn(pump(stderr, OutputStream::Stderr, tx));

    // Closes once both pumps have hit EOF and dropped their senders.
    let mut output = Vec::new();
    while let Some(line) = rx.recv().await {
        output.push(line);
    }
    stdout_task.await??;
    stderr_task.await??;

    let status = child.wait().await?;

    Ok(InvocationResult {
        exit_code: status.code().unwrap_or(-1),
        output,
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

async fn pump<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<OutputLine>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&buf)
            .trim_end_matches(|c| c == '\n' || c == '\r')
            .to_string();
        if tx.send(OutputLine { stream, text }).is_err() {
            return Ok(());
        }
    }
}
