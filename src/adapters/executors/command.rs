//! Fix executor that hands each batch to an assistant CLI.
//!
//! The batch is written to the process's stdin as a JSON envelope. If the
//! process prints a JSON object matching [`FixOutcome`] on stdout, that is
//! the result; otherwise a zero exit status counts as success.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::ExecutorError;
use crate::domain::models::{ContextPriority, ExecutorConfig, Finding, FixBatch};
use crate::domain::ports::{FixExecutor, FixOutcome};

#[derive(Debug, Serialize)]
struct EnvelopeItem<'a> {
    id: Uuid,
    priority: ContextPriority,
    pattern_hash: &'a str,
    digest: bool,
    findings: Vec<&'a Finding>,
    text: String,
}

/// What the assistant receives on stdin.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    batch_id: Uuid,
    iteration: u32,
    items: Vec<EnvelopeItem<'a>>,
    /// All items rendered as one block of text.
    prompt: String,
}

impl<'a> Envelope<'a> {
    fn new(batch: &'a FixBatch) -> Self {
        Self {
            batch_id: batch.id,
            iteration: batch.iteration,
            items: batch
                .items
                .iter()
                .map(|item| EnvelopeItem {
                    id: item.id,
                    priority: item.priority,
                    pattern_hash: &item.pattern_hash,
                    digest: item.payload.is_digest(),
                    findings: item.covered_findings(),
                    text: item.payload.render(),
                })
                .collect(),
            prompt: batch.render(),
        }
    }
}

/// Map a failed run's stderr to an executor error.
fn classify_failure(code: Option<i32>, stderr: &str) -> ExecutorError {
    let lower = stderr.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit") {
        return ExecutorError::RateLimited {
            message: stderr.trim().to_string(),
            retry_after_ms: parse_retry_after(&lower),
        };
    }
    let status = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    ExecutorError::Rejected(format!("exit status {status}: {}", stderr.trim()))
}

/// Pull `retry after <n>` (seconds) out of an error message.
fn parse_retry_after(lower: &str) -> Option<u64> {
    let rest = lower.split("retry after").nth(1)?;
    let digits: String = rest
        .trim_start_matches([' ', ':', '='])
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse::<u64>().ok().map(|secs| secs * 1000)
}

/// Hands a batch to an external assistant process over stdin.
pub struct CommandFixExecutor {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandFixExecutor {
    /// Executor running the command in `config`.
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.as_ref().map(PathBuf::from),
        }
    }
}

#[async_trait]
impl FixExecutor for CommandFixExecutor {
    async fn attempt(&self, batch: &FixBatch) -> Result<FixOutcome, ExecutorError> {
        let envelope = serde_json::to_vec(&Envelope::new(batch))
            .map_err(|e| ExecutorError::Unavailable(format!("failed to encode batch: {e}")))?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExecutorError::Unavailable(format!("command not found: {}", self.command))
            } else {
                ExecutorError::Rejected(format!("failed to start {}: {e}", self.command))
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&envelope)
                .await
                .map_err(|e| ExecutorError::Rejected(format!("failed to write batch: {e}")))?;
            // Closing stdin signals end of input.
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecutorError::Rejected(format!("failed to wait for executor: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            batch_id = %batch.id,
            status = ?output.status.code(),
            stdout_bytes = output.stdout.len(),
            "Executor finished"
        );

        if !output.status.success() {
            return Err(classify_failure(output.status.code(), &stderr));
        }

        match serde_json::from_str::<FixOutcome>(stdout.trim()) {
            Ok(outcome) => Ok(outcome),
            Err(_) => Ok(FixOutcome::succeeded(Vec::new())),
        }
    }

    fn name(&self) -> &str {
        &self.command
    }
}
