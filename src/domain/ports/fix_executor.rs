//! Fix executor port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::ExecutorError;
use crate::domain::models::FixBatch;

/// Tokens (and optionally cost) consumed by one executor call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Reported cost; when absent the cost monitor prices the tokens itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl TokenUsage {
    /// Input plus output tokens.
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Result of one successful executor call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixOutcome {
    /// `false` means the assistant declined or failed; treated as a rejection.
    pub success: bool,
    /// Files the assistant edited.
    #[serde(default)]
    pub files_changed: Vec<String>,
    /// Failure message when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tokens consumed, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl FixOutcome {
    /// Successful outcome touching `files_changed`.
    pub fn succeeded(files_changed: Vec<String>) -> Self {
        Self {
            success: true,
            files_changed,
            error: None,
            usage: None,
        }
    }

    /// Attach token usage.
    #[must_use]
    pub const fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Code-editing assistant that attempts to fix one batch.
#[async_trait]
pub trait FixExecutor: Send + Sync {
    /// Attempt the batch once. Retries are the caller's responsibility.
    async fn attempt(&self, batch: &FixBatch) -> Result<FixOutcome, ExecutorError>;

    fn name(&self) -> &str {
        "executor"
    }
}
