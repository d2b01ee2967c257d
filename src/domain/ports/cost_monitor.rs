//! Cost monitor port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::BudgetExceeded;
use crate::domain::models::BudgetSpent;

use super::fix_executor::TokenUsage;

/// Remaining headroom under each configured ceiling (`None` = unlimited).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetRemaining {
    /// USD left.
    pub cost_usd: Option<f64>,
    /// Tokens left.
    pub tokens: Option<u64>,
    /// Wall-clock time left.
    pub wall_clock_ms: Option<u64>,
}

/// Answer to "may another executor call run?".
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetCheck {
    /// Whether the call may run.
    pub allowed: bool,
    /// Headroom at check time.
    pub remaining: BudgetRemaining,
    /// The ceiling hit when not allowed.
    pub exceeded: Option<BudgetExceeded>,
}

impl BudgetCheck {
    /// Allowing check.
    pub const fn allow(remaining: BudgetRemaining) -> Self {
        Self {
            allowed: true,
            remaining,
            exceeded: None,
        }
    }

    /// Denying check naming the exceeded ceiling.
    pub const fn deny(remaining: BudgetRemaining, exceeded: BudgetExceeded) -> Self {
        Self {
            allowed: false,
            remaining,
            exceeded: Some(exceeded),
        }
    }
}

/// Tracks spend and decides whether another executor call is allowed.
#[async_trait]
pub trait CostMonitor: Send + Sync {
    async fn check_budget(&self) -> BudgetCheck;

    async fn record_usage(&self, usage: &TokenUsage);

    /// Seed the monitor with spend carried over from a resumed session.
    async fn restore(&self, spent: &BudgetSpent);

    /// Spend so far, including anything restored.
    async fn spent(&self) -> BudgetSpent;
}
