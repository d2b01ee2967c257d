//! Spend tracking with per-model pricing and hard ceilings.
//!
//! Implements [`CostMonitor`]: usage reported by the executor is priced from
//! a static table when the executor does not report a cost itself, and
//! every dispatch is gated on the cost, token and wall-clock ceilings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::errors::BudgetExceeded;
use crate::domain::models::{BudgetSpent, CostConfig, LoopConfig};
use crate::domain::ports::{BudgetCheck, BudgetRemaining, CostMonitor, TokenUsage};

/// Pricing per million tokens for a specific model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// Cost per million input tokens (USD).
    pub input: f64,
    /// Cost per million output tokens (USD).
    pub output: f64,
}

/// Known model pricing (USD per million tokens). Longer names first so the
/// substring lookup prefers the most specific entry.
const PRICING_TABLE: &[(&str, ModelPricing)] = &[
    ("claude-opus-4", ModelPricing { input: 15.0, output: 75.0 }),
    ("claude-sonnet-4", ModelPricing { input: 3.0, output: 15.0 }),
    ("claude-haiku-4", ModelPricing { input: 0.80, output: 4.0 }),
    ("opus", ModelPricing { input: 15.0, output: 75.0 }),
    ("sonnet", ModelPricing { input: 3.0, output: 15.0 }),
    ("haiku", ModelPricing { input: 0.80, output: 4.0 }),
];

/// Get pricing for a model by name or alias (substring match).
pub fn get_model_pricing(model: &str) -> Option<ModelPricing> {
    let model_lower = model.to_lowercase();
    PRICING_TABLE
        .iter()
        .find(|(name, _)| model_lower.contains(name))
        .map(|(_, pricing)| *pricing)
}

/// Estimate cost in USD for the given token counts.
pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> Option<f64> {
    let pricing = get_model_pricing(model)?;
    Some((input_tokens as f64 * pricing.input + output_tokens as f64 * pricing.output) / 1_000_000.0)
}

/// Ceilings enforced by [`BudgetMonitor`]. `None` means unlimited.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetMonitorConfig {
    /// Model name used to price usage that arrives without a cost.
    pub model: String,
    /// Spend ceiling in USD.
    pub max_cost_usd: Option<f64>,
    /// Ceiling on input plus output tokens.
    pub max_total_tokens: Option<u64>,
    /// Ceiling on time spent across every run of the session.
    pub max_wall_clock: Option<Duration>,
}

impl BudgetMonitorConfig {
    /// Ceilings from the `cost` and `loop` config sections. A zero wall clock means none.
    pub fn from_config(cost: &CostConfig, run: &LoopConfig) -> Self {
        Self {
            model: cost.model.clone(),
            max_cost_usd: cost.max_cost_usd,
            max_total_tokens: cost.max_total_tokens,
            max_wall_clock: (run.max_wall_clock_secs > 0)
                .then(|| Duration::from_secs(run.max_wall_clock_secs)),
        }
    }

    /// No ceilings at all.
    pub fn unlimited() -> Self {
        Self {
            model: "sonnet".to_string(),
            max_cost_usd: None,
            max_total_tokens: None,
            max_wall_clock: None,
        }
    }
}

struct Inner {
    spent: BudgetSpent,
    /// Wall clock carried over from earlier runs of the session.
    restored_wall_clock_ms: u64,
    started: Instant,
}

impl Inner {
    fn wall_clock_ms(&self) -> u64 {
        self.restored_wall_clock_ms + self.started.elapsed().as_millis() as u64
    }
}

/// [`CostMonitor`] that prices usage and enforces [`BudgetMonitorConfig`].
pub struct BudgetMonitor {
    config: BudgetMonitorConfig,
    inner: Arc<RwLock<Inner>>,
}

impl BudgetMonitor {
    /// Monitor with nothing spent; the wall clock starts now.
    pub fn new(config: BudgetMonitorConfig) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(Inner {
                spent: BudgetSpent::default(),
                restored_wall_clock_ms: 0,
                started: Instant::now(),
            })),
        }
    }

    /// Ceilings this monitor enforces.
    pub const fn config(&self) -> &BudgetMonitorConfig {
        &self.config
    }
}

#[async_trait]
impl CostMonitor for BudgetMonitor {
    async fn check_budget(&self) -> BudgetCheck {
        let inner = self.inner.read().await;
        let wall_clock_ms = inner.wall_clock_ms();
        let spent = inner.spent;
        drop(inner);

        let remaining = BudgetRemaining {
            cost_usd: self
                .config
                .max_cost_usd
                .map(|max| (max - spent.cost_usd).max(0.0)),
            tokens: self
                .config
                .max_total_tokens
                .map(|max| max.saturating_sub(spent.total_tokens())),
            wall_clock_ms: self
                .config
                .max_wall_clock
                .map(|max| (max.as_millis() as u64).saturating_sub(wall_clock_ms)),
        };

        let exceeded = if let Some(max) = self.config.max_cost_usd.filter(|max| spent.cost_usd >= *max) {
            Some(BudgetExceeded::Cost(format!(
                "spent ${:.4} of ${max:.4}",
                spent.cost_usd
            )))
        } else if let Some(max) = self
            .config
            .max_total_tokens
            .filter(|max| spent.total_tokens() >= *max)
        {
            Some(BudgetExceeded::Cost(format!(
                "used {} of {max} tokens",
                spent.total_tokens()
            )))
        } else if let Some(max) = self
            .config
            .max_wall_clock
            .filter(|max| wall_clock_ms >= max.as_millis() as u64)
        {
            Some(BudgetExceeded::Time(format!(
                "ran {wall_clock_ms}ms of {}ms",
                max.as_millis()
            )))
        } else {
            None
        };

        match exceeded {
            Some(exceeded) => {
                warn!(reason = %exceeded, "Budget ceiling reached");
                BudgetCheck::deny(remaining, exceeded)
            }
            None => BudgetCheck::allow(remaining),
        }
    }

    async fn record_usage(&self, usage: &TokenUsage) {
        let cost = usage.cost_usd.unwrap_or_else(|| {
            estimate_cost(&self.config.model, usage.input_tokens, usage.output_tokens)
                .unwrap_or(0.0)
        });
        let mut inner = self.inner.write().await;
        inner.spent.input_tokens += usage.input_tokens;
        inner.spent.output_tokens += usage.output_tokens;
        inner.spent.cost_usd += cost;
        debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost_usd = cost,
            total_cost_usd = inner.spent.cost_usd,
            "Recorded executor usage"
        );
    }

    async fn restore(&self, spent: &BudgetSpent) {
        let mut inner = self.inner.write().await;
        inner.spent = BudgetSpent {
            wall_clock_ms: 0,
            ..*spent
        };
        inner.restored_wall_clock_ms = spent.wall_clock_ms;
        inner.started = Instant::now();
    }

    async fn spent(&self) -> BudgetSpent {
        let inner = self.inner.read().await;
        BudgetSpent {
            wall_clock_ms: inner.wall_clock_ms(),
            ..inner.spent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            cost_usd: None,
        }
    }

    #[test]
    fn pricing_lookup_by_alias() {
        let p = get_model_pricing("claude-sonnet-4-5-20250929").unwrap();
        assert!((p.input - 3.0).abs() < f64::EPSILON);
        assert!(get_model_pricing("gpt-whatever").is_none());
        let cost = estimate_cost("haiku", 1_000_000, 1_000_000).unwrap();
        assert!((cost - 4.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cost_ceiling_denies_dispatch() {
        let monitor = BudgetMonitor::new(BudgetMonitorConfig {
            max_cost_usd: Some(1.0),
            ..BudgetMonitorConfig::unlimited()
        });
        assert!(monitor.check_budget().await.allowed);

        monitor
            .record_usage(&TokenUsage {
                cost_usd: Some(1.5),
                ..usage(10, 10)
            })
            .await;
        let check = monitor.check_budget().await;
        assert!(!check.allowed);
        assert!(matches!(check.exceeded, Some(BudgetExceeded::Cost(_))));
        assert_eq!(check.remaining.cost_usd, Some(0.0));
    }

    #[tokio::test]
    async fn token_ceiling_counts_input_and_output() {
        let monitor = BudgetMonitor::new(BudgetMonitorConfig {
            max_total_tokens: Some(100),
            ..BudgetMonitorConfig::unlimited()
        });
        monitor.record_usage(&usage(60, 30)).await;
        assert_eq!(monitor.check_budget().await.remaining.tokens, Some(10));
        monitor.record_usage(&usage(5, 5)).await;
        assert!(!monitor.check_budget().await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_includes_restored_time() {
        let monitor = BudgetMonitor::new(BudgetMonitorConfig {
            max_wall_clock: Some(Duration::from_secs(10)),
            ..BudgetMonitorConfig::unlimited()
        });
        monitor
            .restore(&BudgetSpent {
                wall_clock_ms: 8_000,
                ..BudgetSpent::default()
            })
            .await;
        assert!(monitor.check_budget().await.allowed);

        tokio::time::advance(Duration::from_secs(3)).await;
        let check = monitor.check_budget().await;
        assert!(matches!(check.exceeded, Some(BudgetExceeded::Time(_))));
        assert!(monitor.spent().await.wall_clock_ms >= 11_000);
    }
}
