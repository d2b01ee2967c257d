//! `lintloop run`: drive a session to termination.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::collectors::CommandLintCollector;
use crate::adapters::executors::CommandFixExecutor;
use crate::adapters::sqlite::open_session_store;
use crate::cli::output::{
    colorize_delta, colorize_introduced, colorize_status, output, CommandOutput,
};
use crate::domain::models::{BudgetSpent, Config};
use crate::domain::ports::{OutcomePredictor, SessionStore};
use crate::infrastructure::config::ConfigLoader;
use crate::services::budget_monitor::{BudgetMonitor, BudgetMonitorConfig};
use crate::services::convergence_analyzer::{
    ConvergenceEvaluator, ModelAssistedAnalyzer, RuleBasedAnalyzer,
};
use crate::services::iteration_controller::{
    ControllerEvent, ControllerPorts, IterationController, RunSummary,
};
use crate::services::outcome_model::LogisticOutcomeModel;

/// Arguments for `lintloop run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path or glob handed to the lint commands
    #[arg(short, long, default_value = ".")]
    pub scope: String,

    /// Continue an interrupted session instead of starting a new one
    #[arg(long, value_name = "SESSION_ID")]
    pub resume: Option<Uuid>,

    /// Override `loop.max_iterations`
    #[arg(long)]
    pub max_iterations: Option<u32>,
}

/// Output of `lintloop run`.
#[derive(Debug, Serialize)]
pub struct RunOutput {
    /// Final session summary.
    #[serde(flatten)]
    pub summary: RunSummary,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let s = &self.summary;
        let mut lines = vec![
            format!("Session:    {}", s.session_id),
            format!(
                "Stopped:    {} ({})",
                colorize_status(s.reason.as_str()),
                s.detail
            ),
            format!("Iterations: {}", s.iterations),
            format!("Fixed:      {}", s.total_fixed),
            format!("Introduced: {}", colorize_introduced(s.total_introduced)),
            format!("Remaining:  {}", s.remaining),
        ];
        if let (Some(fixable), Some(unfixable)) = (s.remaining_fixable, s.remaining_unfixable) {
            lines.push(format!("  fixable:   {fixable}"));
            lines.push(format!("  unfixable: {unfixable}"));
        }
        if s.deferred_due_to_error > 0 {
            lines.push(format!("  deferred after executor errors: {}", s.deferred_due_to_error));
        }
        if let Some(state) = s.final_state {
            lines.push(format!("State:      {}", colorize_status(state.as_str())));
        }
        lines.push(format_budget(&s.budget_spent));
        lines.join("\n")
    }
}

pub(crate) fn format_budget(spent: &BudgetSpent) -> String {
    format!(
        "Budget:     {} tokens, ${:.4}, {:.1}s",
        spent.total_tokens(),
        spent.cost_usd,
        spent.wall_clock_ms as f64 / 1000.0
    )
}

/// Run or resume a fix session.
pub async fn execute(args: RunArgs, mut config: Config, json_mode: bool) -> Result<()> {
    if let Some(max_iterations) = args.max_iterations {
        config.run.max_iterations = max_iterations;
        ConfigLoader::validate(&config)?;
    }

    let store = Arc::new(
        open_session_store(&config.database)
            .await
            .context("Failed to open session database")?,
    );

    let mut collector = CommandLintCollector::new(&config.collector);
    if let Some(dir) = &config.executor.working_dir {
        collector = collector.with_working_dir(dir);
    }

    let ports = ControllerPorts {
        collector: Arc::new(collector),
        executor: Arc::new(CommandFixExecutor::new(&config.executor)),
        cost_monitor: Arc::new(BudgetMonitor::new(BudgetMonitorConfig::from_config(
            &config.cost,
            &config.run,
        ))),
        evaluator: build_evaluator(&config, store.as_ref()).await?,
        store,
    };

    let (event_tx, event_rx) = mpsc::channel(64);
    let printer = tokio::spawn(print_events(event_rx, json_mode));

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after in-flight batches");
            signal_token.cancel();
        }
    });

    let mut controller = IterationController::new(ports, &config).with_events(event_tx);
    let result = match args.resume {
        Some(session_id) => controller.resume(session_id, cancel).await,
        None => controller.run(&args.scope, cancel).await,
    };
    drop(controller);
    let _ = printer.await;

    let summary = result?;
    output(&RunOutput { summary }, json_mode);
    Ok(())
}

/// Rule-based analysis, refined by an outcome model trained on past sessions
/// when enabled and enough history exists.
async fn build_evaluator(
    config: &Config,
    store: &dyn SessionStore,
) -> Result<Arc<dyn ConvergenceEvaluator>> {
    let rules = RuleBasedAnalyzer::new(config.convergence.clone());
    let model_config = &config.convergence.model;
    if !model_config.enabled {
        return Ok(Arc::new(rules));
    }

    let history = store
        .list_recent(model_config.history_sessions)
        .await
        .context("Failed to load session history for the outcome model")?;
    let model = LogisticOutcomeModel::train(&history, model_config);
    if !model.is_available() {
        info!(
            samples = model.samples(),
            required = model_config.min_training_samples,
            "Outcome model has too little history; using rule-based convergence only"
        );
        return Ok(Arc::new(rules));
    }

    Ok(Arc::new(ModelAssistedAnalyzer::new(
        rules,
        Arc::new(model),
        model_config.min_model_confidence,
    )))
}

/// Human progress lines on stderr. JSON mode only prints the final summary.
async fn print_events(mut rx: mpsc::Receiver<ControllerEvent>, json_mode: bool) {
    while let Some(event) = rx.recv().await {
        if json_mode {
            continue;
        }
        match event {
            ControllerEvent::SessionStarted {
                session_id,
                scope,
                resumed,
                next_iteration,
            } => {
                let verb = if resumed { "Resuming" } else { "Starting" };
                eprintln!("{verb} session {session_id} on {scope} at iteration {next_iteration}");
            }
            ControllerEvent::FindingsCollected { iteration, count } => {
                eprintln!("[{iteration}] {count} finding(s) collected");
            }
            ControllerEvent::Classified {
                iteration,
                total,
                fixable,
            } => {
                eprintln!("[{iteration}] {fixable} of {total} classified fixable");
            }
            ControllerEvent::BatchDispatched {
                iteration,
                items,
                est_tokens,
                ..
            } => {
                eprintln!("[{iteration}] dispatching batch of {items} item(s), ~{est_tokens} tokens");
            }
            ControllerEvent::BatchFailed {
                iteration,
                kind,
                message,
                attempts,
                ..
            } => {
                eprintln!(
                    "[{iteration}] {} batch failed after {attempts} attempt(s) ({kind}): {message}",
                    console::style("!").red()
                );
            }
            ControllerEvent::IterationCompleted {
                outcome,
                state,
                reason,
                ..
            } => {
                eprintln!(
                    "[{}] {} -> {} findings, delta {}, {}: {reason}",
                    outcome.index,
                    outcome.findings_before,
                    outcome.findings_after,
                    colorize_delta(outcome.delta()),
                    colorize_status(state.as_str()),
                );
            }
            ControllerEvent::PhaseChanged { .. } | ControllerEvent::Terminated { .. } => {}
        }
    }
}
