//! `lintloop sessions`: inspect persisted sessions.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::sqlite::open_session_store;
use crate::cli::commands::run::format_budget;
use crate::cli::output::{
    colorize_delta, colorize_introduced, colorize_status, list_table, output, render_list,
    truncate, CommandOutput,
};
use crate::domain::errors::DomainError;
use crate::domain::models::{Config, DeferralReason, IterationOutcome, Session};
use crate::domain::ports::SessionStore;

/// Arguments for `lintloop sessions`.
#[derive(Args, Debug)]
pub struct SessionsArgs {
    /// Action to take.
    #[command(subcommand)]
    pub command: SessionsCommands,
}

/// Session inspection actions.
#[derive(Subcommand, Debug)]
pub enum SessionsCommands {
    /// List recent sessions
    List {
        /// Maximum number of sessions to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one session with its iteration history
    Show {
        /// Session ID
        id: Uuid,
    },
}

/// One row of `sessions list`.
#[derive(Debug, Serialize)]
pub struct SessionRowOutput {
    /// Session ID.
    pub id: Uuid,
    /// Scope the session ran over.
    pub scope: String,
    /// Termination reason, or `running`.
    pub status: String,
    /// Completed iterations.
    pub iterations: usize,
    /// Findings fixed over all iterations.
    pub total_fixed: usize,
    /// Findings introduced over all iterations.
    pub total_introduced: usize,
    /// Findings left after the latest iteration.
    pub remaining: Option<usize>,
    /// Last update, RFC 3339.
    pub updated_at: String,
}

impl From<&Session> for SessionRowOutput {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            scope: session.scope.clone(),
            status: session
                .termination
                .as_ref()
                .map_or_else(|| "running".to_string(), |t| t.reason.as_str().to_string()),
            iterations: session.iteration_history.len(),
            total_fixed: session.total_fixed(),
            total_introduced: session.total_introduced(),
            remaining: session.last_outcome().map(|o| o.findings_after),
            updated_at: session.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Output of `sessions list`.
#[derive(Debug, Serialize)]
pub struct SessionListOutput {
    /// Rows, most recent first.
    pub sessions: Vec<SessionRowOutput>,
    /// Number of rows.
    pub total: usize,
}

impl CommandOutput for SessionListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&[
            "id", "scope", "status", "iter", "fixed", "new", "left", "updated",
        ]);
        for s in &self.sessions {
            table.add_row(vec![
                s.id.to_string()[..8].to_string(),
                truncate(&s.scope, 30),
                colorize_status(&s.status).to_string(),
                s.iterations.to_string(),
                s.total_fixed.to_string(),
                colorize_introduced(s.total_introduced).to_string(),
                s.remaining.map_or_else(|| "-".to_string(), |r| r.to_string()),
                s.updated_at.clone(),
            ]);
        }
        render_list("session", &table, self.total)
    }
}

/// Output of `sessions show`.
#[derive(Debug, Serialize)]
pub struct SessionDetailOutput {
    /// The stored session.
    #[serde(flatten)]
    pub session: Session,
}

impl CommandOutput for SessionDetailOutput {
    fn to_human(&self) -> String {
        let session = &self.session;
        let mut lines = vec![
            format!("Session: {}", session.id),
            format!("Scope:   {}", session.scope),
            format!("Created: {}", session.created_at.format("%Y-%m-%d %H:%M:%S")),
            format!("Learned rules: {}", session.rule_stats.len()),
        ];
        match &session.termination {
            Some(t) => lines.push(format!(
                "Status:  {} ({})",
                colorize_status(t.reason.as_str()),
                t.detail
            )),
            None => lines.push(format!("Status:  {}", colorize_status("running"))),
        }
        lines.push(format_budget(&session.budget_spent));

        if !session.iteration_history.is_empty() {
            let mut table = list_table(&[
                "#", "before", "after", "fixed", "new", "delta", "batches", "failed", "deferred",
            ]);
            for outcome in &session.iteration_history {
                table.add_row(iteration_row(outcome));
            }
            lines.push(String::new());
            lines.push(table.to_string());
        }

        if !session.deferred.is_empty() {
            lines.push(String::new());
            lines.push(format!("Deferred findings ({}):", session.deferred.len()));
            for deferred in session.deferred.iter().take(20) {
                let f = &deferred.finding;
                lines.push(format!(
                    "  {}:{} {} [{}]",
                    f.file_path,
                    f.line,
                    f.rule_id,
                    describe_deferral(&deferred.reason)
                ));
            }
        }

        lines.join("\n")
    }
}

fn iteration_row(outcome: &IterationOutcome) -> Vec<String> {
    vec![
        outcome.index.to_string(),
        outcome.findings_before.to_string(),
        outcome.findings_after.to_string(),
        outcome.fixed_count.to_string(),
        outcome.new_findings_count.to_string(),
        colorize_delta(outcome.delta()).to_string(),
        outcome.batches_dispatched.to_string(),
        outcome.batches_failed.to_string(),
        outcome.deferred_count.to_string(),
    ]
}

fn describe_deferral(reason: &DeferralReason) -> String {
    match reason {
        DeferralReason::ExecutorFailure { kind, .. } => format!("executor {kind}"),
        DeferralReason::BudgetStop { message } => format!("budget: {message}"),
        DeferralReason::UserAbort => "aborted".to_string(),
        DeferralReason::CapacityLimit => "capacity".to_string(),
    }
}

/// Run a `sessions` subcommand.
pub async fn execute(args: SessionsArgs, config: &Config, json_mode: bool) -> Result<()> {
    let store = open_session_store(&config.database)
        .await
        .context("Failed to open session database")?;

    match args.command {
        SessionsCommands::List { limit } => {
            let sessions = store.list_recent(limit).await?;
            let rows: Vec<SessionRowOutput> = sessions.iter().map(SessionRowOutput::from).collect();
            output(
                &SessionListOutput {
                    total: rows.len(),
                    sessions: rows,
                },
                json_mode,
            );
        }
        SessionsCommands::Show { id } => {
            let session = store
                .load(id)
                .await?
                .ok_or(DomainError::SessionNotFound(id))?;
            output(&SessionDetailOutput { session }, json_mode);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{RuleStatsSnapshot, TerminationReason};

    #[test]
    fn row_reports_running_and_terminated_sessions() {
        let mut session = Session::new("src", RuleStatsSnapshot::empty());
        let row = SessionRowOutput::from(&session);
        assert_eq!(row.status, "running");
        assert_eq!(row.remaining, None);

        session
            .terminate(TerminationReason::Converged, "no findings")
            .unwrap();
        let row = SessionRowOutput::from(&session);
        assert_eq!(row.status, "converged");
    }

    #[test]
    fn row_totals_fixed_and_introduced() {
        let mut session = Session::new("src", RuleStatsSnapshot::empty());
        session
            .record_iteration(IterationOutcome::from_counts(1, 6, 4, 1))
            .unwrap();
        session
            .record_iteration(IterationOutcome::from_counts(2, 3, 1, 2))
            .unwrap();

        let row = SessionRowOutput::from(&session);
        assert_eq!((row.total_fixed, row.total_introduced), (5, 3));
        assert_eq!(row.remaining, Some(4));
    }
}
