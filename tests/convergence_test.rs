//! Convergence verdicts over realistic histories, standalone and driven by
//! the controller.

mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{controller, test_config, unlimited_monitor, unused_imports, FixingExecutor, Workspace, WorkspaceCollector};
use lintloop::adapters::InMemorySessionStore;
use lintloop::domain::models::{ConvergenceConfig, ConvergenceState, IterationOutcome, TerminationReason};
use lintloop::services::{ConvergenceEvaluator, RuleBasedAnalyzer};

#[test]
fn tapering_run_moves_from_improving_to_converged() {
    let analyzer = RuleBasedAnalyzer::new(ConvergenceConfig::default());

    // 10 findings: 5 fixed, then 1, then nothing.
    let mut history = vec![IterationOutcome::from_counts(1, 10, 5, 0)];
    let verdict = analyzer.evaluate(&history);
    assert_eq!(verdict.state, ConvergenceState::Improving);
    assert!(verdict.should_continue);

    history.push(IterationOutcome::from_counts(2, 5, 1, 0));
    let verdict = analyzer.evaluate(&history);
    assert_eq!(verdict.state, ConvergenceState::Plateauing);
    assert!(verdict.should_continue);

    history.push(IterationOutcome::from_counts(3, 4, 0, 0));
    let verdict = analyzer.evaluate(&history);
    assert_eq!(verdict.state, ConvergenceState::Converged);
    assert!(!verdict.should_continue);
    assert_eq!(verdict.stop_reason, Some(TerminationReason::Converged));
}

#[test]
fn verdict_depends_only_on_history() {
    let analyzer = RuleBasedAnalyzer::default();
    let history = vec![
        IterationOutcome::from_counts(1, 20, 3, 6),
        IterationOutcome::from_counts(2, 23, 6, 3),
        IterationOutcome::from_counts(3, 20, 3, 6),
        IterationOutcome::from_counts(4, 23, 6, 3),
    ];

    let first = analyzer.evaluate(&history);
    let second = analyzer.evaluate(&history);
    assert_eq!(first.state, second.state);
    assert_eq!(first.should_continue, second.should_continue);
    assert_eq!(first.state, ConvergenceState::Oscillating);
}

#[tokio::test]
async fn regressing_fixes_abort_as_diverging() {
    let config = test_config();
    let workspace = Workspace::new(unused_imports(3));
    let executor = FixingExecutor::new(workspace.clone())
        .fixing(vec![1; 10])
        .introducing(2);
    let mut ctl = controller(
        &config,
        Arc::new(WorkspaceCollector::new(workspace.clone())),
        Arc::new(executor),
        Arc::new(InMemorySessionStore::new()),
        unlimited_monitor(),
    );

    let summary = ctl.run("web/", CancellationToken::new()).await.unwrap();

    // Each pass fixes one finding and adds two: 3 -> 4 -> 5 -> 6.
    assert_eq!(summary.reason, TerminationReason::DivergingAbort);
    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.total_fixed, 3);
    assert_eq!(summary.total_introduced, 6);
    assert_eq!(summary.remaining, 6);
    assert_eq!(summary.final_state, Some(ConvergenceState::Diverging));
    assert_eq!(workspace.len(), 6);
}
