//! Classification precedence, parallel determinism and batch selection.

mod common;

use proptest::prelude::*;

use common::{finding, opaque, unfixable, unused_imports};
use lintloop::domain::models::{
    BudgetConfig, ClassificationSource, ClassifierConfig, Finding, RuleKey, RuleStat,
    RuleStatsSnapshot, SourceContext,
};
use lintloop::services::context_budget::SelectionHistory;
use lintloop::services::{ContextBudgetManager, FindingClassifier};

fn with_context(findings: Vec<Finding>) -> Vec<(Finding, SourceContext)> {
    findings
        .into_iter()
        .map(|f| (f, SourceContext::default()))
        .collect()
}

fn learned_rule(rule: &str, count: usize) -> Vec<Finding> {
    (0..count)
        .map(|i| {
            finding(
                rule,
                &format!("web/learned{i}.js"),
                12,
                &format!("project convention violated ({i})"),
            )
        })
        .collect()
}

#[test]
fn learned_rule_selected_over_opaque_findings() {
    let classifier = FindingClassifier::default();
    let snapshot = RuleStatsSnapshot::from_stats([(
        RuleKey::new("eslint", "R1", "javascript"),
        RuleStat::from_counts(17, 1),
    )]);

    let mut findings = learned_rule("R1", 10);
    findings.extend(opaque(40));
    let classified = classifier.classify_batch(&with_context(findings), &snapshot);

    assert_eq!(classified.len(), 50);
    let fixable: Vec<_> = classified.iter().filter(|c| c.fixable).collect();
    assert_eq!(fixable.len(), 10);
    for c in &fixable {
        assert_eq!(c.finding.rule_id, "R1");
        assert_eq!(c.source, ClassificationSource::Learned);
        assert!((c.confidence - 0.9).abs() < 1e-9);
    }

    let budget = ContextBudgetManager::new(BudgetConfig::default());
    let selection = budget.build_batch(&classified, 100_000, 10, &SelectionHistory::fresh(1));
    assert_eq!(selection.individual_count(), 10);
    assert!(selection.deferred.is_empty());
    for item in &selection.items {
        for f in item.covered_findings() {
            assert_eq!(f.rule_id, "R1");
        }
    }
}

#[test]
fn thin_or_weak_learned_stats_fall_back_to_heuristics() {
    let classifier = FindingClassifier::default();
    let snapshot = RuleStatsSnapshot::from_stats([
        // Too few samples.
        (
            RuleKey::new("eslint", "no-unused-vars", "javascript"),
            RuleStat::from_counts(2, 0),
        ),
        // Enough samples, confidence below the floor.
        (
            RuleKey::new("eslint", "custom-check", "javascript"),
            RuleStat::from_counts(3, 9),
        ),
    ]);

    let mut findings = unused_imports(2);
    findings.extend(opaque(2));
    let classified = classifier.classify_batch(&with_context(findings), &snapshot);

    assert!(classified[..2]
        .iter()
        .all(|c| c.fixable && c.source == ClassificationSource::Heuristic));
    assert!(classified[2..]
        .iter()
        .all(|c| !c.fixable && c.source == ClassificationSource::Default));
}

#[test]
fn generated_files_are_never_fixable() {
    let classifier = FindingClassifier::default();
    let context = SourceContext {
        generated: true,
        ..SourceContext::default()
    };
    let snapshot = RuleStatsSnapshot::from_stats([(
        RuleKey::new("eslint", "no-unused-vars", "javascript"),
        RuleStat::from_counts(50, 0),
    )]);

    let classified = classifier.classify(&unused_imports(1)[0], &context, &snapshot);
    assert!(!classified.fixable);
    assert!(classified.confidence.abs() < f64::EPSILON);
}

fn mixed_findings(seed: &[u8]) -> Vec<Finding> {
    seed.iter()
        .enumerate()
        .flat_map(|(i, kind)| {
            let batch = match kind % 4 {
                0 => unused_imports(1),
                1 => opaque(1),
                2 => unfixable(1),
                _ => learned_rule("R1", 1),
            };
            batch.into_iter().map(move |mut f| {
                f.file_path = format!("web/f{i}.js");
                f
            })
        })
        .collect()
}

proptest! {
    /// Classification is a pure function of its inputs.
    #[test]
    fn prop_classification_is_deterministic(seed in prop::collection::vec(any::<u8>(), 0..40)) {
        let classifier = FindingClassifier::default();
        let snapshot = RuleStatsSnapshot::from_stats([(
            RuleKey::new("eslint", "R1", "javascript"),
            RuleStat::from_counts(9, 1),
        )]);
        let items = with_context(mixed_findings(&seed));

        let first = classifier.classify_batch(&items, &snapshot);
        let second = classifier.classify_batch(&items, &snapshot);
        prop_assert_eq!(first, second);
    }

    /// Splitting across workers changes neither results nor their order.
    #[test]
    fn prop_parallel_matches_sequential(seed in prop::collection::vec(any::<u8>(), 1..120)) {
        let snapshot = RuleStatsSnapshot::from_stats([(
            RuleKey::new("eslint", "R1", "javascript"),
            RuleStat::from_counts(9, 1),
        )]);
        let items = with_context(mixed_findings(&seed));

        let sequential = FindingClassifier::new(ClassifierConfig {
            workers: Some(1),
            ..ClassifierConfig::default()
        })
        .classify_batch(&items, &snapshot);
        let parallel = FindingClassifier::new(ClassifierConfig {
            workers: Some(4),
            parallel_threshold: 1,
            ..ClassifierConfig::default()
        })
        .classify_batch(&items, &snapshot);

        prop_assert_eq!(sequential, parallel);
    }
}
