//! Context budget manager.
//!
//! Turns classified findings into size-bounded, priority-ordered batches for
//! the fix executor. Selection is prefix-greedy over a deterministic order,
//! so a larger budget never selects fewer individual items. Leftovers of the
//! same rule may be condensed into a digest when the budget ran out.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::{
    BudgetConfig, ClassifiedFinding, ContextItem, ContextPayload, ContextPriority, Session,
};

/// Estimated tokens for `text`: `ceil(chars / chars_per_token)`.
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    text.chars().count().div_ceil(chars_per_token.max(1))
}

static NO_FAILURES: BTreeSet<String> = BTreeSet::new();
static NO_FIRST_SEEN: BTreeMap<String, u32> = BTreeMap::new();

/// Session state consulted while ordering candidates.
#[derive(Debug, Clone, Copy)]
pub struct SelectionHistory<'a> {
    /// Patterns attempted last iteration that are still present.
    pub recent_failures: &'a BTreeSet<String>,
    /// Pattern hash -> iteration it first appeared in.
    pub first_seen: &'a BTreeMap<String, u32>,
    /// Iteration being planned; ages are measured from it.
    pub iteration: u32,
}

impl SelectionHistory<'static> {
    /// No failures, no ages; every item is first-time.
    pub fn fresh(iteration: u32) -> Self {
        Self {
            recent_failures: &NO_FAILURES,
            first_seen: &NO_FIRST_SEEN,
            iteration,
        }
    }
}

impl<'a> SelectionHistory<'a> {
    /// History recorded on `session`, as seen from `iteration`.
    pub fn for_session(session: &'a Session, iteration: u32) -> Self {
        Self {
            recent_failures: &session.recent_failures,
            first_seen: &session.first_seen,
            iteration,
        }
    }

    fn recently_failed(&self, hash: &str) -> bool {
        self.recent_failures.contains(hash)
    }

    fn age(&self, hash: &str) -> u32 {
        self.first_seen
            .get(hash)
            .map_or(0, |first| self.iteration.saturating_sub(*first))
    }
}

/// Output of one [`ContextBudgetManager::build_batch`] call.
///
/// `items` is the selected prefix and never shrinks as the budget grows.
/// Digests fill whatever budget the prefix left and are kept apart, since
/// a longer prefix can leave too little room for them.
#[derive(Debug, Clone, Default)]
pub struct BatchSelection {
    /// Individually selected findings, in selection order.
    pub items: Vec<ContextItem>,
    /// Per-rule digests of leftovers, packed after the prefix.
    pub digests: Vec<ContextItem>,
    /// Fixable findings neither selected nor covered by a digest.
    pub deferred: Vec<ClassifiedFinding>,
    /// Estimated tokens of `items` and `digests` together.
    pub tokens_used: usize,
    /// The prefix ended because the next item would exceed the token budget.
    pub stopped_on_budget: bool,
}

impl BatchSelection {
    /// Number of individually selected findings.
    pub fn individual_count(&self) -> usize {
        self.items.len()
    }

    /// Everything to send in one batch: the prefix, then the digests.
    pub fn batch_items(&self) -> impl Iterator<Item = &ContextItem> {
        self.items.iter().chain(self.digests.iter())
    }

    /// Consume the selection into the batch's item list.
    pub fn into_batch_items(self) -> Vec<ContextItem> {
        let mut items = self.items;
        items.extend(self.digests);
        items
    }
}

/// Per-iteration caps applied by [`ContextBudgetManager::plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    /// Fixable findings considered at all; the rest are deferred up front.
    pub max_findings: usize,
    /// Batches dispatched per iteration.
    pub max_batches: usize,
    /// Items, individual or digest, per batch.
    pub max_items_per_batch: usize,
}

/// Batches for one iteration.
#[derive(Debug, Clone, Default)]
pub struct IterationPlan {
    /// Item lists in dispatch order.
    pub batches: Vec<Vec<ContextItem>>,
    /// Fixable findings left for the next iteration.
    pub deferred: Vec<ClassifiedFinding>,
}

impl IterationPlan {
    /// True when nothing will be dispatched.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

struct Candidate {
    finding: ClassifiedFinding,
    priority: ContextPriority,
    recently_failed: bool,
    pattern_hash: String,
    payload: ContextPayload,
    est_tokens: usize,
}

/// Orders fixable findings and packs them into token-bounded batches.
#[derive(Debug, Clone)]
pub struct ContextBudgetManager {
    config: BudgetConfig,
}

impl ContextBudgetManager {
    /// Manager with the given token budget and digest settings.
    pub const fn new(config: BudgetConfig) -> Self {
        Self { config }
    }

    /// Settings this manager was built with.
    pub const fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Estimated tokens for `text` at the configured characters per token.
    pub fn estimate(&self, text: &str) -> usize {
        estimate_tokens(text, self.config.chars_per_token)
    }

    fn candidates(
        &self,
        findings: &[ClassifiedFinding],
        history: &SelectionHistory<'_>,
    ) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = findings
            .iter()
            .filter(|f| f.fixable)
            .map(|f| {
                let pattern_hash = f.pattern_hash();
                let payload = ContextPayload::Finding {
                    finding: f.finding.clone(),
                    snippet: f.snippet.clone(),
                };
                let est_tokens = self.estimate(&payload.render());
                Candidate {
                    priority: ContextPriority::of(f),
                    recently_failed: history.recently_failed(&pattern_hash),
                    finding: f.clone(),
                    pattern_hash,
                    payload,
                    est_tokens,
                }
            })
            .collect();
        candidates.sort_by(compare_candidates);
        candidates
    }

    /// Fixable findings in selection order.
    pub fn order(
        &self,
        findings: &[ClassifiedFinding],
        history: &SelectionHistory<'_>,
    ) -> Vec<ClassifiedFinding> {
        self.candidates(findings, history)
            .into_iter()
            .map(|c| c.finding)
            .collect()
    }

    /// Select items for one batch.
    pub fn build_batch(
        &self,
        findings: &[ClassifiedFinding],
        token_budget: usize,
        max_items: usize,
        history: &SelectionHistory<'_>,
    ) -> BatchSelection {
        let candidates = self.candidates(findings, history);

        let mut items = Vec::new();
        let mut used = 0usize;
        let mut cut = candidates.len();
        let mut stopped_on_budget = false;

        for (index, candidate) in candidates.iter().enumerate() {
            if items.len() >= max_items {
                cut = index;
                break;
            }
            if used + candidate.est_tokens > token_budget {
                cut = index;
                stopped_on_budget = true;
                break;
            }
            used += candidate.est_tokens;
            items.push(ContextItem {
                id: Uuid::new_v4(),
                payload: candidate.payload.clone(),
                priority: candidate.priority,
                est_tokens: candidate.est_tokens,
                pattern_hash: candidate.pattern_hash.clone(),
                age: history.age(&candidate.pattern_hash),
            });
        }

        let rest: Vec<Candidate> = candidates.into_iter().skip(cut).collect();
        let mut covered = vec![false; rest.len()];
        let mut digests = Vec::new();

        if self.config.summarize && stopped_on_budget && !rest.is_empty() {
            let room = max_items.saturating_sub(items.len());
            self.add_digests(
                &rest,
                &mut covered,
                &mut digests,
                &mut used,
                token_budget,
                room,
                history,
            );
        }

        let deferred = rest
            .into_iter()
            .zip(covered)
            .filter(|(_, covered)| !covered)
            .map(|(c, _)| c.finding)
            .collect();

        debug!(
            selected = items.len(),
            digests = digests.len(),
            tokens_used = used,
            token_budget,
            stopped_on_budget,
            "Built fix batch"
        );

        BatchSelection {
            items,
            digests,
            deferred,
            tokens_used: used,
            stopped_on_budget,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_digests(
        &self,
        rest: &[Candidate],
        covered: &mut [bool],
        digests: &mut Vec<ContextItem>,
        used: &mut usize,
        token_budget: usize,
        max_digests: usize,
        history: &SelectionHistory<'_>,
    ) {
        // Groups in first-appearance order, member indices in selection order.
        let mut groups: Vec<((String, String), Vec<usize>)> = Vec::new();
        for (index, candidate) in rest.iter().enumerate() {
            let key = (
                candidate.finding.finding.tool_name.clone(),
                candidate.finding.finding.rule_id.clone(),
            );
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(index),
                None => groups.push((key, vec![index])),
            }
        }

        for ((tool_name, rule_id), members) in groups {
            if digests.len() >= max_digests {
                break;
            }
            if members.len() < self.config.min_digest_group {
                continue;
            }

            // Lowest-priority members sit at the tail of the selection order.
            let take = members.len().min(self.config.digest_max_members.max(1));
            let chosen = &members[members.len() - take..];

            let member_findings: Vec<_> = chosen
                .iter()
                .map(|&i| rest[i].finding.finding.clone())
                .collect();
            let locations = member_findings
                .iter()
                .take(self.config.digest_max_locations)
                .map(|f| f.location())
                .collect();
            let payload = ContextPayload::Digest {
                representative_message: member_findings[0].message.clone(),
                count: member_findings.len(),
                locations,
                members: member_findings,
                tool_name: tool_name.clone(),
                rule_id: rule_id.clone(),
            };
            let est_tokens = self.estimate(&payload.render());
            if *used + est_tokens > token_budget {
                continue;
            }

            *used += est_tokens;
            for &i in chosen {
                covered[i] = true;
            }
            let priority = chosen
                .iter()
                .map(|&i| rest[i].priority)
                .max()
                .unwrap_or(ContextPriority::Low);
            let age = chosen
                .iter()
                .map(|&i| history.age(&rest[i].pattern_hash))
                .max()
                .unwrap_or(0);
            digests.push(ContextItem {
                id: Uuid::new_v4(),
                payload,
                priority,
                est_tokens,
                pattern_hash: digest_hash(&tool_name, &rule_id),
                age,
            });
        }
    }

    /// Split an iteration's findings into at most `max_batches` batches.
    ///
    /// Findings beyond `max_findings`, findings too large for any batch, and
    /// findings left over once the batch cap is hit are deferred.
    pub fn plan(
        &self,
        findings: &[ClassifiedFinding],
        limits: PlanLimits,
        history: &SelectionHistory<'_>,
    ) -> IterationPlan {
        let ordered = self.order(findings, history);
        let split = ordered.len().min(limits.max_findings);
        let (considered, over_cap) = ordered.split_at(split);

        let mut plan = IterationPlan {
            batches: Vec::new(),
            deferred: over_cap.to_vec(),
        };
        let mut remaining = considered.to_vec();

        while plan.batches.len() < limits.max_batches && !remaining.is_empty() {
            let mut selection = self.build_batch(
                &remaining,
                self.config.token_budget,
                limits.max_items_per_batch,
                history,
            );
            if selection.items.is_empty() && selection.digests.is_empty() {
                // Head item does not fit on its own.
                let head = self.order(&remaining, history).remove(0);
                debug!(
                    rule = %head.finding.rule_id,
                    file = %head.finding.file_path,
                    "Finding exceeds batch budget; deferring"
                );
                if let Some(pos) = remaining.iter().position(|f| f == &head) {
                    plan.deferred.push(remaining.remove(pos));
                }
                continue;
            }
            remaining = std::mem::take(&mut selection.deferred);
            plan.batches.push(selection.into_batch_items());
        }

        plan.deferred.extend(remaining);
        plan
    }
}

impl Default for ContextBudgetManager {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    let (fa, fb) = (&a.finding, &b.finding);
    a.recently_failed
        .cmp(&b.recently_failed)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| fb.confidence.total_cmp(&fa.confidence))
        .then_with(|| fa.complexity.cmp(&fb.complexity))
        .then_with(|| fa.finding.file_path.cmp(&fb.finding.file_path))
        .then_with(|| fa.finding.line.cmp(&fb.finding.line))
        .then_with(|| fa.finding.rule_id.cmp(&fb.finding.rule_id))
        .then_with(|| fa.finding.column.cmp(&fb.finding.column))
        .then_with(|| fa.finding.message.cmp(&fb.finding.message))
}

fn digest_hash(tool_name: &str, rule_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"digest\0");
    hasher.update(tool_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(rule_id.as_bytes());
    format!("{:x}", hasher.finalize())
}
