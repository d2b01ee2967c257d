//! Learned per-rule fix statistics.
//!
//! The learned store is an immutable, versioned [`RuleStatsSnapshot`]. The
//! classifier only ever reads a snapshot; the iteration controller is the
//! single writer and produces the next snapshot with
//! [`RuleStatsSnapshot::commit`] at the end of each iteration. Commits are
//! keyed by iteration index so replaying an iteration after a resume never
//! double-counts.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::errors::ClassifierDataError;

use super::finding::Finding;

// ---------------------------------------------------------------------------
// RuleKey
// ---------------------------------------------------------------------------

/// Identity of a lint rule in a given language.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    /// Lint tool.
    pub tool_name: String,
    /// Rule within the tool.
    pub rule_id: String,
    /// Language of the file the rule fired in.
    pub language: String,
}

impl RuleKey {
    /// Key from its parts.
    pub fn new(
        tool_name: impl Into<String>,
        rule_id: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            rule_id: rule_id.into(),
            language: language.into(),
        }
    }

    /// Key for a finding, optionally overriding the extension-derived language.
    pub fn for_finding(finding: &Finding, language: Option<&str>) -> Self {
        Self::new(
            finding.tool_name.as_str(),
            finding.rule_id.as_str(),
            language.unwrap_or_else(|| finding.language()),
        )
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tool_name, self.rule_id, self.language)
    }
}

// ---------------------------------------------------------------------------
// RuleStat
// ---------------------------------------------------------------------------

/// Laplace-smoothed success rate: `(success + 1) / (success + failure + 2)`.
pub fn laplace_confidence(success_count: u64, failure_count: u64) -> f64 {
    (success_count as f64 + 1.0) / ((success_count + failure_count) as f64 + 2.0)
}

/// Observed fix outcomes for one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleStat {
    /// Attempts that resolved the finding.
    pub success_count: u64,
    /// Attempts after which the finding remained.
    pub failure_count: u64,
    /// Laplace-smoothed success rate.
    pub confidence: f64,
}

impl Default for RuleStat {
    fn default() -> Self {
        Self::from_counts(0, 0)
    }
}

impl RuleStat {
    /// Stat with confidence derived from the counts.
    pub fn from_counts(success_count: u64, failure_count: u64) -> Self {
        Self {
            success_count,
            failure_count,
            confidence: laplace_confidence(success_count, failure_count),
        }
    }

    /// Total attempts observed.
    pub const fn samples(&self) -> u64 {
        self.success_count + self.failure_count
    }

    fn record(&mut self, resolved: u64, still_present: u64) {
        self.success_count += resolved;
        self.failure_count += still_present;
        self.confidence = laplace_confidence(self.success_count, self.failure_count);
    }
}

// ---------------------------------------------------------------------------
// LearningUpdate
// ---------------------------------------------------------------------------

/// Per-rule tallies gathered during one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTally {
    /// Attempted findings gone afterwards.
    pub resolved: u64,
    /// Attempted findings still present.
    pub still_present: u64,
}

/// Outcome of every attempted finding in one iteration, grouped by rule.
///
/// Findings deferred because their batch failed are not recorded: the
/// failure says nothing about the rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningUpdate {
    /// Iteration the tallies come from.
    pub iteration: u32,
    /// Tallies per rule.
    pub tallies: BTreeMap<RuleKey, RuleTally>,
}

impl LearningUpdate {
    /// Empty update for `iteration`.
    pub const fn new(iteration: u32) -> Self {
        Self {
            iteration,
            tallies: BTreeMap::new(),
        }
    }

    /// Count one attempted finding.
    pub fn record(&mut self, key: RuleKey, resolved: bool) {
        let tally = self.tallies.entry(key).or_default();
        if resolved {
            tally.resolved += 1;
        } else {
            tally.still_present += 1;
        }
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.tallies.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RuleStatsSnapshot
// ---------------------------------------------------------------------------

/// Immutable view of the learned rule store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStatsSnapshot {
    /// Incremented on every effective commit.
    pub version: u64,
    /// Highest iteration whose learning update is folded in.
    #[serde(default)]
    pub last_applied_iteration: Option<u32>,
    #[serde(with = "stat_entries", default)]
    stats: BTreeMap<RuleKey, RuleStat>,
}

impl RuleStatsSnapshot {
    /// Snapshot with no learned rules.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot directly from known stats (tests, imports).
    pub fn from_stats(stats: impl IntoIterator<Item = (RuleKey, RuleStat)>) -> Self {
        Self {
            version: 0,
            last_applied_iteration: None,
            stats: stats.into_iter().collect(),
        }
    }

    /// Stat for `key`, if learned.
    pub fn get(&self, key: &RuleKey) -> Option<&RuleStat> {
        self.stats.get(key)
    }

    /// Number of learned rules.
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// Whether no rule has been learned.
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Learned rules in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&RuleKey, &RuleStat)> {
        self.stats.iter()
    }

    /// Whether the update for `iteration` has already been folded in.
    pub fn is_applied(&self, iteration: u32) -> bool {
        self.last_applied_iteration
            .is_some_and(|last| iteration <= last)
    }

    /// Produce the next snapshot with `update` applied.
    ///
    /// Returns an unchanged copy when the iteration was already applied.
    pub fn commit(&self, update: &LearningUpdate) -> Self {
        if self.is_applied(update.iteration) {
            tracing::debug!(
                iteration = update.iteration,
                last_applied = ?self.last_applied_iteration,
                "Learning update already applied; skipping"
            );
            return self.clone();
        }

        let mut stats = self.stats.clone();
        for (key, tally) in &update.tallies {
            stats
                .entry(key.clone())
                .or_default()
                .record(tally.resolved, tally.still_present);
        }

        Self {
            version: self.version + 1,
            last_applied_iteration: Some(update.iteration),
            stats,
        }
    }

    /// Same stats with the iteration watermark cleared, for seeding a new
    /// session from the cross-session store.
    pub fn rebased(&self) -> Self {
        Self {
            version: self.version,
            last_applied_iteration: None,
            stats: self.stats.clone(),
        }
    }

    /// Reject snapshots whose numbers cannot have come from real counts.
    pub fn validate(&self) -> Result<(), ClassifierDataError> {
        for (key, stat) in &self.stats {
            if !stat.confidence.is_finite() || !(0.0..=1.0).contains(&stat.confidence) {
                return Err(ClassifierDataError::InvalidStat {
                    key: key.to_string(),
                    reason: format!("confidence {} outside [0, 1]", stat.confidence),
                });
            }
        }
        Ok(())
    }

    /// Parse and validate a serialized snapshot.
    pub fn from_json(json: &str) -> Result<Self, ClassifierDataError> {
        let snapshot: Self = serde_json::from_str(json)
            .map_err(|e| ClassifierDataError::Corrupt(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}

/// Serializes the stats map as a list so struct keys survive JSON.
mod stat_entries {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{RuleKey, RuleStat};

    #[derive(Serialize, Deserialize)]
    struct Entry {
        #[serde(flatten)]
        key: RuleKey,
        #[serde(flatten)]
        stat: RuleStat,
    }

    /// Write the map as a list of flattened entries.
    pub fn serialize<S: Serializer>(
        stats: &BTreeMap<RuleKey, RuleStat>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<Entry> = stats
            .iter()
            .map(|(key, stat)| Entry {
                key: key.clone(),
                stat: stat.clone(),
            })
            .collect();
        entries.serialize(serializer)
    }

    /// Read the list written by `serialize`.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<RuleKey, RuleStat>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|e| (e.key, e.stat)).collect())
    }
}
