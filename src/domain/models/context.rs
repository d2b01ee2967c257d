//! Items handed to the fix executor in one batch.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::finding::{ClassifiedFinding, Finding, Severity};

/// Priority of a context item within a batch.
///
/// Declaration order is ascending so `Ord` sorts `Low < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl ContextPriority {
    /// Derive priority from severity and classifier confidence.
    pub fn derive(severity: Severity, confidence: f64) -> Self {
        let confident = confidence >= 0.8;
        match severity {
            Severity::Error if confident => Self::Critical,
            Severity::Error => Self::High,
            Severity::Warning if confident => Self::High,
            Severity::Warning => Self::Medium,
            Severity::Info if confident => Self::Medium,
            Severity::Info => Self::Low,
        }
    }

    /// Priority of a classified finding.
    pub fn of(finding: &ClassifiedFinding) -> Self {
        Self::derive(finding.finding.severity, finding.confidence)
    }
}

/// What an item asks the assistant to fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextPayload {
    /// One finding, with the surrounding source when available.
    Finding {
        finding: Finding,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snippet: Option<String>,
    },
    /// Several findings of the same rule condensed into one entry.
    Digest {
        tool_name: String,
        rule_id: String,
        representative_message: String,
        count: usize,
        /// Locations rendered into the digest text (bounded).
        locations: Vec<String>,
        /// Every finding the digest covers, for accounting.
        members: Vec<Finding>,
    },
}

impl ContextPayload {
    /// Text the budget is charged for.
    pub fn render(&self) -> String {
        match self {
            Self::Finding { finding, snippet } => {
                let mut text = format!(
                    "[{}] {} {} at {}: {}",
                    finding.severity,
                    finding.tool_name,
                    finding.rule_id,
                    finding.location(),
                    finding.message
                );
                if let Some(snippet) = snippet {
                    text.push('\n');
                    text.push_str(snippet);
                }
                text
            }
            Self::Digest {
                tool_name,
                rule_id,
                representative_message,
                count,
                locations,
                ..
            } => {
                let mut text = format!(
                    "{count} x {tool_name} {rule_id}: {representative_message}\nlocations:"
                );
                for location in locations {
                    let _ = write!(text, "\n  {location}");
                }
                if *count > locations.len() {
                    let _ = write!(text, "\n  ... and {} more", count - locations.len());
                }
                text
            }
        }
    }

    /// Findings this payload covers.
    pub fn findings(&self) -> Vec<&Finding> {
        match self {
            Self::Finding { finding, .. } => vec![finding],
            Self::Digest { members, .. } => members.iter().collect(),
        }
    }

    /// Whether this is a rule digest.
    pub const fn is_digest(&self) -> bool {
        matches!(self, Self::Digest { .. })
    }
}

/// One entry of a fix batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    /// Item ID.
    pub id: Uuid,
    /// What to fix.
    pub payload: ContextPayload,
    /// Dispatch priority.
    pub priority: ContextPriority,
    /// Estimated prompt tokens.
    pub est_tokens: usize,
    /// Pattern hash of the (first) covered finding.
    pub pattern_hash: String,
    /// Iterations since the pattern was first seen in this session.
    pub age: u32,
}

impl ContextItem {
    /// Findings this item asks to fix.
    pub fn covered_findings(&self) -> Vec<&Finding> {
        self.payload.findings()
    }
}

/// A set of items dispatched to the executor in one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixBatch {
    /// Batch ID.
    pub id: Uuid,
    /// Iteration that dispatched it.
    pub iteration: u32,
    /// Items in dispatch order.
    pub items: Vec<ContextItem>,
}

impl FixBatch {
    /// New batch with a fresh ID.
    pub fn new(iteration: u32, items: Vec<ContextItem>) -> Self {
        Self {
            id: Uuid::new_v4(),
            iteration,
            items,
        }
    }

    /// Sum of item estimates.
    pub fn est_tokens(&self) -> usize {
        self.items.iter().map(|i| i.est_tokens).sum()
    }

    /// Findings covered by all items.
    pub fn finding_count(&self) -> usize {
        self.items.iter().map(|i| i.covered_findings().len()).sum()
    }

    /// All rendered items separated by blank lines.
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|item| item.payload.render())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
