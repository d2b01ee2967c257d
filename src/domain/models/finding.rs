//! Findings reported by static-analysis tools and their classified form.
//!
//! A [`Finding`] is produced by one collection pass and never mutated. The
//! classifier turns it into a [`ClassifiedFinding`] once per iteration, so the
//! classified form always reflects the learned rule store of that iteration.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity reported by the lint tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Lenient parse used by adapters; unknown labels map to `Warning`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" | "err" | "fatal" | "critical" | "high" | "e" => Self::Error,
            "info" | "information" | "note" | "hint" | "low" | "convention" | "refactor" | "i" => {
                Self::Info
            }
            _ => Self::Warning,
        }
    }

    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

/// A single issue reported by a lint tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finding {
    /// Path as the tool reported it, usually relative to the scope root.
    pub file_path: String,
    /// 1-based line; 0 when the tool gave none.
    pub line: u32,
    /// 1-based column; 0 when the tool gave none.
    pub column: u32,
    /// Tool-specific rule identifier.
    pub rule_id: String,
    /// Message as reported.
    pub message: String,
    /// Normalized severity.
    pub severity: Severity,
    /// Lint tool that reported the finding.
    pub tool_name: String,
}

impl Finding {
    /// Finding from its parts, in the order lint tools usually print them.
    pub fn new(
        tool_name: impl Into<String>,
        rule_id: impl Into<String>,
        file_path: impl Into<String>,
        line: u32,
        column: u32,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            line,
            column,
            rule_id: rule_id.into(),
            message: message.into(),
            severity,
            tool_name: tool_name.into(),
        }
    }

    /// Language inferred from the file extension, `"unknown"` when unrecognised.
    pub fn language(&self) -> &'static str {
        language_for_path(&self.file_path)
    }

    /// Line-insensitive identity used to match findings across collection passes.
    ///
    /// Edits shift line numbers, so the key deliberately omits `line` and
    /// `column`. Two findings with the same key are interchangeable for
    /// accounting purposes.
    pub fn key(&self) -> FindingKey {
        FindingKey {
            tool_name: self.tool_name.clone(),
            rule_id: self.rule_id.clone(),
            file_path: self.file_path.clone(),
            message: self.message.clone(),
        }
    }

    /// Stable hex digest of [`Finding::key`], used for pollution control.
    pub fn pattern_hash(&self) -> String {
        self.key().pattern_hash()
    }

    /// `path:line:column` location string.
    pub fn location(&self) -> String {
        format!("{}:{}:{}", self.file_path, self.line, self.column)
    }
}

/// Identity of a finding independent of its position within the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FindingKey {
    /// Lint tool.
    pub tool_name: String,
    /// Rule ID.
    pub rule_id: String,
    /// File path.
    pub file_path: String,
    /// Message text.
    pub message: String,
}

impl FindingKey {
    /// Hex SHA-256 of the key fields.
    pub fn pattern_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            &self.tool_name,
            &self.rule_id,
            &self.file_path,
            &self.message,
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Map a file path to a language label by extension.
pub fn language_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" | "mts" | "cts" => "typescript",
        "go" => "go",
        "rb" => "ruby",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "swift" => "swift",
        "sh" | "bash" => "shell",
        "yml" | "yaml" => "yaml",
        "css" | "scss" => "css",
        _ => "unknown",
    }
}

// ---------------------------------------------------------------------------
// Complexity / category
// ---------------------------------------------------------------------------

/// Estimated effort needed to fix a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    /// Batch-size weight used for budget accounting.
    pub const fn batch_weight(self) -> u32 {
        match self {
            Self::Trivial => 1,
            Self::Simple => 2,
            Self::Moderate => 4,
            Self::Complex => 8,
        }
    }

    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        }
    }
}

/// Broad category of a finding.
///
/// Declaration order is specificity order: later variants are more specific
/// and win ties during heuristic resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingCategory {
    Unknown,
    Style,
    Documentation,
    Maintainability,
    Performance,
    Correctness,
    Security,
}

impl FindingCategory {
    /// Tie-break rank; higher wins.
    pub const fn specificity(self) -> u8 {
        self as u8
    }
}

/// Where a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    Learned,
    Heuristic,
    Default,
}

// ---------------------------------------------------------------------------
// SourceContext
// ---------------------------------------------------------------------------

/// Source information prepared for a finding before classification.
///
/// Built outside the classification hot path so `classify` never touches
/// the filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContext {
    /// Language override; falls back to [`Finding::language`].
    pub language: Option<String>,
    /// Lines surrounding the finding, if the file could be read.
    pub snippet: Option<String>,
    /// Generated or vendored file. Never auto-fixed.
    pub generated: bool,
}

// ---------------------------------------------------------------------------
// ClassifiedFinding
// ---------------------------------------------------------------------------

/// A finding scored for fixability, confidence and complexity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedFinding {
    /// The classified finding.
    pub finding: Finding,
    /// Whether the finding should be sent to the executor at all.
    pub fixable: bool,
    /// Confidence in `[0.0, 1.0]` that an automated fix will succeed.
    pub confidence: f64,
    /// Estimated fix complexity.
    pub complexity: Complexity,
    /// Broad category.
    pub category: FindingCategory,
    /// Which stage of the classifier decided.
    pub source: ClassificationSource,
    /// Numbered source lines around the finding, when readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl ClassifiedFinding {
    /// Hash of the underlying finding's key.
    pub fn pattern_hash(&self) -> String {
        self.finding.pattern_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(path: &str, line: u32) -> Finding {
        Finding::new("ruff", "F401", path, line, 1, Severity::Error, "`os` imported but unused")
    }

    #[test]
    fn key_ignores_position() {
        let a = finding("src/app.py", 3);
        let b = finding("src/app.py", 40);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.pattern_hash(), b.pattern_hash());
    }

    #[test]
    fn pattern_hash_separates_fields() {
        let a = Finding::new("t", "ab", "c", 1, 1, Severity::Info, "m");
        let b = Finding::new("t", "a", "bc", 1, 1, Severity::Info, "m");
        assert_ne!(a.pattern_hash(), b.pattern_hash());
    }

    #[test]
    fn language_detection() {
        assert_eq!(language_for_path("src/lib.rs"), "rust");
        assert_eq!(language_for_path("app/Main.TSX"), "typescript");
        assert_eq!(language_for_path("Makefile"), "unknown");
    }

    #[test]
    fn complexity_weights() {
        let weights: Vec<u32> = [
            Complexity::Trivial,
            Complexity::Simple,
            Complexity::Moderate,
            Complexity::Complex,
        ]
        .iter()
        .map(|c| c.batch_weight())
        .collect();
        assert_eq!(weights, vec![1, 2, 4, 8]);
    }

    #[test]
    fn category_specificity_orders_security_first() {
        assert!(FindingCategory::Security.specificity() > FindingCategory::Style.specificity());
        assert!(FindingCategory::Correctness > FindingCategory::Documentation);
    }

    #[test]
    fn severity_lenient_parse() {
        assert_eq!(Severity::parse_lenient("ERROR"), Severity::Error);
        assert_eq!(Severity::parse_lenient("note"), Severity::Info);
        assert_eq!(Severity::parse_lenient("something"), Severity::Warning);
    }
}
