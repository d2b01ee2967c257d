//! Heuristic pattern table and its multi-pattern matcher.
//!
//! Patterns are case-insensitive substrings of a finding message. All
//! patterns are compiled into one `aho_corasick` matcher so a message is
//! scanned once regardless of table size.
//!
//! Resolution when several patterns match: the longest pattern wins, ties go
//! to the more specific category, then to the earlier table entry.

use std::borrow::Cow;

use aho_corasick::{AhoCorasick, MatchKind};
use tracing::warn;

use crate::domain::models::{Complexity, FindingCategory, PatternRule};

/// One compiled heuristic entry.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicPattern {
    /// Lowercased needle.
    pub pattern: String,
    /// Whether a match marks the finding as fixable.
    pub fixable: bool,
    /// Expected effort of the fix.
    pub complexity: Complexity,
    /// Category assigned on a match; also breaks length ties.
    pub category: FindingCategory,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

impl HeuristicPattern {
    fn new(
        pattern: &str,
        fixable: bool,
        complexity: Complexity,
        category: FindingCategory,
        confidence: f64,
    ) -> Self {
        Self {
            pattern: pattern.to_lowercase(),
            fixable,
            complexity,
            category,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

impl From<&PatternRule> for HeuristicPattern {
    fn from(rule: &PatternRule) -> Self {
        Self::new(
            &rule.pattern,
            rule.fixable,
            rule.complexity,
            rule.category,
            rule.confidence,
        )
    }
}

// ---------------------------------------------------------------------------
// Built-in table
// ---------------------------------------------------------------------------

fn builtin_patterns() -> Vec<HeuristicPattern> {
    use Complexity::{Complex, Moderate, Simple, Trivial};
    use FindingCategory::{
        Correctness, Documentation, Maintainability, Performance, Security, Style,
    };

    [
        // formatting
        ("trailing whitespace", true, Trivial, Style, 0.95),
        ("missing semicolon", true, Trivial, Style, 0.95),
        ("missing trailing comma", true, Trivial, Style, 0.92),
        ("expected indentation", true, Trivial, Style, 0.9),
        ("unnecessary parentheses", true, Trivial, Style, 0.9),
        ("line too long", true, Simple, Style, 0.7),
        ("use 'const' instead", true, Trivial, Style, 0.9),
        ("unneeded `return` statement", true, Trivial, Style, 0.9),
        ("f-string is missing placeholders", true, Trivial, Style, 0.9),
        ("quotes must be", true, Trivial, Style, 0.9),
        // dead code
        ("imported but unused", true, Trivial, Maintainability, 0.92),
        ("unused import", true, Trivial, Maintainability, 0.9),
        ("unused variable", true, Simple, Maintainability, 0.8),
        ("is defined but never used", true, Simple, Maintainability, 0.78),
        ("is never read", true, Simple, Maintainability, 0.7),
        ("unreachable code", true, Simple, Maintainability, 0.65),
        ("deprecated", true, Moderate, Maintainability, 0.5),
        // docs
        ("missing docstring", true, Simple, Documentation, 0.7),
        ("missing documentation", true, Simple, Documentation, 0.7),
        ("missing return type", true, Simple, Documentation, 0.6),
        // performance
        ("redundant clone", true, Trivial, Performance, 0.85),
        ("needless borrow", true, Trivial, Performance, 0.85),
        ("inefficient", true, Moderate, Performance, 0.5),
        // correctness
        ("comparison to none", true, Simple, Correctness, 0.8),
        ("used `unwrap()`", true, Moderate, Correctness, 0.5),
        ("is possibly undefined", false, Moderate, Correctness, 0.3),
        ("is not defined", false, Moderate, Correctness, 0.3),
        ("mismatched types", false, Complex, Correctness, 0.2),
        // structure
        ("cognitive complexity", false, Complex, Maintainability, 0.1),
        ("too many arguments", false, Complex, Maintainability, 0.15),
        ("too complex", false, Complex, Maintainability, 0.1),
        // security
        ("sql injection", false, Complex, Security, 0.2),
        ("hardcoded password", false, Complex, Security, 0.1),
        ("insecure hash", true, Moderate, Security, 0.45),
    ]
    .iter()
    .map(|&(pattern, fixable, complexity, category, confidence)| {
        HeuristicPattern::new(pattern, fixable, complexity, category, confidence)
    })
    .collect()
}

// ---------------------------------------------------------------------------
// PatternTable
// ---------------------------------------------------------------------------

/// Heuristic table compiled for matching.
#[derive(Debug, Clone)]
pub struct PatternTable {
    patterns: Vec<HeuristicPattern>,
    /// `None` when the table could not be compiled; nothing matches then.
    matcher: Option<AhoCorasick>,
}

impl PatternTable {
    /// Compile `patterns` into one overlapping matcher.
    pub fn new(patterns: Vec<HeuristicPattern>) -> Self {
        let matcher = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::Standard)
            .build(patterns.iter().map(|p| p.pattern.as_str()));
        let matcher = match matcher {
            Ok(matcher) => Some(matcher),
            Err(error) => {
                warn!(%error, patterns = patterns.len(), "Heuristic table failed to compile");
                None
            }
        };
        Self { patterns, matcher }
    }

    /// Built-in table followed by user patterns.
    pub fn with_extra(extra: &[PatternRule]) -> Self {
        let mut patterns = builtin_patterns();
        patterns.extend(extra.iter().map(HeuristicPattern::from));
        Self::new(patterns)
    }

    /// The built-in table alone.
    pub fn builtin() -> Self {
        Self::new(builtin_patterns())
    }

    /// Number of patterns, built-in and extra.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when the table holds no patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Best matching pattern for a message, if any.
    pub fn best_match(&self, message: &str) -> Option<&HeuristicPattern> {
        let matcher = self.matcher.as_ref()?;
        // ASCII folding happens in the matcher; other scripts are folded here.
        let haystack: Cow<'_, str> = if message.is_ascii() {
            Cow::Borrowed(message)
        } else {
            Cow::Owned(message.to_lowercase())
        };

        matcher
            .find_overlapping_iter(haystack.as_ref())
            .map(|m| m.pattern().as_usize())
            .filter(|&index| !self.patterns[index].pattern.is_empty())
            .min_by(|&a, &b| {
                let (pa, pb) = (&self.patterns[a], &self.patterns[b]);
                pb.pattern
                    .len()
                    .cmp(&pa.pattern.len())
                    .then_with(|| pb.category.specificity().cmp(&pa.category.specificity()))
                    .then_with(|| a.cmp(&b))
            })
            .map(|index| &self.patterns[index])
    }
}

impl Default for PatternTable {
    fn default() -> Self {
        Self::builtin()
    }
}
