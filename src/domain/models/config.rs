//! Configuration model, one struct per YAML section.

use serde::{Deserialize, Serialize};

use super::finding::{Complexity, FindingCategory};

/// Main configuration structure for lintloop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Iteration caps and batch sizing
    #[serde(default, rename = "loop")]
    pub run: LoopConfig,

    /// Convergence thresholds and outcome model
    #[serde(default)]
    pub convergence: ConvergenceConfig,

    /// Finding classifier settings
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Context budget per batch
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Fix executor subprocess and dispatch policy
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Lint collector commands
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Cost and token ceilings
    #[serde(default)]
    pub cost: CostConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// loop
// ---------------------------------------------------------------------------

/// Iteration limits and per-iteration caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoopConfig {
    /// Hard cap on iterations per session
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock ceiling for the whole session, in seconds (0 = unlimited)
    #[serde(default = "default_max_wall_clock_secs")]
    pub max_wall_clock_secs: u64,

    /// Fixable findings considered per iteration
    #[serde(default = "default_max_findings_per_iteration")]
    pub max_findings_per_iteration: usize,

    /// Batches dispatched per iteration
    #[serde(default = "default_max_batches_per_iteration")]
    pub max_batches_per_iteration: usize,

    /// Items (findings or digests) per batch
    #[serde(default = "default_max_items_per_batch")]
    pub max_items_per_batch: usize,

    /// Abort when the collector disagrees with the previous iteration's count
    #[serde(default = "default_true")]
    pub consistency_check: bool,
}

const fn default_max_iterations() -> u32 {
    10
}

const fn default_max_wall_clock_secs() -> u64 {
    3600
}

const fn default_max_findings_per_iteration() -> usize {
    200
}

const fn default_max_batches_per_iteration() -> usize {
    4
}

const fn default_max_items_per_batch() -> usize {
    25
}

const fn default_true() -> bool {
    true
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_wall_clock_secs: default_max_wall_clock_secs(),
            max_findings_per_iteration: default_max_findings_per_iteration(),
            max_batches_per_iteration: default_max_batches_per_iteration(),
            max_items_per_batch: default_max_items_per_batch(),
            consistency_check: true,
        }
    }
}

// ---------------------------------------------------------------------------
// convergence
// ---------------------------------------------------------------------------

/// Trend thresholds for the convergence analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConvergenceConfig {
    /// Delta above which an iteration counts as improving
    #[serde(default = "default_improve_threshold")]
    pub improve_threshold: i64,

    /// Non-improving iterations before a plateau
    #[serde(default = "default_one")]
    pub plateau_window: usize,

    /// Plateaued iterations before convergence
    #[serde(default = "default_one")]
    pub converged_window: usize,

    /// Worsening iterations before divergence
    #[serde(default = "default_diverge_window")]
    pub diverge_window: usize,

    /// Extra diverging iterations tolerated before aborting
    #[serde(default = "default_one")]
    pub diverge_grace: usize,

    /// Deltas inspected for sign alternation
    #[serde(default = "default_oscillation_window")]
    pub oscillation_window: usize,

    /// Extra oscillating evaluations tolerated before aborting
    #[serde(default = "default_one")]
    pub oscillation_grace: usize,

    /// Largest |sum of deltas| still counted as no net progress
    #[serde(default = "default_oscillation_tolerance")]
    pub oscillation_tolerance: i64,

    /// Learned outcome model
    #[serde(default)]
    pub model: OutcomeModelConfig,
}

const fn default_improve_threshold() -> i64 {
    2
}

const fn default_one() -> usize {
    1
}

const fn default_diverge_window() -> usize {
    2
}

const fn default_oscillation_window() -> usize {
    4
}

const fn default_oscillation_tolerance() -> i64 {
    1
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            improve_threshold: default_improve_threshold(),
            plateau_window: 1,
            converged_window: 1,
            diverge_window: default_diverge_window(),
            diverge_grace: 1,
            oscillation_window: default_oscillation_window(),
            oscillation_grace: 1,
            oscillation_tolerance: default_oscillation_tolerance(),
            model: OutcomeModelConfig::default(),
        }
    }
}

/// Optional learned predictor consulted after the rule-based verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OutcomeModelConfig {
    /// Consult the model at all
    #[serde(default)]
    pub enabled: bool,

    /// Confidence required before the model may stop a continuing run
    #[serde(default = "default_min_model_confidence")]
    pub min_model_confidence: f64,

    /// Iteration samples needed before the model reports itself available
    #[serde(default = "default_min_training_samples")]
    pub min_training_samples: usize,

    /// Past sessions loaded for training
    #[serde(default = "default_history_sessions")]
    pub history_sessions: usize,
}

const fn default_min_model_confidence() -> f64 {
    0.8
}

const fn default_min_training_samples() -> usize {
    20
}

const fn default_history_sessions() -> usize {
    50
}

impl Default for OutcomeModelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_model_confidence: default_min_model_confidence(),
            min_training_samples: default_min_training_samples(),
            history_sessions: default_history_sessions(),
        }
    }
}

// ---------------------------------------------------------------------------
// classifier
// ---------------------------------------------------------------------------

/// Learned-stat thresholds and heuristic inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClassifierConfig {
    /// Observations needed before learned stats are trusted
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,

    /// Learned confidence below this falls back to heuristics
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    /// Worker threads for batch classification (None = available cores)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Batches smaller than this are classified inline
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,

    /// Lines of source shown on each side of a finding
    #[serde(default = "default_snippet_context_lines")]
    pub snippet_context_lines: usize,

    /// Path fragments marking generated or vendored files
    #[serde(default = "default_generated_markers")]
    pub generated_markers: Vec<String>,

    /// Additional heuristic patterns appended to the built-in table
    #[serde(default)]
    pub extra_patterns: Vec<PatternRule>,
}

const fn default_min_samples() -> u64 {
    5
}

const fn default_confidence_floor() -> f64 {
    0.6
}

const fn default_parallel_threshold() -> usize {
    64
}

const fn default_snippet_context_lines() -> usize {
    2
}

fn default_generated_markers() -> Vec<String> {
    ["vendor/", "node_modules/", "third_party/", "/generated/", ".min.js", ".pb.go", "_pb2.py"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            confidence_floor: default_confidence_floor(),
            workers: None,
            parallel_threshold: default_parallel_threshold(),
            snippet_context_lines: default_snippet_context_lines(),
            generated_markers: default_generated_markers(),
            extra_patterns: Vec::new(),
        }
    }
}

/// One heuristic entry: a case-insensitive substring of the finding message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PatternRule {
    /// Substring matched against the message
    pub pattern: String,
    /// Whether matches are sent to the executor
    #[serde(default = "default_true")]
    pub fixable: bool,
    /// Complexity assigned on match
    #[serde(default = "default_pattern_complexity")]
    pub complexity: Complexity,
    /// Category assigned on match
    #[serde(default = "default_pattern_category")]
    pub category: FindingCategory,
    /// Confidence assigned on match
    #[serde(default = "default_pattern_confidence")]
    pub confidence: f64,
}

const fn default_pattern_complexity() -> Complexity {
    Complexity::Simple
}

const fn default_pattern_category() -> FindingCategory {
    FindingCategory::Style
}

const fn default_pattern_confidence() -> f64 {
    0.7
}

// ---------------------------------------------------------------------------
// budget
// ---------------------------------------------------------------------------

/// Token budget and digest settings per batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BudgetConfig {
    /// Estimated tokens per batch
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Characters per estimated token
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Collapse leftover findings of one rule into digests
    #[serde(default = "default_true")]
    pub summarize: bool,

    /// Smallest group worth a digest
    #[serde(default = "default_min_digest_group")]
    pub min_digest_group: usize,

    /// Findings folded into one digest at most
    #[serde(default = "default_digest_max_members")]
    pub digest_max_members: usize,

    /// Locations listed in a digest's text
    #[serde(default = "default_digest_max_locations")]
    pub digest_max_locations: usize,
}

const fn default_token_budget() -> usize {
    8000
}

const fn default_chars_per_token() -> usize {
    4
}

const fn default_min_digest_group() -> usize {
    3
}

const fn default_digest_max_members() -> usize {
    50
}

const fn default_digest_max_locations() -> usize {
    8
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            chars_per_token: default_chars_per_token(),
            summarize: true,
            min_digest_group: default_min_digest_group(),
            digest_max_members: default_digest_max_members(),
            digest_max_locations: default_digest_max_locations(),
        }
    }
}

// ---------------------------------------------------------------------------
// executor
// ---------------------------------------------------------------------------

/// Fix executor command and dispatch limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    /// Assistant CLI receiving the JSON batch envelope on stdin
    #[serde(default = "default_executor_command")]
    pub command: String,

    /// Extra arguments for the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Directory the command runs in (and source is read from)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Per-attempt timeout
    #[serde(default = "default_executor_timeout_secs")]
    pub timeout_secs: u64,

    /// Batches in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Dispatches per minute (None = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_minute: Option<u32>,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_executor_command() -> String {
    "claude".to_string()
}

const fn default_executor_timeout_secs() -> u64 {
    300
}

const fn default_concurrency() -> usize {
    1
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: default_executor_command(),
            args: Vec::new(),
            working_dir: None,
            timeout_secs: default_executor_timeout_secs(),
            concurrency: default_concurrency(),
            rate_limit_per_minute: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// collector
// ---------------------------------------------------------------------------

/// Lint commands and their retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CollectorConfig {
    /// Lint commands run on every collection pass
    #[serde(default)]
    pub commands: Vec<LintCommandConfig>,

    /// Per-command timeout
    #[serde(default = "default_collector_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry policy for transient failures
    #[serde(default = "default_collector_retry")]
    pub retry: RetryConfig,
}

const fn default_collector_timeout_secs() -> u64 {
    120
}

const fn default_collector_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_backoff_ms: 500,
        max_backoff_ms: 10_000,
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            timeout_secs: default_collector_timeout_secs(),
            retry: default_collector_retry(),
        }
    }
}

/// A lint tool emitting findings as a JSON array or JSON lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LintCommandConfig {
    /// Recorded as `tool_name` on every finding
    pub tool: String,
    /// Executable to run
    pub command: String,
    /// Arguments; the scope is appended last
    #[serde(default)]
    pub args: Vec<String>,
    /// Exit codes that still carry findings (most linters exit 1 on findings)
    #[serde(default = "default_ok_exit_codes")]
    pub ok_exit_codes: Vec<i32>,
}

fn default_ok_exit_codes() -> Vec<i32> {
    vec![0, 1]
}

// ---------------------------------------------------------------------------
// cost
// ---------------------------------------------------------------------------

/// Spending ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CostConfig {
    /// Model name used for pricing lookups
    #[serde(default = "default_model")]
    pub model: String,

    /// Cost ceiling in USD (None = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_usd: Option<f64>,

    /// Token ceiling (None = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_tokens: Option<u64>,
}

fn default_model() -> String {
    "sonnet".to_string()
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_cost_usd: None,
            max_total_tokens: None,
        }
    }
}

// ---------------------------------------------------------------------------
// database / logging
// ---------------------------------------------------------------------------

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".lintloop/lintloop.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_section_uses_keyword_name() {
        let yaml = r"
loop:
  max_iterations: 3
convergence:
  improve_threshold: 5
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.run.max_iterations, 3);
        assert_eq!(config.run.max_items_per_batch, 25);
        assert_eq!(config.convergence.improve_threshold, 5);
        assert_eq!(config.convergence.diverge_window, 2);
    }

    #[test]
    fn pattern_rule_defaults() {
        let yaml = "pattern: trailing whitespace\ncomplexity: trivial\n";
        let rule: PatternRule = serde_yaml::from_str(yaml).unwrap();
        assert!(rule.fixable);
        assert_eq!(rule.complexity, Complexity::Trivial);
        assert_eq!(rule.category, FindingCategory::Style);
    }
}
