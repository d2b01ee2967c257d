//! Lint collector that runs configured lint commands as subprocesses.
//!
//! Each command must print findings as JSON, either one array or one object
//! per line. Field names follow a generic shape with a few common aliases:
//!
//! ```json
//! {"path": "src/a.js", "line": 3, "column": 7, "code": "no-unused-vars",
//!  "message": "'x' is defined but never used", "severity": "warning"}
//! ```
//!
//! The literal argument `{scope}` is replaced with the collection scope; when
//! no argument contains it the scope is appended.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::domain::errors::CollectorError;
use crate::domain::models::{CollectorConfig, Finding, LintCommandConfig, Severity};
use crate::domain::ports::LintCollector;

const SCOPE_PLACEHOLDER: &str = "{scope}";

/// One finding as printed by a lint command.
#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(alias = "path", alias = "filename", alias = "file")]
    file_path: String,
    #[serde(default, alias = "line_number", alias = "row")]
    line: u32,
    #[serde(default, alias = "col")]
    column: u32,
    #[serde(alias = "code", alias = "rule", alias = "check")]
    rule_id: String,
    #[serde(alias = "msg", alias = "text")]
    message: String,
    #[serde(default, alias = "level")]
    severity: Option<String>,
    #[serde(default, alias = "tool")]
    tool_name: Option<String>,
}

impl RawFinding {
    fn into_finding(self, default_tool: &str) -> Finding {
        Finding::new(
            self.tool_name.unwrap_or_else(|| default_tool.to_string()),
            self.rule_id,
            self.file_path,
            self.line,
            self.column,
            self.severity
                .as_deref()
                .map_or(Severity::Warning, Severity::parse_lenient),
            self.message,
        )
    }
}

/// Parse a lint command's stdout.
pub fn parse_findings(output: &str, default_tool: &str) -> Result<Vec<Finding>, CollectorError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<RawFinding> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| {
            CollectorError::Fatal(format!("{default_tool}: malformed JSON output: {e}"))
        })?
    } else {
        trimmed
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    CollectorError::Fatal(format!(
                        "{default_tool}: malformed JSON on line {}: {e}",
                        n + 1
                    ))
                })
            })
            .collect::<Result<_, _>>()?
    };

    Ok(raw.into_iter().map(|r| r.into_finding(default_tool)).collect())
}

/// Runs each configured lint command and parses its JSON output.
pub struct CommandLintCollector {
    commands: Vec<LintCommandConfig>,
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl CommandLintCollector {
    /// Collector over the commands in `config`.
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            commands: config.commands.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            working_dir: None,
        }
    }

    /// Run the commands from `dir` instead of the current directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn build_args(command: &LintCommandConfig, scope: &str) -> Vec<String> {
        let mut substituted = false;
        let mut args: Vec<String> = command
            .args
            .iter()
            .map(|arg| {
                if arg.contains(SCOPE_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(SCOPE_PLACEHOLDER, scope)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(scope.to_string());
        }
        args
    }

    async fn run_one(
        &self,
        command: &LintCommandConfig,
        scope: &str,
    ) -> Result<Vec<Finding>, CollectorError> {
        let mut cmd = Command::new(&command.command);
        cmd.args(Self::build_args(command, scope))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(tool = %command.tool, command = %command.command, "Running lint command");
        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CollectorError::Fatal(format!(
                    "{}: command not found: {}",
                    command.tool, command.command
                )))
            }
            Ok(Err(e)) => {
                return Err(CollectorError::Transient(format!(
                    "{}: failed to run: {e}",
                    command.tool
                )))
            }
            Err(_) => {
                return Err(CollectorError::Transient(format!(
                    "{}: timed out after {}s",
                    command.tool,
                    self.timeout.as_secs()
                )))
            }
        };

        match output.status.code() {
            None => {
                return Err(CollectorError::Transient(format!(
                    "{}: terminated by signal",
                    command.tool
                )))
            }
            Some(code) if !command.ok_exit_codes.contains(&code) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(CollectorError::Fatal(format!(
                    "{}: exited with status {code}: {}",
                    command.tool,
                    stderr.trim()
                )));
            }
            Some(_) => {}
        }

        parse_findings(&String::from_utf8_lossy(&output.stdout), &command.tool)
    }
}

#[async_trait]
impl LintCollector for CommandLintCollector {
    async fn collect(&self, scope: &str) -> Result<Vec<Finding>, CollectorError> {
        if self.commands.is_empty() {
            return Err(CollectorError::Fatal(
                "no lint commands configured".to_string(),
            ));
        }

        let mut findings = Vec::new();
        for command in &self.commands {
            let batch = self.run_one(command, scope).await?;
            debug!(tool = %command.tool, count = batch.len(), "Lint command finished");
            findings.extend(batch);
        }
        // Stable order so diffs and batch selection do not depend on tool output order.
        findings.sort_by(|a, b| {
            (&a.file_path, a.line, a.column, &a.rule_id, &a.tool_name)
                .cmp(&(&b.file_path, b.line, b.column, &b.rule_id, &b.tool_name))
        });
        info!(scope, count = findings.len(), "Collected findings");
        Ok(findings)
    }

    fn name(&self) -> &str {
        "command"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array_with_aliases() {
        let out = r#"[
            {"path": "src/a.py", "line": 3, "col": 1, "code": "F401", "msg": "unused import", "level": "error"},
            {"filename": "src/b.py", "rule": "E501", "message": "line too long"}
        ]"#;
        let findings = parse_findings(out, "ruff").unwrap();

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].file_path, "src/a.py");
        assert_eq!(findings[0].rule_id, "F401");
        assert_eq!(findings[0].severity, Severity::Error);
        assert_eq!(findings[0].tool_name, "ruff");
        assert_eq!(findings[1].line, 0);
        assert_eq!(findings[1].severity, Severity::Warning);
    }

    #[test]
    fn parses_json_lines() {
        let out = "{\"file_path\":\"a.go\",\"line\":1,\"rule_id\":\"errcheck\",\"message\":\"x\",\"tool\":\"golangci\"}\n\n\
                   {\"file_path\":\"b.go\",\"line\":2,\"rule_id\":\"govet\",\"message\":\"y\"}\n";
        let findings = parse_findings(out, "lint").unwrap();

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].tool_name, "golangci");
        assert_eq!(findings[1].tool_name, "lint");
    }

    #[test]
    fn empty_output_means_no_findings() {
        assert!(parse_findings("  \n", "lint").unwrap().is_empty());
    }

    #[test]
    fn malformed_output_is_fatal() {
        let err = parse_findings("not json", "lint").unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn scope_placeholder_is_substituted_or_appended() {
        let cmd = LintCommandConfig {
            tool: "eslint".into(),
            command: "eslint".into(),
            args: vec!["--format".into(), "json".into(), "{scope}/src".into()],
            ok_exit_codes: vec![0, 1],
        };
        assert_eq!(
            CommandLintCollector::build_args(&cmd, "app"),
            vec!["--format", "json", "app/src"]
        );

        let cmd = LintCommandConfig {
            args: vec!["--json".into()],
            ..cmd
        };
        assert_eq!(CommandLintCollector::build_args(&cmd, "."), vec!["--json", "."]);
    }

    #[tokio::test]
    async fn missing_binary_is_fatal() {
        let collector = CommandLintCollector::new(&CollectorConfig {
            commands: vec![LintCommandConfig {
                tool: "ghost".into(),
                command: "lintloop-definitely-missing-binary".into(),
                args: vec![],
                ok_exit_codes: vec![0],
            }],
            ..CollectorConfig::default()
        });

        let err = collector.collect(".").await.unwrap_err();
        assert!(matches!(err, CollectorError::Fatal(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_a_real_command() {
        let collector = CommandLintCollector::new(&CollectorConfig {
            commands: vec![LintCommandConfig {
                tool: "echo".into(),
                command: "sh".into(),
                args: vec![
                    "-c".into(),
                    r#"echo '{"path":"{scope}","line":1,"code":"R1","message":"m"}'; exit 1"#.into(),
                ],
                ok_exit_codes: vec![0, 1],
            }],
            ..CollectorConfig::default()
        });

        let findings = collector.collect("x.rs").await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].file_path, "x.rs");
        assert_eq!(findings[0].tool_name, "echo");
    }
}
