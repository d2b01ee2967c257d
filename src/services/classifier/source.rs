//! Source context preparation.
//!
//! Reads each referenced file once per iteration and derives the snippet,
//! language and generated-file flag for every finding in it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::domain::models::{ClassifierConfig, Finding, SourceContext};

/// A header line that marks the whole file as generated. A bare "do not
/// edit" is not enough; it must name the file or follow a generator mention.
static GENERATED_HEADER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)@generated\b",
        r"|do not edit (?:this file|manually|by hand)",
        r"|\b(?:auto-?generated|generated)\b.*\bdo not edit\b",
        r"|^\W*code generated by\b",
        r"|^\W*(?:this (?:file|code) (?:is|was|has been) )?(?:auto-?generated|automatically generated)",
        r"(?:\s+(?:file|code|by|from|with|using)\b|\W*$)",
    ))
    .ok()
});

const HEADER_LINES: usize = 5;

/// Builds the [`SourceContext`] the classifier sees for each finding.
pub struct SourceContextBuilder {
    root: PathBuf,
    context_lines: usize,
    generated_markers: Vec<String>,
}

impl SourceContextBuilder {
    /// Paths are resolved against `root`; `config` supplies the snippet
    /// window and the generated-path markers.
    pub fn new(root: impl Into<PathBuf>, config: &ClassifierConfig) -> Self {
        Self {
            root: root.into(),
            context_lines: config.snippet_context_lines,
            generated_markers: config.generated_markers.clone(),
        }
    }

    fn resolve(&self, file_path: &str) -> PathBuf {
        let path = Path::new(file_path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn path_is_generated(&self, file_path: &str) -> bool {
        let normalized = file_path.replace('\\', "/");
        self.generated_markers
            .iter()
            .any(|marker| normalized.contains(marker.as_str()))
    }

    /// One context per finding, in input order. Unreadable files yield a
    /// context without a snippet.
    ///
    /// `language` is set only when the extension says nothing and the file
    /// opens with a recognised `#!` interpreter line.
    pub async fn prepare(&self, findings: &[Finding]) -> Vec<SourceContext> {
        let mut files: HashMap<&str, Option<String>> = HashMap::new();
        for finding in findings {
            if files.contains_key(finding.file_path.as_str()) {
                continue;
            }
            let contents = match tokio::fs::read_to_string(self.resolve(&finding.file_path)).await
            {
                Ok(text) => Some(text),
                Err(e) => {
                    debug!(file = %finding.file_path, error = %e, "Source unavailable for snippet");
                    None
                }
            };
            files.insert(finding.file_path.as_str(), contents);
        }

        findings
            .iter()
            .map(|finding| {
                let contents = files
                    .get(finding.file_path.as_str())
                    .and_then(Option::as_deref);
                SourceContext {
                    language: contents
                        .filter(|_| finding.language() == "unknown")
                        .and_then(language_from_shebang)
                        .map(str::to_string),
                    snippet: contents
                        .and_then(|text| snippet_around(text, finding.line, self.context_lines)),
                    generated: self.path_is_generated(&finding.file_path)
                        || contents.is_some_and(has_generated_header),
                }
            })
            .collect()
    }
}

fn has_generated_header(text: &str) -> bool {
    let Some(pattern) = GENERATED_HEADER.as_ref() else {
        return false;
    };
    text.lines().take(HEADER_LINES).any(|line| pattern.is_match(line))
}

/// Language named by a `#!` interpreter line.
fn language_from_shebang(text: &str) -> Option<&'static str> {
    let line = text.lines().next()?.strip_prefix("#!")?;
    let mut words = line.split_whitespace();
    let mut program = words.next()?.rsplit('/').next()?;
    if program == "env" {
        program = words.find(|w| !w.starts_with('-') && !w.contains('='))?;
    }

    match program.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.') {
        "python" | "pypy" => Some("python"),
        "node" | "nodejs" | "deno" | "bun" => Some("javascript"),
        "ts-node" | "tsx" => Some("typescript"),
        "sh" | "bash" | "zsh" | "dash" | "ksh" => Some("shell"),
        "ruby" => Some("ruby"),
        "php" => Some("php"),
        _ => None,
    }
}

/// Lines `[line - context, line + context]` (1-based), numbered.
fn snippet_around(text: &str, line: u32, context: usize) -> Option<String> {
    if line == 0 {
        return None;
    }
    let target = line as usize;
    let first = target.saturating_sub(context).max(1);
    let last = target + context;

    let lines: Vec<String> = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(n, _)| (first..=last).contains(n))
        .map(|(n, l)| {
            let marker = if n == target { ">" } else { " " };
            format!("{marker}{n:>5} | {l}")
        })
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Severity;

    #[test]
    fn snippet_marks_target_line() {
        let text = "a\nb\nc\nd\ne\n";
        let snippet = snippet_around(text, 3, 1).unwrap();
        assert_eq!(snippet.lines().count(), 3);
        assert!(snippet.lines().nth(1).unwrap().starts_with(">    3"));
        assert!(snippet_around(text, 40, 1).is_none());
    }

    #[test]
    fn generated_header_detection() {
        assert!(GENERATED_HEADER.is_some());
        for header in [
            "// Code generated by protoc-gen-go. DO NOT EDIT.",
            "/* @generated */",
            "// DO NOT EDIT THIS FILE",
            "# This file is automatically generated by tox",
            "# Autogenerated by Thrift Compiler (0.13.0)",
            "// <auto-generated />",
        ] {
            assert!(has_generated_header(&format!("{header}\nfn x() {{}}")), "{header}");
        }
        assert!(!has_generated_header("fn main() {}\n"));
    }

    #[test]
    fn ordinary_comments_are_not_generated_markers() {
        for header in [
            "// Do not edit the timeout below without asking ops",
            "# autogenerated ids are handled in db.py",
            "// This function is generated on demand",
        ] {
            assert!(!has_generated_header(&format!("{header}\nfn x() {{}}")), "{header}");
        }
    }

    #[test]
    fn shebang_names_the_interpreter() {
        assert_eq!(language_from_shebang("#!/usr/bin/env python3\n"), Some("python"));
        assert_eq!(language_from_shebang("#!/usr/bin/python3.11 -u\n"), Some("python"));
        assert_eq!(language_from_shebang("#!/usr/bin/env -S node --trace-warnings\n"), Some("javascript"));
        assert_eq!(language_from_shebang("#!/bin/bash\nset -e\n"), Some("shell"));
        assert_eq!(language_from_shebang("#!/usr/bin/awk -f\n"), None);
        assert_eq!(language_from_shebang("print('no shebang')\n"), None);
    }

    #[tokio::test]
    async fn prepare_reads_each_file_and_flags_vendor_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "fn a() {}\nfn b() {}\n").unwrap();

        let builder = SourceContextBuilder::new(dir.path(), &ClassifierConfig::default());
        let findings = vec![
            Finding::new("clippy", "r", "lib.rs", 2, 1, Severity::Warning, "m"),
            Finding::new("clippy", "r", "vendor/dep.rs", 1, 1, Severity::Warning, "m"),
        ];
        let contexts = builder.prepare(&findings).await;

        assert!(contexts[0].snippet.as_deref().unwrap().contains("fn b()"));
        assert!(!contexts[0].generated);
        assert!(contexts[1].snippet.is_none());
        assert!(contexts[1].generated);
        assert!(contexts[0].language.is_none());
    }

    #[tokio::test]
    async fn extensionless_scripts_take_language_from_shebang() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/deploy"), "#!/usr/bin/env python3\nimport os\n").unwrap();
        std::fs::write(dir.path().join("setup.py"), "#!/bin/sh\n").unwrap();

        let builder = SourceContextBuilder::new(dir.path(), &ClassifierConfig::default());
        let findings = vec![
            Finding::new("ruff", "F401", "bin/deploy", 2, 1, Severity::Warning, "`os` imported but unused"),
            Finding::new("ruff", "F401", "setup.py", 1, 1, Severity::Warning, "m"),
        ];
        let contexts = builder.prepare(&findings).await;

        assert_eq!(contexts[0].language.as_deref(), Some("python"));
        // A known extension wins over the interpreter line.
        assert!(contexts[1].language.is_none());
    }
}
