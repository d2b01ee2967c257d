//! Output formatting utilities for the CLI.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};
use console::{style, StyledObject};
use serde::Serialize;

/// Command result printable as text or JSON.
pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Print `result` in the selected mode.
pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to at most `max_len` characters, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Borderless list table with upper-cased headers.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Render the table under a count line, or a "none found" line when empty.
pub fn render_list(entity_name: &str, table: &Table, total: usize) -> String {
    if total == 0 {
        return format!("No {entity_name}s found.");
    }
    let noun = if total == 1 {
        entity_name.to_string()
    } else {
        format!("{entity_name}s")
    };
    format!("{} {noun}:\n{table}", style(total).bold())
}

/// Colour a termination reason or convergence state.
///
/// Green: converged, improving. Yellow: plateauing, budget and iteration caps.
/// Red: diverging, oscillating, collector failures. Dim: aborted or unknown.
pub fn colorize_status(status: &str) -> StyledObject<&str> {
    match status {
        "converged" | "improving" | "no_fixable_findings" => style(status).green().bold(),
        "plateauing" | "max_iterations_reached" | "cost_budget_exceeded"
        | "time_budget_exceeded" => style(status).yellow(),
        "diverging" | "oscillating" | "diverging_abort" | "oscillating_abort"
        | "collector_fatal_error" => style(status).red().bold(),
        "running" => style(status).cyan(),
        _ => style(status).dim(),
    }
}

/// Signed delta with colour: positive is progress.
pub fn colorize_delta(delta: i64) -> StyledObject<String> {
    let text = format!("{delta:+}");
    match delta.signum() {
        1 => style(text).green(),
        -1 => style(text).red(),
        _ => style(text).dim(),
    }
}

/// Count of findings the fixes introduced; any at all is a warning sign.
pub fn colorize_introduced(count: usize) -> StyledObject<String> {
    let text = count.to_string();
    if count == 0 {
        style(text).dim()
    } else {
        style(text).yellow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 6), "abc...");
        assert_eq!(truncate("ééééééé", 5), "éé...");
    }

    #[test]
    fn render_list_counts() {
        let mut table = list_table(&["id", "scope"]);
        assert_eq!(render_list("session", &table, 0), "No sessions found.");
        table.add_row(vec!["1", "src"]);
        let rendered = render_list("session", &table, 1);
        assert!(rendered.contains("session:"));
        assert!(rendered.contains("SCOPE"));
    }

    #[test]
    fn introduced_count_keeps_its_digits() {
        assert_eq!(colorize_introduced(0).force_styling(false).to_string(), "0");
        assert_eq!(colorize_introduced(12).force_styling(false).to_string(), "12");
    }
}
