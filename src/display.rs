//! Terminal output: colour handling and simple aligned tables
//!
//! Colours are disabled by `--no-color`, by the `NO_COLOR` environment
//! variable, and when stdout is not a terminal.

use std::io::IsTerminal;
use colored::{ColoredString, Colorize};

use crate::plugin::permissions::RiskLevel;

#[derive(Debug, Clone, Copy)]
pub struct ColourManager {
    enabled: bool,
}

impl ColourManager {
    pub fn with_colours(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Decide from the CLI flag and the environment
    pub fn from_args(no_color: bool) -> Self {
        let env_disabled = std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
        Self::with_colours(!no_color && !env_disabled && std::io::stdout().is_terminal())
    }

    pub fn colours_enabled(&self) -> bool {
        self.enabled
    }

    fn paint(&self, text: &str, apply: fn(&str) -> ColoredString) -> ColoredString {
        if self.enabled {
            apply(text)
        } else {
            text.normal()
        }
    }

    pub fn error(&self, text: &str) -> ColoredString {
        self.paint(text, |t| t.red().bold())
    }

    pub fn warning(&self, text: &str) -> ColoredString {
        self.paint(text, |t| t.yellow())
    }

    pub fn success(&self, text: &str) -> ColoredString {
        self.paint(text, |t| t.green())
    }

    pub fn highlight(&self, text: &str) -> ColoredString {
        self.paint(text, |t| t.cyan().bold())
    }

    pub fn muted(&self, text: &str) -> ColoredString {
        self.paint(text, |t| t.bright_black())
    }

    /// Colour a risk label: low green, medium yellow, high red
    pub fn risk(&self, risk: RiskLevel) -> ColoredString {
        let label = risk.to_string();
        match risk {
            RiskLevel::Low => self.success(&label),
            RiskLevel::Medium => self.warning(&label),
            RiskLevel::High => self.error(&label),
        }
    }
}

/// Column-aligned table. Widths are measured on the plain text so colour
/// codes do not skew alignment.
#[derive(Debug, Default)]
pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers<S: Into<String>>(mut self, headers: impl IntoIterator<Item = S>) -> Self {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn widths(&self) -> Vec<usize> {
        let columns = self
            .rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0);
        (0..columns)
            .map(|column| {
                std::iter::once(&self.headers)
                    .chain(self.rows.iter())
                    .filter_map(|row| row.get(column))
                    .map(|cell| cell.chars().count())
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }

    fn line(cells: &[String], widths: &[usize], paint: impl Fn(&str) -> String) -> String {
        let last = cells.len().saturating_sub(1);
        let mut line = String::new();
        for (index, cell) in cells.iter().enumerate() {
            line.push(' ');
            line.push_str(&paint(cell));
            if index < last {
                let pad = widths[index].saturating_sub(cell.chars().count());
                line.push_str(&" ".repeat(pad));
            }
        }
        line
    }

    pub fn build(&self, colours: &ColourManager) -> String {
        let widths = self.widths();
        let mut output = String::new();

        if !self.headers.is_empty() {
            output.push_str(&Self::line(&self.headers, &widths, |cell| colours.highlight(cell).to_string()));
            output.push('\n');
            let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
            output.push_str(&Self::line(&rule, &widths, |cell| colours.muted(cell).to_string()));
            output.push('\n');
        }
        for row in &self.rows {
            output.push_str(&Self::line(row, &widths, str::to_string));
            output.push('\n');
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_output_when_disabled() {
        let colours = ColourManager::with_colours(false);
        assert_eq!(colours.error("failed").to_string(), "failed");
        assert_eq!(colours.risk(RiskLevel::High).to_string(), RiskLevel::High.to_string());
    }

    #[test]
    fn test_table_alignment() {
        let table = TableBuilder::new()
            .headers(["ID", "TYPE", "STATUS"])
            .add_row(vec!["branch-badges".into(), "widget".into(), "enabled".into()])
            .add_row(vec!["notes".into(), "panel".into(), "disabled".into()]);

        let output = table.build(&ColourManager::with_colours(false));
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], " ID            TYPE   STATUS");
        assert_eq!(lines[2], " branch-badges widget enabled");
        assert_eq!(lines[3], " notes         panel  disabled");
    }

    #[test]
    fn test_empty_table() {
        let table = TableBuilder::new();
        assert!(table.is_empty());
        assert_eq!(table.build(&ColourManager::with_colours(false)), "");
    }
}
