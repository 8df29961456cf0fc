//! Output formatting for the campaign CLI.

use std::fmt;
use std::str::FromStr;
use wa_core::campaign::Progress;
use wa_core::template::Template;
use wa_tracker::Stats;

/// Supported output formats for CLI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Compact JSON (single line).
    Json,
    /// Pretty-printed JSON.
    JsonPretty,
    /// Human-readable multi-line text.
    Text,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Json => "json",
            Self::JsonPretty => "json-pretty",
            Self::Text => "text",
        };
        f.write_str(s)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "json-pretty" | "json_pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            "text" => Ok(Self::Text),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Formats campaign-core types for CLI output.
#[derive(Debug, Clone)]
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    /// Create a new formatter with the given output format.
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Format a [`Progress`] snapshot.
    #[must_use]
    pub fn format_progress(&self, progress: &Progress) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(progress).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(progress).unwrap_or_default(),
            OutputFormat::Text => format!(
                "attempted {}/{} (succeeded {}, failed {}, next_index {})",
                progress.attempted, progress.total_recipients, progress.succeeded, progress.failed, progress.next_index
            ),
        }
    }

    /// Format a campaign's [`Stats`].
    #[must_use]
    pub fn format_stats(&self, stats: &Stats) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(stats).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(stats).unwrap_or_default(),
            OutputFormat::Text => format_stats_text(stats),
        }
    }

    /// Format a parsed [`Template`].
    #[must_use]
    pub fn format_template(&self, template: &Template) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(template).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(template).unwrap_or_default(),
            OutputFormat::Text => format_template_text(template),
        }
    }
}

fn format_stats_text(stats: &Stats) -> String {
    let mut out = format!(
        "total_sent: {}\ndelivered: {}\nread: {}\n",
        stats.total_sent, stats.delivery.delivered, stats.delivery.read
    );
    for (block_index, options) in &stats.block_distribution {
        out.push_str(&format!("block {block_index}:\n"));
        for option in options {
            out.push_str(&format!(
                "  {:?}: {} ({:.1}%)\n",
                option.option_text,
                option.count,
                option.percentage * 100.0
            ));
        }
    }
    out
}

fn format_template_text(template: &Template) -> String {
    let mut out = format!(
        "valid: {}\nblocks: {}\ncombinations: {}\nvariables: {:?}\n",
        template.is_valid,
        template.blocks.len(),
        template.total_combinations,
        template.variable_names
    );
    for error in &template.errors {
        out.push_str(&format!("error: {error:?}\n"));
    }
    for warning in &template.warnings {
        out.push_str(&format!("warning: {warning:?}\n"));
    }
    out
}
