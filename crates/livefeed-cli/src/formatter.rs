//! Output formatters for harness results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use livefeed_client::SessionInfo;

use crate::scenario::Step;
use crate::simulate::SimulationReport;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format the steps of a scripted walkthrough.
    fn format_steps(&self, steps: &[Step]) -> String;

    /// Format a simulation report.
    fn format_report(&self, report: &SimulationReport) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_steps(&self, steps: &[Step]) -> String {
        let mut output = String::new();

        for (i, step) in steps.iter().enumerate() {
            if !output.is_empty() {
                output.push_str("\n\n");
            }
            output.push_str(&format!(
                "{}. {} ({} open, {} notified)\n",
                i + 1,
                step.label,
                step.stats.session_count,
                step.notifications
            ));
            output.push_str(&sessions_table(&step.sessions));
        }

        if output.is_empty() {
            output = "No steps".to_string();
        }

        output
    }

    fn format_report(&self, report: &SimulationReport) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Metric", "Value"]);

        let rows: [(&str, String); 11] = [
            ("rounds", report.rounds.to_string()),
            ("activations", report.activations.to_string()),
            ("deactivations", report.deactivations.to_string()),
            ("injected failures", report.injected_failures.to_string()),
            ("failed subscriptions", report.failed_subscriptions.to_string()),
            ("events published", report.events_published.to_string()),
            ("notifications", report.notifications.to_string()),
            ("network restores", report.network_restores.to_string()),
            ("transport opens", report.transport_opens.to_string()),
            ("peak sessions", report.peak_sessions.to_string()),
            ("sessions left", report.final_stats.session_count.to_string()),
        ];
        for (metric, value) in rows {
            table.add_row(vec![Cell::new(metric), Cell::new(value)]);
        }

        format!("{}\nelapsed: {} ms", table, report.elapsed_ms)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_steps(&self, steps: &[Step]) -> String {
        serde_json::to_string_pretty(steps).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_report(&self, report: &SimulationReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Format session snapshots as a table.
fn sessions_table(sessions: &[SessionInfo]) -> String {
    if sessions.is_empty() {
        return "(no sessions)".to_string();
    }

    let mut table = Table::new();
    table.set_header(vec![
        "feed", "source", "state", "refs", "listeners", "gen", "age ms",
    ]);

    for info in sessions {
        table.add_row(vec![
            Cell::new(&info.name),
            Cell::new(&info.source),
            Cell::new(format!("{:?}", info.state)),
            Cell::new(info.ref_count),
            Cell::new(info.listener_count),
            Cell::new(info.generation),
            Cell::new(info.age_ms),
        ]);
    }

    table.to_string()
}
