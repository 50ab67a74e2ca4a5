//! Output formatters for change sets and outbox entries.

use clap::ValueEnum;
use comfy_table::Table;
use unitwork_core::proto::{ChangeKind, ChangeSet};
use unitwork_core::OutboxEntry;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a published change set.
    fn format_change_set(&self, changes: &ChangeSet) -> String;

    /// Format a page of outbox entries.
    fn format_outbox(&self, entries: &[OutboxEntry], has_more: bool) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
    }
}

/// One flattened change: entity, kind, property, old, new.
fn change_rows(changes: &ChangeSet) -> Vec<[String; 5]> {
    let mut rows = Vec::new();
    for tracked in changes.entities() {
        let entity = tracked.entity.to_string();
        let kind = tracked.kind.to_string();
        if tracked.kind == ChangeKind::Updated {
            for change in &tracked.changes {
                rows.push([
                    entity.clone(),
                    kind.clone(),
                    change.property.clone(),
                    change.old_value.to_string(),
                    change.new_value.to_string(),
                ]);
            }
        } else {
            rows.push([entity, kind, String::new(), String::new(), String::new()]);
        }
    }
    rows
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_change_set(&self, changes: &ChangeSet) -> String {
        let mut table = Table::new();
        table.set_header(vec!["entity", "kind", "property", "old", "new"]);
        for row in change_rows(changes) {
            table.add_row(row.to_vec());
        }

        let mut output = format!(
            "transaction {} by {}\n{}",
            changes.transaction_id(),
            changes.user(),
            table
        );
        for fault in changes.faults() {
            output.push_str(&format!(
                "\nunreadable {}.{}: {}",
                fault.entity, fault.property, fault.reason
            ));
        }
        output
    }

    fn format_outbox(&self, entries: &[OutboxEntry], has_more: bool) -> String {
        if entries.is_empty() {
            return "No entries".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec![
            "lsn",
            "transaction",
            "user",
            "created",
            "updated",
            "deleted",
            "types",
        ]);
        for entry in entries {
            let summary = entry.changes.summary();
            table.add_row(vec![
                entry.lsn.to_string(),
                entry.transaction_id.to_string(),
                entry.user.clone(),
                summary.created.to_string(),
                summary.updated.to_string(),
                summary.deleted.to_string(),
                entry.changes.entity_types().join(","),
            ]);
        }

        let mut output = table.to_string();
        if has_more {
            output.push_str("\n(more entries available)");
        }
        output
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_change_set(&self, changes: &ChangeSet) -> String {
        serde_json::to_string_pretty(changes).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }

    fn format_outbox(&self, entries: &[OutboxEntry], _has_more: bool) -> String {
        entries
            .iter()
            .map(|entry| {
                serde_json::to_string(entry).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// CSV formatter.
pub struct CsvFormatter;

impl Formatter for CsvFormatter {
    fn format_change_set(&self, changes: &ChangeSet) -> String {
        let mut lines = vec!["transaction,user,entity,kind,property,old,new".to_string()];
        for row in change_rows(changes) {
            let mut cells = vec![
                changes.transaction_id().to_string(),
                format!("\"{}\"", escape_csv(changes.user())),
            ];
            cells.extend(row.iter().map(|cell| format!("\"{}\"", escape_csv(cell))));
            lines.push(cells.join(","));
        }
        lines.join("\n")
    }

    fn format_outbox(&self, entries: &[OutboxEntry], _has_more: bool) -> String {
        let mut lines = vec!["lsn,transaction,user,created,updated,deleted".to_string()];
        for entry in entries {
            let summary = entry.changes.summary();
            lines.push(format!(
                "{},{},\"{}\",{},{},{}",
                entry.lsn,
                entry.transaction_id,
                escape_csv(&entry.user),
                summary.created,
                summary.updated,
                summary.deleted
            ));
        }
        lines.join("\n")
    }
}

/// Escape a string for CSV output.
fn escape_csv(s: &str) -> String {
    s.replace('"', "\"\"")
}
