//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{builder::Builder, settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table of rows, or a note when there are none
pub fn print_table<T: Tabled>(items: &[T], empty_message: &str) {
    if items.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a table whose columns are only known at runtime
pub fn print_records(header: Vec<String>, records: Vec<Vec<String>>) {
    let mut builder = Builder::default();
    builder.push_record(header);
    for record in records {
        builder.push_record(record);
    }
    println!("{}", builder.build().with(Style::rounded()));
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a section heading
pub fn print_heading(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "=".repeat(title.chars().count().max(20)));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format millicores, whole cores above 1000m
pub fn format_cpu(millicores: f64) -> String {
    if millicores >= 1000.0 {
        format!("{:.2}", millicores / 1000.0)
    } else {
        format!("{}m", millicores)
    }
}

/// Format MiB, GiB above 1024Mi
pub fn format_mib(mib: f64) -> String {
    if mib >= 1024.0 {
        format!("{:.2}Gi", mib / 1024.0)
    } else {
        format!("{}Mi", mib)
    }
}

/// Format an optional configured value
pub fn format_configured(value: Option<u64>, format: fn(f64) -> String) -> String {
    value
        .map(|v| format(v as f64))
        .unwrap_or_else(|| "-".to_string())
}

/// Format seconds as `1h02m03s`
pub fn format_duration(secs: f64) -> String {
    let total = secs.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m{s:02}s"),
        _ => format!("{h}h{m:02}m{s:02}s"),
    }
}

/// Color a violation percentage by severity
pub fn color_pct(pct: f64) -> String {
    let formatted = format!("{:.1}%", pct);
    if pct >= 50.0 {
        formatted.red().to_string()
    } else if pct >= 10.0 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cpu() {
        assert_eq!(format_cpu(250.0), "250m");
        assert_eq!(format_cpu(1500.0), "1.50");
        assert_eq!(format_cpu(12.5), "12.5m");
    }

    #[test]
    fn test_format_mib() {
        assert_eq!(format_mib(512.0), "512Mi");
        assert_eq!(format_mib(2048.0), "2.00Gi");
        assert_eq!(format_configured(None, format_mib), "-");
        assert_eq!(format_configured(Some(256), format_mib), "256Mi");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0s");
        assert_eq!(format_duration(120.0), "2m00s");
        assert_eq!(format_duration(3723.0), "1h02m03s");
    }
}
