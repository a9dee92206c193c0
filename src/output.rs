use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use clap::ValueEnum;
use colored::*;

use crate::risk::{RiskLevel, RiskReport, RISK_TABLE};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum OutputFormat {
    #[value(name = "human", help = "Human-readable summary")]
    Human,
    #[value(name = "json", help = "JSON summary")]
    Json,
}

pub struct ReportWriter {
    format: OutputFormat,
}

impl ReportWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn write_risk(&self, report: &RiskReport, output: &Path) -> Result<()> {
        let text = match self.format {
            OutputFormat::Human => format_risk_human(report, output),
            OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(report)?),
        };
        print!("{}", text);
        io::stdout().flush()?;
        Ok(())
    }
}

fn level_label(level: RiskLevel) -> ColoredString {
    let label = format!("{:<8}", level.to_string());
    match level {
        RiskLevel::Critical => label.truecolor(255, 64, 64).bold(),
        RiskLevel::High => label.truecolor(255, 140, 0).bold(),
        RiskLevel::Medium => label.truecolor(255, 215, 0),
        RiskLevel::Unknown => label.truecolor(128, 128, 128),
    }
}

pub fn format_risk_human(report: &RiskReport, output: &Path) -> String {
    let mut out = String::new();

    out.push_str(&format!("\n{}\n\n", "RISK ANALYSIS COMPLETE".truecolor(0, 255, 65).bold()));
    out.push_str(&format!(
        "{} {} {} {}\n",
        "⟦".truecolor(64, 64, 64),
        format!("{} records", report.rows).truecolor(191, 64, 191).bold(),
        "•".truecolor(0, 255, 65),
        output.display().to_string().truecolor(255, 255, 255).bold(),
    ));
    if let (Some(first), Some(last)) = (report.first_seen, report.last_seen) {
        out.push_str(&format!(
            "{} observed {} → {}\n",
            "⟦".truecolor(64, 64, 64),
            first.format("%Y-%m-%d %H:%M").to_string().truecolor(0, 212, 255),
            last.format("%Y-%m-%d %H:%M").to_string().truecolor(0, 212, 255),
        ));
    }
    out.push('\n');

    for (level, count) in report.by_level.iter().rev() {
        out.push_str(&format!("  {} {}\n", level_label(*level), count.to_string().bold()));
    }

    if !report.by_protocol.is_empty() {
        out.push('\n');
        for (protocol, count) in &report.by_protocol {
            let issues = RISK_TABLE
                .values()
                .find(|e| e.protocol == *protocol)
                .map(|e| e.issues.join(", "))
                .unwrap_or_default();
            out.push_str(&format!(
                "  {} {} {}\n",
                format!("{:<8}", protocol).truecolor(255, 255, 255).bold(),
                format!("{:>6}", count).truecolor(0, 212, 255),
                issues.truecolor(128, 128, 128),
            ));
        }
    }

    out
}

pub fn saved(what: &str, path: &Path) {
    println!("{} {} {}", "✅".green(), what, path.display().to_string().bold());
}

pub fn warning(message: &str) {
    eprintln!("{} {}", "⚠".truecolor(255, 140, 0).bold(), message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::enrich_table;
    use crate::table::Table;

    fn report() -> RiskReport {
        let mut table = Table::new(vec!["port".to_string()]);
        for port in ["3389", "3389", "22", "8080"] {
            table.push_row(vec![port.to_string()]);
        }
        enrich_table(&mut table, Path::new("in.csv")).unwrap()
    }

    #[test]
    fn test_human_summary_lists_levels_and_issues() {
        colored::control::set_override(false);
        let text = format_risk_human(&report(), Path::new("reports/risk_data.csv"));
        assert!(text.contains("4 records"));
        let critical = text.find("Critical").unwrap();
        let medium = text.find("Medium").unwrap();
        assert!(critical < medium);
        assert!(text.contains("BlueKeep"));
        assert!(text.contains("User enumeration"));
    }

    #[test]
    fn test_json_summary_shape() {
        let value = serde_json::to_value(report()).unwrap();
        assert_eq!(value["rows"], 4);
        assert_eq!(value["by_level"]["Critical"], 2);
        assert_eq!(value["by_protocol"]["SSH"], 1);
    }
}
