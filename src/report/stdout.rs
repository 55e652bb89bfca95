//! Console summary report

use crate::error::Result;
use crate::issue::Severity;
use crate::options::Options;
use crate::report::{AuditStore, Report, ReportInfo};
use colored::Colorize;
use tabled::builder::Builder;
use tabled::settings::Style;

/// Prints a severity summary and the issue list to the console
pub struct StdoutReport;

impl Report for StdoutReport {
    fn info(&self) -> ReportInfo {
        ReportInfo {
            name: "stdout",
            description: "Prints the audit summary to the console",
            authors: &["skopos team"],
        }
    }

    fn run(&self, store: &AuditStore, options: &Options) -> Result<()> {
        for issue in &store.issues {
            let line = format!(
                "[{}] {} — {} ({})",
                issue.severity, issue.name, issue.url, issue.kind
            );
            let colored_line = match issue.severity {
                Severity::Critical => line.red().bold(),
                Severity::High => line.bright_red(),
                Severity::Medium => line.yellow(),
                Severity::Low => line.blue(),
                Severity::Info => line.white(),
            };
            println!("  {colored_line}");
        }

        if options.only_positives {
            return Ok(());
        }

        let severities = [
            (Severity::Critical, "Critical"),
            (Severity::High, "High"),
            (Severity::Medium, "Medium"),
            (Severity::Low, "Low"),
            (Severity::Info, "Info"),
        ];

        println!("\n{}", "  Audit Summary".bold());
        println!("  {}", "─".repeat(35));

        let mut builder = Builder::default();
        builder.push_record(["Severity", "Count"]);
        for (severity, label) in &severities {
            builder.push_record([
                label.to_string(),
                store.count_by_severity(severity).to_string(),
            ]);
        }
        builder.push_record(["Total".to_string(), store.issues.len().to_string()]);

        let mut table = builder.build();
        table.with(Style::rounded());
        println!("{table}");

        println!(
            "\n  {} {} URLs discovered, {} issues",
            "Sitemap:".bold(),
            store.sitemap.len(),
            store.issues.len()
        );

        Ok(())
    }
}
