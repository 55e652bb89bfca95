//! JSON report export

use crate::error::Result;
use crate::options::Options;
use crate::report::{AuditStore, Report, ReportInfo};
use std::path::Path;
use tracing::info;
use url::Url;

/// Writes the audit store as a JSON file
pub struct JsonReport;

impl Report for JsonReport {
    fn info(&self) -> ReportInfo {
        ReportInfo {
            name: "json",
            description: "Exports the audit store as pretty-printed JSON",
            authors: &["skopos team"],
        }
    }

    fn run(&self, store: &AuditStore, options: &Options) -> Result<()> {
        let path = options
            .report_path
            .clone()
            .unwrap_or_else(|| default_output_path(&options.target).into());
        export(store, &path)
    }
}

/// Exports an audit store as a JSON file
pub fn export(store: &AuditStore, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(store)?;
    std::fs::write(output_path, json)?;
    info!("JSON report saved to {}", output_path.display());
    Ok(())
}

/// Loads an audit store back from a JSON file
pub fn load(input_path: &Path) -> Result<AuditStore> {
    let content = std::fs::read_to_string(input_path)?;
    let store: AuditStore = serde_json::from_str(&content)?;
    Ok(store)
}

fn default_output_path(target: &str) -> String {
    if let Ok(url) = Url::parse(target) {
        let host = url.host_str().unwrap_or("unknown");
        let sanitized: String = host
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect();
        format!("skopos_{sanitized}.json")
    } else {
        "skopos_report.json".to_string()
    }
}
