//! Audit store and report generation

pub mod json;
pub mod stdout;

use crate::error::Result;
use crate::issue::{Issue, Severity};
use crate::modules::{matches_all, Listing};
use crate::options::Options;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::error;

/// Immutable snapshot of a finished (or aborted) audit.
///
/// Everything mutable is deep-copied in, so later registry activity can
/// never show through a store that has already been built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStore {
    pub version: String,
    pub revision: String,
    /// Options in plain-map form, cookies flattened to name→value
    pub options: serde_json::Map<String, serde_json::Value>,
    pub sitemap: Vec<String>,
    pub issues: Vec<Issue>,
    pub plugin_results: serde_json::Map<String, serde_json::Value>,
}

impl AuditStore {
    pub fn new(
        options: &Options,
        sitemap: Vec<String>,
        issues: Vec<Issue>,
        plugin_results: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            version: crate::VERSION.to_string(),
            revision: crate::REVISION.to_string(),
            options: options.to_map(),
            sitemap,
            issues,
            plugin_results,
        }
    }

    /// Count of issues at a given severity
    pub fn count_by_severity(&self, severity: &Severity) -> usize {
        self.issues
            .iter()
            .filter(|i| &i.severity == severity)
            .count()
    }
}

/// Static description of a report formatter
#[derive(Debug, Clone)]
pub struct ReportInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub authors: &'static [&'static str],
}

/// Trait that all report formatters implement
pub trait Report: Send + Sync {
    fn info(&self) -> ReportInfo;

    fn run(&self, store: &AuditStore, options: &Options) -> Result<()>;
}

/// Runs registered reports against a finished audit store
pub struct ReportManager {
    reports: Mutex<Vec<Arc<dyn Report>>>,
}

impl ReportManager {
    pub fn new() -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        manager.register(Arc::new(stdout::StdoutReport));
        manager.register(Arc::new(json::JsonReport));
        manager
    }

    pub fn register(&mut self, report: Arc<dyn Report>) {
        self.reports
            .lock()
            .expect("reports lock poisoned")
            .push(report);
    }

    pub fn available(&self) -> Vec<String> {
        self.reports
            .lock()
            .expect("reports lock poisoned")
            .iter()
            .map(|r| r.info().name.to_string())
            .collect()
    }

    /// Runs every report under fault isolation.
    ///
    /// Each report runs on a blocking task so both `Err` returns and
    /// panics are contained; the remaining reports still run either way.
    pub async fn run(&self, store: &AuditStore, options: &Options) {
        let reports: Vec<Arc<dyn Report>> =
            self.reports.lock().expect("reports lock poisoned").clone();
        for report in reports {
            let name = report.info().name;
            let store = store.clone();
            let options = options.clone();
            let handle = tokio::task::spawn_blocking(move || report.run(&store, &options));
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("report '{name}' failed: {e}"),
                Err(e) if e.is_panic() => error!("report '{name}' panicked: {e}"),
                Err(e) => error!("report '{name}' aborted: {e}"),
            }
        }
    }

    /// Normalized listing filtered through all supplied patterns.
    ///
    /// Listing is one-shot: it drains the manager so a subsequent scan in
    /// the same process does not double-instantiate the reports.
    pub fn list(&self, patterns: &[String]) -> Result<Vec<Listing>> {
        for pattern in patterns {
            Regex::new(pattern)?;
        }
        let drained: Vec<Arc<dyn Report>> = {
            let mut reports = self.reports.lock().expect("reports lock poisoned");
            std::mem::take(&mut *reports)
        };
        let mut out = Vec::new();
        for report in drained {
            let info = report.info();
            if !matches_all(info.name, patterns)? {
                continue;
            }
            out.push(Listing {
                name: info.name.to_string(),
                description: info.description.to_string(),
                author: info.authors.iter().map(|a| a.trim().to_string()).collect(),
                path: format!("reports/{}", info.name),
            });
        }
        Ok(out)
    }
}

impl Default for ReportManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}
