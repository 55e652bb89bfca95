//! Probes for forgotten backup and configuration artifacts

use crate::error::Result;
use crate::issue::{Confidence, ElementKind, Issue, Severity};
use crate::modules::{AuditContext, Module, ModuleInfo};
use crate::page::Page;
use async_trait::async_trait;
use tracing::debug;
use url::Url;

const PROBES: &[(&str, Severity)] = &[
    (".git/HEAD", Severity::High),
    (".env", Severity::High),
    ("backup.zip", Severity::Medium),
    ("database.sql", Severity::High),
    ("config.php.bak", Severity::Medium),
    ("web.config.old", Severity::Medium),
];

/// Probes well-known leftover paths relative to the page's directory
pub struct BackupPaths {
    probed: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl BackupPaths {
    pub fn new() -> Self {
        Self {
            probed: std::sync::Mutex::new(std::collections::HashSet::new()),
        }
    }
}

impl Default for BackupPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for BackupPaths {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "backup_paths",
            description: "Probes for reachable backup files and leftover configuration artifacts",
            authors: &["skopos team"],
            elements: &[ElementKind::Path],
        }
    }

    async fn audit(&self, page: Page, ctx: AuditContext) -> Result<()> {
        // Pages that are themselves probe hits spawn no further probes.
        if PROBES.iter().any(|(p, _)| page.url.ends_with(p)) {
            return Ok(());
        }

        let base = match Url::parse(&page.url) {
            Ok(u) => u,
            Err(_) => return Ok(()),
        };

        for (probe, severity) in PROBES {
            let target = match base.join(probe) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            };

            if !self
                .probed
                .lock()
                .expect("probed lock poisoned")
                .insert(target.clone())
            {
                continue;
            }

            let response = match ctx.http.get(&target).await {
                Ok(r) => r,
                Err(e) => {
                    debug!("probe {target} failed: {e}");
                    continue;
                }
            };

            if response.code == 200 && !response.body.is_empty() {
                ctx.report_issue(
                    Issue::new(
                        format!("Exposed Artifact: {probe}"),
                        format!("A sensitive artifact is reachable at {target}."),
                        ElementKind::Path,
                        severity.clone(),
                        &page.url,
                    )
                    .with_vector(&target)
                    .with_confidence(Confidence::Confirmed)
                    .with_evidence(format!(
                        "GET {} -> 200 ({} bytes)",
                        target,
                        response.body.len()
                    ))
                    .with_remediation("Remove the artifact or deny access to it.")
                    .with_cwe("CWE-538")
                    .with_module(self.info().name),
                );
                // Let the rest of the scan look at it too.
                ctx.push_url(target);
            }
        }

        Ok(())
    }
}
