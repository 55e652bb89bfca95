//! Unencrypted link targets reachable from HTTPS pages

use crate::error::Result;
use crate::issue::{Confidence, ElementKind, Issue, Severity};
use crate::modules::{AuditContext, Module, ModuleInfo};
use crate::page::Page;
use async_trait::async_trait;

pub struct InsecureLinks;

#[async_trait]
impl Module for InsecureLinks {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "insecure_links",
            description: "Flags plain-HTTP link targets on pages served over HTTPS",
            authors: &["skopos team"],
            elements: &[ElementKind::Link],
        }
    }

    async fn audit(&self, page: Page, ctx: AuditContext) -> Result<()> {
        if !page.url.starts_with("https://") {
            return Ok(());
        }

        for link in &page.links {
            if link.href.starts_with("http://") {
                ctx.report_issue(
                    Issue::new(
                        "Unencrypted Link on HTTPS Page",
                        format!(
                            "An HTTPS page links to {} over plain HTTP, downgrading \
                             anyone who follows it.",
                            link.href
                        ),
                        ElementKind::Link,
                        Severity::Low,
                        &page.url,
                    )
                    .with_vector(&link.href)
                    .with_confidence(Confidence::Informational)
                    .with_evidence(format!("href=\"{}\"", link.href))
                    .with_remediation("Link to the HTTPS version of the target.")
                    .with_cwe("CWE-319")
                    .with_module(self.info().name),
                );
            }
        }

        Ok(())
    }
}
