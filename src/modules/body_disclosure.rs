//! Information disclosure patterns in response bodies

use crate::error::Result;
use crate::issue::{Confidence, ElementKind, Issue, Severity};
use crate::modules::{AuditContext, Module, ModuleInfo};
use crate::page::Page;
use async_trait::async_trait;
use regex::Regex;

/// (name, pattern, severity) table of disclosure signatures
const SIGNATURES: &[(&str, &str, Severity)] = &[
    (
        "PHP Error Dump",
        r"(?i)(fatal error|parse error|warning):.*on line \d+",
        Severity::Medium,
    ),
    (
        "Python Traceback",
        r"Traceback \(most recent call last\)",
        Severity::Medium,
    ),
    (
        "Java Stack Trace",
        r"(?m)^\s+at [\w.$]+\([\w.]+:\d+\)",
        Severity::Medium,
    ),
    (
        "SQL Error Message",
        r"(?i)(sql syntax.*mysql|ora-\d{5}|pg::syntaxerror|sqlite3?::)",
        Severity::High,
    ),
    (
        "Unix Path Disclosure",
        r"(?:/home/|/var/www/)[\w./-]+",
        Severity::Low,
    ),
    (
        "Windows Path Disclosure",
        r"[A-Z]:\\(?:inetpub|xampp|wamp)\\[\w.\\-]+",
        Severity::Low,
    ),
];

/// Scans response bodies for error dumps and leaked internals
pub struct BodyDisclosure;

#[async_trait]
impl Module for BodyDisclosure {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "body_disclosure",
            description: "Detects error dumps, stack traces, and leaked paths in response bodies",
            authors: &["skopos team"],
            elements: &[ElementKind::Body],
        }
    }

    async fn audit(&self, page: Page, ctx: AuditContext) -> Result<()> {
        if page.body.is_empty() {
            return Ok(());
        }

        for (name, pattern, severity) in SIGNATURES {
            let re = match Regex::new(pattern) {
                Ok(re) => re,
                Err(_) => continue,
            };
            if let Some(matched) = re.find(&page.body) {
                ctx.report_issue(
                    Issue::new(
                        *name,
                        format!("The response body at {} leaks internal details.", page.url),
                        ElementKind::Body,
                        severity.clone(),
                        &page.url,
                    )
                    .with_confidence(Confidence::Tentative)
                    .with_evidence(matched.as_str().chars().take(200).collect::<String>())
                    .with_remediation(
                        "Disable verbose error output in production and log errors server-side.",
                    )
                    .with_cwe("CWE-209")
                    .with_module(self.info().name),
                );
            }
        }

        Ok(())
    }
}
