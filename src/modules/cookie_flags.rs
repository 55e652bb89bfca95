//! Cookie security flag checks

use crate::error::Result;
use crate::issue::{Confidence, ElementKind, Issue, Severity};
use crate::modules::{AuditContext, Module, ModuleInfo};
use crate::page::Page;
use async_trait::async_trait;

/// Audits cookie flags (Secure, HttpOnly, SameSite)
pub struct CookieFlags;

#[async_trait]
impl Module for CookieFlags {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "cookie_flags",
            description: "Audits cookie security flags (Secure, HttpOnly, SameSite)",
            authors: &["skopos team"],
            elements: &[ElementKind::Cookie],
        }
    }

    async fn audit(&self, page: Page, ctx: AuditContext) -> Result<()> {
        for cookie in &page.cookies {
            // Cookies supplied via options carry no attribute string.
            if !cookie.observed {
                continue;
            }
            let lower = cookie.raw.to_lowercase();

            let name_lower = cookie.name.to_lowercase();
            let is_session_cookie = name_lower.contains("session")
                || name_lower.contains("sid")
                || name_lower.contains("token")
                || name_lower.contains("auth");
            let severity = if is_session_cookie {
                Severity::High
            } else {
                Severity::Medium
            };

            if !lower.contains("secure") {
                ctx.report_issue(
                    Issue::new(
                        format!("Cookie '{}' Missing Secure Flag", cookie.name),
                        "Cookie can be sent over unencrypted HTTP connections.",
                        ElementKind::Cookie,
                        severity.clone(),
                        &page.url,
                    )
                    .with_vector(&cookie.name)
                    .with_confidence(Confidence::Informational)
                    .with_evidence(format!("Set-Cookie: {}", cookie.raw))
                    .with_remediation(
                        "Add the 'Secure' flag so the cookie is only sent over HTTPS.",
                    )
                    .with_cwe("CWE-614")
                    .with_module(self.info().name),
                );
            }

            if !lower.contains("httponly") {
                ctx.report_issue(
                    Issue::new(
                        format!("Cookie '{}' Missing HttpOnly Flag", cookie.name),
                        "Cookie is accessible to JavaScript, vulnerable to XSS-based theft.",
                        ElementKind::Cookie,
                        severity.clone(),
                        &page.url,
                    )
                    .with_vector(&cookie.name)
                    .with_confidence(Confidence::Informational)
                    .with_evidence(format!("Set-Cookie: {}", cookie.raw))
                    .with_remediation("Add the 'HttpOnly' flag to prevent JavaScript access.")
                    .with_cwe("CWE-1004")
                    .with_module(self.info().name),
                );
            }

            if !lower.contains("samesite") {
                ctx.report_issue(
                    Issue::new(
                        format!("Cookie '{}' Missing SameSite Attribute", cookie.name),
                        "Cookie lacks the SameSite attribute, may allow CSRF attacks.",
                        ElementKind::Cookie,
                        Severity::Medium,
                        &page.url,
                    )
                    .with_vector(&cookie.name)
                    .with_confidence(Confidence::Informational)
                    .with_evidence(format!("Set-Cookie: {}", cookie.raw))
                    .with_remediation("Add 'SameSite=Strict' or 'SameSite=Lax'.")
                    .with_cwe("CWE-352")
                    .with_module(self.info().name),
                );
            }
        }

        Ok(())
    }
}
