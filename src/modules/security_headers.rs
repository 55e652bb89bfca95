//! Security header and server banner checks

use crate::error::Result;
use crate::issue::{Confidence, ElementKind, Issue, Severity};
use crate::modules::{AuditContext, Module, ModuleInfo};
use crate::page::Page;
use async_trait::async_trait;

enum HeaderVerdict {
    Missing,
    Weak(String),
    Ok,
}

fn validate_csp(value: Option<&str>) -> HeaderVerdict {
    match value {
        None => HeaderVerdict::Missing,
        Some(v) => {
            if v.contains("unsafe-inline") || v.contains("unsafe-eval") {
                HeaderVerdict::Weak(format!("CSP contains unsafe directives: {v}"))
            } else {
                HeaderVerdict::Ok
            }
        }
    }
}

fn validate_x_content_type(value: Option<&str>) -> HeaderVerdict {
    match value {
        None => HeaderVerdict::Missing,
        Some(v) if v.eq_ignore_ascii_case("nosniff") => HeaderVerdict::Ok,
        Some(v) => HeaderVerdict::Weak(format!("Expected 'nosniff', got '{v}'")),
    }
}

fn validate_x_frame_options(value: Option<&str>) -> HeaderVerdict {
    match value {
        None => HeaderVerdict::Missing,
        Some(v) => {
            let upper = v.to_uppercase();
            if upper == "DENY" || upper == "SAMEORIGIN" {
                HeaderVerdict::Ok
            } else {
                HeaderVerdict::Weak(format!("Unexpected value: {v}"))
            }
        }
    }
}

/// Audits response headers and the server banner
pub struct SecurityHeaders;

#[async_trait]
impl Module for SecurityHeaders {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "security_headers",
            description: "Audits security response headers and version-leaking server banners",
            authors: &["skopos team"],
            elements: &[ElementKind::Header, ElementKind::Server],
        }
    }

    async fn audit(&self, page: Page, ctx: AuditContext) -> Result<()> {
        let checks: [(&str, fn(Option<&str>) -> HeaderVerdict, &str, Severity); 3] = [
            (
                "content-security-policy",
                validate_csp,
                "CWE-1021",
                Severity::Medium,
            ),
            (
                "x-content-type-options",
                validate_x_content_type,
                "CWE-430",
                Severity::Low,
            ),
            (
                "x-frame-options",
                validate_x_frame_options,
                "CWE-1021",
                Severity::Low,
            ),
        ];

        for (header, validate, cwe, severity) in checks {
            match validate(page.header(header)) {
                HeaderVerdict::Missing => ctx.report_issue(
                    Issue::new(
                        format!("Missing '{header}' Header"),
                        format!("The response does not set the '{header}' header."),
                        ElementKind::Header,
                        severity,
                        &page.url,
                    )
                    .with_vector(header)
                    .with_confidence(Confidence::Informational)
                    .with_remediation(format!("Set a restrictive '{header}' header."))
                    .with_cwe(cwe)
                    .with_module(self.info().name),
                ),
                HeaderVerdict::Weak(evidence) => ctx.report_issue(
                    Issue::new(
                        format!("Weak '{header}' Header"),
                        format!("The '{header}' header is present but weakly configured."),
                        ElementKind::Header,
                        severity,
                        &page.url,
                    )
                    .with_vector(header)
                    .with_confidence(Confidence::Informational)
                    .with_evidence(evidence)
                    .with_remediation(format!("Tighten the '{header}' header value."))
                    .with_cwe(cwe)
                    .with_module(self.info().name),
                ),
                HeaderVerdict::Ok => {}
            }
        }

        // Server-class checks: banners that leak implementation versions.
        for banner in ["server", "x-powered-by"] {
            if let Some(value) = page.header(banner) {
                if value.chars().any(|c| c.is_ascii_digit()) {
                    ctx.report_issue(
                        Issue::new(
                            format!("'{banner}' Header Reveals Version"),
                            "Version information helps attackers pick known exploits.",
                            ElementKind::Server,
                            Severity::Info,
                            &page.url,
                        )
                        .with_vector(banner)
                        .with_confidence(Confidence::Informational)
                        .with_evidence(format!("{banner}: {value}"))
                        .with_remediation("Strip version details from server banners.")
                        .with_cwe("CWE-200")
                        .with_module(self.info().name),
                    );
                }
            }
        }

        Ok(())
    }
}
