//! Anti-CSRF token presence check for state-changing forms

use crate::error::Result;
use crate::issue::{Confidence, ElementKind, Issue, Severity};
use crate::modules::{AuditContext, Module, ModuleInfo};
use crate::page::Page;
use async_trait::async_trait;

/// Known anti-CSRF token field names
const CSRF_FIELD_NAMES: &[&str] = &[
    "csrf",
    "csrf_token",
    "_csrf",
    "_token",
    "csrfmiddlewaretoken",
    "authenticity_token",
    "nonce",
    "__requestverificationtoken",
    "antiforgerytoken",
    "xsrf",
    "_xsrf",
];

pub struct FormCsrf;

#[async_trait]
impl Module for FormCsrf {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "form_csrf",
            description: "Flags state-changing forms without an anti-CSRF token field",
            authors: &["skopos team"],
            elements: &[ElementKind::Form],
        }
    }

    async fn audit(&self, page: Page, ctx: AuditContext) -> Result<()> {
        for form in &page.forms {
            if form.method != "POST" {
                continue;
            }

            let has_token = form.fields.iter().any(|field| {
                let name = field.name.to_lowercase();
                CSRF_FIELD_NAMES.iter().any(|known| name.contains(known))
            });

            if !has_token {
                ctx.report_issue(
                    Issue::new(
                        "Missing Anti-CSRF Token",
                        format!(
                            "POST form submitting to {} carries no recognizable anti-CSRF \
                             token field, which may allow cross-site request forgery.",
                            form.action
                        ),
                        ElementKind::Form,
                        Severity::Medium,
                        &page.url,
                    )
                    .with_vector(&form.action)
                    .with_confidence(Confidence::Tentative)
                    .with_evidence(format!(
                        "Form method={} action={} fields=[{}]",
                        form.method,
                        form.action,
                        form.fields
                            .iter()
                            .map(|f| f.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ))
                    .with_remediation(
                        "Add a server-validated CSRF token to every state-changing form.",
                    )
                    .with_cwe("CWE-352")
                    .with_module(self.info().name),
                );
            }
        }

        Ok(())
    }
}
