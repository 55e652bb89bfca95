//! Time-based blind SQL injection checks
//!
//! The only default module that uses the timing phase: at regular-audit
//! time it registers one deferred operation per injectable input, and the
//! operations measure server-side delay once the wire has gone quiet.

use crate::error::Result;
use crate::issue::{Confidence, ElementKind, Issue, Severity};
use crate::modules::{AuditContext, Module, ModuleInfo};
use crate::page::Page;
use crate::timing::TimingOperation;
use async_trait::async_trait;
use tracing::debug;
use url::Url;

const MODULE_NAME: &str = "sqli_timing";

/// Seconds of delay the payloads ask the database for
const DELAY_SECS: f64 = 3.0;
/// An injected response must exceed the control by this much to count
const DELAY_MARGIN_SECS: f64 = 2.5;

const PAYLOADS: &[&str] = &["' OR SLEEP(3)--", "' OR pg_sleep(3)--"];

pub struct SqliTiming;

impl SqliTiming {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqliTiming {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for SqliTiming {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: MODULE_NAME,
            description: "Time-based blind SQL injection via deferred timing operations",
            authors: &["skopos team"],
            elements: &[ElementKind::Link, ElementKind::Form],
        }
    }

    async fn audit(&self, page: Page, ctx: AuditContext) -> Result<()> {
        if ctx.options.audit_links {
            for link in &page.links {
                for param in link.vars.keys() {
                    schedule_link_probe(&ctx, &page.url, &link.href, param);
                }
            }
        }

        if ctx.options.audit_forms {
            for form in &page.forms {
                for field in &form.fields {
                    schedule_form_probe(&ctx, &page.url, form, &field.name);
                }
            }
        }

        Ok(())
    }
}

fn schedule_link_probe(ctx: &AuditContext, page_url: &str, href: &str, param: &str) {
    let payload = PAYLOADS[0].to_string();
    let page_url = page_url.to_string();
    let href = href.to_string();
    let param = param.to_string();
    let action = href.clone();

    ctx.schedule_timing(TimingOperation::new(
        MODULE_NAME,
        ElementKind::Link,
        action,
        payload.clone(),
        move |ctx: AuditContext| async move {
            let control = ctx.http.get(&href).await?;
            let Some(injected_url) = inject_query_param(&href, &param, &payload) else {
                return Ok(());
            };
            let response = ctx.http.get(&injected_url).await?;

            debug!(
                "timing probe {param}: {:.1}s vs {:.1}s control",
                response.time, control.time
            );
            if response.time >= DELAY_SECS && response.time - control.time >= DELAY_MARGIN_SECS {
                ctx.report_issue(delay_issue(
                    &page_url,
                    ElementKind::Link,
                    &param,
                    &payload,
                    response.time,
                    control.time,
                ));
            }
            Ok(())
        },
    ));
}

fn schedule_form_probe(
    ctx: &AuditContext,
    page_url: &str,
    form: &crate::page::Form,
    field_name: &str,
) {
    let payload = PAYLOADS[0].to_string();
    let page_url = page_url.to_string();
    let action = form.action.clone();
    let field_name = field_name.to_string();
    let fields: Vec<(String, String)> = form
        .fields
        .iter()
        .map(|f| (f.name.clone(), f.value.clone()))
        .collect();

    ctx.schedule_timing(TimingOperation::new(
        MODULE_NAME,
        ElementKind::Form,
        action.clone(),
        payload.clone(),
        move |ctx: AuditContext| async move {
            let control_body = encode_form(&fields, None, "");
            let control = ctx.http.post(&action, &control_body).await?;

            let injected_body = encode_form(&fields, Some(&field_name), &payload);
            let response = ctx.http.post(&action, &injected_body).await?;

            debug!(
                "timing probe {field_name}: {:.1}s vs {:.1}s control",
                response.time, control.time
            );
            if response.time >= DELAY_SECS && response.time - control.time >= DELAY_MARGIN_SECS {
                ctx.report_issue(delay_issue(
                    &page_url,
                    ElementKind::Form,
                    &field_name,
                    &payload,
                    response.time,
                    control.time,
                ));
            }
            Ok(())
        },
    ));
}

fn delay_issue(
    page_url: &str,
    kind: ElementKind,
    input: &str,
    payload: &str,
    elapsed: f64,
    baseline: f64,
) -> Issue {
    Issue::new(
        "Time-Based Blind SQL Injection",
        format!(
            "Input '{input}' caused a delayed response ({elapsed:.1}s vs {baseline:.1}s \
             baseline), indicating the injected SQL executed."
        ),
        kind,
        Severity::Critical,
        page_url,
    )
    .with_vector(input)
    .with_payload(payload)
    .with_confidence(Confidence::Confirmed)
    .with_evidence(format!(
        "Payload: {payload}\nDelay: {elapsed:.1}s\nBaseline: {baseline:.1}s"
    ))
    .with_remediation("Use parameterized queries; never interpolate input into SQL.")
    .with_cwe("CWE-89")
    .with_module(MODULE_NAME)
}

/// Replaces one query parameter's value, returning the mutated URL
fn inject_query_param(href: &str, param: &str, payload: &str) -> Option<String> {
    let url = Url::parse(href).ok()?;
    let mut mutated = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == param {
                (k.into_owned(), payload.to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();
    mutated
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    Some(mutated.to_string())
}

/// Form-encodes fields, optionally overriding one with the payload
fn encode_form(fields: &[(String, String)], inject: Option<&str>, payload: &str) -> String {
    fields
        .iter()
        .map(|(name, value)| {
            let value = if inject == Some(name.as_str()) {
                payload
            } else {
                value.as_str()
            };
            format!(
                "{}={}",
                urlencode(name),
                urlencode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
