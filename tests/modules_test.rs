//! Direct tests for the default audit modules

mod common;

use common::test_options;
use skopos::http::HttpEngine;
use skopos::issue::{ElementKind, Issue};
use skopos::modules::{AuditContext, Module};
use skopos::modules::{
    backup_paths::BackupPaths, body_disclosure::BodyDisclosure, cookie_flags::CookieFlags,
    form_csrf::FormCsrf, insecure_links::InsecureLinks, security_headers::SecurityHeaders,
    sqli_timing::SqliTiming,
};
use skopos::options::Options;
use skopos::page::{Cookie, Form, FormField, Header, Link, Page};
use skopos::queue::WorkQueue;
use skopos::timing::TimingCoordinator;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    ctx: AuditContext,
    issues: Arc<Mutex<Vec<Issue>>>,
    timing: Arc<TimingCoordinator>,
}

fn harness(options: Options) -> Harness {
    let issues = Arc::new(Mutex::new(Vec::new()));
    let timing = Arc::new(TimingCoordinator::new());
    let http = Arc::new(HttpEngine::new(&options).expect("engine"));
    let ctx = AuditContext::new(
        http,
        Arc::new(options),
        Arc::clone(&issues),
        Arc::clone(&timing),
        Arc::new(WorkQueue::new()),
        Arc::new(WorkQueue::new()),
    );
    Harness {
        ctx,
        issues,
        timing,
    }
}

fn issue_names(issues: &Arc<Mutex<Vec<Issue>>>) -> Vec<String> {
    issues
        .lock()
        .expect("lock")
        .iter()
        .map(|i| i.name.clone())
        .collect()
}

#[tokio::test]
async fn test_cookie_flags_reports_missing_flags() {
    let h = harness(test_options("http://t/"));
    let mut page = Page::from_url("http://t/");
    page.cookies
        .push(Cookie::from_set_cookie("track=abc123; HttpOnly; SameSite=Lax").expect("cookie"));

    CookieFlags.audit(page, h.ctx.clone()).await.expect("audit");

    let names = issue_names(&h.issues);
    assert!(
        names.iter().any(|n| n.contains("Missing Secure Flag")),
        "got: {names:?}"
    );
    assert!(!names.iter().any(|n| n.contains("HttpOnly")));
}

#[tokio::test]
async fn test_cookie_flags_skips_option_supplied_cookies() {
    let h = harness(test_options("http://t/"));
    let mut page = Page::from_url("http://t/");
    page.cookies.push(Cookie::new("prefs", "dark"));

    CookieFlags.audit(page, h.ctx.clone()).await.expect("audit");

    assert!(
        h.issues.lock().expect("lock").is_empty(),
        "option-supplied cookies carry no flag information to audit"
    );
}

#[tokio::test]
async fn test_security_headers_missing_and_server_leak() {
    let h = harness(test_options("http://t/"));
    let mut page = Page::from_url("http://t/");
    page.headers.push(Header::new("server", "nginx/1.24.0"));

    SecurityHeaders.audit(page, h.ctx.clone()).await.expect("audit");

    let issues = h.issues.lock().expect("lock");
    assert!(issues
        .iter()
        .any(|i| i.name.contains("content-security-policy") && i.kind == ElementKind::Header));
    let leak = issues
        .iter()
        .find(|i| i.name.contains("Reveals Version"))
        .expect("server banner issue");
    assert_eq!(leak.kind, ElementKind::Server);
}

#[tokio::test]
async fn test_form_csrf_flags_tokenless_post_form() {
    let h = harness(test_options("http://t/"));
    let mut page = Page::from_url("http://t/login");
    page.forms.push(Form {
        action: "http://t/session".to_string(),
        method: "POST".to_string(),
        fields: vec![
            FormField {
                name: "user".to_string(),
                value: String::new(),
            },
            FormField {
                name: "pass".to_string(),
                value: String::new(),
            },
        ],
    });

    FormCsrf.audit(page, h.ctx.clone()).await.expect("audit");

    let names = issue_names(&h.issues);
    assert_eq!(names, vec!["Missing Anti-CSRF Token".to_string()]);
}

#[tokio::test]
async fn test_form_csrf_accepts_tokened_form_and_get_forms() {
    let h = harness(test_options("http://t/"));
    let mut page = Page::from_url("http://t/");
    page.forms.push(Form {
        action: "http://t/session".to_string(),
        method: "POST".to_string(),
        fields: vec![FormField {
            name: "authenticity_token".to_string(),
            value: "tok".to_string(),
        }],
    });
    page.forms.push(Form {
        action: "http://t/search".to_string(),
        method: "GET".to_string(),
        fields: vec![FormField {
            name: "q".to_string(),
            value: String::new(),
        }],
    });

    FormCsrf.audit(page, h.ctx.clone()).await.expect("audit");
    assert!(h.issues.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn test_insecure_links_only_on_https_pages() {
    let h = harness(test_options("https://t/"));
    let mut page = Page::from_url("https://t/");
    page.links.push(Link::new("http://t/legacy"));
    page.links.push(Link::new("https://t/fine"));

    InsecureLinks.audit(page, h.ctx.clone()).await.expect("audit");
    assert_eq!(issue_names(&h.issues).len(), 1);

    // Same links on a plain-HTTP page are not findings.
    let h2 = harness(test_options("http://t/"));
    let mut page = Page::from_url("http://t/");
    page.links.push(Link::new("http://t/legacy"));
    InsecureLinks.audit(page, h2.ctx.clone()).await.expect("audit");
    assert!(h2.issues.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn test_body_disclosure_finds_traceback() {
    let h = harness(test_options("http://t/"));
    let mut page = Page::from_url("http://t/err");
    page.body = "Traceback (most recent call last):\n  File \"app.py\", line 3".to_string();

    BodyDisclosure.audit(page, h.ctx.clone()).await.expect("audit");

    let names = issue_names(&h.issues);
    assert!(names.contains(&"Python Traceback".to_string()), "got: {names:?}");
}

#[tokio::test]
async fn test_backup_paths_probes_and_reports_hits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.git/HEAD"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("ref: refs/heads/main"),
        )
        .mount(&server)
        .await;
    // Everything else 404s via wiremock's default.

    let h = harness(test_options(&server.uri()));
    let page = Page::from_url(format!("{}/index.php", server.uri()));

    BackupPaths::new().audit(page, h.ctx.clone()).await.expect("audit");

    let issues = h.issues.lock().expect("lock");
    assert_eq!(issues.len(), 1, "only the reachable artifact is reported");
    assert!(issues[0].name.contains(".git/HEAD"));
    assert_eq!(issues[0].kind, ElementKind::Path);
}

#[tokio::test]
async fn test_sqli_timing_defers_one_operation_per_input() {
    let h = harness(test_options("http://t/"));
    let mut page = Page::from_url("http://t/");
    page.links.push(Link::new("http://t/item?id=5"));
    page.forms.push(Form {
        action: "http://t/search".to_string(),
        method: "POST".to_string(),
        fields: vec![
            FormField {
                name: "q".to_string(),
                value: String::new(),
            },
            FormField {
                name: "sort".to_string(),
                value: "asc".to_string(),
            },
        ],
    });

    SqliTiming::new().audit(page, h.ctx.clone()).await.expect("audit");

    assert!(h.timing.has_timing_modules());
    assert!(h.timing.has_operations());
    assert!(
        h.issues.lock().expect("lock").is_empty(),
        "timing checks never report during the regular phase"
    );
}

#[tokio::test]
async fn test_sqli_timing_respects_audit_toggles() {
    let mut options = test_options("http://t/");
    options.audit_links = false;
    options.audit_forms = false;
    let h = harness(options);

    let mut page = Page::from_url("http://t/");
    page.links.push(Link::new("http://t/item?id=5"));

    SqliTiming::new().audit(page, h.ctx.clone()).await.expect("audit");
    assert!(!h.timing.has_operations());
}
