//! End-to-end audit pipeline tests

mod common;

use async_trait::async_trait;
use common::{bare_engine, test_options};
use skopos::engine::{AuditEngine, State};
use skopos::error::Result;
use skopos::issue::{ElementKind, Issue, Severity};
use skopos::modules::{AuditContext, Module, ModuleInfo, ModuleRegistry};
use skopos::options::Options;
use skopos::page::Page;
use skopos::plugins::PluginManager;
use skopos::report::{AuditStore, Report, ReportInfo, ReportManager};
use skopos::timing::TimingOperation;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html_page(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html")
}

// ============================================================================
// Restricted crawl
// ============================================================================

#[tokio::test]
async fn test_restricted_crawl_audits_exactly_the_seed_list() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html_page("<html>a</html>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html_page("<html>b</html>"))
        .expect(1)
        .mount(&server)
        .await;
    // The spider must never run in restricted mode.
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_page("<html>root</html>"))
        .expect(0)
        .mount(&server)
        .await;

    let url_a = format!("{}/a", server.uri());
    let url_b = format!("{}/b", server.uri());

    let mut options = test_options(&server.uri());
    options.restrict_paths = vec![url_a.clone(), url_b.clone()];

    let engine = bare_engine(options, ModuleRegistry::new());
    engine.run(None).await.expect("run");

    assert_eq!(engine.sitemap(), vec![url_a.clone(), url_b.clone()]);
    assert_eq!(engine.auditmap(), vec![url_a, url_b]);
    assert_eq!(engine.stats(None, true).progress, 100.0);
    assert_eq!(engine.state(), State::Done);
    assert_eq!(engine.status(), "done");
}

// ============================================================================
// Applicability gate
// ============================================================================

struct FormOnlyModule {
    ran: Arc<AtomicBool>,
}

#[async_trait]
impl Module for FormOnlyModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "form_only",
            description: "test",
            authors: &["t"],
            elements: &[ElementKind::Form],
        }
    }

    async fn audit(&self, page: Page, ctx: AuditContext) -> Result<()> {
        self.ran.store(true, Ordering::SeqCst);
        ctx.report_issue(
            Issue::new("should not appear", "", ElementKind::Form, Severity::Low, &page.url)
                .with_module("form_only"),
        );
        Ok(())
    }
}

#[tokio::test]
async fn test_form_module_skipped_on_links_only_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/links"))
        .respond_with(html_page(r#"<html><a href="/other">x</a></html>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/other"))
        .respond_with(html_page("<html>other</html>"))
        .mount(&server)
        .await;

    let ran = Arc::new(AtomicBool::new(false));
    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(FormOnlyModule {
        ran: Arc::clone(&ran),
    }));

    let mut options = test_options(&server.uri());
    options.restrict_paths = vec![format!("{}/links", server.uri())];
    options.audit_forms = true;

    let engine = bare_engine(options, registry);
    engine.run(None).await.expect("run");

    assert!(
        !ran.load(Ordering::SeqCst),
        "module declaring FORM must not run against a formless page"
    );
    assert!(engine.audit_store(false).expect("store").issues.is_empty());
}

// ============================================================================
// Module fault isolation
// ============================================================================

struct PanickingModule;

#[async_trait]
impl Module for PanickingModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "panicking",
            description: "test",
            authors: &["t"],
            elements: &[],
        }
    }

    async fn audit(&self, _page: Page, _ctx: AuditContext) -> Result<()> {
        panic!("boom");
    }
}

struct FailingModule;

#[async_trait]
impl Module for FailingModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "failing",
            description: "test",
            authors: &["t"],
            elements: &[],
        }
    }

    async fn audit(&self, _page: Page, _ctx: AuditContext) -> Result<()> {
        Err(skopos::error::SkoposError::AuditError("induced".into()))
    }
}

struct OneIssueModule;

#[async_trait]
impl Module for OneIssueModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "one_issue",
            description: "test",
            authors: &["t"],
            elements: &[],
        }
    }

    async fn audit(&self, page: Page, ctx: AuditContext) -> Result<()> {
        ctx.report_issue(
            Issue::new(
                "Test Issue",
                "emitted by the well-behaved module",
                ElementKind::Body,
                Severity::Medium,
                &page.url,
            )
            .with_module("one_issue"),
        );
        Ok(())
    }
}

#[tokio::test]
async fn test_module_faults_do_not_stop_the_scan() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html_page("<html>p</html>"))
        .mount(&server)
        .await;

    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(PanickingModule));
    registry.register(Arc::new(FailingModule));
    registry.register(Arc::new(OneIssueModule));

    let mut options = test_options(&server.uri());
    options.restrict_paths = vec![format!("{}/page", server.uri())];

    let engine = bare_engine(options, registry);
    engine.run(None).await.expect("run");

    let store = engine.audit_store(false).expect("store");
    assert_eq!(
        store.issues.len(),
        1,
        "exactly the well-behaved module's issue survives: {:?}",
        store.issues.iter().map(|i| &i.name).collect::<Vec<_>>()
    );
    assert_eq!(store.issues[0].name, "Test Issue");
    assert_eq!(engine.state(), State::Done);
}

// ============================================================================
// Trainer injection
// ============================================================================

struct RedirectProbingModule {
    probe_url: String,
    probed: Arc<AtomicBool>,
}

#[async_trait]
impl Module for RedirectProbingModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "redirect_probe",
            description: "test",
            authors: &["t"],
            elements: &[],
        }
    }

    async fn audit(&self, _page: Page, ctx: AuditContext) -> Result<()> {
        if !self.probed.swap(true, Ordering::SeqCst) {
            let _ = ctx.http.get(&self.probe_url).await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_trainer_page_is_drained_and_audited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(html_page("<html>start</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jump"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/landing"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/landing"))
        .respond_with(html_page("<html>landing</html>"))
        .mount(&server)
        .await;

    let start = format!("{}/start", server.uri());
    let landing = format!("{}/landing", server.uri());

    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(RedirectProbingModule {
        probe_url: format!("{}/jump", server.uri()),
        probed: Arc::new(AtomicBool::new(false)),
    }));

    let mut options = test_options(&server.uri());
    options.restrict_paths = vec![start.clone()];

    let engine = bare_engine(options, registry);
    engine.run(None).await.expect("run");

    let auditmap = engine.auditmap();
    assert!(auditmap.contains(&start), "seed page audited: {auditmap:?}");
    assert!(
        auditmap.contains(&landing),
        "trainer-injected page audited: {auditmap:?}"
    );
}

// ============================================================================
// Timing phase
// ============================================================================

struct TimingTestModule {
    observed: Arc<Mutex<Vec<(u64, u64)>>>,
    ops_per_page: usize,
}

#[async_trait]
impl Module for TimingTestModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "timing_test",
            description: "test",
            authors: &["t"],
            elements: &[],
        }
    }

    async fn audit(&self, page: Page, ctx: AuditContext) -> Result<()> {
        for i in 0..self.ops_per_page {
            let observed = Arc::clone(&self.observed);
            ctx.schedule_timing(TimingOperation::new(
                "timing_test",
                ElementKind::Link,
                format!("{}?op={i}", page.url),
                "probe",
                move |ctx: AuditContext| async move {
                    observed.lock().expect("lock").push((
                        ctx.timing().total_operations(),
                        ctx.timing().remaining_operations(),
                    ));
                    Ok(())
                },
            ));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_timing_phase_operation_progress() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html_page("<html>a</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html_page("<html>b</html>"))
        .mount(&server)
        .await;

    let observed = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(TimingTestModule {
        observed: Arc::clone(&observed),
        ops_per_page: 2,
    }));

    let mut options = test_options(&server.uri());
    options.restrict_paths = vec![
        format!("{}/a", server.uri()),
        format!("{}/b", server.uri()),
    ];

    let engine = bare_engine(options, registry);
    engine.run(None).await.expect("run");

    // 2 pages x 2 ops: each op sees the snapshotted total and the count
    // still remaining at its dispatch.
    let observed = observed.lock().expect("lock").clone();
    assert_eq!(observed, vec![(4, 4), (4, 3), (4, 2), (4, 1)]);

    let stats = engine.stats(None, true);
    assert_eq!(
        stats.progress, 100.0,
        "2/2 pages and 4/4 timing operations complete"
    );
    assert_eq!(engine.state(), State::Done);
}

#[tokio::test]
async fn test_timing_current_url_follows_operation_actions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html_page("<html>a</html>"))
        .mount(&server)
        .await;

    let observed = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(TimingTestModule {
        observed,
        ops_per_page: 1,
    }));

    let mut options = test_options(&server.uri());
    options.restrict_paths = vec![format!("{}/a", server.uri())];

    let engine = bare_engine(options, registry);
    engine.run(None).await.expect("run");

    let stats = engine.stats(None, true);
    assert!(
        stats.current_url.contains("?op=0"),
        "current_url should reflect the last timing operation action, got '{}'",
        stats.current_url
    );
}

// ============================================================================
// Work injection while auditing
// ============================================================================

struct UrlPushingModule {
    extra_url: String,
    pushed: Arc<AtomicBool>,
}

#[async_trait]
impl Module for UrlPushingModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "url_pusher",
            description: "test",
            authors: &["t"],
            elements: &[],
        }
    }

    async fn audit(&self, _page: Page, ctx: AuditContext) -> Result<()> {
        if !self.pushed.swap(true, Ordering::SeqCst) {
            ctx.push_url(self.extra_url.clone());
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_module_pushed_urls_are_drained_to_quiescence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/seed"))
        .respond_with(html_page("<html>seed</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/injected"))
        .respond_with(html_page("<html>injected</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let injected = format!("{}/injected", server.uri());
    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(UrlPushingModule {
        extra_url: injected.clone(),
        pushed: Arc::new(AtomicBool::new(false)),
    }));

    let mut options = test_options(&server.uri());
    options.restrict_paths = vec![format!("{}/seed", server.uri())];

    let engine = bare_engine(options, registry);
    engine.run(None).await.expect("run");

    assert!(engine.auditmap().contains(&injected));
}

// ============================================================================
// Harvest-last batching
// ============================================================================

struct CountingModule {
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl Module for CountingModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "counting",
            description: "test",
            authors: &["t"],
            elements: &[],
        }
    }

    async fn audit(&self, _page: Page, _ctx: AuditContext) -> Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_harvest_last_audits_every_page() {
    let server = MockServer::start().await;
    for p in ["/x", "/y", "/z"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(html_page("<html>p</html>"))
            .expect(1)
            .mount(&server)
            .await;
    }

    let count = Arc::new(AtomicUsize::new(0));
    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(CountingModule {
        count: Arc::clone(&count),
    }));

    let mut options = test_options(&server.uri());
    options.http_harvest_last = true;
    options.restrict_paths = vec![
        format!("{}/x", server.uri()),
        format!("{}/y", server.uri()),
        format!("{}/z", server.uri()),
    ];

    let engine = bare_engine(options, registry);
    engine.run(None).await.expect("run");

    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(engine.stats(None, true).progress, 100.0);
}

// ============================================================================
// Report and hook fault isolation
// ============================================================================

struct PanickingReport;

impl Report for PanickingReport {
    fn info(&self) -> ReportInfo {
        ReportInfo {
            name: "panicking_report",
            description: "test",
            authors: &["t"],
        }
    }

    fn run(&self, _store: &AuditStore, _options: &Options) -> Result<()> {
        panic!("report boom");
    }
}

struct FlagReport {
    ran: Arc<AtomicBool>,
}

impl Report for FlagReport {
    fn info(&self) -> ReportInfo {
        ReportInfo {
            name: "flag_report",
            description: "test",
            authors: &["t"],
        }
    }

    fn run(&self, _store: &AuditStore, _options: &Options) -> Result<()> {
        self.ran.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_panicking_report_does_not_starve_later_reports() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html_page("<html>p</html>"))
        .mount(&server)
        .await;

    let ran = Arc::new(AtomicBool::new(false));
    let mut reports = ReportManager::new();
    reports.register(Arc::new(PanickingReport));
    reports.register(Arc::new(FlagReport {
        ran: Arc::clone(&ran),
    }));

    let mut options = test_options(&server.uri());
    options.restrict_paths = vec![format!("{}/page", server.uri())];

    let engine = AuditEngine::with_components(
        options,
        ModuleRegistry::new(),
        PluginManager::new(),
        reports,
    )
    .expect("engine");
    engine.run(None).await.expect("run");

    assert!(
        ran.load(Ordering::SeqCst),
        "a report after the panicking one must still run"
    );
    assert_eq!(engine.state(), State::Done);
}

#[tokio::test]
async fn test_panicking_hook_is_jailed_and_reports_still_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html_page("<html>p</html>"))
        .mount(&server)
        .await;

    let ran = Arc::new(AtomicBool::new(false));
    let mut reports = ReportManager::new();
    reports.register(Arc::new(FlagReport {
        ran: Arc::clone(&ran),
    }));

    let mut options = test_options(&server.uri());
    options.restrict_paths = vec![format!("{}/page", server.uri())];

    let engine = AuditEngine::with_components(
        options,
        ModuleRegistry::new(),
        PluginManager::new(),
        reports,
    )
    .expect("engine");
    engine
        .run(Some(Box::new(|_: &AuditEngine| -> Result<()> {
            panic!("hook boom");
        })))
        .await
        .expect("run");

    assert!(
        ran.load(Ordering::SeqCst),
        "reports must run even when the post-audit hook panics"
    );
}

// ============================================================================
// Failed fetches are surfaced, not silently dropped
// ============================================================================

#[tokio::test]
async fn test_unreachable_url_still_reaches_done() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(html_page("<html>ok</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut options = test_options(&server.uri());
    options.restrict_paths = vec![
        format!("{}/ok", server.uri()),
        format!("{}/broken", server.uri()),
    ];

    let engine = bare_engine(options, ModuleRegistry::new());
    engine.run(None).await.expect("run");

    // A 500 still parses into a page; both URLs are audited.
    assert_eq!(engine.auditmap().len(), 2);
    assert_eq!(engine.state(), State::Done);
}
