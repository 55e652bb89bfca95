//! Audit module trait, registry, and dispatch

pub mod backup_paths;
pub mod body_disclosure;
pub mod cookie_flags;
pub mod form_csrf;
pub mod insecure_links;
pub mod security_headers;
pub mod sqli_timing;

use crate::error::Result;
use crate::http::HttpEngine;
use crate::issue::{ElementKind, Issue};
use crate::options::{Options, RedundancyRule};
use crate::page::Page;
use crate::queue::WorkQueue;
use crate::timing::{TimingCoordinator, TimingOperation};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Static description of an audit module
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub authors: &'static [&'static str],
    /// Element classes this module audits; empty means it always runs
    pub elements: &'static [ElementKind],
}

/// Trait that all audit modules implement
#[async_trait]
pub trait Module: Send + Sync {
    fn info(&self) -> ModuleInfo;

    /// Audits one page. The page is the module's own deep copy; shared
    /// state is reached through the context.
    async fn audit(&self, page: Page, ctx: AuditContext) -> Result<()>;
}

/// Shared handles a module (or plugin, or timing operation) works through.
///
/// Cheap to clone; everything inside is reference counted.
#[derive(Clone)]
pub struct AuditContext {
    pub http: Arc<HttpEngine>,
    pub options: Arc<Options>,
    issues: Arc<Mutex<Vec<Issue>>>,
    timing: Arc<TimingCoordinator>,
    url_queue: Arc<WorkQueue<String>>,
    page_queue: Arc<WorkQueue<Page>>,
    redundant: Arc<Mutex<Vec<RedundancyRule>>>,
}

impl AuditContext {
    pub fn new(
        http: Arc<HttpEngine>,
        options: Arc<Options>,
        issues: Arc<Mutex<Vec<Issue>>>,
        timing: Arc<TimingCoordinator>,
        url_queue: Arc<WorkQueue<String>>,
        page_queue: Arc<WorkQueue<Page>>,
    ) -> Self {
        let redundant = Arc::new(Mutex::new(options.redundant.clone()));
        Self {
            http,
            options,
            issues,
            timing,
            url_queue,
            page_queue,
            redundant,
        }
    }

    /// Records an issue in the shared results store
    pub fn report_issue(&self, issue: Issue) {
        info!("[{}] {} at {}", issue.severity, issue.name, issue.url);
        self.issues.lock().expect("issues lock poisoned").push(issue);
    }

    /// Enqueues a URL for fetching, honoring the redundancy budget
    pub fn push_url(&self, url: impl Into<String>) {
        let url = url.into();
        {
            let mut rules = self.redundant.lock().expect("redundancy lock poisoned");
            for rule in rules.iter_mut() {
                if rule.matches(&url) {
                    if rule.counter == 0 {
                        debug!("redundancy budget exhausted, skipping {url}");
                        return;
                    }
                    rule.counter -= 1;
                }
            }
        }
        self.url_queue.push(url);
    }

    /// Enqueues a parsed page for auditing
    pub fn push_page(&self, page: Page) {
        self.page_queue.push(page);
    }

    /// Defers a timing operation to the timing-attack phase
    pub fn schedule_timing(&self, op: TimingOperation) {
        self.timing.schedule(op);
    }

    pub fn timing(&self) -> &TimingCoordinator {
        &self.timing
    }
}

/// Normalized listing entry for a registry item
#[derive(Debug, Clone, serde::Serialize)]
pub struct Listing {
    pub name: String,
    pub description: String,
    /// Always a flat list of trimmed strings
    pub author: Vec<String>,
    pub path: String,
}

/// Filters names through every supplied pattern (conjunctive): an item is
/// kept only if it matches all of them.
pub(crate) fn matches_all(name: &str, patterns: &[String]) -> Result<bool> {
    for pattern in patterns {
        let re = Regex::new(pattern)?;
        if !re.is_match(name) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Registry of audit modules
pub struct ModuleRegistry {
    modules: Mutex<Vec<Arc<dyn Module>>>,
    issues: Arc<Mutex<Vec<Issue>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Mutex::new(Vec::new()),
            issues: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registry with the default module set
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(cookie_flags::CookieFlags));
        registry.register(Arc::new(security_headers::SecurityHeaders));
        registry.register(Arc::new(form_csrf::FormCsrf));
        registry.register(Arc::new(insecure_links::InsecureLinks));
        registry.register(Arc::new(body_disclosure::BodyDisclosure));
        registry.register(Arc::new(backup_paths::BackupPaths::new()));
        registry.register(Arc::new(sqli_timing::SqliTiming::new()));
        registry
    }

    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules
            .lock()
            .expect("modules lock poisoned")
            .push(module);
    }

    /// Ids of all registered modules, in registration order
    pub fn available(&self) -> Vec<String> {
        self.modules
            .lock()
            .expect("modules lock poisoned")
            .iter()
            .map(|m| m.info().name.to_string())
            .collect()
    }

    /// Snapshot of the registered modules, in registration order
    pub fn modules(&self) -> Vec<Arc<dyn Module>> {
        self.modules.lock().expect("modules lock poisoned").clone()
    }

    /// Registration path for a module id
    pub fn name_to_path(&self, name: &str) -> Result<String> {
        let known = self
            .modules
            .lock()
            .expect("modules lock poisoned")
            .iter()
            .any(|m| m.info().name == name);
        if known {
            Ok(format!("modules/{name}"))
        } else {
            Err(crate::error::SkoposError::ModuleNotFound(name.to_string()))
        }
    }

    /// Decides whether a module runs against a page.
    ///
    /// A module with an empty element list always runs. Otherwise it runs
    /// if any declared class is present on the page and enabled in the
    /// options; BODY, PATH, and SERVER classes are always considered
    /// present.
    pub fn applicable(info: &ModuleInfo, page: &Page, options: &Options) -> bool {
        if info.elements.is_empty() {
            return true;
        }
        info.elements.iter().any(|kind| match kind {
            ElementKind::Link => !page.links.is_empty() && options.audit_links,
            ElementKind::Form => !page.forms.is_empty() && options.audit_forms,
            ElementKind::Cookie => !page.cookies.is_empty() && options.audit_cookies,
            ElementKind::Header => !page.headers.is_empty() && options.audit_headers,
            ElementKind::Body | ElementKind::Path | ElementKind::Server => true,
        })
    }

    /// Snapshot of accumulated issues (deep clone)
    pub fn issues(&self) -> Vec<Issue> {
        self.issues.lock().expect("issues lock poisoned").clone()
    }

    /// Shared handle to the issue store for context construction
    pub fn issues_handle(&self) -> Arc<Mutex<Vec<Issue>>> {
        Arc::clone(&self.issues)
    }

    /// Normalized listing filtered through all supplied patterns.
    ///
    /// Listing is one-shot: it drains the registry so a subsequent scan
    /// in the same process does not double-instantiate the modules.
    pub fn list(&self, patterns: &[String]) -> Result<Vec<Listing>> {
        // Reject bad patterns before the drain empties the registry.
        for pattern in patterns {
            Regex::new(pattern)?;
        }
        let drained: Vec<Arc<dyn Module>> = {
            let mut modules = self.modules.lock().expect("modules lock poisoned");
            std::mem::take(&mut *modules)
        };
        let mut out = Vec::new();
        for module in drained {
            let info = module.info();
            if !matches_all(info.name, patterns)? {
                continue;
            }
            out.push(Listing {
                name: info.name.to_string(),
                description: info.description.to_string(),
                author: info.authors.iter().map(|a| a.trim().to_string()).collect(),
                path: format!("modules/{}", info.name),
            });
        }
        Ok(out)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Runs one module against one page under fault isolation.
///
/// The module runs on its own task so both `Err` returns and panics are
/// contained; scanning continues with the next module either way. The page
/// is the module's private deep copy.
pub async fn run_one(module: Arc<dyn Module>, page: Page, ctx: AuditContext) {
    let name = module.info().name;
    debug!("running module '{}' against {}", name, page.url);

    let handle = tokio::spawn(async move { module.audit(page, ctx).await });
    match handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("module '{name}' failed: {e}"),
        Err(e) if e.is_panic() => error!("module '{name}' panicked: {e}"),
        Err(e) => error!("module '{name}' aborted: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{Cookie, Form, Header, Link};

    fn page_with(links: usize, forms: usize, cookies: usize, headers: usize) -> Page {
        let mut page = Page::from_url("http://t/");
        for i in 0..links {
            page.links.push(Link::new(format!("http://t/l{i}")));
        }
        for i in 0..forms {
            page.forms.push(Form {
                action: format!("http://t/f{i}"),
                method: "POST".to_string(),
                fields: Vec::new(),
            });
        }
        for i in 0..cookies {
            page.cookies.push(Cookie::new(format!("c{i}"), "v"));
        }
        for i in 0..headers {
            page.headers.push(Header::new(format!("h{i}"), "v"));
        }
        page
    }

    fn info_for(elements: &'static [ElementKind]) -> ModuleInfo {
        ModuleInfo {
            name: "probe",
            description: "test",
            authors: &["t"],
            elements,
        }
    }

    #[test]
    fn test_applicability_table() {
        let options = Options::new("http://t/");
        let page = page_with(1, 0, 0, 0);

        assert!(ModuleRegistry::applicable(
            &info_for(&[ElementKind::Link]),
            &page,
            &options
        ));
        assert!(
            !ModuleRegistry::applicable(&info_for(&[ElementKind::Form]), &page, &options),
            "form module must not run on a formless page"
        );
        assert!(ModuleRegistry::applicable(
            &info_for(&[ElementKind::Body]),
            &page,
            &options
        ));
        assert!(ModuleRegistry::applicable(
            &info_for(&[ElementKind::Path]),
            &page,
            &options
        ));
        assert!(ModuleRegistry::applicable(
            &info_for(&[ElementKind::Server]),
            &page,
            &options
        ));
    }

    #[test]
    fn test_disabled_class_blocks_module_even_with_elements() {
        let mut options = Options::new("http://t/");
        options.audit_links = false;
        let page = page_with(3, 0, 0, 0);
        assert!(
            !ModuleRegistry::applicable(&info_for(&[ElementKind::Link]), &page, &options),
            "audit_links=false must gate a links-only module even when links exist"
        );
    }

    #[test]
    fn test_empty_elements_always_runs() {
        let options = Options::new("http://t/");
        let page = page_with(0, 0, 0, 0);
        assert!(ModuleRegistry::applicable(&info_for(&[]), &page, &options));
    }

    #[test]
    fn test_listing_conjunctive_patterns() {
        let registry = ModuleRegistry::with_defaults();
        let count = registry.available().len();
        let all = registry.list(&[]).expect("list");
        assert_eq!(all.len(), count);

        let filtered = ModuleRegistry::with_defaults()
            .list(&["cookie".to_string(), "flags".to_string()])
            .expect("list");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "cookie_flags");

        let none = ModuleRegistry::with_defaults()
            .list(&["cookie".to_string(), "headers".to_string()])
            .expect("list");
        assert!(none.is_empty(), "patterns are conjunctive");
    }

    #[test]
    fn test_listing_clears_registry() {
        let registry = ModuleRegistry::with_defaults();
        assert!(!registry.available().is_empty());
        registry.list(&[]).expect("list");
        assert!(
            registry.available().is_empty(),
            "listing drains the registry so a later scan cannot double-instantiate"
        );
    }

    #[test]
    fn test_listing_bad_pattern_keeps_registry() {
        let registry = ModuleRegistry::with_defaults();
        let count = registry.available().len();
        assert!(registry.list(&["(unclosed".to_string()]).is_err());
        assert_eq!(
            registry.available().len(),
            count,
            "a rejected pattern must not drain anything"
        );
    }

    #[test]
    fn test_name_to_path() {
        let registry = ModuleRegistry::with_defaults();
        assert_eq!(
            registry.name_to_path("form_csrf").expect("path"),
            "modules/form_csrf"
        );
        assert!(registry.name_to_path("nope").is_err());
    }
}
