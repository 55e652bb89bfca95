//! Audit engine: composes the pipeline and owns the scan lifecycle
//!
//! One engine drives one scan: the spider (or a restricted path list)
//! feeds the URL queue, harvested responses become pages, pages meet
//! modules, modules may defer timing operations, and everything funnels
//! into the audit store at the end. All orchestration runs serially on
//! the caller's task; only HTTP requests and plugins are concurrent.

use crate::error::Result;
use crate::http::HttpEngine;
use crate::modules::{self, AuditContext, Listing, Module, ModuleRegistry};
use crate::options::Options;
use crate::page::{normalize_url, Page};
use crate::plugins::PluginManager;
use crate::progress::{self, ProgressInput};
use crate::queue::WorkQueue;
use crate::report::{AuditStore, ReportManager};
use crate::spider::Spider;
use crate::timing::TimingCoordinator;
use chrono::Local;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, error, info};
use url::Url;

/// Scan lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Ready,
    Crawling,
    Auditing,
    Cleanup,
    Done,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Ready => write!(f, "ready"),
            State::Crawling => write!(f, "crawling"),
            State::Auditing => write!(f, "auditing"),
            State::Cleanup => write!(f, "cleanup"),
            State::Done => write!(f, "done"),
        }
    }
}

/// Token handed back by `pause`; return it to `resume`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PauseToken(u64);

/// Flat snapshot of scan counters and progress
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub requests: u64,
    pub responses: u64,
    pub time_out_count: u64,
    /// Elapsed scan time in seconds
    pub time: f64,
    /// Average requests per second over the whole scan
    pub avg: f64,
    pub sitemap_size: usize,
    pub auditmap_size: usize,
    /// Progress percentage, 0.0–100.0
    pub progress: f64,
    /// Summed response time of the current burst, seconds
    pub curr_res_time: f64,
    /// Responses in the current burst
    pub curr_res_cnt: u64,
    pub curr_res_per_second: f64,
    pub average_res_time: f64,
    pub max_concurrency: usize,
    pub current_url: String,
    pub eta: String,
}

/// Hook invoked between cleanup and report generation
pub type AfterAuditHook = Box<dyn FnOnce(&AuditEngine) -> Result<()> + Send>;

/// The audit orchestrator
pub struct AuditEngine {
    options: RwLock<Options>,
    state: RwLock<State>,
    running: AtomicBool,
    pause_tokens: Mutex<HashSet<u64>>,
    next_pause_token: AtomicU64,
    url_queue: Arc<WorkQueue<String>>,
    page_queue: Arc<WorkQueue<Page>>,
    sitemap: Mutex<Vec<String>>,
    auditmap: Mutex<Vec<String>>,
    http: Arc<HttpEngine>,
    registry: ModuleRegistry,
    timing: Arc<TimingCoordinator>,
    plugins: PluginManager,
    reports: ReportManager,
    spider: Arc<Spider>,
    ctx: AuditContext,
    store: Mutex<Option<AuditStore>>,
    current_url: Arc<Mutex<String>>,
    started_at: Mutex<Option<Instant>>,
    avg_cache: Mutex<Option<(Instant, f64)>>,
}

impl AuditEngine {
    /// Engine with the default module, plugin, and report sets
    pub fn new(options: Options) -> Result<Self> {
        Self::with_components(
            options,
            ModuleRegistry::with_defaults(),
            PluginManager::with_defaults(),
            ReportManager::with_defaults(),
        )
    }

    /// Engine with caller-supplied components.
    ///
    /// Construction normalizes the options (cookie string and jar merging,
    /// user-agent suffix); a configured-but-missing cookie jar fails here.
    pub fn with_components(
        mut options: Options,
        registry: ModuleRegistry,
        plugins: PluginManager,
        reports: ReportManager,
    ) -> Result<Self> {
        options.normalize()?;

        let http = Arc::new(HttpEngine::new(&options)?);
        let timing = Arc::new(TimingCoordinator::new());
        let url_queue = Arc::new(WorkQueue::new());
        let page_queue = Arc::new(WorkQueue::new());

        let ctx = AuditContext::new(
            Arc::clone(&http),
            Arc::new(options.clone()),
            registry.issues_handle(),
            Arc::clone(&timing),
            Arc::clone(&url_queue),
            Arc::clone(&page_queue),
        );

        let spider = Arc::new(Spider::new(options.clone(), Arc::clone(&http)));

        Ok(Self {
            options: RwLock::new(options),
            state: RwLock::new(State::Ready),
            running: AtomicBool::new(false),
            pause_tokens: Mutex::new(HashSet::new()),
            next_pause_token: AtomicU64::new(1),
            url_queue,
            page_queue,
            sitemap: Mutex::new(Vec::new()),
            auditmap: Mutex::new(Vec::new()),
            http,
            registry,
            timing,
            plugins,
            reports,
            spider,
            ctx,
            store: Mutex::new(None),
            current_url: Arc::new(Mutex::new(String::new())),
            started_at: Mutex::new(None),
            avg_cache: Mutex::new(None),
        })
    }

    pub fn version(&self) -> &'static str {
        crate::VERSION
    }

    pub fn revision(&self) -> &'static str {
        crate::REVISION
    }

    /// Marks the scan as running, records the start time, starts plugins
    pub fn prepare(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.options.write().expect("options lock poisoned").start_datetime =
            Some(Local::now());
        *self.started_at.lock().expect("start lock poisoned") = Some(Instant::now());
        self.plugins.run(self.ctx.clone());
        info!("scan prepared, plugins started");
    }

    /// Full scan: prepare, audit, cleanup, hook, cookie normalization,
    /// reports. Audit and hook faults are contained so reports always run.
    pub async fn run(&self, hook: Option<AfterAuditHook>) -> Result<()> {
        self.prepare();

        if let Err(e) = self.audit().await {
            error!("audit aborted: {e}");
        }

        self.clean_up(false).await;

        if let Some(hook) = hook {
            // Same containment as modules: a hook that panics must not
            // take the report phase down with it.
            let jailed =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(self)));
            match jailed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("post-audit hook failed: {e}"),
                Err(_) => error!("post-audit hook panicked"),
            }
        }

        self.options
            .write()
            .expect("options lock poisoned")
            .normalize_cookies_for_report();

        let store = self.audit_store(false)?;
        let options = self.options.read().expect("options lock poisoned").clone();
        self.reports.run(&store, &options).await;

        Ok(())
    }

    /// The audit phase: seed the URL queue (spider or restricted paths),
    /// drain both queues, then run the timing phase and drain again.
    pub async fn audit(&self) -> Result<()> {
        self.wait_if_paused().await;
        *self.state.write().expect("state lock poisoned") = State::Crawling;

        let options = self.options.read().expect("options lock poisoned").clone();

        if !options.restrict_paths.is_empty() {
            // The restriction list is the whole sitemap; the spider never runs.
            let base = Url::parse(&options.target)?;
            for raw in &options.restrict_paths {
                match absolutize(&base, raw) {
                    Some(url) => {
                        self.add_to_sitemap(&url);
                        self.push_url(url);
                    }
                    None => debug!("dropping unusable restrict path '{raw}'"),
                }
            }
        } else {
            info!("spidering {}", options.target);
            let spider = Arc::clone(&self.spider);
            let spider_map = Arc::clone(&self.spider);
            spider
                .run(move |response| {
                    for url in spider_map.sitemap() {
                        self.add_to_sitemap(&url);
                    }
                    self.push_url(response.effective_url.clone());
                })
                .await?;
        }

        *self.state.write().expect("state lock poisoned") = State::Auditing;
        info!("auditing...");
        self.audit_queue().await;

        if self.timing.has_operations() {
            info!("starting timing-attack phase");
            let current_url = Arc::clone(&self.current_url);
            self.timing.on_operation(move |op| {
                if !op.action.is_empty() {
                    *current_url.lock().expect("current url lock poisoned") = op.action.clone();
                }
            });
            self.timing.run(&self.ctx).await;
            // Timing probes may have produced pages via the trainer.
            self.flush_trainer_pages();
            self.audit_queue().await;
        }

        Ok(())
    }

    /// Drains both work queues to quiescence
    pub async fn audit_queue(&self) {
        let harvest_last = self
            .options
            .read()
            .expect("options lock poisoned")
            .http_harvest_last;

        loop {
            while let Some(url) = self.url_queue.pop() {
                self.wait_if_paused().await;
                self.http.queue_get(&url, true);
                if !harvest_last {
                    self.harvest_and_handle().await;
                    self.audit_page_queue().await;
                }
            }

            if harvest_last {
                self.harvest_and_handle().await;
            }

            self.audit_page_queue().await;

            if harvest_last {
                // Idempotent when nothing is outstanding.
                self.harvest_and_handle().await;
            }

            if self.url_queue.is_empty()
                && self.page_queue.is_empty()
                && !self.http.has_pending()
            {
                break;
            }
        }
    }

    /// Drains the page queue only; URLs stay where they are
    pub async fn audit_page_queue(&self) {
        let harvest_last = self
            .options
            .read()
            .expect("options lock poisoned")
            .http_harvest_last;

        while let Some(page) = self.page_queue.pop() {
            self.wait_if_paused().await;
            if self.audited(&page.url) {
                debug!("skipping {}, already audited", page.url);
                continue;
            }
            self.grow_sitemap(&page.url);
            self.run_modules(page).await;
            if !harvest_last {
                self.harvest_and_handle().await;
            }
        }
    }

    /// Enqueues a URL for fetching (redundancy rules apply)
    pub fn push_url(&self, url: impl Into<String>) {
        self.ctx.push_url(url);
    }

    /// Enqueues a parsed page for auditing
    pub fn push_page(&self, page: Page) {
        self.ctx.push_page(page);
    }

    /// Pauses the scan on behalf of one caller; best-effort, polled at
    /// safe points. Returns the token to hand back to `resume`.
    pub fn pause(&self) -> PauseToken {
        let token = self.next_pause_token.fetch_add(1, Ordering::Relaxed);
        self.pause_tokens
            .lock()
            .expect("pause lock poisoned")
            .insert(token);
        self.spider.pause();
        info!("scan paused (token {token})");
        PauseToken(token)
    }

    /// Releases one caller's pause hold; the scan resumes once the last
    /// hold is gone
    pub fn resume(&self, token: PauseToken) {
        let mut tokens = self.pause_tokens.lock().expect("pause lock poisoned");
        tokens.remove(&token.0);
        if tokens.is_empty() {
            self.spider.resume();
            info!("scan resumed");
        }
    }

    pub fn paused(&self) -> bool {
        !self
            .pause_tokens
            .lock()
            .expect("pause lock poisoned")
            .is_empty()
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stable status string; the pause flag overlays any state
    pub fn status(&self) -> String {
        if self.paused() {
            return "paused".to_string();
        }
        self.state.read().expect("state lock poisoned").to_string()
    }

    pub fn state(&self) -> State {
        *self.state.read().expect("state lock poisoned")
    }

    /// Counter snapshot with progress and ETA.
    ///
    /// The request-rate average is recomputed at most once per
    /// `refresh_time` seconds (default 5) unless `override_refresh` forces
    /// it; everything else is always fresh.
    pub fn stats(&self, refresh_time: Option<u64>, override_refresh: bool) -> Stats {
        let elapsed = self
            .started_at
            .lock()
            .expect("start lock poisoned")
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let requests = self.http.request_count();
        let refresh_secs = refresh_time.unwrap_or(5);
        let avg = {
            let mut cache = self.avg_cache.lock().expect("avg lock poisoned");
            match *cache {
                Some((at, value))
                    if !override_refresh && at.elapsed().as_secs() < refresh_secs =>
                {
                    value
                }
                _ => {
                    let value = if elapsed > 0.0 {
                        requests as f64 / elapsed
                    } else {
                        0.0
                    };
                    *cache = Some((Instant::now(), value));
                    value
                }
            }
        };

        let progress = self.progress();

        Stats {
            requests,
            responses: self.http.response_count(),
            time_out_count: self.http.time_out_count(),
            time: elapsed,
            avg,
            sitemap_size: self.sitemap.lock().expect("sitemap lock poisoned").len(),
            auditmap_size: self.auditmap.lock().expect("auditmap lock poisoned").len(),
            progress,
            curr_res_time: self.http.curr_res_time(),
            curr_res_cnt: self.http.curr_res_cnt(),
            curr_res_per_second: self.http.curr_res_per_second(),
            average_res_time: self.http.average_res_time(),
            max_concurrency: self.http.max_concurrency(),
            current_url: self
                .current_url
                .lock()
                .expect("current url lock poisoned")
                .clone(),
            eta: progress::eta(progress, elapsed),
        }
    }

    fn progress(&self) -> f64 {
        let spider_started = self
            .options
            .read()
            .expect("options lock poisoned")
            .restrict_paths
            .is_empty();
        let redirects = if spider_started {
            self.spider.redirects().len() as u64
        } else {
            0
        };
        progress::progress(&ProgressInput {
            audited: self.auditmap.lock().expect("auditmap lock poisoned").len() as u64,
            queue_totals: self.url_queue.total_size() + self.page_queue.total_size(),
            redirects,
            timing_modules: self.timing.has_timing_modules(),
            timing_total: self.timing.total_operations(),
            timing_remaining: self.timing.remaining_operations(),
        })
    }

    /// The audit store; `fresh` rebuilds, otherwise a previously built
    /// store is returned unchanged
    pub fn audit_store(&self, fresh: bool) -> Result<AuditStore> {
        let mut cache = self.store.lock().expect("store lock poisoned");
        if !fresh {
            if let Some(store) = cache.as_ref() {
                return Ok(store.clone());
            }
        }
        let options = self.options.read().expect("options lock poisoned").clone();
        let store = AuditStore::new(
            &options,
            self.sitemap.lock().expect("sitemap lock poisoned").clone(),
            self.registry.issues(),
            self.plugins.results(),
        );
        *cache = Some(store.clone());
        Ok(store)
    }

    /// Cleanup: record times, stop accepting work, block on plugins,
    /// absorb anything they enqueued, refresh the store
    pub async fn clean_up(&self, skip_audit_queue: bool) {
        *self.state.write().expect("state lock poisoned") = State::Cleanup;

        {
            let mut options = self.options.write().expect("options lock poisoned");
            let finish = Local::now();
            if let Some(start) = options.start_datetime {
                options.delta_time =
                    Some((finish - start).num_milliseconds() as f64 / 1000.0);
            }
            options.finish_datetime = Some(finish);
            // Reports render everything from here on.
            options.only_positives = false;
        }

        self.running.store(false, Ordering::SeqCst);

        // Plugins may still be pushing pages; wait for them before the
        // final drain.
        self.plugins.block().await;

        if !skip_audit_queue {
            self.audit_queue().await;
        }

        if let Err(e) = self.audit_store(true) {
            error!("failed to refresh audit store: {e}");
        }

        *self.state.write().expect("state lock poisoned") = State::Done;
        info!("scan finished");
    }

    /// URLs discovered, in discovery order
    pub fn sitemap(&self) -> Vec<String> {
        self.sitemap.lock().expect("sitemap lock poisoned").clone()
    }

    /// URLs whose page has been fully audited
    pub fn auditmap(&self) -> Vec<String> {
        self.auditmap.lock().expect("auditmap lock poisoned").clone()
    }

    /// Module listing filtered by the given patterns (conjunctive).
    /// One-shot: the registry is drained as a side effect.
    pub fn lsmod(&self, patterns: &[String]) -> Result<Vec<Listing>> {
        self.registry.list(patterns)
    }

    /// Report listing filtered by the given patterns (conjunctive).
    /// One-shot: the manager is drained as a side effect.
    pub fn lsrep(&self, patterns: &[String]) -> Result<Vec<Listing>> {
        self.reports.list(patterns)
    }

    /// Plugin listing filtered by the given patterns (conjunctive).
    /// One-shot: the manager is drained as a side effect.
    pub fn lsplug(&self, patterns: &[String]) -> Result<Vec<Listing>> {
        self.plugins.list(patterns)
    }

    async fn harvest_and_handle(&self) {
        for (request, result) in self.http.harvest().await {
            match result {
                Ok(response) => {
                    let options = self.options.read().expect("options lock poisoned").clone();
                    let page = Page::from_http_response(&response, &options);
                    self.grow_sitemap(&page.url);
                    self.run_modules(page).await;
                }
                Err(e) => error!("request to {} failed: {e}", request.url),
            }
        }
    }

    /// Runs every applicable module against the page, then records it as
    /// audited and flushes trainer pages into the page queue
    async fn run_modules(&self, page: Page) {
        *self
            .current_url
            .lock()
            .expect("current url lock poisoned") = page.url.clone();
        self.http.trainer().mark_seen(&page.url);

        let options = Arc::clone(&self.ctx.options);
        let module_list: Vec<Arc<dyn Module>> = self.registry.modules();
        for module in module_list {
            self.wait_if_paused().await;
            if ModuleRegistry::applicable(&module.info(), &page, &options) {
                modules::run_one(module, page.clone(), self.ctx.clone()).await;
            }
        }

        self.add_to_auditmap(&page.url);
        self.flush_trainer_pages();
    }

    fn flush_trainer_pages(&self) {
        for page in self.http.trainer().flush_pages() {
            debug!("absorbing trainer page {}", page.url);
            self.push_page(page);
        }
    }

    fn add_to_sitemap(&self, url: &str) {
        let mut sitemap = self.sitemap.lock().expect("sitemap lock poisoned");
        if !sitemap.iter().any(|u| u == url) {
            sitemap.push(url.to_string());
        }
    }

    /// Sitemap growth for audited pages; restricted scans keep the sitemap
    /// fixed to the restriction list
    fn grow_sitemap(&self, url: &str) {
        if self
            .options
            .read()
            .expect("options lock poisoned")
            .restrict_paths
            .is_empty()
        {
            self.add_to_sitemap(url);
        }
    }

    fn add_to_auditmap(&self, url: &str) {
        let mut auditmap = self.auditmap.lock().expect("auditmap lock poisoned");
        if !auditmap.iter().any(|u| u == url) {
            auditmap.push(url.to_string());
        }
    }

    fn audited(&self, url: &str) -> bool {
        self.auditmap
            .lock()
            .expect("auditmap lock poisoned")
            .iter()
            .any(|u| u == url)
    }

    async fn wait_if_paused(&self) {
        while self.paused() {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

/// Absolutizes and sanitizes a seed path against the target
fn absolutize(base: &Url, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Url::parse(trimmed).ok()?
    } else {
        base.join(trimmed).ok()?
    };
    Some(normalize_url(url.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize_seeds() {
        let base = Url::parse("http://t/app/").unwrap();
        assert_eq!(
            absolutize(&base, "admin").as_deref(),
            Some("http://t/app/admin")
        );
        assert_eq!(
            absolutize(&base, " http://t/x ").as_deref(),
            Some("http://t/x")
        );
        assert_eq!(absolutize(&base, ""), None);
    }

    #[tokio::test]
    async fn test_pause_tokens_multi_source() {
        let engine = AuditEngine::new(Options::new("http://t/")).expect("engine");
        assert!(!engine.paused());

        let a = engine.pause();
        let b = engine.pause();
        assert!(engine.paused());

        engine.resume(a);
        assert!(engine.paused(), "one hold left, still paused");

        engine.resume(b);
        assert!(!engine.paused());
        assert_eq!(engine.status(), "ready");
    }

    #[tokio::test]
    async fn test_status_reports_paused_overlay() {
        let engine = AuditEngine::new(Options::new("http://t/")).expect("engine");
        let token = engine.pause();
        assert_eq!(engine.status(), "paused");
        engine.resume(token);
        assert_eq!(engine.status(), "ready");
    }

    #[tokio::test]
    async fn test_audit_queue_noop_when_empty() {
        let engine = AuditEngine::new(Options::new("http://t/")).expect("engine");
        engine.audit_queue().await;
        assert_eq!(engine.stats(None, true).requests, 0);
        assert!(engine.auditmap().is_empty());
    }

    #[tokio::test]
    async fn test_audit_store_cache_semantics() {
        let engine = AuditEngine::new(Options::new("http://t/")).expect("engine");
        let first = engine.audit_store(false).expect("store");
        engine.push_url("http://t/extra");
        let cached = engine.audit_store(false).expect("store");
        assert_eq!(first.sitemap, cached.sitemap, "non-fresh returns the cached store");

        engine.push_url("http://t/extra2");
        let rebuilt = engine.audit_store(true).expect("store");
        assert_eq!(rebuilt.version, crate::VERSION);
    }
}
