//! Response trainer
//!
//! Watches every response the engine sees and synthesizes pages the scan
//! would otherwise miss: redirect targets and HTML served from URLs that
//! looked like static assets. Synthesized pages sit here until the
//! orchestrator flushes them into the page queue.

use crate::http::engine::HttpResponse;
use crate::options::Options;
use crate::page::{normalize_url, Page};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

const ASSET_EXTENSIONS: &[&str] = &[
    ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2",
];

pub struct Trainer {
    options: Options,
    pages: Mutex<Vec<Page>>,
    seen: Mutex<HashSet<String>>,
}

impl Trainer {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            pages: Mutex::new(Vec::new()),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Marks a URL as already covered so no page is synthesized for it
    pub fn mark_seen(&self, url: &str) {
        self.seen
            .lock()
            .expect("seen lock poisoned")
            .insert(normalize_url(url));
    }

    /// Inspects a response and stashes a synthesized page when it reveals
    /// a URL the scan has not covered
    pub fn observe(&self, response: &HttpResponse) {
        let interesting = response.redirected() || asset_serving_html(response);
        if !interesting {
            return;
        }

        let key = normalize_url(&response.effective_url);
        {
            let mut seen = self.seen.lock().expect("seen lock poisoned");
            if !seen.insert(key) {
                return;
            }
        }

        debug!(
            "trainer learned page at {} (from {})",
            response.effective_url, response.request_url
        );
        let page = Page::from_http_response(response, &self.options);
        self.pages.lock().expect("pages lock poisoned").push(page);
    }

    /// Returns and clears the synthesized pages, in observation order
    pub fn flush_pages(&self) -> Vec<Page> {
        std::mem::take(&mut *self.pages.lock().expect("pages lock poisoned"))
    }

    pub fn has_pages(&self) -> bool {
        !self.pages.lock().expect("pages lock poisoned").is_empty()
    }
}

/// HTML coming back from an asset-looking URL is a content-type surprise
fn asset_serving_html(response: &HttpResponse) -> bool {
    let path = response.request_url.split('?').next().unwrap_or("");
    let lower = path.to_lowercase();
    let looks_static = ASSET_EXTENSIONS.iter().any(|ext| lower.ends_with(ext));
    looks_static
        && response
            .header("content-type")
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false)
}
