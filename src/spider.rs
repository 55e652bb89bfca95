//! Spider: BFS URL discovery with pause support
//!
//! Crawls from the target, same-host only, depth- and count-limited.
//! Fetches run serially through the HTTP engine so the per-response hook
//! observes responses in a stable order and pause takes effect between
//! fetches, never mid-request.

use crate::error::Result;
use crate::http::{HttpEngine, HttpResponse};
use crate::options::Options;
use crate::page::{extract_links, normalize_url};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use url::Url;

pub struct Spider {
    options: Options,
    http: Arc<HttpEngine>,
    sitemap: Mutex<Vec<String>>,
    visited: Mutex<HashSet<String>>,
    redirects: Mutex<Vec<String>>,
    paused: AtomicBool,
}

impl Spider {
    pub fn new(options: Options, http: Arc<HttpEngine>) -> Self {
        Self {
            options,
            http,
            sitemap: Mutex::new(Vec::new()),
            visited: Mutex::new(HashSet::new()),
            redirects: Mutex::new(Vec::new()),
            paused: AtomicBool::new(false),
        }
    }

    /// Crawls the target, invoking the hook for every fetched response
    pub async fn run<F>(&self, mut on_response: F) -> Result<()>
    where
        F: FnMut(&HttpResponse),
    {
        let base_url = Url::parse(&self.options.target)?;
        let start = self.options.target.clone();

        self.visited
            .lock()
            .expect("visited lock poisoned")
            .insert(normalize_url(&start));
        self.record(&start);

        let mut current_layer = vec![start];

        'crawl: for depth in 0..self.options.depth_limit {
            if current_layer.is_empty() {
                break;
            }

            let mut next_layer = Vec::new();

            for url in current_layer.drain(..) {
                self.wait_if_paused().await;

                if self.sitemap.lock().expect("sitemap lock poisoned").len()
                    >= self.options.link_count_limit
                {
                    info!(
                        "spider reached link count limit ({})",
                        self.options.link_count_limit
                    );
                    break 'crawl;
                }

                let response = match self.http.get(&url).await {
                    Ok(r) => r,
                    Err(e) => {
                        debug!("spider failed to fetch {url}: {e}");
                        continue;
                    }
                };

                if response.redirected() {
                    self.redirects
                        .lock()
                        .expect("redirects lock poisoned")
                        .push(url.clone());
                    self.record(&response.effective_url);
                }

                on_response(&response);

                if !is_html(&response) {
                    continue;
                }

                let page_url = match Url::parse(&response.effective_url) {
                    Ok(u) => u,
                    Err(_) => continue,
                };
                for link in extract_links(&page_url, &response.body) {
                    if Url::parse(&link.href)
                        .ok()
                        .and_then(|u| u.host_str().map(String::from))
                        != base_url.host_str().map(String::from)
                    {
                        continue;
                    }
                    let normalized = normalize_url(&link.href);
                    let mut visited = self.visited.lock().expect("visited lock poisoned");
                    if visited.insert(normalized) {
                        drop(visited);
                        self.record(&link.href);
                        next_layer.push(link.href);
                    }
                }
            }

            debug!("spider depth {} complete, {} new URLs", depth, next_layer.len());
            current_layer = next_layer;
        }

        info!(
            "spider finished: {} URLs discovered",
            self.sitemap.lock().expect("sitemap lock poisoned").len()
        );
        Ok(())
    }

    /// URLs discovered so far, in discovery order
    pub fn sitemap(&self) -> Vec<String> {
        self.sitemap.lock().expect("sitemap lock poisoned").clone()
    }

    /// URLs that answered with a redirect
    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().expect("redirects lock poisoned").clone()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn record(&self, url: &str) {
        let mut sitemap = self.sitemap.lock().expect("sitemap lock poisoned");
        if !sitemap.iter().any(|u| u == url) {
            sitemap.push(url.to_string());
        }
    }

    async fn wait_if_paused(&self) {
        while self.paused() {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

fn is_html(response: &HttpResponse) -> bool {
    response
        .header("content-type")
        .map(|ct| ct.contains("text/html") || ct.is_empty())
        .unwrap_or(true)
}
