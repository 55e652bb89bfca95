//! Batched HTTP engine with request harvesting and scan counters
//!
//! Requests queue up cheaply; `harvest` fires the whole batch concurrently
//! under the configured cap and hands completed `(request, response)` pairs
//! back to the caller in completion order. All page handling stays on the
//! caller's task.

use crate::error::{Result, SkoposError};
use crate::http::trainer::Trainer;
use crate::options::Options;
use crate::page::Header;
use reqwest::{Client, Method};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Query parameter used internally to tag scan requests; stripped before
/// the request goes on the wire when `remove_id` is set.
pub const TRACKING_PARAM: &str = "__skopos_id";

/// A request waiting for the next harvest
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub id: u64,
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    /// Strip the scan-internal tracking parameter before sending
    pub remove_id: bool,
    /// Let the trainer learn from the response
    pub train: bool,
}

/// A completed HTTP response, decoupled from the underlying client
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// URL as requested
    pub request_url: String,
    /// URL after redirects
    pub effective_url: String,
    pub code: u16,
    pub headers: Vec<Header>,
    pub body: String,
    /// Response time in seconds
    pub time: f64,
}

impl HttpResponse {
    /// A header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// True when the requested URL and the served URL differ
    pub fn redirected(&self) -> bool {
        crate::page::normalize_url(&self.request_url)
            != crate::page::normalize_url(&self.effective_url)
    }
}

/// HTTP engine: bounded-concurrency request scheduler with scan counters
pub struct HttpEngine {
    client: Client,
    pending: Mutex<Vec<QueuedRequest>>,
    next_id: AtomicU64,
    trainer: Trainer,
    concurrency: usize,
    request_count: AtomicU64,
    response_count: AtomicU64,
    time_out_count: AtomicU64,
    total_res_time: Mutex<f64>,
    burst_res_time: Mutex<f64>,
    burst_res_cnt: AtomicU64,
    burst_started: Mutex<Option<Instant>>,
}

impl HttpEngine {
    pub fn new(options: &Options) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(std::time::Duration::from_secs(options.timeout_secs))
            .user_agent(&options.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .cookie_store(true);

        let mut default_headers = reqwest::header::HeaderMap::new();
        for (key, value) in &options.custom_headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| SkoposError::ConfigError(format!("invalid header '{key}': {e}")))?;
            let value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| SkoposError::ConfigError(format!("invalid header '{key}': {e}")))?;
            default_headers.insert(name, value);
        }
        if !options.cookies.is_empty() {
            let cookie_line = options
                .cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            let value = reqwest::header::HeaderValue::from_str(&cookie_line)
                .map_err(|e| SkoposError::ConfigError(format!("invalid cookie value: {e}")))?;
            default_headers.insert(reqwest::header::COOKIE, value);
        }
        if !default_headers.is_empty() {
            builder = builder.default_headers(default_headers);
        }

        if let Some(proxy_url) = &options.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| SkoposError::ConfigError(format!("invalid proxy URL: {e}")))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build()?,
            pending: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            trainer: Trainer::new(options.clone()),
            concurrency: options.http_req_limit.max(1),
            request_count: AtomicU64::new(0),
            response_count: AtomicU64::new(0),
            time_out_count: AtomicU64::new(0),
            total_res_time: Mutex::new(0.0),
            burst_res_time: Mutex::new(0.0),
            burst_res_cnt: AtomicU64::new(0),
            burst_started: Mutex::new(None),
        })
    }

    pub fn trainer(&self) -> &Trainer {
        &self.trainer
    }

    /// Queues a GET for the next harvest; returns the request id
    pub fn queue_get(&self, url: impl Into<String>, remove_id: bool) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .push(QueuedRequest {
                id,
                method: Method::GET,
                url: url.into(),
                body: None,
                remove_id,
                train: true,
            });
        id
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().expect("pending lock poisoned").is_empty()
    }

    /// Synchronously executes all outstanding requests to completion.
    ///
    /// A no-op when nothing is pending, so calling it twice at a drain
    /// point is harmless. Responses are returned in completion order.
    pub async fn harvest(&self) -> Vec<(QueuedRequest, Result<HttpResponse>)> {
        let batch: Vec<QueuedRequest> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            std::mem::take(&mut *pending)
        };
        if batch.is_empty() {
            return Vec::new();
        }

        debug!("harvesting {} outstanding requests", batch.len());
        *self.burst_res_time.lock().expect("burst lock poisoned") = 0.0;
        self.burst_res_cnt.store(0, Ordering::Relaxed);
        *self.burst_started.lock().expect("burst lock poisoned") = Some(Instant::now());

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();

        for request in batch {
            let semaphore = Arc::clone(&semaphore);
            let client = self.client.clone();
            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let err = SkoposError::AuditError("request scheduler closed".into());
                        return (request, Err(err));
                    }
                };
                let result = execute(&client, &request).await;
                (request, result)
            });
        }

        let mut completed = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((request, result)) => {
                    self.record(&result);
                    if request.train {
                        if let Ok(response) = &result {
                            self.trainer.observe(response);
                        }
                    }
                    completed.push((request, result));
                }
                Err(e) => error!("request task panicked: {e}"),
            }
        }
        completed
    }

    /// Sends a GET immediately, bypassing the harvest batch.
    ///
    /// Used by modules and the spider for probes whose response they need
    /// inline. Counters and the trainer still see the traffic.
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request(Method::GET, url, None).await
    }

    /// Sends a form-encoded POST immediately
    pub async fn post(&self, url: &str, body: &str) -> Result<HttpResponse> {
        self.request(Method::POST, url, Some(body.to_string())).await
    }

    async fn request(&self, method: Method, url: &str, body: Option<String>) -> Result<HttpResponse> {
        let request = QueuedRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            url: url.to_string(),
            body,
            remove_id: true,
            train: true,
        };
        let result = execute(&self.client, &request).await;
        self.record(&result);
        if let Ok(response) = &result {
            self.trainer.observe(response);
        }
        result
    }

    fn record(&self, result: &Result<HttpResponse>) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(response) => {
                self.response_count.fetch_add(1, Ordering::Relaxed);
                self.burst_res_cnt.fetch_add(1, Ordering::Relaxed);
                *self.total_res_time.lock().expect("time lock poisoned") += response.time;
                *self.burst_res_time.lock().expect("burst lock poisoned") += response.time;
            }
            Err(SkoposError::HttpError(e)) if e.is_timeout() => {
                self.time_out_count.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn response_count(&self) -> u64 {
        self.response_count.load(Ordering::Relaxed)
    }

    pub fn time_out_count(&self) -> u64 {
        self.time_out_count.load(Ordering::Relaxed)
    }

    /// Summed response time of the current burst, seconds
    pub fn curr_res_time(&self) -> f64 {
        *self.burst_res_time.lock().expect("burst lock poisoned")
    }

    /// Responses received in the current burst
    pub fn curr_res_cnt(&self) -> u64 {
        self.burst_res_cnt.load(Ordering::Relaxed)
    }

    /// Responses per second over the current burst
    pub fn curr_res_per_second(&self) -> f64 {
        let elapsed = self
            .burst_started
            .lock()
            .expect("burst lock poisoned")
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let cnt = self.curr_res_cnt();
        if elapsed > 0.0 && cnt > 0 {
            cnt as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Mean response time over the whole scan, seconds
    pub fn average_res_time(&self) -> f64 {
        let responses = self.response_count();
        if responses == 0 {
            return 0.0;
        }
        *self.total_res_time.lock().expect("time lock poisoned") / responses as f64
    }

    /// Configured concurrency cap
    pub fn max_concurrency(&self) -> usize {
        self.concurrency
    }
}

/// Executes one request, timing it and flattening the response
async fn execute(client: &Client, request: &QueuedRequest) -> Result<HttpResponse> {
    let url = if request.remove_id {
        strip_tracking_param(&request.url)
    } else {
        request.url.clone()
    };

    let mut builder = client.request(request.method.clone(), url.as_str());
    if let Some(body) = &request.body {
        builder = builder
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body.clone());
    }

    let started = Instant::now();
    let response = builder.send().await?;
    let effective_url = response.url().to_string();
    let code = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            Header::new(name.as_str(), value.to_str().unwrap_or_default())
        })
        .collect();
    let body = response.text().await?;
    let time = started.elapsed().as_secs_f64();

    debug!("{} {} -> {} ({:.3}s)", request.method, url, code, time);

    Ok(HttpResponse {
        request_url: url,
        effective_url,
        code,
        headers,
        body,
        time,
    })
}

/// Removes the scan-internal tracking parameter from a URL's query string
fn strip_tracking_param(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            let remaining: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(k, _)| k != TRACKING_PARAM)
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            if remaining.is_empty() {
                parsed.set_query(None);
            } else {
                parsed
                    .query_pairs_mut()
                    .clear()
                    .extend_pairs(remaining.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            }
            parsed.to_string()
        }
        Err(_) => raw.to_string(),
    }
}
