//! Scan options and configuration loading

use crate::error::{Result, SkoposError};
use crate::page::Cookie;
use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Product name used for the default user agent and report metadata
pub const PRODUCT: &str = "skopos";

/// URL redundancy rule with a follow budget.
///
/// The counter mutates during scanning, so the engine works on a clone and
/// the original set is what reports render.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedundancyRule {
    /// Regex matched against candidate URLs
    pub pattern: String,
    /// Remaining times a matching URL may be followed
    pub counter: u64,
}

impl RedundancyRule {
    pub fn new(pattern: impl Into<String>, counter: u64) -> Self {
        Self {
            pattern: pattern.into(),
            counter,
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        Regex::new(&self.pattern)
            .map(|re| re.is_match(url))
            .unwrap_or(false)
    }
}

/// Configuration for an audit session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Target URL to audit
    pub target: String,
    /// Explicit seed list; when non-empty the spider never runs
    #[serde(default)]
    pub restrict_paths: Vec<String>,
    /// Audit link elements
    #[serde(default = "default_true")]
    pub audit_links: bool,
    /// Audit form elements
    #[serde(default = "default_true")]
    pub audit_forms: bool,
    /// Audit cookie elements
    #[serde(default = "default_true")]
    pub audit_cookies: bool,
    /// Audit header elements
    #[serde(default = "default_true")]
    pub audit_headers: bool,
    /// Defer HTTP harvesting until a whole URL batch is enqueued
    /// (higher batching, higher memory)
    #[serde(default)]
    pub http_harvest_last: bool,
    /// Cookies sent with every request and merged into parsed pages
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    /// Netscape-format cookie jar; must exist when set
    #[serde(default)]
    pub cookie_jar: Option<PathBuf>,
    /// Serialized cookies, `k1=v1;k2=v2`
    #[serde(default)]
    pub cookie_string: Option<String>,
    /// User-Agent header value
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Name recorded in the user agent as having authorized the scan
    #[serde(default)]
    pub authed_by: Option<String>,
    /// URL redundancy rules
    #[serde(default)]
    pub redundant: Vec<RedundancyRule>,
    /// Filter patterns for module listing
    #[serde(default)]
    pub lsmod: Vec<String>,
    /// Filter patterns for report listing
    #[serde(default)]
    pub lsrep: Vec<String>,
    /// Filter patterns for plugin listing
    #[serde(default)]
    pub lsplug: Vec<String>,
    /// Scan start time, recorded by `prepare`
    #[serde(default)]
    pub start_datetime: Option<DateTime<Local>>,
    /// Scan finish time, recorded by `clean_up`
    #[serde(default)]
    pub finish_datetime: Option<DateTime<Local>>,
    /// Scan duration in seconds
    #[serde(default)]
    pub delta_time: Option<f64>,
    /// Concurrent HTTP request cap
    #[serde(default = "default_http_req_limit")]
    pub http_req_limit: usize,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Maximum crawl depth
    #[serde(default = "default_depth_limit")]
    pub depth_limit: u32,
    /// Maximum URLs the spider may discover
    #[serde(default = "default_link_count_limit")]
    pub link_count_limit: usize,
    /// HTTP/HTTPS proxy URL
    #[serde(default)]
    pub proxy: Option<String>,
    /// Custom HTTP headers
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
    /// Only render issues in reports, no informational output
    #[serde(default)]
    pub only_positives: bool,
    /// Wordlist consumed by the path seeder plugin
    #[serde(default)]
    pub wordlist_path: Option<String>,
    /// Report output path
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("{}/{}", PRODUCT, env!("CARGO_PKG_VERSION"))
}

fn default_http_req_limit() -> usize {
    20
}

fn default_timeout() -> u64 {
    30
}

fn default_depth_limit() -> u32 {
    3
}

fn default_link_count_limit() -> usize {
    500
}

impl Default for Options {
    fn default() -> Self {
        Self {
            target: String::new(),
            restrict_paths: Vec::new(),
            audit_links: true,
            audit_forms: true,
            audit_cookies: true,
            audit_headers: true,
            http_harvest_last: false,
            cookies: Vec::new(),
            cookie_jar: None,
            cookie_string: None,
            user_agent: default_user_agent(),
            authed_by: None,
            redundant: Vec::new(),
            lsmod: Vec::new(),
            lsrep: Vec::new(),
            lsplug: Vec::new(),
            start_datetime: None,
            finish_datetime: None,
            delta_time: None,
            http_req_limit: default_http_req_limit(),
            timeout_secs: default_timeout(),
            depth_limit: default_depth_limit(),
            link_count_limit: default_link_count_limit(),
            proxy: None,
            custom_headers: HashMap::new(),
            only_positives: false,
            wordlist_path: None,
            report_path: None,
        }
    }
}

impl Options {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Normalizes the option set for use by the engine.
    ///
    /// Parses and merges the cookie string and cookie jar into `cookies`,
    /// applies the authorized-by user-agent suffix, and verifies that a
    /// configured cookie jar actually exists.
    pub fn normalize(&mut self) -> Result<()> {
        if let Some(jar) = self.cookie_jar.clone() {
            if !jar.is_file() {
                return Err(SkoposError::MissingResource(format!(
                    "cookie jar '{}' does not exist",
                    jar.display()
                )));
            }
            let jar_cookies = parse_cookie_jar(&jar)?;
            for cookie in jar_cookies {
                self.merge_cookie(cookie);
            }
        }

        if let Some(serialized) = self.cookie_string.clone() {
            for cookie in parse_cookie_string(&serialized) {
                self.merge_cookie(cookie);
            }
        }

        if let Some(authed_by) = &self.authed_by {
            let suffix = format!(" (Scan authorized by: {authed_by})");
            if !self.user_agent.ends_with(&suffix) {
                self.user_agent.push_str(&suffix);
            }
        }

        Ok(())
    }

    /// Inserts a cookie, replacing any existing cookie with the same name
    pub fn merge_cookie(&mut self, cookie: Cookie) {
        if let Some(existing) = self.cookies.iter_mut().find(|c| c.name == cookie.name) {
            *existing = cookie;
        } else {
            self.cookies.push(cookie);
        }
    }

    /// Reshapes the cookie list into a name→value map.
    ///
    /// The one documented post-run mutation: report consumers want a flat
    /// map, not element objects.
    pub fn normalize_cookies_for_report(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.cookies.retain(|c| seen.insert(c.name.clone()));
    }

    /// Plain-map form of the options for the audit store
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(m)) => m,
            _ => serde_json::Map::new(),
        };

        let cookie_map: serde_json::Map<String, serde_json::Value> = self
            .cookies
            .iter()
            .map(|c| (c.name.clone(), serde_json::Value::String(c.value.clone())))
            .collect();
        map.insert("cookies".to_string(), serde_json::Value::Object(cookie_map));

        map
    }

    /// Loads options from a TOML profile and merges it over the defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(SkoposError::IoError)?;
        let file: FileOptions = toml::from_str(&content)?;

        let mut options = Options::default();

        if let Some(scan) = file.scan {
            if let Some(target) = scan.target {
                options.target = target;
            }
            if let Some(paths) = scan.restrict_paths {
                options.restrict_paths = paths;
            }
            if let Some(depth) = scan.depth_limit {
                options.depth_limit = depth;
            }
            if let Some(limit) = scan.link_count_limit {
                options.link_count_limit = limit;
            }
            if let Some(wordlist) = scan.wordlist_path {
                options.wordlist_path = Some(wordlist);
            }
        }

        if let Some(audit) = file.audit {
            if let Some(v) = audit.links {
                options.audit_links = v;
            }
            if let Some(v) = audit.forms {
                options.audit_forms = v;
            }
            if let Some(v) = audit.cookies {
                options.audit_cookies = v;
            }
            if let Some(v) = audit.headers {
                options.audit_headers = v;
            }
        }

        if let Some(http) = file.http {
            if let Some(v) = http.req_limit {
                options.http_req_limit = v;
            }
            if let Some(v) = http.timeout_secs {
                options.timeout_secs = v;
            }
            if let Some(v) = http.user_agent {
                options.user_agent = v;
            }
            if let Some(v) = http.proxy {
                options.proxy = Some(v);
            }
            if let Some(v) = http.harvest_last {
                options.http_harvest_last = v;
            }
        }

        if let Some(output) = file.output {
            if let Some(v) = output.report_path {
                options.report_path = Some(PathBuf::from(v));
            }
            if let Some(v) = output.only_positives {
                options.only_positives = v;
            }
        }

        Ok(options)
    }
}

/// Parses a `k1=v1;k2=v2` cookie serialization.
///
/// Keys and values are taken byte-exact; segments without `=` are skipped.
pub fn parse_cookie_string(serialized: &str) -> Vec<Cookie> {
    serialized
        .split(';')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some(Cookie::new(name, value))
        })
        .collect()
}

/// Parses a Netscape-format cookie jar (tab-separated, 7 fields per line)
fn parse_cookie_jar(path: &Path) -> Result<Vec<Cookie>> {
    let content = std::fs::read_to_string(path).map_err(SkoposError::IoError)?;
    let cookies = content
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() == 7 {
                Some(Cookie::new(fields[5], fields[6]))
            } else {
                None
            }
        })
        .collect();
    Ok(cookies)
}

/// File-based configuration sections matching a skopos.toml profile
#[derive(Debug, Deserialize)]
struct FileOptions {
    scan: Option<ScanSection>,
    audit: Option<AuditSection>,
    http: Option<HttpSection>,
    output: Option<OutputSection>,
}

#[derive(Debug, Deserialize)]
struct ScanSection {
    target: Option<String>,
    restrict_paths: Option<Vec<String>>,
    depth_limit: Option<u32>,
    link_count_limit: Option<usize>,
    wordlist_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuditSection {
    links: Option<bool>,
    forms: Option<bool>,
    cookies: Option<bool>,
    headers: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct HttpSection {
    req_limit: Option<usize>,
    timeout_secs: Option<u64>,
    user_agent: Option<String>,
    proxy: Option<String>,
    harvest_last: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct OutputSection {
    report_path: Option<String>,
    only_positives: Option<bool>,
}
