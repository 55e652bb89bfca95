//! Parsed page model
//!
//! A `Page` is the value object handed to audit modules: the fetched URL,
//! response status, and the auditable elements pulled out of the response.
//! Every element carries enough information to be mutated and re-submitted.

use crate::http::HttpResponse;
use crate::options::Options;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// A hyperlink element with its query variables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    /// Absolute link target
    pub href: String,
    /// Query-string variables, mutation targets for injection checks
    pub vars: HashMap<String, String>,
}

impl Link {
    pub fn new(href: impl Into<String>) -> Self {
        let href = href.into();
        let vars = query_vars(&href);
        Self { href, vars }
    }
}

/// A single form field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormField {
    pub name: String,
    pub value: String,
}

/// A form element with its submit target and fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Form {
    /// Absolute submit target
    pub action: String,
    /// HTTP method, uppercased (GET/POST)
    pub method: String,
    pub fields: Vec<FormField>,
}

/// A cookie, either observed in a response or supplied via options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// The raw `Set-Cookie` string when observed, `name=value` when synthesized
    pub raw: String,
    /// True when the cookie came from a response header; only then does the
    /// raw string carry meaningful attribute flags
    #[serde(default)]
    pub observed: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        let raw = format!("{name}={value}");
        Self {
            name,
            value,
            raw,
            observed: false,
        }
    }

    /// Parses a `Set-Cookie` header value. Returns `None` for headers
    /// without a `name=value` first segment.
    pub fn from_set_cookie(raw: &str) -> Option<Self> {
        let first = raw.split(';').next()?;
        let (name, value) = first.split_once('=')?;
        Some(Self {
            name: name.trim().to_string(),
            value: value.to_string(),
            raw: raw.to_string(),
            observed: true,
        })
    }
}

/// A response header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Parsed representation of a fetched response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub url: String,
    pub code: u16,
    pub links: Vec<Link>,
    pub forms: Vec<Form>,
    pub cookies: Vec<Cookie>,
    pub headers: Vec<Header>,
    pub body: String,
}

impl Page {
    /// Builds a bare page with no elements; used for synthesized pages
    /// whose bodies have not been fetched yet.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            code: 0,
            links: Vec::new(),
            forms: Vec::new(),
            cookies: Vec::new(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Parses an HTTP response into a page.
    ///
    /// Links and forms are extracted only from HTML bodies; cookies supplied
    /// via options are merged in behind any response cookies with the same
    /// name.
    pub fn from_http_response(response: &HttpResponse, options: &Options) -> Self {
        let url = response.effective_url.clone();
        let base = Url::parse(&url).ok();

        let is_html = response
            .header("content-type")
            .map(|ct| ct.contains("text/html") || ct.is_empty())
            .unwrap_or(true);

        let (links, forms) = match (&base, is_html) {
            (Some(base), true) => (
                extract_links(base, &response.body),
                extract_forms(base, &response.body),
            ),
            _ => (Vec::new(), Vec::new()),
        };

        let mut cookies: Vec<Cookie> = response
            .headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case("set-cookie"))
            .filter_map(|h| Cookie::from_set_cookie(&h.value))
            .collect();
        for cookie in &options.cookies {
            if !cookies.iter().any(|c| c.name == cookie.name) {
                cookies.push(cookie.clone());
            }
        }

        Self {
            url,
            code: response.code,
            links,
            forms,
            cookies,
            headers: response.headers.clone(),
            body: response.body.clone(),
        }
    }

    /// A header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// Extracts same-host links from HTML content (a[href], frame/iframe[src])
pub fn extract_links(base_url: &Url, html: &str) -> Vec<Link> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    let selectors = [("a[href]", "href"), ("iframe[src]", "src"), ("frame[src]", "src")];

    for (sel_str, attr) in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            for element in document.select(&selector) {
                if let Some(value) = element.value().attr(attr) {
                    if let Some(resolved) = resolve_url(base_url, value) {
                        links.push(Link::new(resolved));
                    }
                }
            }
        }
    }

    links
}

/// Extracts forms and their fields from HTML content.
///
/// Extraction is fully synchronous: no scraper references survive past the
/// call, so callers may hold the result across await points.
pub fn extract_forms(base_url: &Url, html: &str) -> Vec<Form> {
    let document = Html::parse_document(html);
    let mut forms = Vec::new();

    let form_selector = match Selector::parse("form") {
        Ok(s) => s,
        Err(_) => return forms,
    };
    let field_selector = match Selector::parse("input[name], textarea[name], select[name]") {
        Ok(s) => s,
        Err(_) => return forms,
    };

    for form in document.select(&form_selector) {
        let method = form
            .value()
            .attr("method")
            .unwrap_or("GET")
            .to_uppercase();
        let action_raw = form.value().attr("action").unwrap_or("");
        let action = if action_raw.is_empty() {
            base_url.to_string()
        } else {
            match base_url.join(action_raw) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            }
        };

        let fields = form
            .select(&field_selector)
            .filter_map(|f| {
                f.value().attr("name").map(|name| FormField {
                    name: name.to_string(),
                    value: f.value().attr("value").unwrap_or("").to_string(),
                })
            })
            .collect();

        forms.push(Form {
            action,
            method,
            fields,
        });
    }

    forms
}

/// Resolves a potentially relative URL against a base, keeping only
/// same-host http(s) targets
fn resolve_url(base_url: &Url, raw: &str) -> Option<String> {
    let trimmed = raw.trim();

    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with("mailto:")
        || trimmed.starts_with("tel:")
        || trimmed.starts_with("javascript:")
        || trimmed.starts_with("data:")
    {
        return None;
    }

    let resolved = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Url::parse(trimmed).ok()?
    } else {
        base_url.join(trimmed).ok()?
    };

    if resolved.host_str() != base_url.host_str() {
        return None;
    }

    let mut clean = resolved;
    clean.set_fragment(None);

    Some(clean.to_string())
}

/// Normalizes a URL for deduplication (strips trailing slash, fragment)
pub fn normalize_url(url: &str) -> String {
    if let Ok(mut parsed) = Url::parse(url) {
        parsed.set_fragment(None);
        let mut result = parsed.to_string();
        if result.ends_with('/') && result.len() > 1 {
            result.pop();
        }
        result
    } else {
        url.to_string()
    }
}

fn query_vars(href: &str) -> HashMap<String, String> {
    match Url::parse(href) {
        Ok(url) => url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        Err(_) => HashMap::new(),
    }
}
