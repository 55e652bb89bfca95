//! Issue model: structured findings produced by audit modules

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element class a module can target on a page
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Link,
    Form,
    Cookie,
    Header,
    Body,
    Path,
    Server,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Link => write!(f, "link"),
            ElementKind::Form => write!(f, "form"),
            ElementKind::Cookie => write!(f, "cookie"),
            ElementKind::Header => write!(f, "header"),
            ElementKind::Body => write!(f, "body"),
            ElementKind::Path => write!(f, "path"),
            ElementKind::Server => write!(f, "server"),
        }
    }
}

/// Severity level for issues
///
/// Declaration order matters: `Critical` sorts first so `sort_by` on
/// severity lists the worst findings at the top.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::High => write!(f, "HIGH"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::Low => write!(f, "LOW"),
            Severity::Info => write!(f, "INFO"),
        }
    }
}

/// Confidence level for an issue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    /// Vulnerability was actively confirmed (delay observed, token bypassed, etc.)
    Confirmed,
    /// Strong indicators but not directly exploited
    Tentative,
    /// Informational detection (missing flag, version leak, etc.)
    Informational,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Confirmed => write!(f, "confirmed"),
            Confidence::Tentative => write!(f, "tentative"),
            Confidence::Informational => write!(f, "informational"),
        }
    }
}

/// A security issue discovered by an audit module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Unique identifier
    pub id: String,
    /// Name of the issue
    pub name: String,
    /// Detailed description
    pub description: String,
    /// Element class the issue was found in
    pub kind: ElementKind,
    /// URL of the offending page
    pub url: String,
    /// The specific element audited (form action, cookie name, header name, probed path)
    pub vector: Option<String>,
    /// Payload that triggered the issue, if any
    pub payload: Option<String>,
    /// Severity level
    pub severity: Severity,
    /// Confidence level
    pub confidence: Confidence,
    /// Technical evidence
    pub evidence: String,
    /// Remediation recommendation
    pub remediation: String,
    /// CWE reference (e.g., CWE-352)
    pub cwe_id: Option<String>,
    /// Id of the module that produced the issue
    pub module: String,
}

impl Issue {
    /// Creates a new Issue with a generated UUID
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        kind: ElementKind,
        severity: Severity,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            kind,
            url: url.into(),
            vector: None,
            payload: None,
            severity,
            confidence: Confidence::Tentative,
            evidence: String::new(),
            remediation: String::new(),
            cwe_id: None,
            module: String::new(),
        }
    }

    pub fn with_vector(mut self, vector: impl Into<String>) -> Self {
        self.vector = Some(vector.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = evidence.into();
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = remediation.into();
        self
    }

    pub fn with_cwe(mut self, cwe: impl Into<String>) -> Self {
        self.cwe_id = Some(cwe.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }
}
