//! Shared request/verdict types threaded through every pipeline stage.

use serde::{Deserialize, Serialize};

/// Methods the parser and validator are willing to recognize at all,
/// independent of the configured whitelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Connect,
    Trace,
    Patch,
}

impl Method {
    pub fn parse(raw: &str) -> Option<Method> {
        Some(match raw {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "CONNECT" => Method::Connect,
            "TRACE" => Method::Trace,
            "PATCH" => Method::Patch,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn parse(raw: &str) -> Option<HttpVersion> {
        match raw {
            "HTTP/1.0" => Some(HttpVersion::Http10),
            "HTTP/1.1" => Some(HttpVersion::Http11),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }
}

/// A single header as an ordered (name, value) pair. Order is preserved
/// because duplicate-header handling and re-serialization (spec.md §8
/// round-trip property) depend on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// The request target, split and progressively decoded/normalized by the
/// Validator (spec.md §4.3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub raw_path: String,
    pub decoded_path: Option<String>,
    pub normalized_path: Option<String>,
    pub query: Option<String>,
    pub decoded_query: Option<String>,
}

/// A fully parsed request, as handed from the Parser through the rest of
/// the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub target: Target,
    pub version: HttpVersion,
    pub headers: Vec<Header>,
    pub content_length: usize,
    pub body: Vec<u8>,
    pub receive_timestamp_ms: u64,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Re-serialize method + target + headers as bytes (spec.md §8 round-trip
    /// property). Body is intentionally excluded: the property is about
    /// protocol framing, not payload fidelity.
    pub fn reserialize_head(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let target = self.target.raw_path.clone();
        let line = match &self.target.query {
            Some(q) => format!(
                "{} {}?{} {}\r\n",
                self.method.as_str(),
                target,
                q,
                self.version.as_str()
            ),
            None => format!("{} {} {}\r\n", self.method.as_str(), target, self.version.as_str()),
        };
        out.extend_from_slice(line.as_bytes());
        for h in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", h.name, h.value).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Attack categories the Signature Engine and Correlation Engine classify
/// hits into (spec.md §4.4, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackCategory {
    SqlInjection,
    Xss,
    PathTraversal,
    CommandInjection,
    ProtocolAbuse,
    Scan,
    Recon,
    BruteForce,
    Dos,
    Backdoor,
}

/// Reason codes surfaced on a `Verdict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    Allowed,
    Malformed,
    TooLarge,
    InvalidEncoding,
    PathTraversal,
    DisallowedExtension,
    SignatureHit,
    RateLimited,
    Blocked,
    CapacityExhausted,
    InternalError,
    AggressiveBehavior,
    BehaviorAttack,
    BehaviorAnomaly,
    BehaviorBot,
    CorrelationHit,
    DisallowedMethod,
    SuspiciousFlag,
    AutomatedFlag,
}

/// Confidence bucket used by behavior/correlation/signature stages and by
/// the arbiter's "confidence >= Medium" thresholds (spec.md §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_score(score: f64) -> Confidence {
        if score >= 0.75 {
            Confidence::High
        } else if score >= 0.4 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// The core's per-request decision (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub allow: bool,
    pub reason: ReasonCode,
    pub category: Option<AttackCategory>,
    pub confidence: Option<Confidence>,
    pub recommended_ban_seconds: Option<u32>,
}

impl Verdict {
    pub fn allow() -> Verdict {
        Verdict {
            allow: true,
            reason: ReasonCode::Allowed,
            category: None,
            confidence: None,
            recommended_ban_seconds: None,
        }
    }

    pub fn deny(reason: ReasonCode) -> Verdict {
        Verdict {
            allow: false,
            reason,
            category: None,
            confidence: None,
            recommended_ban_seconds: None,
        }
    }

    pub fn with_category(mut self, category: AttackCategory) -> Verdict {
        self.category = Some(category);
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Verdict {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_ban(mut self, seconds: u32) -> Verdict {
        self.recommended_ban_seconds = Some(seconds);
        self
    }
}
