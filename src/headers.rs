//! Mandatory security headers and the file-handler/response-sink contract
//! (spec.md §6). Grounded in `http-cage`'s `generate_security_headers`,
//! which attaches the same fixed header set to every response regardless
//! of which code path produced it.

use crate::request::Verdict;

/// The fixed security header set attached to every response, allow or
/// deny alike (spec.md §6).
pub fn security_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("X-Frame-Options", "DENY"),
        ("X-Content-Type-Options", "nosniff"),
        ("X-XSS-Protection", "1; mode=block"),
        ("Strict-Transport-Security", "max-age=31536000; includeSubDomains"),
    ]
}

/// Headers added only on a deny, surfacing the arbiter's decision to
/// whatever sits downstream (a reverse proxy, an observability sidecar).
pub fn decision_headers(verdict: &Verdict) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    if !verdict.allow {
        headers.push(("X-Edge-Sentry-Reason".to_string(), format!("{:?}", verdict.reason)));
        if let Some(category) = verdict.category {
            headers.push(("X-Edge-Sentry-Category".to_string(), format!("{:?}", category)));
        }
        if let Some(seconds) = verdict.recommended_ban_seconds {
            headers.push(("Retry-After".to_string(), seconds.to_string()));
        }
    }
    headers
}

/// The contract a collaborator implements to actually serve bytes once
/// the pipeline allows a request through (spec.md §1: file serving is an
/// external concern, not part of the security core).
pub trait FileHandler: Send + Sync {
    fn serve(&self, normalized_path: &str) -> std::io::Result<Vec<u8>>;
}

/// The contract a collaborator implements to hand a `Verdict` back to the
/// transport layer (write a response, close a connection, emit a metric).
pub trait ResponseSink: Send + Sync {
    fn respond(&self, verdict: &Verdict, body: Option<&[u8]>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ReasonCode;

    #[test]
    fn security_headers_always_present() {
        let headers = security_headers();
        assert!(headers.iter().any(|(k, _)| *k == "X-Frame-Options"));
        assert_eq!(headers.len(), 4);
    }

    #[test]
    fn decision_headers_empty_on_allow() {
        let verdict = Verdict::allow();
        assert!(decision_headers(&verdict).is_empty());
    }

    #[test]
    fn decision_headers_include_retry_after_when_banned() {
        let verdict = Verdict::deny(ReasonCode::RateLimited).with_ban(60);
        let headers = decision_headers(&verdict);
        assert!(headers.iter().any(|(k, v)| k == "Retry-After" && v == "60"));
    }
}
