//! Protocol Parser (spec.md §4.2).
//!
//! Drives a small state machine over raw bytes:
//! `Init -> Headers -> Body -> Complete | Error`. Transitions other than
//! the documented successors are security signals, not just parse
//! failures — callers are expected to bump the client's `error_count`
//! even when a `Malformed` result doesn't abort the connection outright.

use crate::config::Config;
use crate::error::CoreError;
use crate::request::{Header, HttpVersion, Method, Request, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Init,
    Headers,
    Body,
    Complete,
    Error,
}

pub struct ParserLimits {
    pub max_line_length: usize,
    pub max_header_count: usize,
    pub max_header_name_len: usize,
    pub max_header_value_len: usize,
    pub max_uri_length: usize,
    pub max_total_header_bytes: usize,
    pub max_body_size: usize,
    pub allowed_methods: Vec<Method>,
}

impl ParserLimits {
    pub fn from_config(config: &Config) -> ParserLimits {
        ParserLimits {
            max_line_length: config.max_uri_length + 32,
            max_header_count: config.max_header_count,
            max_header_name_len: 256,
            max_header_value_len: config.max_header_size,
            max_uri_length: config.max_uri_length,
            max_total_header_bytes: config.max_header_size * config.max_header_count,
            max_body_size: config.max_request_size,
            allowed_methods: config
                .allowed_methods
                .iter()
                .filter_map(|m| Method::parse(m))
                .collect(),
        }
    }
}

/// Parses one complete HTTP/1.x request out of `buf`. Returns the request
/// plus the byte offset at which it ended (for pipelined connections the
/// caller can slice `buf` again from that offset).
pub fn parse_request(buf: &[u8], limits: &ParserLimits, now_ms: u64) -> Result<(Request, usize), CoreError> {
    let mut state = ParseState::Init;

    let header_end = find_header_terminator(buf).ok_or_else(|| {
        state = ParseState::Error;
        CoreError::Malformed("no CRLFCRLF header terminator found".to_string())
    })?;

    if header_end > limits.max_total_header_bytes {
        return Err(CoreError::TooLarge("total header bytes exceeded".to_string()));
    }

    let head = &buf[..header_end];
    reject_disallowed_bytes(head)?;

    let mut lines = split_lines(head);
    if lines.is_empty() {
        return Err(CoreError::Malformed("empty request".to_string()));
    }
    let request_line = lines.remove(0);
    if request_line.len() > limits.max_line_length {
        return Err(CoreError::TooLarge("request line too long".to_string()));
    }

    state = ParseState::Headers;
    let (method, target, version) = parse_request_line(request_line, limits)?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if headers.len() >= limits.max_header_count {
            return Err(CoreError::TooLarge("too many headers".to_string()));
        }
        let (name, value) = parse_header_line(line, limits)?;
        headers.push(Header { name, value });
    }

    let content_length = headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .and_then(|h| h.value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    if content_length > limits.max_body_size {
        return Err(CoreError::TooLarge("content-length exceeds max body size".to_string()));
    }

    state = ParseState::Body;
    let body_start = header_end + 4;
    let available = buf.len().saturating_sub(body_start);
    if available < content_length {
        return Err(CoreError::Malformed("incomplete body".to_string()));
    }
    let body = buf[body_start..body_start + content_length].to_vec();

    state = ParseState::Complete;
    let _ = state;

    Ok((
        Request {
            method,
            target,
            version,
            headers,
            content_length,
            body,
            receive_timestamp_ms: now_ms,
        },
        body_start + content_length,
    ))
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn split_lines(head: &[u8]) -> Vec<&[u8]> {
    head.split(|&b| b == b'\n')
        .map(|line| {
            if line.last() == Some(&b'\r') {
                &line[..line.len() - 1]
            } else {
                line
            }
        })
        .collect()
}

/// Control characters other than CR/LF/HT are disallowed anywhere in the
/// head (spec.md §4.2).
fn reject_disallowed_bytes(head: &[u8]) -> Result<(), CoreError> {
    for &b in head {
        let is_control = b < 0x20 || b == 0x7f;
        let is_allowed_control = b == b'\r' || b == b'\n' || b == b'\t';
        if is_control && !is_allowed_control {
            return Err(CoreError::Malformed(format!(
                "disallowed control byte 0x{:02x} in request head",
                b
            )));
        }
    }
    Ok(())
}

fn parse_request_line(line: &[u8], limits: &ParserLimits) -> Result<(Method, Target, HttpVersion), CoreError> {
    let line = std::str::from_utf8(line).map_err(|_| CoreError::Malformed("request line not UTF-8".to_string()))?;
    let mut parts = line.split(' ');
    let method_str = parts.next().ok_or_else(|| CoreError::Malformed("missing method".to_string()))?;
    let target_str = parts.next().ok_or_else(|| CoreError::Malformed("missing target".to_string()))?;
    let version_str = parts.next().ok_or_else(|| CoreError::Malformed("missing version".to_string()))?;
    if parts.next().is_some() {
        return Err(CoreError::Malformed("too many tokens in request line".to_string()));
    }

    let method = Method::parse(method_str).ok_or_else(|| CoreError::Malformed(format!("unrecognized method {}", method_str)))?;
    if !limits.allowed_methods.is_empty() && !limits.allowed_methods.contains(&method) {
        return Err(CoreError::Malformed(format!("method {} not in whitelist", method_str)));
    }

    if target_str.len() > limits.max_uri_length {
        return Err(CoreError::TooLarge("URI too long".to_string()));
    }
    let (raw_path, query) = match target_str.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target_str.to_string(), None),
    };

    let version = HttpVersion::parse(version_str).ok_or_else(|| CoreError::Malformed(format!("unsupported version {}", version_str)))?;

    Ok((
        method,
        Target {
            raw_path,
            decoded_path: None,
            normalized_path: None,
            query,
            decoded_query: None,
        },
        version,
    ))
}

fn parse_header_line(line: &[u8], limits: &ParserLimits) -> Result<(String, String), CoreError> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| CoreError::Malformed("header line missing colon".to_string()))?;
    let name_bytes = &line[..colon];
    let value_bytes = &line[colon + 1..];

    if name_bytes.is_empty() || name_bytes.len() > limits.max_header_name_len {
        return Err(CoreError::Malformed("invalid header name length".to_string()));
    }
    if !name_bytes.iter().all(|&b| b.is_ascii() && b != 0) {
        return Err(CoreError::Malformed("non-ASCII or NUL byte in header name".to_string()));
    }
    if name_bytes.contains(&0u8) {
        return Err(CoreError::Malformed("NUL byte in header name".to_string()));
    }

    let name = std::str::from_utf8(name_bytes)
        .map_err(|_| CoreError::Malformed("header name not UTF-8".to_string()))?
        .trim()
        .to_string();
    let value = std::str::from_utf8(value_bytes)
        .map_err(|_| CoreError::Malformed("header value not UTF-8".to_string()))?
        .trim()
        .to_string();

    if value.len() > limits.max_header_value_len {
        return Err(CoreError::TooLarge("header value too long".to_string()));
    }

    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ParserLimits {
        ParserLimits {
            max_line_length: 8192,
            max_header_count: 100,
            max_header_name_len: 256,
            max_header_value_len: 8192,
            max_uri_length: 4096,
            max_total_header_bytes: 64 * 1024,
            max_body_size: 1024 * 1024,
            allowed_methods: vec![Method::Get, Method::Head, Method::Post],
        }
    }

    #[test]
    fn parses_benign_get() {
        let raw = b"GET /index.html HTTP/1.1\r\nHost: x\r\n\r\n";
        let (request, consumed) = parse_request(raw, &limits(), 0).unwrap();
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.target.raw_path, "/index.html");
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn rejects_nul_in_header_name() {
        let mut raw = b"GET / HTTP/1.1\r\nHo\0st: x\r\n\r\n".to_vec();
        let result = parse_request(&mut raw, &limits(), 0);
        assert!(matches!(result, Err(CoreError::Malformed(_))));
    }

    #[test]
    fn splits_query_at_first_question_mark() {
        let raw = b"GET /search?q=1&r=2 HTTP/1.1\r\nHost: x\r\n\r\n";
        let (request, _) = parse_request(raw, &limits(), 0).unwrap();
        assert_eq!(request.target.raw_path, "/search");
        assert_eq!(request.target.query.as_deref(), Some("q=1&r=2"));
    }

    #[test]
    fn rejects_disallowed_method() {
        let raw = b"TRACE / HTTP/1.1\r\nHost: x\r\n\r\n";
        let result = parse_request(raw, &limits(), 0);
        assert!(result.is_err());
    }

    #[test]
    fn incomplete_body_is_malformed() {
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 10\r\n\r\nshort";
        let result = parse_request(raw, &limits(), 0);
        assert!(matches!(result, Err(CoreError::Malformed(_))));
    }

    #[test]
    fn reads_body_matching_content_length() {
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\nhello";
        let (request, consumed) = parse_request(raw, &limits(), 0).unwrap();
        assert_eq!(request.body, b"hello");
        assert_eq!(consumed, raw.len());
    }
}
