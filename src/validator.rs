//! Validator / Normalizer (spec.md §4.3).
//!
//! Runs percent-decoding, path normalization, a disallowed-character
//! check, an extension gate, and a method re-check, in that order.

use crate::config::Config;
use crate::error::CoreError;
use crate::request::{Method, Request};

pub struct ValidatorConfig {
    pub allowed_path_chars: Vec<char>,
    pub allowed_extensions: Vec<String>,
    pub allowed_methods: Vec<Method>,
}

impl ValidatorConfig {
    pub fn from_config(config: &Config) -> ValidatorConfig {
        ValidatorConfig {
            allowed_path_chars: config.allowed_path_chars.chars().collect(),
            allowed_extensions: config.allowed_extensions.clone(),
            allowed_methods: config
                .allowed_methods
                .iter()
                .filter_map(|m| Method::parse(m))
                .collect(),
        }
    }
}

/// Percent-decode a path. Malformed `%xx` sequences fail closed.
pub fn percent_decode(path: &str) -> Result<String, CoreError> {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                if i + 2 >= bytes.len() {
                    return Err(CoreError::InvalidEncoding);
                }
                let hi = hex_digit(bytes[i + 1]).ok_or(CoreError::InvalidEncoding)?;
                let lo = hex_digit(bytes[i + 2]).ok_or(CoreError::InvalidEncoding)?;
                out.push(hi * 16 + lo);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| CoreError::InvalidEncoding)
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Collapse `//`, resolve `.` and `..` against an empty ancestor stack.
/// Any `..` that would pop below the root fails with `PathTraversal`.
pub fn normalize_path(path: &str) -> Result<String, CoreError> {
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if stack.pop().is_none() {
                    return Err(CoreError::PathTraversal);
                }
            }
            s => stack.push(s),
        }
    }
    let mut normalized = String::from("/");
    normalized.push_str(&stack.join("/"));
    if path.ends_with('/') && normalized != "/" {
        normalized.push('/');
    }
    Ok(normalized)
}

fn disallowed_character_check(path: &str, allowed_extra: &[char]) -> Result<(), CoreError> {
    for c in path.chars() {
        if c.is_ascii_alphanumeric() || allowed_extra.contains(&c) {
            continue;
        }
        return Err(CoreError::InvalidEncoding);
    }
    Ok(())
}

/// Directories (trailing slash) are mapped to `index.html` internally; the
/// file handler performs the actual resolution.
fn extension_gate(path: &str, allowed_extensions: &[String]) -> Result<String, CoreError> {
    if path.ends_with('/') {
        return Ok(format!("{}index.html", path));
    }
    let final_segment = path.rsplit('/').next().unwrap_or("");
    let extension = final_segment.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension {
        Some(ext) if allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext)) => Ok(path.to_string()),
        _ => Err(CoreError::DisallowedExtension),
    }
}

/// Runs the full validation pipeline and mutates `request.target` in
/// place with the decoded/normalized path.
pub fn validate(request: &mut Request, config: &ValidatorConfig) -> Result<(), CoreError> {
    let decoded = percent_decode(&request.target.raw_path)?;
    request.target.decoded_path = Some(decoded.clone());

    let normalized = normalize_path(&decoded)?;
    disallowed_character_check(&normalized, &config.allowed_path_chars)?;
    let resolved = extension_gate(&normalized, &config.allowed_extensions)?;
    request.target.normalized_path = Some(resolved);

    if let Some(query) = request.target.query.clone() {
        request.target.decoded_query = Some(percent_decode(&query)?);
    }

    if !config.allowed_methods.is_empty() && !config.allowed_methods.contains(&request.method) {
        return Err(CoreError::Malformed(format!("method {:?} not permitted", request.method)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_decode_basic() {
        assert_eq!(percent_decode("%2Fsearch").unwrap(), "/search");
        assert_eq!(
            percent_decode("1%27%20OR%20%271%27%3D%271").unwrap(),
            "1' OR '1'='1"
        );
    }

    #[test]
    fn percent_decode_rejects_truncated_sequence() {
        assert!(matches!(percent_decode("%2"), Err(CoreError::InvalidEncoding)));
        assert!(matches!(percent_decode("%gg"), Err(CoreError::InvalidEncoding)));
    }

    #[test]
    fn normalize_collapses_dot_segments() {
        assert_eq!(normalize_path("/a/./b/../c").unwrap(), "/a/c");
        assert_eq!(normalize_path("/a//b").unwrap(), "/a/b");
    }

    #[test]
    fn normalize_rejects_traversal_above_root() {
        assert!(matches!(normalize_path("/../etc/passwd"), Err(CoreError::PathTraversal)));
        assert!(matches!(normalize_path("/a/../../b"), Err(CoreError::PathTraversal)));
    }

    #[test]
    fn idempotent_normalization() {
        let once = normalize_path("/a/./b/../c").unwrap();
        let twice = normalize_path(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn extension_gate_maps_directories_to_index() {
        let allowed = vec!["html".to_string()];
        assert_eq!(extension_gate("/docs/", &allowed).unwrap(), "/docs/index.html");
    }

    #[test]
    fn extension_gate_rejects_unknown_extension() {
        let allowed = vec!["html".to_string()];
        assert!(matches!(
            extension_gate("/shell.php", &allowed),
            Err(CoreError::DisallowedExtension)
        ));
    }
}
