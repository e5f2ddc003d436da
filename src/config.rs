//! Configuration (spec.md §6). Loaded from a TOML file with every field
//! defaulted, following the teacher's pattern of a single `Default`-backed
//! config struct rather than a builder (see `HttpCageConfig` in
//! `http-cage`).

use std::fs;
use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Minimal,
    Standard,
    High,
    Paranoid,
}

impl Default for SecurityLevel {
    fn default() -> Self {
        SecurityLevel::Standard
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclAction {
    Allow,
    Deny,
}

/// A single ACL entry: CIDR + allow/deny + optional expiry. Present in the
/// original C server (`advanced_security.h`'s blacklist patterns) and kept
/// here as the "supplement" noted in SPEC_FULL.md §10.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclEntry {
    pub cidr: String,
    pub action: AclAction,
    /// Unix timestamp (seconds) after which this entry is ignored. `None`
    /// means it never expires.
    pub expires_at: Option<u64>,
}

impl AclEntry {
    /// Whether `addr` falls within this entry's CIDR block.
    pub fn matches(&self, addr: IpAddr) -> bool {
        match parse_cidr(&self.cidr) {
            Some((network, prefix_len)) => addr_in_cidr(addr, network, prefix_len),
            None => false,
        }
    }
}

fn parse_cidr(cidr: &str) -> Option<(IpAddr, u8)> {
    let (ip_part, len_part) = cidr.split_once('/')?;
    let ip: IpAddr = ip_part.parse().ok()?;
    let max_len = if ip.is_ipv4() { 32 } else { 128 };
    let len: u8 = len_part.parse().ok()?;
    if len > max_len {
        return None;
    }
    Some((ip, len))
}

fn addr_in_cidr(addr: IpAddr, network: IpAddr, prefix_len: u8) -> bool {
    match (addr, network) {
        (IpAddr::V4(a), IpAddr::V4(n)) => {
            let mask = if prefix_len == 0 {
                0u32
            } else {
                u32::MAX << (32 - prefix_len)
            };
            (u32::from(a) & mask) == (u32::from(n) & mask)
        }
        (IpAddr::V6(a), IpAddr::V6(n)) => {
            let mask = if prefix_len == 0 {
                0u128
            } else {
                u128::MAX << (128 - prefix_len)
            };
            (u128::from(a) & mask) == (u128::from(n) & mask)
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Transport
    pub port: u16,
    pub bind_addr: String,
    pub backlog: u32,

    // Content gate
    pub root_dir: String,
    pub allowed_extensions: Vec<String>,

    // Parser limits
    pub max_request_size: usize,
    pub max_header_size: usize,
    pub max_uri_length: usize,
    pub max_header_count: usize,

    // Validator
    pub allowed_path_chars: String,

    // Rate & DoS shaper
    pub rate_limit_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub burst_limit: u32,
    pub burst_window_seconds: u64,
    pub ban_duration_seconds: u32,
    pub ban_threshold: u32,

    // Policy
    pub security_level: SecurityLevel,

    // Behavior / correlation
    pub behavior_analysis_enabled: bool,
    pub correlation_enabled: bool,
    pub history_size: usize,

    // Audit
    pub log_dir: String,
    pub max_log_file_size: u64,
    pub max_log_files: usize,
    pub sync_writes: bool,
    pub audit_secret_env_var: String,

    // ACL / methods
    pub allowed_methods: Vec<String>,
    pub acl_entries: Vec<AclEntry>,

    // Registry
    pub registry_capacity: usize,
    pub idle_ttl_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            bind_addr: "0.0.0.0".to_string(),
            backlog: 1024,

            root_dir: "./public".to_string(),
            allowed_extensions: vec![
                "html".to_string(),
                "css".to_string(),
                "js".to_string(),
                "png".to_string(),
                "jpg".to_string(),
                "svg".to_string(),
                "ico".to_string(),
                "txt".to_string(),
            ],

            max_request_size: 10 * 1024 * 1024,
            max_header_size: 8 * 1024,
            max_uri_length: 4096,
            max_header_count: 100,

            allowed_path_chars: "/-_.".to_string(),

            rate_limit_requests: 100,
            rate_limit_window_seconds: 60,
            burst_limit: 30,
            burst_window_seconds: 60,
            ban_duration_seconds: 300,
            ban_threshold: 5,

            security_level: SecurityLevel::Standard,

            behavior_analysis_enabled: true,
            correlation_enabled: true,
            history_size: 256,

            log_dir: "./logs".to_string(),
            max_log_file_size: 64 * 1024 * 1024,
            max_log_files: 10,
            sync_writes: false,
            audit_secret_env_var: "EDGE_SENTRY_AUDIT_SECRET".to_string(),

            allowed_methods: vec!["GET".to_string(), "HEAD".to_string(), "POST".to_string()],
            acl_entries: Vec::new(),

            registry_capacity: 100_000,
            idle_ttl_seconds: 3600,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_window_seconds == 0 {
            anyhow::bail!("rate_limit_window_seconds must be > 0");
        }
        if self.rate_limit_requests == 0 {
            anyhow::bail!("rate_limit_requests must be > 0");
        }
        if self.registry_capacity == 0 {
            anyhow::bail!("registry_capacity must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn cidr_v4_match() {
        let entry = AclEntry {
            cidr: "10.0.0.0/8".to_string(),
            action: AclAction::Deny,
            expires_at: None,
        };
        assert!(entry.matches("10.1.2.3".parse().unwrap()));
        assert!(!entry.matches("11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn cidr_single_host() {
        let entry = AclEntry {
            cidr: "127.0.0.1/32".to_string(),
            action: AclAction::Allow,
            expires_at: None,
        };
        assert!(entry.matches("127.0.0.1".parse().unwrap()));
        assert!(!entry.matches("127.0.0.2".parse().unwrap()));
    }

    #[test]
    fn rejects_bad_window() {
        let mut config = Config::default();
        config.rate_limit_window_seconds = 0;
        assert!(config.validate().is_err());
    }
}
