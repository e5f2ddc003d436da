//! Correlation Engine (spec.md §4.7).
//!
//! Looks across a client's recent `correlation_events` ring for patterns
//! that no single request reveals on its own: scanning, brute force,
//! low-and-slow DoS, and backdoor probing. The first detector to fire
//! wins; ties on the same window are broken by higher confidence, then by
//! detector priority order (spec.md §4.7). Grounded in the aggregation
//! style of `forensic_firewall/cue_engine.rs`'s threat-rule evaluation.

use regex::Regex;

use crate::registry::{BehaviorFlags, ClientRecord, CorrelationEvent};
use crate::request::{AttackCategory, Confidence};

#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    pub window_ms: u64,
    pub scan_unique_path_threshold: usize,
    pub scan_confidence: f64,
    /// Case-insensitive path pattern identifying authentication endpoints
    /// (spec.md §4.7: `/(login|auth|signin|admin)`).
    pub brute_force_path_pattern: Regex,
    pub brute_force_path_threshold: usize,
    pub brute_force_confidence: f64,
    /// Sub-window (not the full correlation `window_ms`) over which DoS
    /// request volume is counted.
    pub dos_window_ms: u64,
    pub dos_request_threshold: usize,
    pub dos_malformed_threshold: usize,
    pub dos_confidence: f64,
    pub backdoor_suspicious_threshold: usize,
    pub backdoor_obfuscated_threshold: usize,
    pub backdoor_confidence: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        CorrelationConfig {
            window_ms: 60 * 60 * 1000,
            scan_unique_path_threshold: 25,
            scan_confidence: 0.7,
            brute_force_path_pattern: Regex::new(r"(?i)(login|auth|signin|admin)").expect("valid pattern"),
            brute_force_path_threshold: 10,
            brute_force_confidence: 0.75,
            dos_window_ms: 60 * 1000,
            dos_request_threshold: 200,
            dos_malformed_threshold: 50,
            dos_confidence: 0.6,
            backdoor_suspicious_threshold: 8,
            backdoor_obfuscated_threshold: 8,
            backdoor_confidence: 0.65,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CorrelationHit {
    pub category: AttackCategory,
    pub confidence: Confidence,
    pub score: f64,
}

/// Evaluate every detector over the windowed event slice and return the
/// strongest hit, if any. Detector priority (used only to break exact
/// score ties) is Backdoor > BruteForce > Scan > Dos, matching the
/// severity ordering in spec.md §4.9's deny table.
pub fn correlate(record: &ClientRecord, config: &CorrelationConfig, now_ms: u64) -> Option<CorrelationHit> {
    let window_start = now_ms.saturating_sub(config.window_ms);
    let recent: Vec<&CorrelationEvent> = record
        .correlation_events
        .iter()
        .filter(|e| e.timestamp_ms >= window_start)
        .collect();

    if recent.is_empty() {
        return None;
    }

    let mut candidates = Vec::new();

    if let Some(hit) = detect_backdoor(&recent, config) {
        candidates.push(hit);
    }
    if let Some(hit) = detect_brute_force(&recent, config) {
        candidates.push(hit);
    }
    if let Some(hit) = detect_scan(&recent, config) {
        candidates.push(hit);
    }
    if let Some(hit) = detect_dos(&recent, config, now_ms) {
        candidates.push(hit);
    }

    candidates
        .into_iter()
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
}

fn detect_scan(events: &[&CorrelationEvent], config: &CorrelationConfig) -> Option<CorrelationHit> {
    let unique_paths = events.iter().map(|e| e.path.as_str()).collect::<std::collections::HashSet<_>>().len();
    if unique_paths < config.scan_unique_path_threshold {
        return None;
    }
    Some(CorrelationHit {
        category: AttackCategory::Scan,
        confidence: Confidence::from_score(config.scan_confidence),
        score: config.scan_confidence,
    })
}

/// Brute force: count of events whose path matches the auth-endpoint
/// pattern exceeds the threshold (spec.md §4.7), independent of status.
fn detect_brute_force(events: &[&CorrelationEvent], config: &CorrelationConfig) -> Option<CorrelationHit> {
    let matching = events.iter().filter(|e| config.brute_force_path_pattern.is_match(&e.path)).count();
    if matching < config.brute_force_path_threshold {
        return None;
    }
    Some(CorrelationHit {
        category: AttackCategory::BruteForce,
        confidence: Confidence::from_score(config.brute_force_confidence),
        score: config.brute_force_confidence,
    })
}

/// DoS: count of events within a 60s sub-window exceeds the request
/// threshold, or the malformed count over the full window exceeds its own
/// threshold (spec.md §4.7's two alternative triggers).
fn detect_dos(events: &[&CorrelationEvent], config: &CorrelationConfig, now_ms: u64) -> Option<CorrelationHit> {
    let dos_window_start = now_ms.saturating_sub(config.dos_window_ms);
    let recent_count = events.iter().filter(|e| e.timestamp_ms >= dos_window_start).count();
    let malformed_count = events.iter().filter(|e| e.malformed).count();

    if recent_count < config.dos_request_threshold && malformed_count < config.dos_malformed_threshold {
        return None;
    }
    Some(CorrelationHit {
        category: AttackCategory::Dos,
        confidence: Confidence::from_score(config.dos_confidence),
        score: config.dos_confidence,
    })
}

/// Backdoor: count of `Suspicious`-flagged events exceeds its threshold
/// *and* count of `Obfuscated`-flagged events exceeds its own (spec.md
/// §4.7's conjunction, not a single OR'd malformed counter).
fn detect_backdoor(events: &[&CorrelationEvent], config: &CorrelationConfig) -> Option<CorrelationHit> {
    let suspicious = events.iter().filter(|e| e.flags.contains(BehaviorFlags::SUSPICIOUS)).count();
    let obfuscated = events.iter().filter(|e| e.flags.contains(BehaviorFlags::OBFUSCATED)).count();
    if suspicious < config.backdoor_suspicious_threshold || obfuscated < config.backdoor_obfuscated_threshold {
        return None;
    }
    Some(CorrelationHit {
        category: AttackCategory::Backdoor,
        confidence: Confidence::from_score(config.backdoor_confidence),
        score: config.backdoor_confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClientRegistry;

    fn push_event(record: &mut ClientRecord, ts: u64, path: &str, status: u16, malformed: bool) {
        record.push_correlation_event(CorrelationEvent {
            path: path.to_string(),
            status,
            timestamp_ms: ts,
            malformed,
            flags: BehaviorFlags::empty(),
        });
    }

    fn push_flagged_event(record: &mut ClientRecord, ts: u64, path: &str, flags: BehaviorFlags) {
        record.push_correlation_event(CorrelationEvent {
            path: path.to_string(),
            status: 200,
            timestamp_ms: ts,
            malformed: false,
            flags,
        });
    }

    #[test]
    fn no_hit_with_few_events() {
        let registry = ClientRegistry::new(10, 60_000, 256);
        let config = CorrelationConfig::default();
        let hit = registry
            .with_client("c", 0, |r| {
                push_event(r, 0, "/a", 200, false);
                correlate(r, &config, 0)
            })
            .unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn scan_detected_on_many_unique_paths() {
        let registry = ClientRegistry::new(10, 60_000, 256);
        let config = CorrelationConfig::default();
        let hit = registry
            .with_client("c", 0, |r| {
                for i in 0..30 {
                    push_event(r, i, &format!("/p{}", i), 200, false);
                }
                correlate(r, &config, 30)
            })
            .unwrap();
        assert_eq!(hit.unwrap().category, AttackCategory::Scan);
    }

    #[test]
    fn brute_force_detected_on_repeated_login_path_hits() {
        let registry = ClientRegistry::new(10, 60_000, 256);
        let config = CorrelationConfig::default();
        let hit = registry
            .with_client("c", 0, |r| {
                for i in 0..12 {
                    push_event(r, i, "/login", 401, false);
                }
                correlate(r, &config, 12)
            })
            .unwrap();
        assert_eq!(hit.unwrap().category, AttackCategory::BruteForce);
    }

    #[test]
    fn brute_force_ignores_status_when_path_does_not_match() {
        let registry = ClientRegistry::new(10, 60_000, 256);
        let config = CorrelationConfig::default();
        let hit = registry
            .with_client("c", 0, |r| {
                for i in 0..12 {
                    push_event(r, i, "/images/cat.png", 401, false);
                }
                correlate(r, &config, 12)
            })
            .unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn dos_detected_on_request_volume_within_60s_window() {
        let registry = ClientRegistry::new(10, 600_000, 512);
        let config = CorrelationConfig::default();
        let hit = registry
            .with_client("c", 0, |r| {
                for i in 0..210u64 {
                    push_event(r, i * 100, "/", 200, false);
                }
                correlate(r, &config, 20_000)
            })
            .unwrap();
        assert_eq!(hit.unwrap().category, AttackCategory::Dos);
    }

    #[test]
    fn dos_not_triggered_by_volume_spread_outside_60s_window() {
        let registry = ClientRegistry::new(10, 600_000, 512);
        let config = CorrelationConfig::default();
        let hit = registry
            .with_client("c", 0, |r| {
                for i in 0..210u64 {
                    push_event(r, i * 1000, "/", 200, false);
                }
                correlate(r, &config, 209_000)
            })
            .unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn dos_detected_on_malformed_count_alone() {
        let registry = ClientRegistry::new(10, 600_000, 512);
        let config = CorrelationConfig::default();
        let hit = registry
            .with_client("c", 0, |r| {
                for i in 0..60u64 {
                    push_event(r, i * 1000, "/", 400, true);
                }
                correlate(r, &config, 60_000)
            })
            .unwrap();
        assert_eq!(hit.unwrap().category, AttackCategory::Dos);
    }

    #[test]
    fn backdoor_requires_both_suspicious_and_obfuscated_flags() {
        let registry = ClientRegistry::new(10, 60_000, 256);
        let config = CorrelationConfig::default();
        let hit = registry
            .with_client("c", 0, |r| {
                for i in 0..10 {
                    push_flagged_event(r, i, "/x", BehaviorFlags::SUSPICIOUS);
                }
                correlate(r, &config, 10)
            })
            .unwrap();
        assert!(hit.is_none(), "suspicious alone must not trigger backdoor");
    }

    #[test]
    fn backdoor_outranks_scan_when_both_qualify() {
        let registry = ClientRegistry::new(10, 60_000, 256);
        let mut config = CorrelationConfig::default();
        config.backdoor_confidence = 0.9;
        let hit = registry
            .with_client("c", 0, |r| {
                for i in 0..30 {
                    push_flagged_event(r, i, &format!("/p{}", i), BehaviorFlags::SUSPICIOUS | BehaviorFlags::OBFUSCATED);
                }
                correlate(r, &config, 30)
            })
            .unwrap();
        assert_eq!(hit.unwrap().category, AttackCategory::Backdoor);
    }

    #[test]
    fn events_outside_window_are_ignored() {
        let registry = ClientRegistry::new(10, 1000, 256);
        let config = CorrelationConfig::default();
        let hit = registry
            .with_client("c", 0, |r| {
                for i in 0..30 {
                    push_event(r, i, &format!("/p{}", i), 200, false);
                }
                correlate(r, &config, 10_000)
            })
            .unwrap();
        assert!(hit.is_none());
    }
}
