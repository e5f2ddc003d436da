//! Behavior Analyzer (spec.md §4.6).
//!
//! Computes a feature vector over a configurable analysis window and
//! classifies the client as `Normal | Bot | Attack | Anomaly`. Results are
//! cached per client for a TTL unless the cached result was `Normal`, in
//! which case the cache is invalidated immediately (spec.md §4.6).

use crate::registry::{BehaviorFlags, ClassificationResult, Classification, ClientRecord};

#[derive(Debug, Clone, Copy)]
pub struct BehaviorConfig {
    pub analysis_window_ms: u64,
    pub cache_ttl_ms: u64,
    pub bot_regularity_threshold: f64,
    pub bot_rate_per_min: f64,
    pub attack_error_rate_per_min: f64,
    pub attack_unique_paths: usize,
    pub attack_rate_per_min: f64,
    pub anomaly_unique_methods: usize,
    pub anomaly_avg_size_bytes: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        BehaviorConfig {
            analysis_window_ms: 60 * 60 * 1000,
            cache_ttl_ms: 60_000,
            bot_regularity_threshold: 0.9,
            bot_rate_per_min: 30.0,
            attack_error_rate_per_min: 10.0,
            attack_unique_paths: 50,
            attack_rate_per_min: 20.0,
            anomaly_unique_methods: 3,
            anomaly_avg_size_bytes: 50.0 * 1024.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Features {
    rate_per_min: f64,
    error_rate_per_min: f64,
    avg_request_size: f64,
    unique_paths: usize,
    unique_methods: usize,
    regularity: f64,
}

fn compute_features(record: &ClientRecord, config: &BehaviorConfig, now_ms: u64) -> Features {
    let window_start = now_ms.saturating_sub(config.analysis_window_ms);
    let recent: Vec<_> = record
        .history
        .iter()
        .filter(|h| h.timestamp_ms >= window_start)
        .collect();

    let count = recent.len() as f64;
    let minutes = (config.analysis_window_ms as f64 / 60_000.0).max(1.0 / 60.0);
    let rate_per_min = count / minutes;

    let errors = recent.iter().filter(|h| h.status >= 400 || h.malformed).count() as f64;
    let error_rate_per_min = errors / minutes;

    let avg_request_size = if recent.is_empty() {
        0.0
    } else {
        recent.iter().map(|h| h.size as f64).sum::<f64>() / count
    };

    let unique_paths = recent.iter().map(|h| h.path.as_str()).collect::<std::collections::HashSet<_>>().len();
    let unique_methods = recent.iter().map(|h| h.method).collect::<std::collections::HashSet<_>>().len();

    let regularity = timing_regularity(&record.intervals_ms);

    Features {
        rate_per_min,
        error_rate_per_min,
        avg_request_size,
        unique_paths,
        unique_methods,
        regularity,
    }
}

/// `1 / (1 + CV)` where CV is the coefficient of variation of the
/// inter-arrival intervals. Values near 1 indicate machine-regular
/// cadence (spec.md §4.6).
fn timing_regularity(intervals: &std::collections::VecDeque<u64>) -> f64 {
    if intervals.len() < 2 {
        return 0.0;
    }
    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<u64>() as f64 / n;
    if mean == 0.0 {
        return 1.0;
    }
    let variance = intervals.iter().map(|&x| {
        let d = x as f64 - mean;
        d * d
    }).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let cv = stddev / mean;
    1.0 / (1.0 + cv)
}

fn classify(features: &Features, config: &BehaviorConfig) -> ClassificationResult {
    if features.regularity > config.bot_regularity_threshold && features.rate_per_min > config.bot_rate_per_min {
        return ClassificationResult {
            classification: Classification::Bot,
            confidence: features.regularity,
            computed_at_ms: 0,
        };
    }
    if features.error_rate_per_min > config.attack_error_rate_per_min
        || (features.unique_paths > config.attack_unique_paths && features.rate_per_min > config.attack_rate_per_min)
    {
        let confidence = (features.error_rate_per_min / (config.attack_error_rate_per_min * 2.0)).min(1.0).max(0.5);
        return ClassificationResult {
            classification: Classification::Attack,
            confidence,
            computed_at_ms: 0,
        };
    }
    if features.unique_methods > config.anomaly_unique_methods || features.avg_request_size > config.anomaly_avg_size_bytes {
        return ClassificationResult {
            classification: Classification::Anomaly,
            confidence: 0.6,
            computed_at_ms: 0,
        };
    }
    ClassificationResult {
        classification: Classification::Normal,
        confidence: 0.0,
        computed_at_ms: 0,
    }
}

/// Returns the (possibly cached) classification, updating the cache as a
/// side effect. Stale caches (older than `cache_ttl_ms`, or whose last
/// result was `Normal`) are recomputed (spec.md §3 invariant).
pub fn analyze(record: &mut ClientRecord, config: &BehaviorConfig, now_ms: u64) -> ClassificationResult {
    if let Some(cached) = record.last_classification {
        let fresh = now_ms.saturating_sub(cached.computed_at_ms) < config.cache_ttl_ms;
        let was_normal = cached.classification == Classification::Normal;
        if fresh && !was_normal {
            return cached;
        }
    }
    let features = compute_features(record, config, now_ms);
    let mut result = classify(&features, config);
    result.computed_at_ms = now_ms;
    if result.classification == Classification::Bot {
        record.flags.insert(BehaviorFlags::AUTOMATED);
    }
    record.last_classification = Some(result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClientRegistry, HistoryEntry};
    use crate::request::Method;

    fn push(record: &mut ClientRecord, ts: u64, status: u16, size: usize, method: Method) {
        record.push_history(HistoryEntry {
            method,
            path: format!("/p{}", ts),
            size,
            status,
            timestamp_ms: ts,
            malformed: false,
        });
    }

    #[test]
    fn normal_by_default() {
        let registry = ClientRegistry::new(10, 60_000, 256);
        let config = BehaviorConfig::default();
        let result = registry
            .with_client("c", 0, |r| {
                push(r, 0, 200, 100, Method::Get);
                analyze(r, &config, 0)
            })
            .unwrap();
        assert_eq!(result.classification, Classification::Normal);
    }

    #[test]
    fn anomaly_on_many_methods() {
        let registry = ClientRegistry::new(10, 60_000, 256);
        let config = BehaviorConfig::default();
        let result = registry
            .with_client("c", 0, |r| {
                for (i, m) in [Method::Get, Method::Post, Method::Put, Method::Delete].iter().enumerate() {
                    push(r, i as u64, 200, 100, *m);
                }
                analyze(r, &config, 10)
            })
            .unwrap();
        assert_eq!(result.classification, Classification::Anomaly);
    }

    #[test]
    fn anomaly_on_large_average_size() {
        let registry = ClientRegistry::new(10, 60_000, 256);
        let config = BehaviorConfig::default();
        let result = registry
            .with_client("c", 0, |r| {
                push(r, 0, 200, 60 * 1024, Method::Get);
                analyze(r, &config, 10)
            })
            .unwrap();
        assert_eq!(result.classification, Classification::Anomaly);
    }

    #[test]
    fn timing_regularity_is_one_for_constant_interval() {
        let intervals: std::collections::VecDeque<u64> = [100, 100, 100, 100].into_iter().collect();
        assert!((timing_regularity(&intervals) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cache_reused_within_ttl_for_non_normal() {
        let registry = ClientRegistry::new(10, 60_000, 256);
        let config = BehaviorConfig::default();
        registry
            .with_client("c", 0, |r| {
                push(r, 0, 200, 60 * 1024, Method::Get);
                analyze(r, &config, 10);
            })
            .unwrap();
        let second = registry.with_client("c", 0, |r| analyze(r, &config, 15)).unwrap();
        assert_eq!(second.classification, Classification::Anomaly);
        assert_eq!(second.computed_at_ms, 10);
    }
}
