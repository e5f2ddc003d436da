//! Client Registry (spec.md §4.1) — the shared keyed table mapping a
//! client identity to its tracking record.
//!
//! A single `parking_lot::Mutex` guards the whole table, matching the
//! spec's "all mutation is serialized by a single lock" design and the
//! teacher's `AuditTree`/`universal-audit` style of using `parking_lot`
//! for short, non-async critical sections rather than `tokio::sync`.

use std::collections::{HashMap, HashSet, VecDeque};

use bitflags::bitflags;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::request::{AttackCategory, Method};

bitflags! {
    /// Sticky per-client behavioral markers. `SUSPICIOUS`, `AUTOMATED`,
    /// `AGGRESSIVE`, and `MALICIOUS` come from spec.md's glossary;
    /// `OBFUSCATED` is named only in §4.7's backdoor detector (a request
    /// whose percent-decoded target differs from its raw form — the
    /// classic way a payload is hidden from naive substring matching).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BehaviorFlags: u8 {
        const SUSPICIOUS  = 0b0_0001;
        const AUTOMATED   = 0b0_0010;
        const AGGRESSIVE  = 0b0_0100;
        const MALICIOUS   = 0b0_1000;
        const OBFUSCATED  = 0b1_0000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Normal,
    Bot,
    Attack,
    Anomaly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub classification: Classification,
    pub confidence: f64,
    pub computed_at_ms: u64,
}

/// One entry in a client's recent-request ring (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub method: Method,
    pub path: String,
    pub size: usize,
    pub status: u16,
    pub timestamp_ms: u64,
    pub malformed: bool,
}

/// A correlation-relevant event, recorded alongside the history ring but
/// kept separately so the Correlation Engine (spec.md §4.7) doesn't have to
/// re-derive event semantics from raw history entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationEvent {
    pub path: String,
    pub status: u16,
    pub timestamp_ms: u64,
    pub malformed: bool,
    pub flags: BehaviorFlags,
}

/// All per-identity tracked state (spec.md §3 data model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub identity: String,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub request_count: u64,
    pub error_count: u64,
    pub attack_count: u64,
    pub blocked_until_ms: u64,
    pub consecutive_denies: u32,

    /// Sliding-window request timestamps, strictly increasing, bounded to
    /// the configured cap (spec.md §4.5).
    pub window: VecDeque<u64>,
    /// Short burst-window timestamps (independent of `window`).
    pub burst_window: VecDeque<u64>,

    pub method_counts: HashMap<Method, u64>,
    pub status_counts: HashMap<u16, u64>,
    pub path_set: HashSet<String>,
    pub path_set_cap: usize,

    pub history: VecDeque<HistoryEntry>,
    pub history_cap: usize,

    pub correlation_events: VecDeque<CorrelationEvent>,
    pub correlation_cap: usize,

    /// Inter-arrival intervals in ms, recorded only once
    /// `request_count >= 2` (spec.md §9 resolved off-by-one).
    pub intervals_ms: VecDeque<u64>,

    pub flags: BehaviorFlags,
    pub last_classification: Option<ClassificationResult>,
}

impl ClientRecord {
    fn new(identity: String, now_ms: u64, history_cap: usize) -> ClientRecord {
        ClientRecord {
            identity,
            first_seen_ms: now_ms,
            last_seen_ms: now_ms,
            request_count: 0,
            error_count: 0,
            attack_count: 0,
            blocked_until_ms: 0,
            consecutive_denies: 0,
            window: VecDeque::new(),
            burst_window: VecDeque::new(),
            method_counts: HashMap::new(),
            status_counts: HashMap::new(),
            path_set: HashSet::new(),
            path_set_cap: history_cap.max(64),
            history: VecDeque::new(),
            history_cap,
            correlation_events: VecDeque::new(),
            correlation_cap: history_cap,
            intervals_ms: VecDeque::new(),
            flags: BehaviorFlags::empty(),
            last_classification: None,
        }
    }

    pub fn is_blocked(&self, now_ms: u64) -> bool {
        self.blocked_until_ms > now_ms
    }

    /// Record the arrival of a request. Must be called at most once per
    /// admitted request, before stage-specific bookkeeping, so that
    /// `request_count` only ever counts requests that made it past
    /// cancellation (spec.md §5 "partial-read bodies do not advance
    /// request_count").
    pub fn record_arrival(&mut self, now_ms: u64) {
        if self.request_count >= 1 {
            if let Some(&last) = self.history.back().map(|h| &h.timestamp_ms) {
                let interval = now_ms.saturating_sub(last);
                self.intervals_ms.push_back(interval);
                if self.intervals_ms.len() > self.history_cap {
                    self.intervals_ms.pop_front();
                }
            }
        }
        self.request_count += 1;
        self.last_seen_ms = now_ms;
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        *self.method_counts.entry(entry.method).or_insert(0) += 1;
        *self.status_counts.entry(entry.status).or_insert(0) += 1;
        if self.path_set.len() < self.path_set_cap || self.path_set.contains(&entry.path) {
            self.path_set.insert(entry.path.clone());
        }
        self.history.push_back(entry);
        while self.history.len() > self.history_cap {
            self.history.pop_front();
        }
    }

    pub fn push_correlation_event(&mut self, event: CorrelationEvent) {
        self.correlation_events.push_back(event);
        while self.correlation_events.len() > self.correlation_cap {
            self.correlation_events.pop_front();
        }
    }
}

/// The shared keyed table. Fixed maximum `capacity`; insertion at capacity
/// either evicts the oldest idle-and-unbanned record or fails closed with
/// `CapacityExhausted` (spec.md §3 invariants, §5 back-pressure policy).
pub struct ClientRegistry {
    inner: Mutex<HashMap<String, ClientRecord>>,
    capacity: usize,
    idle_ttl_ms: u64,
    history_cap: usize,
}

impl ClientRegistry {
    pub fn new(capacity: usize, idle_ttl_ms: u64, history_cap: usize) -> ClientRegistry {
        ClientRegistry {
            inner: Mutex::new(HashMap::new()),
            capacity,
            idle_ttl_ms,
            history_cap,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find or insert the record for `identity`, then run `f` on it while
    /// the registry lock is held. This keeps the "short-lived exclusive
    /// reference guarded by the registry lock" shape from spec.md §3
    /// ownership rules without leaking a guard type across the pipeline.
    pub fn with_client<F, T>(&self, identity: &str, now_ms: u64, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut ClientRecord) -> T,
    {
        let mut guard = self.inner.lock();
        if !guard.contains_key(identity) {
            if guard.len() >= self.capacity {
                self.evict_one(&mut guard, now_ms)
                    .ok_or(CoreError::CapacityExhausted)?;
            }
            guard.insert(
                identity.to_string(),
                ClientRecord::new(identity.to_string(), now_ms, self.history_cap),
            );
        }
        let record = guard.get_mut(identity).expect("just inserted or present");
        Ok(f(record))
    }

    /// Read-only access, without inserting a new record for unknown
    /// identities.
    pub fn peek<F, T>(&self, identity: &str, f: F) -> Option<T>
    where
        F: FnOnce(&ClientRecord) -> T,
    {
        let guard = self.inner.lock();
        guard.get(identity).map(f)
    }

    fn evict_one(&self, guard: &mut HashMap<String, ClientRecord>, now_ms: u64) -> Option<()> {
        let victim = guard
            .values()
            .filter(|r| r.blocked_until_ms <= now_ms)
            .min_by_key(|r| r.last_seen_ms)
            .map(|r| r.identity.clone())?;
        guard.remove(&victim);
        Some(())
    }

    /// Amortized sweep evicting idle, unbanned records (spec.md §4.1).
    /// Intended to be invoked periodically by a maintenance tick.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let mut guard = self.inner.lock();
        let stale: Vec<String> = guard
            .values()
            .filter(|r| {
                now_ms.saturating_sub(r.last_seen_ms) > self.idle_ttl_ms && r.blocked_until_ms <= now_ms
            })
            .map(|r| r.identity.clone())
            .collect();
        let count = stale.len();
        for id in stale {
            guard.remove(&id);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_or_insert_creates_once() {
        let registry = ClientRegistry::new(10, 1000, 16);
        registry
            .with_client("1.2.3.4", 0, |r| r.record_arrival(0))
            .unwrap();
        registry
            .with_client("1.2.3.4", 10, |r| r.record_arrival(10))
            .unwrap();
        assert_eq!(registry.len(), 1);
        registry.peek("1.2.3.4", |r| assert_eq!(r.request_count, 2));
    }

    #[test]
    fn capacity_exhausted_fails_closed() {
        let registry = ClientRegistry::new(1, 1000, 16);
        registry.with_client("a", 0, |r| r.record_arrival(0)).unwrap();
        // "a" is not banned and is the only record but also the only one,
        // so a second distinct identity must evict it rather than fail,
        // since it is stale relative to the insertion attempt only if
        // last_seen differs; use a blocked record to force exhaustion.
        registry
            .with_client("a", 0, |r| r.blocked_until_ms = 1_000_000)
            .unwrap();
        let result = registry.with_client("b", 1, |r| r.record_arrival(1));
        assert!(matches!(result, Err(CoreError::CapacityExhausted)));
    }

    #[test]
    fn sweep_evicts_idle_unbanned() {
        let registry = ClientRegistry::new(10, 100, 16);
        registry.with_client("a", 0, |r| r.record_arrival(0)).unwrap();
        let evicted = registry.sweep(1000);
        assert_eq!(evicted, 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn sweep_keeps_banned_clients() {
        let registry = ClientRegistry::new(10, 100, 16);
        registry
            .with_client("a", 0, |r| {
                r.record_arrival(0);
                r.blocked_until_ms = 5000;
            })
            .unwrap();
        let evicted = registry.sweep(1000);
        assert_eq!(evicted, 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn interval_recorded_only_from_second_request() {
        let registry = ClientRegistry::new(10, 1000, 16);
        registry
            .with_client("a", 0, |r| {
                r.record_arrival(0);
                r.push_history(HistoryEntry {
                    method: Method::Get,
                    path: "/".to_string(),
                    size: 0,
                    status: 200,
                    timestamp_ms: 0,
                    malformed: false,
                });
            })
            .unwrap();
        registry.peek("a", |r| assert!(r.intervals_ms.is_empty()));
        registry
            .with_client("a", 50, |r| {
                r.record_arrival(50);
            })
            .unwrap();
        registry.peek("a", |r| assert_eq!(r.intervals_ms.len(), 1));
    }

    #[test]
    fn attack_category_roundtrip() {
        let cat = AttackCategory::SqlInjection;
        assert_eq!(cat, AttackCategory::SqlInjection);
    }
}
