//! Rate & DoS Shaper (spec.md §4.5).
//!
//! A single sliding window of length `W` seconds with cap `R` (the
//! resolved Open Question from spec.md §9: the spec commits to one
//! sliding-window model rather than the source's conflicting per-second
//! and per-minute counters). A second, independent short burst window
//! only ever sets the `Aggressive` flag — it never denies on its own.

use crate::error::CoreError;
use crate::registry::{BehaviorFlags, ClientRecord};

#[derive(Debug, Clone, Copy)]
pub struct ShaperConfig {
    pub window_ms: u64,
    pub window_cap: u32,
    pub burst_window_ms: u64,
    pub burst_cap: u32,
    pub ban_duration_ms: u64,
    pub ban_threshold: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ShaperOutcome {
    pub aggressive: bool,
}

/// Applies the shaper to one admitted-so-far request. Must run after the
/// ban check (`record.is_blocked`) so that an active ban always wins
/// (spec.md §3 invariant: `blocked_until > now` denies regardless of other
/// signals).
pub fn apply(record: &mut ClientRecord, config: &ShaperConfig, now_ms: u64) -> Result<ShaperOutcome, CoreError> {
    if record.is_blocked(now_ms) {
        return Err(CoreError::Blocked);
    }

    drop_expired(&mut record.window, now_ms, config.window_ms);
    if record.window.len() as u32 >= config.window_cap {
        record.consecutive_denies += 1;
        if record.consecutive_denies >= config.ban_threshold {
            record.blocked_until_ms = now_ms + config.ban_duration_ms + ban_jitter_ms(config.ban_duration_ms);
        }
        return Err(CoreError::RateLimited);
    }
    record.window.push_back(now_ms);

    drop_expired(&mut record.burst_window, now_ms, config.burst_window_ms);
    record.burst_window.push_back(now_ms);
    let aggressive = record.burst_window.len() as u32 > config.burst_cap;
    if aggressive {
        record.flags.insert(BehaviorFlags::AGGRESSIVE);
    }

    record.consecutive_denies = 0;
    Ok(ShaperOutcome { aggressive })
}

/// A small random spread on top of the configured ban duration so many
/// clients banned in the same tick don't all retry at the exact same
/// instant.
fn ban_jitter_ms(ban_duration_ms: u64) -> u64 {
    use rand::Rng;
    let spread = (ban_duration_ms / 10).max(1);
    rand::thread_rng().gen_range(0..spread)
}

fn drop_expired(window: &mut std::collections::VecDeque<u64>, now_ms: u64, width_ms: u64) {
    let cutoff = now_ms.saturating_sub(width_ms);
    while matches!(window.front(), Some(&ts) if ts < cutoff) {
        window.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClientRegistry;

    fn config() -> ShaperConfig {
        ShaperConfig {
            window_ms: 1_000,
            window_cap: 5,
            burst_window_ms: 60_000,
            burst_cap: 100,
            ban_duration_ms: 2_000,
            ban_threshold: 5,
        }
    }

    #[test]
    fn admits_up_to_cap_then_denies() {
        let registry = ClientRegistry::new(10, 60_000, 16);
        let cfg = config();
        for i in 0..5u64 {
            registry
                .with_client("c", i * 10, |r| apply(r, &cfg, i * 10))
                .unwrap()
                .unwrap();
        }
        let sixth = registry.with_client("c", 60, |r| apply(r, &cfg, 60)).unwrap();
        assert!(matches!(sixth, Err(CoreError::RateLimited)));
    }

    #[test]
    fn ban_set_after_threshold_consecutive_denies() {
        let registry = ClientRegistry::new(10, 60_000, 16);
        let mut cfg = config();
        cfg.ban_threshold = 1;
        for i in 0..5u64 {
            registry.with_client("c", i, |r| apply(r, &cfg, i)).unwrap().ok();
        }
        // Sixth request is within the same 1s window -> denied, sets ban.
        let denied = registry.with_client("c", 5, |r| apply(r, &cfg, 5)).unwrap();
        assert!(matches!(denied, Err(CoreError::RateLimited)));
        let blocked = registry.with_client("c", 6, |r| apply(r, &cfg, 6)).unwrap();
        assert!(matches!(blocked, Err(CoreError::Blocked)));
    }

    #[test]
    fn window_slides_and_admits_again() {
        let registry = ClientRegistry::new(10, 60_000, 16);
        let cfg = config();
        for i in 0..5u64 {
            registry.with_client("c", i, |r| apply(r, &cfg, i)).unwrap().unwrap();
        }
        // After the window (1000ms) has fully elapsed, admits again.
        let later = registry.with_client("c", 2000, |r| apply(r, &cfg, 2000)).unwrap();
        assert!(later.is_ok());
    }

    #[test]
    fn burst_sets_aggressive_flag() {
        let registry = ClientRegistry::new(10, 60_000, 16);
        let mut cfg = config();
        cfg.window_cap = 1000;
        cfg.burst_cap = 2;
        for i in 0..4u64 {
            let _ = registry.with_client("c", i, |r| apply(r, &cfg, i)).unwrap();
        }
        registry.peek("c", |r| assert!(r.flags.contains(BehaviorFlags::AGGRESSIVE)));
    }
}
