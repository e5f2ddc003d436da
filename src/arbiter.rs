//! Decision Arbiter (spec.md §4.9).
//!
//! Composes the outputs of every upstream stage into one `Verdict`,
//! consulting a `SecurityLevel`-keyed table for how aggressively to act on
//! ambiguous (`Medium`/`Low` confidence) behavior and correlation signals.
//! Grounded in `forensic_firewall/cue_engine.rs`'s decision-aggregation
//! step, which folds several rule evaluations into one action.

use crate::config::SecurityLevel;
use crate::correlation::CorrelationHit;
use crate::error::CoreError;
use crate::registry::{BehaviorFlags, Classification};
use crate::request::{Confidence, ReasonCode, Verdict};

/// Per-level policy: the minimum confidence at which an ambiguous
/// behavior/correlation signal is escalated to an outright deny, and the
/// ban duration applied once a deny fires (spec.md §4.9 table).
#[derive(Debug, Clone, Copy)]
pub struct LevelPolicy {
    pub behavior_deny_threshold: Confidence,
    pub correlation_deny_threshold: Confidence,
    pub ban_seconds: u32,
}

pub fn policy_for(level: SecurityLevel) -> LevelPolicy {
    match level {
        SecurityLevel::Minimal => LevelPolicy {
            behavior_deny_threshold: Confidence::High,
            correlation_deny_threshold: Confidence::High,
            ban_seconds: 60,
        },
        SecurityLevel::Standard => LevelPolicy {
            behavior_deny_threshold: Confidence::High,
            correlation_deny_threshold: Confidence::Medium,
            ban_seconds: 300,
        },
        SecurityLevel::High => LevelPolicy {
            behavior_deny_threshold: Confidence::Medium,
            correlation_deny_threshold: Confidence::Medium,
            ban_seconds: 900,
        },
        SecurityLevel::Paranoid => LevelPolicy {
            behavior_deny_threshold: Confidence::Low,
            correlation_deny_threshold: Confidence::Low,
            ban_seconds: 3600,
        },
    }
}

/// The arbiter's view of everything upstream decided for this request,
/// already past the hard stop/deny points (parser/validator/signature/
/// shaper errors short-circuit before the arbiter is even consulted).
pub struct ArbiterInput {
    pub behavior: Option<(Classification, f64)>,
    pub correlation: Option<CorrelationHit>,
    pub flags: BehaviorFlags,
}

/// Whether a hard pipeline error (parser/validator/signature/shaper) is
/// one of the table's named deny triggers at `level` (spec.md §4.9: at
/// `Minimal` the arbiter is monitor-only and denies on nothing except an
/// enforced ban or registry exhaustion, which are operational limits
/// rather than policy signals).
fn error_denies_at_level(error: &CoreError, level: SecurityLevel) -> bool {
    if matches!(error, CoreError::Blocked | CoreError::CapacityExhausted) {
        return true;
    }
    !matches!(level, SecurityLevel::Minimal)
}

/// Turn a hard pipeline error into its terminal `Verdict`, consulting the
/// security-level policy table for whether this class of error denies at
/// all (spec.md §4.9). Bans/capacity exhaustion always enforce regardless
/// of level; every other hard-error category only denies from `Standard`
/// upward.
pub fn verdict_for_error(error: &CoreError, level: SecurityLevel) -> Verdict {
    if !error_denies_at_level(error, level) {
        return Verdict::allow();
    }

    let mut verdict = Verdict::deny(error.reason_code());
    if let Some(category) = error.attack_category() {
        verdict = verdict.with_category(category);
    }
    if let CoreError::SignatureHit { confidence, .. } = error {
        verdict = verdict.with_confidence(Confidence::from_score(*confidence));
    }
    if matches!(error, CoreError::RateLimited | CoreError::Blocked) {
        verdict = verdict.with_ban(60);
    }
    verdict
}

/// Arbitrate over behavior/correlation signals once the hard stages have
/// all passed. Follows spec.md §4.9's table literally: `Minimal` and
/// `Standard` never deny on these ambiguous signals at all (`Standard`'s
/// deny set is hard pipeline errors only, handled by `verdict_for_error`);
/// `High` adds aggressive/attack-behavior/correlation; `Paranoid` adds
/// bot/anomaly classifications and the sticky suspicious/automated flags.
pub fn arbitrate(input: &ArbiterInput, level: SecurityLevel) -> Verdict {
    if matches!(level, SecurityLevel::Minimal | SecurityLevel::Standard) {
        return Verdict::allow();
    }
    let policy = policy_for(level);

    if let Some(hit) = input.correlation {
        return Verdict::deny(ReasonCode::CorrelationHit)
            .with_category(hit.category)
            .with_confidence(hit.confidence)
            .with_ban(policy.ban_seconds);
    }

    if input.flags.contains(BehaviorFlags::AGGRESSIVE) {
        return Verdict::deny(ReasonCode::AggressiveBehavior).with_ban(policy.ban_seconds.min(120));
    }

    if let Some((classification, score)) = input.behavior {
        let confidence = Confidence::from_score(score);
        if classification == Classification::Attack && confidence >= Confidence::Medium {
            return Verdict::deny(ReasonCode::BehaviorAttack).with_confidence(confidence).with_ban(policy.ban_seconds);
        }
        if matches!(level, SecurityLevel::Paranoid) {
            let reason = match classification {
                Classification::Bot => Some(ReasonCode::BehaviorBot),
                Classification::Anomaly => Some(ReasonCode::BehaviorAnomaly),
                _ => None,
            };
            if let Some(reason) = reason {
                return Verdict::deny(reason).with_confidence(confidence).with_ban(policy.ban_seconds);
            }
        }
    }

    if matches!(level, SecurityLevel::Paranoid) {
        if input.flags.contains(BehaviorFlags::SUSPICIOUS) {
            return Verdict::deny(ReasonCode::SuspiciousFlag).with_ban(policy.ban_seconds);
        }
        if input.flags.contains(BehaviorFlags::AUTOMATED) {
            return Verdict::deny(ReasonCode::AutomatedFlag).with_ban(policy.ban_seconds);
        }
    }

    Verdict::allow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::AttackCategory;

    #[test]
    fn standard_level_allows_medium_behavior_signal() {
        let input = ArbiterInput {
            behavior: Some((Classification::Attack, 0.5)),
            correlation: None,
            flags: BehaviorFlags::empty(),
        };
        let verdict = arbitrate(&input, SecurityLevel::Standard);
        assert!(verdict.allow);
    }

    #[test]
    fn high_level_denies_medium_behavior_signal() {
        let input = ArbiterInput {
            behavior: Some((Classification::Attack, 0.5)),
            correlation: None,
            flags: BehaviorFlags::empty(),
        };
        let verdict = arbitrate(&input, SecurityLevel::High);
        assert!(!verdict.allow);
        assert_eq!(verdict.reason, ReasonCode::BehaviorAttack);
    }

    #[test]
    fn correlation_hit_denies_at_high_level_but_not_standard() {
        let input = ArbiterInput {
            behavior: None,
            correlation: Some(CorrelationHit {
                category: AttackCategory::Scan,
                confidence: Confidence::Medium,
                score: 0.5,
            }),
            flags: BehaviorFlags::empty(),
        };
        assert!(arbitrate(&input, SecurityLevel::Standard).allow);

        let verdict = arbitrate(&input, SecurityLevel::High);
        assert!(!verdict.allow);
        assert_eq!(verdict.reason, ReasonCode::CorrelationHit);
    }

    #[test]
    fn bot_classification_only_denies_at_paranoid() {
        let input = ArbiterInput {
            behavior: Some((Classification::Bot, 0.5)),
            correlation: None,
            flags: BehaviorFlags::empty(),
        };
        assert!(arbitrate(&input, SecurityLevel::High).allow);

        let verdict = arbitrate(&input, SecurityLevel::Paranoid);
        assert!(!verdict.allow);
        assert_eq!(verdict.reason, ReasonCode::BehaviorBot);
    }

    #[test]
    fn suspicious_flag_only_denies_at_paranoid() {
        let input = ArbiterInput {
            behavior: None,
            correlation: None,
            flags: BehaviorFlags::SUSPICIOUS,
        };
        assert!(arbitrate(&input, SecurityLevel::High).allow);

        let verdict = arbitrate(&input, SecurityLevel::Paranoid);
        assert!(!verdict.allow);
        assert_eq!(verdict.reason, ReasonCode::SuspiciousFlag);
    }

    #[test]
    fn error_verdict_carries_category_and_confidence() {
        let error = CoreError::SignatureHit {
            category: AttackCategory::SqlInjection,
            rule_id: 1,
            confidence: 0.9,
        };
        let verdict = verdict_for_error(&error, SecurityLevel::Standard);
        assert!(!verdict.allow);
        assert_eq!(verdict.category, Some(AttackCategory::SqlInjection));
        assert_eq!(verdict.confidence, Some(Confidence::High));
    }

    #[test]
    fn minimal_level_is_monitor_only_for_hard_errors() {
        let error = CoreError::SignatureHit {
            category: AttackCategory::SqlInjection,
            rule_id: 1,
            confidence: 0.9,
        };
        let verdict = verdict_for_error(&error, SecurityLevel::Minimal);
        assert!(verdict.allow);
    }

    #[test]
    fn active_ban_still_enforces_at_minimal_level() {
        let verdict = verdict_for_error(&CoreError::Blocked, SecurityLevel::Minimal);
        assert!(!verdict.allow);
        assert_eq!(verdict.reason, ReasonCode::Blocked);
    }

    #[test]
    fn aggressive_flag_denies_at_high_but_not_standard() {
        let input = ArbiterInput {
            behavior: None,
            correlation: None,
            flags: BehaviorFlags::AGGRESSIVE,
        };
        assert!(arbitrate(&input, SecurityLevel::Standard).allow);

        let verdict = arbitrate(&input, SecurityLevel::High);
        assert!(!verdict.allow);
        assert_eq!(verdict.reason, ReasonCode::AggressiveBehavior);
    }
}
