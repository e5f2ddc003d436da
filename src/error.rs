//! Error kinds surfaced by the pipeline (spec.md §7).
//!
//! Every variant maps to exactly one reason code and one logging severity;
//! `CoreError::severity` and `CoreError::reason_code` are the single source
//! of truth the arbiter and audit log consult, so the mapping never drifts
//! between call sites.

use thiserror::Error;

use crate::audit::Severity;
use crate::request::{AttackCategory, ReasonCode};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request exceeds configured size limit: {0}")]
    TooLarge(String),

    #[error("invalid percent-encoding in request target")]
    InvalidEncoding,

    #[error("path traversal attempt rejected")]
    PathTraversal,

    #[error("extension not in allowed set")]
    DisallowedExtension,

    #[error("signature match: {category:?} (rule {rule_id})")]
    SignatureHit {
        category: AttackCategory,
        rule_id: u32,
        confidence: f64,
    },

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("client is within an active ban window")]
    Blocked,

    #[error("client registry at capacity")]
    CapacityExhausted,

    #[error("internal invariant violation: {0}")]
    InternalError(String),
}

impl CoreError {
    /// Logging severity per spec.md §7's propagation policy.
    pub fn severity(&self) -> Severity {
        match self {
            CoreError::Malformed(_) => Severity::Warning,
            CoreError::TooLarge(_) => Severity::Warning,
            CoreError::InvalidEncoding => Severity::High,
            CoreError::PathTraversal => Severity::High,
            CoreError::DisallowedExtension => Severity::High,
            CoreError::SignatureHit { .. } => Severity::High,
            CoreError::RateLimited => Severity::Warning,
            CoreError::Blocked => Severity::Info,
            CoreError::CapacityExhausted => Severity::Critical,
            CoreError::InternalError(_) => Severity::Critical,
        }
    }

    pub fn reason_code(&self) -> ReasonCode {
        match self {
            CoreError::Malformed(_) => ReasonCode::Malformed,
            CoreError::TooLarge(_) => ReasonCode::TooLarge,
            CoreError::InvalidEncoding => ReasonCode::InvalidEncoding,
            CoreError::PathTraversal => ReasonCode::PathTraversal,
            CoreError::DisallowedExtension => ReasonCode::DisallowedExtension,
            CoreError::SignatureHit { .. } => ReasonCode::SignatureHit,
            CoreError::RateLimited => ReasonCode::RateLimited,
            CoreError::Blocked => ReasonCode::Blocked,
            CoreError::CapacityExhausted => ReasonCode::CapacityExhausted,
            CoreError::InternalError(_) => ReasonCode::InternalError,
        }
    }

    /// Whether this error counts as an "attack" for `ClientRecord::attack_count`.
    pub fn is_attack(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidEncoding
                | CoreError::PathTraversal
                | CoreError::DisallowedExtension
                | CoreError::SignatureHit { .. }
        )
    }

    pub fn attack_category(&self) -> Option<AttackCategory> {
        match self {
            CoreError::PathTraversal => Some(AttackCategory::PathTraversal),
            CoreError::SignatureHit { category, .. } => Some(*category),
            _ => None,
        }
    }
}
