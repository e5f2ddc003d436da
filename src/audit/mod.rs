//! Audit Log (spec.md §4.8).
//!
//! An append-only, MAC-chained, rotating log. Grounded in the relay
//! storage crate's `AppendLog` (sequence counter, size-triggered rotation
//! into timestamped files, an in-memory index rebuilt at startup) but
//! replaces its `DefaultHasher` checksum with a real HMAC-SHA256 chain
//! over `prev_mac || record_bytes`, so tampering with or reordering any
//! record is detectable (spec.md §4.8 tamper-evidence requirement).

mod sink;

pub use sink::{AuditSink, FileAuditSink, NoopAuditSink};

use std::sync::atomic::{AtomicU64, Ordering};

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub event_type: String,
    pub severity: Severity,
    pub source: String,
    pub target: String,
    /// Free-form detail, sanitized before being stored (§`sanitize`).
    pub details: String,
    /// Hex-encoded HMAC over `prev_mac || canonical(record without mac)`.
    pub mac: String,
}

/// Strip CR/LF and non-printable bytes so a forged record can't inject
/// fake log lines into a text-rendered audit trail (spec.md §4.8).
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else if c.is_control() { '\u{fffd}' } else { c })
        .collect()
}

fn canonical_bytes(record: &AuditRecord) -> Vec<u8> {
    format!(
        "{}|{}|{}|{:?}|{}|{}|{}",
        record.sequence,
        record.timestamp_ms,
        record.event_type,
        record.severity,
        record.source,
        record.target,
        record.details
    )
    .into_bytes()
}

/// The audit log's operating mode. Without a configured secret the log
/// still runs, but in-memory only and at `Severity::Critical` (spec.md §9
/// resolved Open Question: no hard-coded fallback secret, no startup
/// failure, no silent loss of the audit trail).
enum Mode {
    Keyed { key: Zeroizing<Vec<u8>> },
    Degraded,
}

struct ChainState {
    prev_mac: Vec<u8>,
}

pub struct AuditLog {
    mode: Mode,
    sink: Box<dyn AuditSink>,
    sequence: AtomicU64,
    chain: Mutex<ChainState>,
    memory: Mutex<Vec<AuditRecord>>,
}

impl AuditLog {
    /// Build the log from an environment variable name (spec.md §6's
    /// `audit_secret_env_var`). Missing or empty values fall back to
    /// degraded mode rather than failing startup.
    pub fn from_env(env_var: &str, sink: Box<dyn AuditSink>) -> AuditLog {
        match std::env::var(env_var) {
            Ok(secret) if !secret.is_empty() => {
                tracing::info!(env_var, "audit log running with HMAC chaining enabled");
                AuditLog::keyed(secret.into_bytes(), sink)
            }
            _ => {
                tracing::warn!(
                    env_var,
                    "no audit secret configured; running in degraded in-memory audit mode"
                );
                AuditLog::degraded(sink)
            }
        }
    }

    pub fn keyed(key: Vec<u8>, sink: Box<dyn AuditSink>) -> AuditLog {
        AuditLog {
            mode: Mode::Keyed { key: Zeroizing::new(key) },
            sink,
            sequence: AtomicU64::new(0),
            chain: Mutex::new(ChainState { prev_mac: Vec::new() }),
            memory: Mutex::new(Vec::new()),
        }
    }

    /// The configured sink is discarded in favor of `NoopAuditSink`:
    /// degraded mode never touches disk, only the in-memory buffer.
    pub fn degraded(_sink: Box<dyn AuditSink>) -> AuditLog {
        AuditLog {
            mode: Mode::Degraded,
            sink: Box::new(NoopAuditSink),
            sequence: AtomicU64::new(0),
            chain: Mutex::new(ChainState { prev_mac: Vec::new() }),
            memory: Mutex::new(Vec::new()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.mode, Mode::Degraded)
    }

    /// Append one record. The `details` field is sanitized before MAC
    /// computation so persisted and verified bytes always match.
    pub fn record(
        &self,
        timestamp_ms: u64,
        event_type: &str,
        severity: Severity,
        source: &str,
        target: &str,
        details: &str,
    ) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut record = AuditRecord {
            sequence,
            timestamp_ms,
            event_type: event_type.to_string(),
            severity,
            source: source.to_string(),
            target: target.to_string(),
            details: sanitize(details),
            mac: String::new(),
        };

        match &self.mode {
            Mode::Keyed { key } => {
                let mut chain = self.chain.lock();
                let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
                mac.update(&chain.prev_mac);
                mac.update(&canonical_bytes(&record));
                let tag = mac.finalize().into_bytes();
                record.mac = hex::encode(tag);
                chain.prev_mac = tag.to_vec();
                drop(chain);
                if let Err(e) = self.sink.write(&record) {
                    tracing::error!(error = %e, "audit sink write failed");
                }
            }
            Mode::Degraded => {
                self.memory.lock().push(record);
            }
        }
    }

    /// Drain the in-memory buffer (degraded mode only — keyed mode relies
    /// on the sink's own persistence).
    pub fn drain_memory(&self) -> Vec<AuditRecord> {
        std::mem::take(&mut self.memory.lock())
    }

    /// Walk a sequence of records and verify the HMAC chain, returning the
    /// index of the first broken link if any (spec.md §4.8 integrity
    /// check). `None` means the whole chain verifies.
    pub fn verify_chain(key: &[u8], records: &[AuditRecord]) -> Option<usize> {
        let mut prev_mac: Vec<u8> = Vec::new();
        for (i, record) in records.iter().enumerate() {
            let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(&prev_mac);
            mac.update(&canonical_bytes(record));
            let expected = hex::encode(mac.finalize().into_bytes());
            if expected != record.mac {
                return Some(i);
            }
            prev_mac = hex::decode(&record.mac).unwrap_or_default();
        }
        None
    }
}
