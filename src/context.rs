//! Composition root (spec.md §9 Design Notes: "replace global mutable
//! state with an explicit context object constructed once at startup and
//! torn down in reverse order"). Every long-lived piece of pipeline state
//! lives here instead of behind `static`/`lazy_static` globals.

use std::sync::Arc;

use crate::audit::{AuditLog, AuditSink, FileAuditSink, NoopAuditSink};
use crate::config::Config;
use crate::registry::ClientRegistry;
use crate::signature::SignatureEngine;

pub struct Context {
    pub config: Config,
    pub registry: ClientRegistry,
    pub signatures: SignatureEngine,
    pub audit: AuditLog,
}

impl Context {
    pub fn build(config: Config) -> anyhow::Result<Context> {
        let sink: Box<dyn AuditSink> = if config.log_dir.is_empty() {
            Box::new(NoopAuditSink)
        } else {
            Box::new(FileAuditSink::new(
                &config.log_dir,
                config.max_log_file_size,
                config.max_log_files,
                config.sync_writes,
            )?)
        };
        let audit = AuditLog::from_env(&config.audit_secret_env_var, sink);

        let registry = ClientRegistry::new(
            config.registry_capacity,
            config.idle_ttl_seconds * 1000,
            config.history_size,
        );

        Ok(Context {
            registry,
            signatures: SignatureEngine::default_ruleset(),
            audit,
            config,
        })
    }
}

/// `Context` holds no raw OS handles of its own (the audit sink owns its
/// file, the registry owns only in-memory state), so teardown is just
/// Rust's ordinary field drop order — no manual shutdown sequencing
/// needed.
impl Drop for Context {
    fn drop(&mut self) {
        tracing::debug!("tearing down context");
    }
}

pub type SharedContext = Arc<Context>;
