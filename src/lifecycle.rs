//! Process lifecycle hooks (spec.md §9 Design Notes: startup hardening and
//! shutdown are collaborator concerns, but the core exposes a trait so a
//! caller can plug in OS-specific behavior without the pipeline knowing
//! about it).

/// Hooks a host process can implement around the pipeline's lifetime.
/// The default no-op implementation is what `main.rs` uses directly;
/// sandboxed or containerized deployments can supply a stricter one.
pub trait Lifecycle: Send + Sync {
    fn on_start(&self) {}
    fn on_shutdown(&self) {}
    /// Drop privileges / apply OS-level hardening (chroot, seccomp, rlimits).
    /// Explicitly out of scope for the pipeline itself (spec.md Non-goals);
    /// this is the seam a collaborator hooks into.
    fn harden_process(&self) {}
}

pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_lifecycle_is_callable() {
        let lifecycle = NoopLifecycle;
        lifecycle.on_start();
        lifecycle.harden_process();
        lifecycle.on_shutdown();
    }
}
