//! Warning bookkeeping for the propagation engine.
//!
//! Some conditions (snapping a tiny edge angle to zero, for instance) are
//! reported only the first time they occur so that building a large lattice
//! does not flood the log. The "already reported" state lives in a
//! [`Diagnostics`] value that callers pass in explicitly. A single
//! process-wide instance is available through [`Diagnostics::global`] for
//! the convenience constructors; its once-only flags last for the lifetime
//! of the process.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    /// An angle below [`crate::SMALL_ANGLE_THRESHOLD`] was set to zero.
    AngleSnapped,
    /// Newton alignment failed and the bracketing search was used instead.
    AlignmentFallback,
    /// The bracketing search itself stopped on its step bound.
    AlignmentNotConverged,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WarningKind::AngleSnapped => "angle-snapped",
            WarningKind::AlignmentFallback => "alignment-fallback",
            WarningKind::AlignmentNotConverged => "alignment-not-converged",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    counts: Mutex<HashMap<WarningKind, usize>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance used when no explicit collaborator is given.
    pub fn global() -> &'static Diagnostics {
        static GLOBAL: OnceLock<Diagnostics> = OnceLock::new();
        GLOBAL.get_or_init(Diagnostics::new)
    }

    /// Logs `message` only the first time `kind` is seen by this instance.
    /// Returns `true` when the message was emitted.
    pub fn warn_once(&self, kind: WarningKind, message: impl AsRef<str>) -> bool {
        let first = self.bump(kind) == 1;
        if first {
            log::warn!("[{kind}] {} (further occurrences suppressed)", message.as_ref());
        }
        first
    }

    /// Logs `message` every time.
    pub fn warn(&self, kind: WarningKind, message: impl AsRef<str>) {
        self.bump(kind);
        log::warn!("[{kind}] {}", message.as_ref());
    }

    pub fn count(&self, kind: WarningKind) -> usize {
        self.lock().get(&kind).copied().unwrap_or(0)
    }

    pub fn has_fired(&self, kind: WarningKind) -> bool {
        self.count(kind) > 0
    }

    fn bump(&self, kind: WarningKind) -> usize {
        let mut counts = self.lock();
        let entry = counts.entry(kind).or_insert(0);
        *entry += 1;
        *entry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<WarningKind, usize>> {
        // A poisoned lock only means another thread panicked mid-update of a counter.
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warn_once_reports_first_occurrence_only() {
        let diagnostics = Diagnostics::new();
        assert!(diagnostics.warn_once(WarningKind::AngleSnapped, "first"));
        assert!(!diagnostics.warn_once(WarningKind::AngleSnapped, "second"));
        assert_eq!(diagnostics.count(WarningKind::AngleSnapped), 2);
        assert!(!diagnostics.has_fired(WarningKind::AlignmentFallback));
    }

    #[test]
    fn warn_always_counts() {
        let diagnostics = Diagnostics::new();
        diagnostics.warn(WarningKind::AlignmentFallback, "a");
        diagnostics.warn(WarningKind::AlignmentFallback, "b");
        assert_eq!(diagnostics.count(WarningKind::AlignmentFallback), 2);
    }

    #[test]
    fn separate_instances_do_not_share_state() {
        let a = Diagnostics::new();
        let b = Diagnostics::new();
        a.warn_once(WarningKind::AngleSnapped, "a");
        assert!(b.warn_once(WarningKind::AngleSnapped, "b"));
    }
}
