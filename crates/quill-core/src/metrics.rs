//! Global atomic counters.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when a cycle finishes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    cycles: AtomicU64,
    instructions_applied: AtomicU64,
    instructions_failed: AtomicU64,
    parse_warnings: AtomicU64,
    fix_attempts: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            instructions_applied: AtomicU64::new(0),
            instructions_failed: AtomicU64::new(0),
            parse_warnings: AtomicU64::new(0),
            fix_attempts: AtomicU64::new(0),
        }
    }

    pub fn inc_cycles(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_applied(&self, n: u64) {
        self.instructions_applied.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_failed(&self, n: u64) {
        self.instructions_failed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_parse_warnings(&self, n: u64) {
        self.parse_warnings.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_fix_attempts(&self) {
        self.fix_attempts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "fix_attempts", "counter incremented");
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn instructions_applied(&self) -> u64 {
        self.instructions_applied.load(Ordering::Relaxed)
    }

    pub fn instructions_failed(&self) -> u64 {
        self.instructions_failed.load(Ordering::Relaxed)
    }

    pub fn parse_warnings(&self) -> u64 {
        self.parse_warnings.load(Ordering::Relaxed)
    }

    pub fn fix_attempts(&self) -> u64 {
        self.fix_attempts.load(Ordering::Relaxed)
    }

    /// Emit all current counter values as one `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            cycles = self.cycles(),
            instructions_applied = self.instructions_applied(),
            instructions_failed = self.instructions_failed(),
            parse_warnings = self.parse_warnings(),
            fix_attempts = self.fix_attempts(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.inc_cycles();
        m.add_applied(3);
        m.add_failed(1);
        m.add_parse_warnings(2);
        m.inc_fix_attempts();
        assert_eq!(m.cycles(), 1);
        assert_eq!(m.instructions_applied(), 3);
        assert_eq!(m.instructions_failed(), 1);
        assert_eq!(m.parse_warnings(), 2);
        assert_eq!(m.fix_attempts(), 1);
        m.flush();
    }
}
