//! Structured observability hooks for cycle lifecycle events.
//!
//! All events carry an `event` field (`cycle.started`, `apply.phase_finished`,
//! ...) so they can be filtered in JSON log pipelines. Set
//! `QUILL_LOG_FORMAT=json` in the CLI for newline-delimited JSON.

use tracing::{info, warn};

/// Span tagging every event of one cycle with its `cycle_id`.
///
/// ```ignore
/// async { /* ... */ }.instrument(cycle_span("3f1c...")).await
/// ```
pub fn cycle_span(cycle_id: &str) -> tracing::Span {
    tracing::info_span!("quill.cycle", cycle_id = %cycle_id)
}

pub fn emit_cycle_started(cycle_id: &str, workspace: &str) {
    info!(event = "cycle.started", cycle_id = %cycle_id, workspace = %workspace);
}

pub fn emit_cycle_finished(cycle_id: &str, status: &str, duration_ms: u64) {
    info!(
        event = "cycle.finished",
        cycle_id = %cycle_id,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_extracted(instructions: usize, warnings: usize, unterminated: bool) {
    info!(
        event = "extract.finished",
        instructions = instructions,
        warnings = warnings,
        unterminated = unterminated,
    );
}

pub fn emit_parse_warning(warning: &dyn std::fmt::Display) {
    warn!(event = "extract.warning", warning = %warning);
}

pub fn emit_phase_finished(phase: &str, applied: usize, failed: usize) {
    info!(event = "apply.phase_finished", phase = %phase, applied = applied, failed = failed);
}

pub fn emit_instruction_failed(index: usize, kind: &str, reason: &str) {
    warn!(event = "apply.instruction_failed", index = index, kind = %kind, reason = %reason);
}

pub fn emit_apply_cancelled(next_phase: &str) {
    warn!(event = "apply.cancelled", next_phase = %next_phase);
}

pub fn emit_checker_unavailable(error: &dyn std::fmt::Display) {
    warn!(event = "check.unavailable", error = %error);
}

pub fn emit_fix_attempt(attempt: u32, problems: usize) {
    info!(event = "autofix.attempt", attempt = attempt, problems = problems);
}

pub fn emit_fix_finished(status: &str, attempts: u32, remaining: usize) {
    info!(
        event = "autofix.finished",
        status = %status,
        attempts = attempts,
        remaining = remaining,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_span_create() {
        let _entered = cycle_span("test-cycle-id").entered();
        emit_phase_finished("writes", 2, 0);
    }
}
