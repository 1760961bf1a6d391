//! Structured observability hooks for trigger lifecycle events.
//!
//! [`trigger_span`] tags everything done for one trigger; async code attaches
//! it with `Instrument`. The `emit_*` functions log lifecycle events at
//! `info!` (failures at `warn!`). Filter them with `RUST_LOG`; pass `--json`
//! to the binary for JSON lines.

use tracing::{info, warn};

/// Span tagged with the trigger id and job name.
pub fn trigger_span(trigger_id: &str, job_name: &str) -> tracing::Span {
    tracing::info_span!("cibridge.trigger", trigger_id = %trigger_id, job = %job_name)
}

/// Emit event: the CI server accepted a build and the trigger was recorded.
pub fn emit_trigger_submitted(trigger_id: &str, job_name: &str, queue_item_id: u64) {
    info!(
        event = "trigger.submitted",
        trigger_id = %trigger_id,
        job = %job_name,
        queue_item_id = queue_item_id,
    );
}

/// Emit event: queue resolution finished (possibly still queued at the deadline).
pub fn emit_trigger_resolved(trigger_id: &str, status: &str, build_number: Option<u64>) {
    info!(
        event = "trigger.resolved",
        trigger_id = %trigger_id,
        status = %status,
        build_number = ?build_number,
    );
}

pub fn emit_trigger_synced(trigger_id: &str, status: &str, build_number: Option<u64>) {
    info!(
        event = "trigger.synced",
        trigger_id = %trigger_id,
        status = %status,
        build_number = ?build_number,
    );
}

/// Emit event: a sync gave up on one trigger (warning level).
pub fn emit_trigger_sync_failed(trigger_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "trigger.sync_failed", trigger_id = %trigger_id, error = %error);
}

pub fn emit_log_window_served(
    job_name: &str,
    build_number: u64,
    start_line: usize,
    lines: usize,
    complete: bool,
) {
    info!(
        event = "log.window_served",
        job = %job_name,
        build_number = build_number,
        start_line = start_line,
        lines = lines,
        complete = complete,
    );
}
