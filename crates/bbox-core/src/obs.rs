//! Structured lifecycle events for builds and VCS root cleanup.
//!
//! - `UnitSpan` RAII guard tagging everything inside one pipeline unit
//! - `emit_*` functions for the milestones operators grep for
//!
//! Events are emitted at `info!` level with an `event` field naming them.
//! Use `--json` for machine-readable output.

use tracing::{info, warn};

/// RAII guard that enters a unit-scoped span for as long as it lives.
///
/// The guard is `!Send`; hold it only across synchronous sections.
///
/// ```ignore
/// let _span = UnitSpan::enter("build", "Project_Build");
/// ```
pub struct UnitSpan {
    _span: tracing::span::EnteredSpan,
}

impl UnitSpan {
    pub fn enter(kind: &str, unit_id: &str) -> Self {
        let span = tracing::info_span!("bbox.unit", kind = %kind, unit_id = %unit_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a build was accepted into the remote queue.
pub fn emit_build_triggered(build_type_id: &str, build_id: u64, branch_name: &str) {
    info!(
        event = "build.triggered",
        build_type_id = %build_type_id,
        build_id = build_id,
        branch = %branch_name,
    );
}

/// Emit event: a build pipeline reached its terminal state.
pub fn emit_build_finished(build_type_id: &str, status: &str, terminal: &str, failed: bool) {
    info!(
        event = "build.finished",
        build_type_id = %build_type_id,
        status = %status,
        terminal = %terminal,
        failed = failed,
    );
}

pub fn emit_artifacts_downloaded(build_type_id: &str, build_id: u64, dest: &str) {
    info!(
        event = "build.artifacts_downloaded",
        build_type_id = %build_type_id,
        build_id = build_id,
        dest = %dest,
    );
}

/// Emit event: a build unit ended in an error terminal (warning level).
pub fn emit_unit_failed(build_type_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "build.failed", build_type_id = %build_type_id, error = %error);
}

pub fn emit_vcs_root_deleted(root_id: &str) {
    info!(event = "vcs_root.deleted", root_id = %root_id);
}

/// Emit event: discovery produced its candidate list.
pub fn emit_discovery_completed(total_roots: usize, candidates: usize, unresolved: usize) {
    info!(
        event = "discovery.completed",
        total_roots = total_roots,
        candidates = candidates,
        unresolved = unresolved,
    );
}
