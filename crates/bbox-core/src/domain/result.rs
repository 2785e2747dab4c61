//! Per-build outcomes produced by the build pipeline.

use std::fmt;

use serde::{Serialize, Serializer};

use super::build::BuildStatusCode;
use super::error::UnitError;
use super::request::BuildRequest;

/// The status shown for a build in the final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalStatus {
    /// The trigger call failed; no remote build exists.
    NotTriggered,
    /// Triggered, and the caller chose not to wait.
    Queued,
    /// Triggered, but a finished state was never observed.
    Unknown,
    /// The build finished with this outcome code.
    Finished(BuildStatusCode),
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalStatus::NotTriggered => write!(f, "NOT_TRIGGERED"),
            FinalStatus::Queued => write!(f, "QUEUED"),
            FinalStatus::Unknown => write!(f, "UNKNOWN"),
            FinalStatus::Finished(code) => write!(f, "{code}"),
        }
    }
}

impl Serialize for FinalStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The state a build pipeline stopped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    TriggerFailed,
    /// Waiting was disabled; the build was left in the remote queue.
    Queued,
    WaitFailed,
    /// Finished and no artifacts were requested.
    Finished,
    ArtifactsRequiredMissing,
    /// Finished, artifacts were optional and none were found.
    NoArtifacts,
    DownloadFailed,
    Downloaded,
    /// The worker panicked before producing a result.
    Aborted,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::TriggerFailed => "trigger_failed",
            TerminalState::Queued => "queued",
            TerminalState::WaitFailed => "wait_failed",
            TerminalState::Finished => "finished",
            TerminalState::ArtifactsRequiredMissing => "artifacts_required_missing",
            TerminalState::NoArtifacts => "no_artifacts",
            TerminalState::DownloadFailed => "download_failed",
            TerminalState::Downloaded => "downloaded",
            TerminalState::Aborted => "aborted",
        }
    }
}

/// Write-once outcome of one [`BuildRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildResult {
    /// Build configuration name, or the build type id when the trigger failed.
    pub name: String,
    pub build_type_id: String,
    pub build_id: Option<u64>,
    pub branch_name: String,
    pub web_url: String,
    pub final_status: FinalStatus,
    pub artifacts_downloaded: bool,
    pub terminal: TerminalState,
    pub error: Option<UnitError>,
    pub failed: bool,
}

impl BuildResult {
    /// Result for a request whose trigger call failed.
    pub fn not_triggered(request: &BuildRequest, error: UnitError) -> Self {
        Self {
            name: request.build_type_id().to_string(),
            build_type_id: request.build_type_id().to_string(),
            build_id: None,
            branch_name: request.branch_name().to_string(),
            web_url: String::new(),
            final_status: FinalStatus::NotTriggered,
            artifacts_downloaded: false,
            terminal: TerminalState::TriggerFailed,
            error: Some(error),
            failed: true,
        }
    }

    /// Result for a request whose worker died without reporting.
    pub fn aborted(request: &BuildRequest, detail: impl Into<String>) -> Self {
        let mut result = Self::not_triggered(
            request,
            UnitError::Aborted {
                detail: detail.into(),
            },
        );
        result.final_status = FinalStatus::Unknown;
        result.terminal = TerminalState::Aborted;
        result
    }
}

/// Whether a pipeline that stopped in `terminal` with `status` counts as failed.
///
/// Every error terminal fails. A finished build fails unless it reported
/// `SUCCESS`. A build left queued on purpose does not fail.
pub fn is_failure(terminal: TerminalState, status: &FinalStatus) -> bool {
    match terminal {
        TerminalState::TriggerFailed
        | TerminalState::WaitFailed
        | TerminalState::ArtifactsRequiredMissing
        | TerminalState::DownloadFailed
        | TerminalState::Aborted => true,
        TerminalState::Queued => false,
        TerminalState::Finished | TerminalState::NoArtifacts | TerminalState::Downloaded => {
            *status != FinalStatus::Finished(BuildStatusCode::Success)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request() -> BuildRequest {
        BuildRequest::new("bt3", "main", BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_not_triggered_result_shape() {
        let result = BuildResult::not_triggered(
            &request(),
            UnitError::Trigger {
                reason: "HTTP 403".to_string(),
            },
        );
        assert_eq!(result.final_status.to_string(), "NOT_TRIGGERED");
        assert_eq!(result.terminal, TerminalState::TriggerFailed);
        assert!(result.failed);
        assert!(!result.artifacts_downloaded);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_aborted_result_keeps_detail() {
        let result = BuildResult::aborted(&request(), "boom");
        assert_eq!(result.terminal, TerminalState::Aborted);
        assert_eq!(
            result.error,
            Some(UnitError::Aborted {
                detail: "boom".to_string()
            })
        );
        assert!(result.failed);
    }

    #[test]
    fn test_failure_classification() {
        let success = FinalStatus::Finished(BuildStatusCode::Success);
        let failure = FinalStatus::Finished(BuildStatusCode::Failure);

        assert!(!is_failure(TerminalState::Downloaded, &success));
        assert!(!is_failure(TerminalState::NoArtifacts, &success));
        assert!(is_failure(TerminalState::Finished, &failure));
        assert!(is_failure(TerminalState::DownloadFailed, &success));
        assert!(!is_failure(TerminalState::Queued, &FinalStatus::Queued));
        assert!(is_failure(TerminalState::WaitFailed, &FinalStatus::Unknown));
    }

    #[test]
    fn test_final_status_serializes_as_string() {
        let json = serde_json::to_value(FinalStatus::Finished(BuildStatusCode::Error)).unwrap();
        assert_eq!(json, "ERROR");
    }
}
