//! Remote build snapshots: what the CI server says about a queued build.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a remote build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Queued,
    Running,
    Finished,
    /// Any state the server reports that bbox does not model.
    Other(String),
}

impl BuildState {
    /// Map the server's raw state string. Unknown values are kept verbatim.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "queued" => BuildState::Queued,
            "running" => BuildState::Running,
            "finished" => BuildState::Finished,
            other => BuildState::Other(other.to_string()),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, BuildState::Finished)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildState::Queued => write!(f, "queued"),
            BuildState::Running => write!(f, "running"),
            BuildState::Finished => write!(f, "finished"),
            BuildState::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Outcome code of a finished build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatusCode {
    Success,
    Failure,
    Error,
    Unknown,
    Other(String),
}

impl BuildStatusCode {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SUCCESS" => BuildStatusCode::Success,
            "FAILURE" => BuildStatusCode::Failure,
            "ERROR" => BuildStatusCode::Error,
            "UNKNOWN" => BuildStatusCode::Unknown,
            other => BuildStatusCode::Other(other.to_string()),
        }
    }
}

impl fmt::Display for BuildStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatusCode::Success => write!(f, "SUCCESS"),
            BuildStatusCode::Failure => write!(f, "FAILURE"),
            BuildStatusCode::Error => write!(f, "ERROR"),
            BuildStatusCode::Unknown => write!(f, "UNKNOWN"),
            BuildStatusCode::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Immutable snapshot of a build's state as returned by one status fetch.
///
/// The status code only exists once the build has finished; the server's
/// interim values (usually `SUCCESS` while still running) are discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub id: u64,
    pub state: BuildState,
    status: Option<BuildStatusCode>,
}

impl BuildStatus {
    pub fn new(id: u64, state: BuildState, status: Option<BuildStatusCode>) -> Self {
        let status = if state.is_finished() { status } else { None };
        Self { id, state, status }
    }

    /// The outcome code, present only when `state` is finished.
    pub fn status(&self) -> Option<&BuildStatusCode> {
        self.status.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }
}

/// The server's acknowledgement that a build was queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerOutcome {
    pub build_id: u64,
    pub build_type_id: String,
    /// Human-readable build configuration name.
    pub name: String,
    pub web_url: String,
}
