//! Error taxonomy for bbox.
//!
//! Errors fall into four layers:
//! - [`ValidationError`]: a build request or combination string was rejected
//!   before anything was dispatched.
//! - [`ServiceError`]: a single call against the CI server failed.
//! - [`UnitError`]: the reason one build pipeline ended badly. Stored inside
//!   its `BuildResult`, never propagated across the fan-out boundary.
//! - [`DiscoveryError`]: the unused-root discovery could not build a complete
//!   picture of what is referenced and was aborted.

use serde::{Deserialize, Serialize};

/// Errors produced while validating build requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("build type id must not be empty")]
    EmptyBuildTypeId,

    #[error("invalid build type id '{0}': only letters, digits, '-' and '_' are allowed")]
    InvalidBuildTypeId(String),

    #[error("branch name must not be empty")]
    EmptyBranch,

    #[error("invalid branch name '{0}'")]
    InvalidBranch(String),

    #[error("invalid property key '{0}'")]
    InvalidPropertyKey(String),

    #[error("invalid value '{value}' for property '{key}'")]
    InvalidPropertyValue { key: String, value: String },

    #[error("malformed property '{0}': expected key=value")]
    MalformedProperty(String),

    #[error("invalid download flag '{0}': expected true/false/1/0/t/f")]
    InvalidFlag(String),

    #[error("malformed combination '{input}': {reason}")]
    MalformedCombination { input: String, reason: String },
}

/// Errors produced by a [`CiService`](crate::service::CiService) call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// The request never got a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The build finished but the server returned no artifact archive.
    #[error("artifacts not found for build {build_id}")]
    ArtifactsNotFound { build_id: u64 },

    /// A local filesystem operation failed.
    #[error("io error: {0}")]
    Io(String),

    /// The client was misconfigured.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Io(err.to_string())
    }
}

/// Result type for CI service calls.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Why a single build pipeline ended in a failure state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitError {
    #[error("trigger failed: {reason}")]
    Trigger { reason: String },

    #[error("waiting for build failed: {reason}")]
    Wait { reason: String },

    #[error("timed out after {waited_secs}s waiting for build (last state: {last_state})")]
    WaitTimedOut { waited_secs: u64, last_state: String },

    #[error("artifact check failed: {reason}")]
    ArtifactCheck { reason: String },

    #[error("required artifacts missing after {attempts} checks")]
    ArtifactsMissing { attempts: u32 },

    #[error("artifact download failed: {reason}")]
    Download { reason: String },

    #[error("worker aborted: {detail}")]
    Aborted { detail: String },
}

/// One failed listing call during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingFailure {
    /// What was being listed, e.g. `project:Root` or `template:Tpl1`.
    pub scope: String,
    pub reason: String,
}

impl std::fmt::Display for ListingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.scope, self.reason)
    }
}

fn join_failures(failures: &[ListingFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that abort unused-root discovery.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    /// One or more listing calls failed, so the referenced-root set is
    /// incomplete and no root can safely be called unused.
    #[error("discovery aborted, {} listing call(s) failed: {}", .failures.len(), join_failures(.failures))]
    Listing { failures: Vec<ListingFailure> },
}

/// Top-level bbox errors.
#[derive(Debug, thiserror::Error)]
pub enum BboxError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("{0}")]
    Discovery(#[from] DiscoveryError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for bbox operations.
pub type Result<T> = std::result::Result<T, BboxError>;
