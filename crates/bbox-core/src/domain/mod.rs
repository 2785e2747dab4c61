//! Domain models for bbox.
//!
//! - `BuildRequest`: a validated build to trigger
//! - `BuildStatus` / `TriggerOutcome`: snapshots returned by the CI server
//! - `BuildResult`: the write-once outcome of one build pipeline
//! - `VcsRootRef` / `UnusedRootReport`: unused-root discovery data

pub mod build;
pub mod error;
pub mod request;
pub mod result;
pub mod vcs_root;

pub use build::{BuildState, BuildStatus, BuildStatusCode, TriggerOutcome};
pub use error::{
    BboxError, DiscoveryError, ListingFailure, Result, ServiceError, ServiceResult, UnitError,
    ValidationError,
};
pub use request::BuildRequest;
pub use result::{BuildResult, FinalStatus, TerminalState};
pub use vcs_root::{
    DeletionFailure, DeletionSummary, RootUsage, RootVerdict, UnusedRootReport, VcsRootRef,
};
