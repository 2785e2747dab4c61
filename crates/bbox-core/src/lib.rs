//! bbox core library
//!
//! Concurrent orchestration against a CI server: trigger many builds at
//! once, wait for each on its own deadline, collect artifacts, and find VCS
//! roots nothing references any more. The CI server itself sits behind the
//! [`CiService`] trait.

pub mod backoff;
pub mod discovery;
pub mod domain;
pub mod fakes;
pub mod fanout;
pub mod metrics;
pub mod obs;
pub mod params;
pub mod pipeline;
pub mod reporter;
pub mod service;
pub mod telemetry;

pub use backoff::{DelayStrategy, PollError, PollLimit, Poller, Probe};
pub use discovery::{CleanupConfig, UnusedRootCleaner};
pub use domain::{
    BboxError, BuildRequest, BuildResult, BuildState, BuildStatus, BuildStatusCode,
    DeletionFailure, DeletionSummary, DiscoveryError, FinalStatus, ListingFailure, Result,
    RootUsage, RootVerdict, ServiceError, ServiceResult, TerminalState, TriggerOutcome, UnitError,
    UnusedRootReport, ValidationError, VcsRootRef,
};
pub use fanout::{FanOut, DEFAULT_WIDTH};
pub use params::{parse_combination, parse_combinations};
pub use pipeline::{BuildPipeline, MultiTrigger, RunConfig};
pub use reporter::{render_root_report, BuildReport};
pub use service::CiService;
