//! Trigger, wait, and artifact collection for one build, fanned out over many.
//!
//! [`BuildPipeline`] walks a single [`BuildRequest`] through an explicit
//! state machine:
//!
//! ```text
//! Triggering ─┬─> TriggerFailed
//!             ├─> Queued                      (waiting disabled)
//!             └─> Polling ─┬─> WaitFailed
//!                          ├─> Finished       (artifacts not requested)
//!                          └─> CheckingArtifacts ─┬─> ArtifactsRequiredMissing
//!                                                 ├─> NoArtifacts
//!                                                 └─> Downloading ─┬─> DownloadFailed
//!                                                                  └─> Downloaded
//! ```
//!
//! [`MultiTrigger`] runs one pipeline per request on a shared [`FanOut`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::backoff::{DelayStrategy, PollError, PollLimit, Poller, Probe};
use crate::domain::result::is_failure;
use crate::domain::{
    BuildRequest, BuildResult, BuildStatus, BuildStatusCode, FinalStatus, TerminalState,
    TriggerOutcome, UnitError,
};
use crate::fanout::FanOut;
use crate::metrics::METRICS;
use crate::obs;
use crate::reporter::BuildReport;
use crate::service::CiService;

/// Options shared by every build of one multi-trigger run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Poll each build until it finishes. When off, builds end `Queued`.
    pub wait_for_builds: bool,
    /// Per-build limit on waiting for a finished state.
    pub wait_timeout: Duration,
    /// Where artifact archives are unpacked.
    pub artifacts_path: PathBuf,
    /// How many times to look for artifacts on a finished build.
    pub artifact_check_attempts: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            wait_for_builds: true,
            wait_timeout: Duration::from_secs(15 * 60),
            artifacts_path: PathBuf::from("./"),
            artifact_check_attempts: 5,
        }
    }
}

enum Stage {
    Triggering,
    Polling(TriggerOutcome),
    CheckingArtifacts(TriggerOutcome, BuildStatusCode),
    Downloading(TriggerOutcome, BuildStatusCode),
    Done(BuildResult),
}

/// Drives one build request from trigger to final result.
pub struct BuildPipeline {
    service: Arc<dyn CiService>,
    config: RunConfig,
}

impl BuildPipeline {
    pub fn new(service: Arc<dyn CiService>, config: RunConfig) -> Self {
        Self { service, config }
    }

    /// Run the request to a terminal state. Never fails: every error ends up
    /// inside the returned [`BuildResult`].
    #[instrument(
        skip(self, request),
        fields(build_type_id = %request.build_type_id(), branch = %request.branch_name())
    )]
    pub async fn run(&self, request: BuildRequest) -> BuildResult {
        let mut stage = Stage::Triggering;
        loop {
            stage = match stage {
                Stage::Done(result) => {
                    Self::record(&result);
                    return result;
                }
                Stage::Triggering => self.trigger(&request).await,
                Stage::Polling(outcome) => self.poll(&request, outcome).await,
                Stage::CheckingArtifacts(outcome, code) => {
                    self.check_artifacts(&request, outcome, code).await
                }
                Stage::Downloading(outcome, code) => self.download(&request, outcome, code).await,
            };
        }
    }

    async fn trigger(&self, request: &BuildRequest) -> Stage {
        let triggered = self
            .service
            .trigger_build(
                request.build_type_id(),
                request.branch_name(),
                request.properties(),
            )
            .await;

        match triggered {
            Ok(outcome) => {
                METRICS.inc_builds_triggered();
                obs::emit_build_triggered(
                    request.build_type_id(),
                    outcome.build_id,
                    request.branch_name(),
                );
                if self.config.wait_for_builds {
                    Stage::Polling(outcome)
                } else {
                    Stage::Done(conclude(
                        request,
                        &outcome,
                        FinalStatus::Queued,
                        TerminalState::Queued,
                        None,
                    ))
                }
            }
            Err(e) => Stage::Done(BuildResult::not_triggered(
                request,
                UnitError::Trigger {
                    reason: e.to_string(),
                },
            )),
        }
    }

    async fn poll(&self, request: &BuildRequest, outcome: TriggerOutcome) -> Stage {
        match self.wait_for_build(outcome.build_id).await {
            Ok(status) => {
                let code = status
                    .status()
                    .cloned()
                    .unwrap_or(BuildStatusCode::Unknown);
                info!(build_id = outcome.build_id, status = %code, "build finished");
                if request.download_artifacts() {
                    Stage::CheckingArtifacts(outcome, code)
                } else {
                    Stage::Done(conclude(
                        request,
                        &outcome,
                        FinalStatus::Finished(code),
                        TerminalState::Finished,
                        None,
                    ))
                }
            }
            Err(e) => Stage::Done(conclude(
                request,
                &outcome,
                FinalStatus::Unknown,
                TerminalState::WaitFailed,
                Some(e),
            )),
        }
    }

    async fn check_artifacts(
        &self,
        request: &BuildRequest,
        outcome: TriggerOutcome,
        code: BuildStatusCode,
    ) -> Stage {
        let status = FinalStatus::Finished(code.clone());
        match self.has_artifacts_with_retry(outcome.build_id).await {
            Ok(true) => Stage::Downloading(outcome, code),
            Ok(false) if request.require_artifacts() => Stage::Done(conclude(
                request,
                &outcome,
                status,
                TerminalState::ArtifactsRequiredMissing,
                Some(UnitError::ArtifactsMissing {
                    attempts: self.artifact_check_attempts(),
                }),
            )),
            Ok(false) => {
                debug!(build_id = outcome.build_id, "no artifacts published");
                Stage::Done(conclude(
                    request,
                    &outcome,
                    status,
                    TerminalState::NoArtifacts,
                    None,
                ))
            }
            Err(e) => {
                let terminal = if request.require_artifacts() {
                    TerminalState::ArtifactsRequiredMissing
                } else {
                    TerminalState::DownloadFailed
                };
                Stage::Done(conclude(request, &outcome, status, terminal, Some(e)))
            }
        }
    }

    async fn download(
        &self,
        request: &BuildRequest,
        outcome: TriggerOutcome,
        code: BuildStatusCode,
    ) -> Stage {
        let dest = &self.config.artifacts_path;
        let downloaded = self
            .service
            .download_and_unzip_artifacts(outcome.build_id, &outcome.build_type_id, dest)
            .await;

        let status = FinalStatus::Finished(code);
        match downloaded {
            Ok(()) => {
                METRICS.inc_artifacts_downloaded();
                obs::emit_artifacts_downloaded(
                    request.build_type_id(),
                    outcome.build_id,
                    &dest.display().to_string(),
                );
                let mut result =
                    conclude(request, &outcome, status, TerminalState::Downloaded, None);
                result.artifacts_downloaded = true;
                Stage::Done(result)
            }
            Err(e) => Stage::Done(conclude(
                request,
                &outcome,
                status,
                TerminalState::DownloadFailed,
                Some(UnitError::Download {
                    reason: e.to_string(),
                }),
            )),
        }
    }

    /// Poll the build until it reports `finished` or the wait timeout passes.
    ///
    /// A failing status fetch ends the wait immediately.
    pub async fn wait_for_build(&self, build_id: u64) -> Result<BuildStatus, UnitError> {
        let poller = Poller::new(
            DelayStrategy::BUILD_WAIT,
            PollLimit::Deadline(self.config.wait_timeout),
        );
        let service = &self.service;

        let waited = poller
            .poll(|_| async move {
                METRICS.inc_status_polls();
                match service.build_status(build_id).await {
                    Ok(status) if status.is_finished() => Probe::Done(status),
                    Ok(status) => Probe::Retry {
                        reason: format!("build is {}", status.state),
                        last: Some(status),
                    },
                    Err(e) => Probe::Fatal(e),
                }
            })
            .await;

        waited.map_err(|e| match e {
            PollError::Fatal(e) => UnitError::Wait {
                reason: e.to_string(),
            },
            PollError::TimedOut { last, waited, .. } => UnitError::WaitTimedOut {
                waited_secs: waited.as_secs(),
                last_state: last
                    .map(|s| s.state.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            },
            PollError::Exhausted { attempts, .. } => UnitError::Wait {
                reason: format!("gave up after {attempts} status checks"),
            },
        })
    }

    /// Check for artifacts with exponential backoff, up to the configured
    /// number of attempts.
    ///
    /// Failed checks are retried like negative ones. `Ok(false)` means every
    /// answered check said no; an error means no check got an answer.
    pub async fn has_artifacts_with_retry(&self, build_id: u64) -> Result<bool, UnitError> {
        let attempts = self.artifact_check_attempts();
        let poller = Poller::new(DelayStrategy::ARTIFACT_CHECK, PollLimit::Attempts(attempts));
        let service = &self.service;

        let checked: Result<bool, PollError<bool, std::convert::Infallible>> = poller
            .poll(|attempt| async move {
                match service.build_has_artifacts(build_id).await {
                    Ok(true) => Probe::Done(true),
                    Ok(false) => Probe::Retry {
                        last: Some(false),
                        reason: format!("no artifacts yet (check {})", attempt + 1),
                    },
                    Err(e) => Probe::Retry {
                        last: None,
                        reason: format!("artifact check failed: {e}"),
                    },
                }
            })
            .await;

        match checked {
            Ok(found) => Ok(found),
            Err(PollError::Exhausted { last: Some(_), .. }) => Ok(false),
            Err(e) => Err(UnitError::ArtifactCheck {
                reason: format!("no artifact check succeeded ({e})"),
            }),
        }
    }

    /// The poller always makes at least one check, so zero counts as one.
    fn artifact_check_attempts(&self) -> u32 {
        self.config.artifact_check_attempts.max(1)
    }

    fn record(result: &BuildResult) {
        let _span = obs::UnitSpan::enter("build", &result.build_type_id);
        obs::emit_build_finished(
            &result.build_type_id,
            &result.final_status.to_string(),
            result.terminal.as_str(),
            result.failed,
        );
        if result.failed {
            METRICS.inc_builds_failed();
            if let Some(error) = &result.error {
                obs::emit_unit_failed(&result.build_type_id, error);
            }
        }
    }
}

fn conclude(
    request: &BuildRequest,
    outcome: &TriggerOutcome,
    final_status: FinalStatus,
    terminal: TerminalState,
    error: Option<UnitError>,
) -> BuildResult {
    let failed = is_failure(terminal, &final_status);
    BuildResult {
        name: outcome.name.clone(),
        build_type_id: request.build_type_id().to_string(),
        build_id: Some(outcome.build_id),
        branch_name: request.branch_name().to_string(),
        web_url: outcome.web_url.clone(),
        final_status,
        artifacts_downloaded: false,
        terminal,
        error,
        failed,
    }
}

/// Runs many build pipelines concurrently on a shared pool.
pub struct MultiTrigger {
    pipeline: Arc<BuildPipeline>,
    fanout: FanOut,
}

impl MultiTrigger {
    pub fn new(service: Arc<dyn CiService>, config: RunConfig, fanout: FanOut) -> Self {
        Self {
            pipeline: Arc::new(BuildPipeline::new(service, config)),
            fanout,
        }
    }

    /// Start every request and stream results as builds complete.
    pub fn dispatch(&self, requests: Vec<BuildRequest>) -> mpsc::Receiver<BuildResult> {
        info!(
            builds = requests.len(),
            width = self.fanout.width(),
            "dispatching builds"
        );
        let pipeline = Arc::clone(&self.pipeline);
        self.fanout.stream(
            requests,
            move |request| {
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.run(request).await }
            },
            |request, detail| BuildResult::aborted(&request, detail),
        )
    }

    /// Run every request to completion and aggregate the results.
    pub async fn run(&self, requests: Vec<BuildRequest>) -> BuildReport {
        BuildReport::collect(self.dispatch(requests)).await
    }
}
