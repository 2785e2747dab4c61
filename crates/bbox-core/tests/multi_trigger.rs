//! End-to-end multi-trigger runs against the in-memory CI fake.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bbox_core::fakes::{BuildScript, FakeCiService};
use bbox_core::{
    BuildPipeline, BuildReport, BuildRequest, BuildResult, BuildStatusCode, CiService, FanOut,
    FinalStatus, MultiTrigger, RunConfig, TerminalState, UnitError,
};

fn request(build_type_id: &str, download: bool, require: bool) -> BuildRequest {
    BuildRequest::new(build_type_id, "main", BTreeMap::new())
        .unwrap()
        .with_artifacts(download, require)
}

async fn run_with(
    service: Arc<FakeCiService>,
    config: RunConfig,
    requests: Vec<BuildRequest>,
) -> BuildReport {
    let trigger = MultiTrigger::new(
        Arc::clone(&service) as Arc<dyn CiService>,
        config,
        FanOut::default(),
    );
    trigger.run(requests).await
}

fn find<'a>(report: &'a BuildReport, build_type_id: &str) -> &'a BuildResult {
    report
        .results
        .iter()
        .find(|r| r.build_type_id == build_type_id)
        .unwrap_or_else(|| panic!("no result for {build_type_id}"))
}

#[tokio::test(start_paused = true)]
async fn test_two_successful_builds_one_with_artifacts() {
    let service = Arc::new(FakeCiService::new());

    let report = run_with(
        Arc::clone(&service),
        RunConfig::default(),
        vec![request("bt1", true, true), request("bt2", false, false)],
    )
    .await;

    assert_eq!(report.results.len(), 2);
    assert!(!report.any_failed());

    let bt1 = find(&report, "bt1");
    assert!(bt1.artifacts_downloaded);
    assert_eq!(bt1.terminal, TerminalState::Downloaded);
    assert_eq!(bt1.final_status, FinalStatus::Finished(BuildStatusCode::Success));

    let bt2 = find(&report, "bt2");
    assert!(!bt2.artifacts_downloaded);
    assert_eq!(bt2.terminal, TerminalState::Finished);

    assert_eq!(service.downloads().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_failure_reports_not_triggered() {
    let service = Arc::new(FakeCiService::new().with_trigger_failure("bt3"));

    let report = run_with(
        Arc::clone(&service),
        RunConfig::default(),
        vec![request("bt3", false, false)],
    )
    .await;

    assert_eq!(report.results.len(), 1);
    assert!(report.any_failed());
    let bt3 = &report.results[0];
    assert_eq!(bt3.final_status.to_string(), "NOT_TRIGGERED");
    assert!(matches!(bt3.error, Some(UnitError::Trigger { .. })));
    assert_eq!(service.status_polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_one_failure_does_not_stop_siblings() {
    let service = Arc::new(
        FakeCiService::new()
            .with_trigger_failure("broken")
            .with_build("slow", BuildScript::succeeds().running_for(3)),
    );

    let report = run_with(
        Arc::clone(&service),
        RunConfig::default(),
        vec![
            request("broken", false, false),
            request("slow", false, false),
            request("fast", false, false),
        ],
    )
    .await;

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(find(&report, "slow").terminal, TerminalState::Finished);
    assert_eq!(find(&report, "fast").terminal, TerminalState::Finished);
    assert!(find(&report, "broken").failed);
}

#[tokio::test(start_paused = true)]
async fn test_wait_deadline_keeps_last_seen_state() {
    let service = Arc::new(FakeCiService::new().with_build("stuck", BuildScript::never_finishes()));
    let config = RunConfig {
        wait_timeout: Duration::from_secs(60),
        ..RunConfig::default()
    };

    let started = tokio::time::Instant::now();
    let report = run_with(Arc::clone(&service), config, vec![request("stuck", true, true)]).await;

    let stuck = &report.results[0];
    assert_eq!(stuck.terminal, TerminalState::WaitFailed);
    assert_eq!(stuck.final_status, FinalStatus::Unknown);
    assert!(stuck.failed);
    match &stuck.error {
        Some(UnitError::WaitTimedOut {
            waited_secs,
            last_state,
        }) => {
            assert_eq!(*waited_secs, 60);
            assert_eq!(last_state, "running");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_secs(60));
    // a timed-out build is never checked for artifacts
    assert_eq!(service.artifact_checks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_required_artifacts_never_appear() {
    let service = Arc::new(
        FakeCiService::new().with_build("bt1", BuildScript::succeeds().without_artifacts()),
    );

    let report = run_with(
        Arc::clone(&service),
        RunConfig::default(),
        vec![request("bt1", true, true)],
    )
    .await;

    let bt1 = &report.results[0];
    assert_eq!(bt1.terminal, TerminalState::ArtifactsRequiredMissing);
    assert!(bt1.failed);
    assert_eq!(bt1.error, Some(UnitError::ArtifactsMissing { attempts: 5 }));
    assert_eq!(bt1.final_status, FinalStatus::Finished(BuildStatusCode::Success));
    assert!(service.downloads().is_empty());
    assert_eq!(service.artifact_checks(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_erroring_artifact_checks_fail_required_artifacts() {
    let service = Arc::new(FakeCiService::new().with_build(
        "bt1",
        BuildScript::succeeds().failing_artifact_checks(u32::MAX),
    ));

    let report = run_with(
        Arc::clone(&service),
        RunConfig::default(),
        vec![request("bt1", true, true)],
    )
    .await;

    let bt1 = &report.results[0];
    assert_eq!(bt1.terminal, TerminalState::ArtifactsRequiredMissing);
    assert!(bt1.failed);
    assert!(matches!(bt1.error, Some(UnitError::ArtifactCheck { .. })));
    assert!(service.downloads().is_empty());
    assert_eq!(service.artifact_checks(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_erroring_artifact_checks_fail_optional_download() {
    let service = Arc::new(FakeCiService::new().with_build(
        "bt1",
        BuildScript::succeeds().failing_artifact_checks(u32::MAX),
    ));

    let report = run_with(
        Arc::clone(&service),
        RunConfig::default(),
        vec![request("bt1", true, false)],
    )
    .await;

    let bt1 = &report.results[0];
    assert_eq!(bt1.terminal, TerminalState::DownloadFailed);
    assert!(bt1.failed);
    assert!(matches!(bt1.error, Some(UnitError::ArtifactCheck { .. })));
    assert!(report.any_failed());
    assert!(service.downloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_artifact_check_errors_are_retried() {
    let service = Arc::new(FakeCiService::new().with_build(
        "bt1",
        BuildScript::succeeds().failing_artifact_checks(2),
    ));

    let report = run_with(
        Arc::clone(&service),
        RunConfig::default(),
        vec![request("bt1", true, true)],
    )
    .await;

    let bt1 = &report.results[0];
    assert_eq!(bt1.terminal, TerminalState::Downloaded);
    assert!(!bt1.failed);
    assert_eq!(service.artifact_checks(), 3);
    assert_eq!(service.downloads().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_artifact_attempts_reports_the_one_check_made() {
    let service = Arc::new(
        FakeCiService::new().with_build("bt1", BuildScript::succeeds().without_artifacts()),
    );
    let config = RunConfig {
        artifact_check_attempts: 0,
        ..RunConfig::default()
    };

    let report = run_with(Arc::clone(&service), config, vec![request("bt1", true, true)]).await;

    let bt1 = &report.results[0];
    assert_eq!(bt1.terminal, TerminalState::ArtifactsRequiredMissing);
    assert_eq!(bt1.error, Some(UnitError::ArtifactsMissing { attempts: 1 }));
    assert_eq!(service.artifact_checks(), 1);
}

#[test]
fn test_run_futures_are_send() {
    fn assert_send<T: Send>(_: T) {}

    let service: Arc<dyn CiService> = Arc::new(FakeCiService::new());
    let pipeline = BuildPipeline::new(Arc::clone(&service), RunConfig::default());
    assert_send(pipeline.run(request("bt1", true, true)));

    let trigger = MultiTrigger::new(service, RunConfig::default(), FanOut::default());
    assert_send(trigger.run(vec![request("bt1", false, false)]));
}

#[tokio::test(start_paused = true)]
async fn test_late_artifacts_downloaded_exactly_once() {
    let service = Arc::new(
        FakeCiService::new().with_build("bt1", BuildScript::succeeds().artifacts_after(3)),
    );

    let report = run_with(
        Arc::clone(&service),
        RunConfig::default(),
        vec![request("bt1", true, true)],
    )
    .await;

    assert!(report.results[0].artifacts_downloaded);
    assert_eq!(service.artifact_checks(), 4);
    assert_eq!(service.downloads().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_optional_artifacts_missing_is_not_a_failure() {
    let service = Arc::new(
        FakeCiService::new().with_build("bt1", BuildScript::succeeds().without_artifacts()),
    );

    let report = run_with(
        Arc::clone(&service),
        RunConfig::default(),
        vec![request("bt1", true, false)],
    )
    .await;

    let bt1 = &report.results[0];
    assert_eq!(bt1.terminal, TerminalState::NoArtifacts);
    assert!(!bt1.failed);
    assert!(!report.any_failed());
}

#[tokio::test(start_paused = true)]
async fn test_no_wait_leaves_builds_queued() {
    let service = Arc::new(FakeCiService::new());
    let config = RunConfig {
        wait_for_builds: false,
        ..RunConfig::default()
    };

    let report = run_with(
        Arc::clone(&service),
        config,
        vec![request("bt1", true, true), request("bt2", false, false)],
    )
    .await;

    assert!(!report.any_failed());
    for result in &report.results {
        assert_eq!(result.terminal, TerminalState::Queued);
        assert_eq!(result.final_status, FinalStatus::Queued);
    }
    assert_eq!(service.status_polls(), 0);
    assert!(service.downloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_build_still_collects_artifacts() {
    let service = Arc::new(
        FakeCiService::new().with_build("red", BuildScript::finishes_with(BuildStatusCode::Failure)),
    );

    let report = run_with(
        Arc::clone(&service),
        RunConfig::default(),
        vec![request("red", true, false)],
    )
    .await;

    let red = &report.results[0];
    assert!(red.artifacts_downloaded);
    assert!(red.failed, "a FAILURE status fails the unit");
    assert_eq!(red.final_status.to_string(), "FAILURE");
}

#[tokio::test(start_paused = true)]
async fn test_status_and_download_errors_are_unit_failures() {
    let service = Arc::new(
        FakeCiService::new()
            .with_build("no_status", BuildScript::succeeds().failing_status())
            .with_build("no_zip", BuildScript::succeeds().failing_download()),
    );

    let report = run_with(
        Arc::clone(&service),
        RunConfig::default(),
        vec![request("no_status", false, false), request("no_zip", true, false)],
    )
    .await;

    let no_status = find(&report, "no_status");
    assert_eq!(no_status.terminal, TerminalState::WaitFailed);
    assert!(matches!(no_status.error, Some(UnitError::Wait { .. })));

    let no_zip = find(&report, "no_zip");
    assert_eq!(no_zip.terminal, TerminalState::DownloadFailed);
    assert!(!no_zip.artifacts_downloaded);
    assert_eq!(no_zip.final_status, FinalStatus::Finished(BuildStatusCode::Success));
    assert!(no_zip.failed);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_unit_still_reports() {
    let service = Arc::new(FakeCiService::new().with_trigger_panic("cursed"));

    let report = run_with(
        Arc::clone(&service),
        RunConfig::default(),
        vec![request("cursed", false, false), request("fine", false, false)],
    )
    .await;

    assert_eq!(report.results.len(), 2);
    let cursed = find(&report, "cursed");
    assert_eq!(cursed.terminal, TerminalState::Aborted);
    assert!(cursed.failed);
    assert!(!find(&report, "fine").failed);
}

#[tokio::test(start_paused = true)]
async fn test_width_bounds_concurrent_builds() {
    let service = Arc::new(FakeCiService::new().with_call_delay(Duration::from_millis(10)));
    let trigger = MultiTrigger::new(
        Arc::clone(&service) as Arc<dyn CiService>,
        RunConfig::default(),
        FanOut::new(5).unwrap(),
    );
    let requests: Vec<BuildRequest> = (0..30)
        .map(|i| request(&format!("bt{i}"), false, false))
        .collect();

    let report = trigger.run(requests).await;

    assert_eq!(report.results.len(), 30);
    assert!(!report.any_failed());
    assert!(service.peak_in_flight() <= 5);
    assert_eq!(service.triggered().len(), 30);
}
