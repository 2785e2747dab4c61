//! In-memory CI server fake (testing only)
//!
//! [`FakeCiService`] satisfies the [`CiService`] contract without a network.
//! Builds follow a [`BuildScript`]; projects, templates and VCS roots are
//! plain maps. Every call is counted, and the peak number of concurrent calls
//! is tracked so tests can assert pool bounds.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{
    BuildState, BuildStatus, BuildStatusCode, ServiceError, ServiceResult, TriggerOutcome,
    VcsRootRef,
};
use crate::service::CiService;

/// How a scripted build behaves once triggered.
#[derive(Debug, Clone)]
pub struct BuildScript {
    /// Status polls that report `running` before `finished`. `None` never finishes.
    pub running_polls: Option<u32>,
    pub status: BuildStatusCode,
    /// Negative artifact checks before a positive one. `None` never has artifacts.
    pub empty_artifact_checks: Option<u32>,
    /// Artifact checks that error before the listing answers at all.
    pub failing_artifact_checks: u32,
    pub status_fails: bool,
    pub download_fails: bool,
}

impl Default for BuildScript {
    fn default() -> Self {
        Self::succeeds()
    }
}

impl BuildScript {
    /// Finishes on the first poll with `SUCCESS` and artifacts available.
    pub fn succeeds() -> Self {
        Self {
            running_polls: Some(0),
            status: BuildStatusCode::Success,
            empty_artifact_checks: Some(0),
            failing_artifact_checks: 0,
            status_fails: false,
            download_fails: false,
        }
    }

    pub fn finishes_with(status: BuildStatusCode) -> Self {
        Self {
            status,
            ..Self::succeeds()
        }
    }

    pub fn never_finishes() -> Self {
        Self {
            running_polls: None,
            ..Self::succeeds()
        }
    }

    pub fn running_for(mut self, polls: u32) -> Self {
        self.running_polls = Some(polls);
        self
    }

    pub fn artifacts_after(mut self, empty_checks: u32) -> Self {
        self.empty_artifact_checks = Some(empty_checks);
        self
    }

    pub fn without_artifacts(mut self) -> Self {
        self.empty_artifact_checks = None;
        self
    }

    pub fn failing_artifact_checks(mut self, checks: u32) -> Self {
        self.failing_artifact_checks = checks;
        self
    }

    pub fn failing_status(mut self) -> Self {
        self.status_fails = true;
        self
    }

    pub fn failing_download(mut self) -> Self {
        self.download_fails = true;
        self
    }
}

#[derive(Debug, Default)]
struct FakeState {
    scripts: HashMap<String, BuildScript>,
    trigger_failures: BTreeSet<String>,
    trigger_panics: BTreeSet<String>,
    next_build_id: u64,
    builds: HashMap<u64, String>,
    status_polls: HashMap<u64, u32>,
    artifact_checks: HashMap<u64, u32>,
    triggered: Vec<String>,
    downloads: Vec<(u64, String)>,

    projects: BTreeMap<String, Vec<String>>,
    failing_projects: BTreeSet<String>,
    templates: BTreeMap<String, Vec<String>>,
    failing_templates: BTreeSet<String>,
    roots: Vec<VcsRootRef>,
    roots_listing_fails: bool,
    instances: BTreeSet<String>,
    failing_instance_checks: BTreeSet<String>,
    failing_deletes: BTreeSet<String>,
    refused_deletes: BTreeSet<String>,
    instance_checks: Vec<String>,
    deleted: Vec<String>,
    queue_cleared: u32,
}

/// Scripted in-memory [`CiService`].
#[derive(Debug, Default)]
pub struct FakeCiService {
    state: Mutex<FakeState>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    call_delay: Duration,
}

fn server_error(op: &str, id: &str) -> ServiceError {
    ServiceError::Http {
        status: 500,
        url: format!("fake://{op}/{id}"),
    }
}

struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeCiService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_build_id: 100,
                ..FakeState::default()
            }),
            ..Self::default()
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&mut self) -> &mut FakeState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self) -> CallGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = CallGuard(&self.in_flight);
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        guard
    }

    /// Make every call take this long, so concurrency can overlap.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub fn with_build(mut self, build_type_id: &str, script: BuildScript) -> Self {
        self.state_mut()
            .scripts
            .insert(build_type_id.to_string(), script);
        self
    }

    pub fn with_trigger_failure(mut self, build_type_id: &str) -> Self {
        self.state_mut()
            .trigger_failures
            .insert(build_type_id.to_string());
        self
    }

    pub fn with_trigger_panic(mut self, build_type_id: &str) -> Self {
        self.state_mut()
            .trigger_panics
            .insert(build_type_id.to_string());
        self
    }

    pub fn with_project(mut self, project_id: &str, templates: &[&str]) -> Self {
        self.state_mut().projects.insert(
            project_id.to_string(),
            templates.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_failing_project(mut self, project_id: &str) -> Self {
        let state = self.state_mut();
        state.projects.insert(project_id.to_string(), Vec::new());
        state.failing_projects.insert(project_id.to_string());
        self
    }

    pub fn with_template(mut self, template_id: &str, roots: &[&str]) -> Self {
        self.state_mut().templates.insert(
            template_id.to_string(),
            roots.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    pub fn with_failing_template(mut self, template_id: &str) -> Self {
        self.state_mut()
            .failing_templates
            .insert(template_id.to_string());
        self
    }

    pub fn with_roots(mut self, ids: &[&str]) -> Self {
        let state = self.state_mut();
        for id in ids {
            state.roots.push(VcsRootRef {
                id: id.to_string(),
                name: format!("{id} repository"),
                href: format!("/app/rest/vcs-roots/id:{id}"),
            });
        }
        self
    }

    pub fn with_failing_root_listing(mut self) -> Self {
        self.state_mut().roots_listing_fails = true;
        self
    }

    pub fn with_instances(mut self, root_id: &str) -> Self {
        self.state_mut().instances.insert(root_id.to_string());
        self
    }

    pub fn with_failing_instance_check(mut self, root_id: &str) -> Self {
        self.state_mut()
            .failing_instance_checks
            .insert(root_id.to_string());
        self
    }

    pub fn with_failing_delete(mut self, root_id: &str) -> Self {
        self.state_mut().failing_deletes.insert(root_id.to_string());
        self
    }

    pub fn with_refused_delete(mut self, root_id: &str) -> Self {
        self.state_mut().refused_deletes.insert(root_id.to_string());
        self
    }

    /// Build type ids in trigger order.
    pub fn triggered(&self) -> Vec<String> {
        self.state().triggered.clone()
    }

    /// `(build_id, build_type_id)` per download call.
    pub fn downloads(&self) -> Vec<(u64, String)> {
        self.state().downloads.clone()
    }

    pub fn status_polls(&self) -> u32 {
        self.state().status_polls.values().sum()
    }

    pub fn artifact_checks(&self) -> u32 {
        self.state().artifact_checks.values().sum()
    }

    /// Root ids whose instances were checked remotely.
    pub fn instance_checks(&self) -> Vec<String> {
        let mut checks = self.state().instance_checks.clone();
        checks.sort();
        checks
    }

    pub fn deleted(&self) -> Vec<String> {
        let mut deleted = self.state().deleted.clone();
        deleted.sort();
        deleted
    }

    pub fn queue_cleared(&self) -> u32 {
        self.state().queue_cleared
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CiService for FakeCiService {
    async fn trigger_build(
        &self,
        build_type_id: &str,
        _branch_name: &str,
        _properties: &BTreeMap<String, String>,
    ) -> ServiceResult<TriggerOutcome> {
        let _call = self.enter().await;
        let mut state = self.state();
        if state.trigger_panics.contains(build_type_id) {
            drop(state);
            panic!("simulated panic triggering {build_type_id}");
        }
        if state.trigger_failures.contains(build_type_id) {
            return Err(server_error("trigger", build_type_id));
        }

        let build_id = state.next_build_id;
        state.next_build_id += 1;
        state.builds.insert(build_id, build_type_id.to_string());
        state.triggered.push(build_type_id.to_string());
        Ok(TriggerOutcome {
            build_id,
            build_type_id: build_type_id.to_string(),
            name: format!("{build_type_id} build"),
            web_url: format!("fake://viewLog.html?buildId={build_id}"),
        })
    }

    async fn build_status(&self, build_id: u64) -> ServiceResult<BuildStatus> {
        let _call = self.enter().await;
        let mut state = self.state();
        let build_type_id = state
            .builds
            .get(&build_id)
            .cloned()
            .ok_or_else(|| server_error("status", &build_id.to_string()))?;
        let script = state.scripts.get(&build_type_id).cloned().unwrap_or_default();
        if script.status_fails {
            return Err(server_error("status", &build_id.to_string()));
        }

        let polls = state.status_polls.entry(build_id).or_insert(0);
        *polls += 1;
        let finished = script.running_polls.is_some_and(|running| *polls > running);
        Ok(if finished {
            BuildStatus::new(build_id, BuildState::Finished, Some(script.status))
        } else {
            BuildStatus::new(build_id, BuildState::Running, Some(BuildStatusCode::Success))
        })
    }

    async fn build_has_artifacts(&self, build_id: u64) -> ServiceResult<bool> {
        let _call = self.enter().await;
        let mut state = self.state();
        let build_type_id = state.builds.get(&build_id).cloned().unwrap_or_default();
        let script = state.scripts.get(&build_type_id).cloned().unwrap_or_default();

        let checks = state.artifact_checks.entry(build_id).or_insert(0);
        *checks += 1;
        if *checks <= script.failing_artifact_checks {
            return Err(server_error("artifacts", &build_id.to_string()));
        }
        let checks = *checks - script.failing_artifact_checks;
        Ok(script
            .empty_artifact_checks
            .is_some_and(|empty| checks > empty))
    }

    async fn download_and_unzip_artifacts(
        &self,
        build_id: u64,
        build_type_id: &str,
        _dest: &Path,
    ) -> ServiceResult<()> {
        let _call = self.enter().await;
        let mut state = self.state();
        state.downloads.push((build_id, build_type_id.to_string()));
        let script = state.scripts.get(build_type_id).cloned().unwrap_or_default();
        if script.download_fails {
            return Err(ServiceError::ArtifactsNotFound { build_id });
        }
        Ok(())
    }

    async fn list_projects(&self) -> ServiceResult<Vec<String>> {
        let _call = self.enter().await;
        Ok(self.state().projects.keys().cloned().collect())
    }

    async fn project_templates(&self, project_id: &str) -> ServiceResult<Vec<String>> {
        let _call = self.enter().await;
        let state = self.state();
        if state.failing_projects.contains(project_id) {
            return Err(server_error("templates", project_id));
        }
        Ok(state.projects.get(project_id).cloned().unwrap_or_default())
    }

    async fn template_vcs_root_ids(&self, template_ids: &[String]) -> ServiceResult<Vec<String>> {
        let _call = self.enter().await;
        let state = self.state();
        let mut roots = Vec::new();
        for template_id in template_ids {
            if state.failing_templates.contains(template_id) {
                return Err(server_error("vcs-root-entries", template_id));
            }
            roots.extend(state.templates.get(template_id).cloned().unwrap_or_default());
        }
        Ok(roots)
    }

    async fn list_vcs_roots(&self) -> ServiceResult<Vec<VcsRootRef>> {
        let _call = self.enter().await;
        let state = self.state();
        if state.roots_listing_fails {
            return Err(server_error("vcs-roots", "all"));
        }
        Ok(state.roots.clone())
    }

    async fn vcs_root_has_instance(&self, root_id: &str) -> ServiceResult<bool> {
        let _call = self.enter().await;
        let mut state = self.state();
        state.instance_checks.push(root_id.to_string());
        if state.failing_instance_checks.contains(root_id) {
            return Err(server_error("vcs-root-instances", root_id));
        }
        Ok(state.instances.contains(root_id))
    }

    async fn delete_vcs_root(&self, root_id: &str) -> ServiceResult<bool> {
        let _call = self.enter().await;
        let mut state = self.state();
        if state.failing_deletes.contains(root_id) {
            return Err(server_error("delete", root_id));
        }
        if state.refused_deletes.contains(root_id) {
            return Ok(false);
        }
        state.deleted.push(root_id.to_string());
        state.roots.retain(|r| r.id != root_id);
        Ok(true)
    }

    async fn clear_queue(&self) -> ServiceResult<()> {
        let _call = self.enter().await;
        self.state().queue_cleared += 1;
        Ok(())
    }
}
