//! The remote CI capabilities bbox orchestrates.
//!
//! Implement [`CiService`] to plug in a real CI server client or a test fake.
//! Pipelines hold it as `Arc<dyn CiService>` and share one instance across
//! every concurrent unit, so implementations must be safe to call from many
//! tasks at once.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use crate::domain::{BuildStatus, ServiceResult, TriggerOutcome, VcsRootRef};

#[async_trait]
pub trait CiService: Send + Sync {
    /// Queue a build of `build_type_id` on `branch_name`.
    async fn trigger_build(
        &self,
        build_type_id: &str,
        branch_name: &str,
        properties: &BTreeMap<String, String>,
    ) -> ServiceResult<TriggerOutcome>;

    /// Fetch a fresh status snapshot for a build.
    async fn build_status(&self, build_id: u64) -> ServiceResult<BuildStatus>;

    /// Whether the build currently exposes any artifacts. A single probe,
    /// retries are the caller's business.
    async fn build_has_artifacts(&self, build_id: u64) -> ServiceResult<bool>;

    /// Download the build's artifact archive and unpack it into `dest`.
    async fn download_and_unzip_artifacts(
        &self,
        build_id: u64,
        build_type_id: &str,
        dest: &Path,
    ) -> ServiceResult<()>;

    /// Ids of every project on the server.
    async fn list_projects(&self) -> ServiceResult<Vec<String>>;

    /// Ids of the templates defined in a project.
    async fn project_templates(&self, project_id: &str) -> ServiceResult<Vec<String>>;

    /// Ids of the VCS roots attached to the given templates.
    async fn template_vcs_root_ids(&self, template_ids: &[String]) -> ServiceResult<Vec<String>>;

    /// Every VCS root on the server, across all pages.
    async fn list_vcs_roots(&self) -> ServiceResult<Vec<VcsRootRef>>;

    /// Whether the root is attached to at least one build configuration.
    async fn vcs_root_has_instance(&self, root_id: &str) -> ServiceResult<bool>;

    /// Delete a VCS root. `Ok(false)` means the server refused.
    async fn delete_vcs_root(&self, root_id: &str) -> ServiceResult<bool>;

    /// Remove every build waiting in the server's queue.
    async fn clear_queue(&self) -> ServiceResult<()>;
}
