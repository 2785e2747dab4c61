//! TeamCity REST client
//!
//! Every request carries basic auth and `Accept: application/json`, and is
//! resolved against the configured server URL the way TeamCity's own
//! `href`s are: relative paths stay under the server's context path,
//! absolute ones (`/app/rest/...`, as in `nextHref`) replace it.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use bbox_core::{BuildStatus, CiService, ServiceResult, TriggerOutcome, VcsRootRef};
use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifacts::{self, DOWNLOAD_TIMEOUT};
use crate::config::TeamCityConfig;
use crate::error::TeamCityError;
use crate::models::{
    ArtifactChildren, BuildSnapshot, Counted, ProjectList, QueuedBuild, TemplateList,
    TriggerRequest, VcsRootEntries, VcsRootPage,
};
use crate::Result;

const USER_AGENT: &str = concat!("bbox/", env!("CARGO_PKG_VERSION"));

/// TeamCity client for build and VCS root operations
#[derive(Debug, Clone)]
pub struct TeamCityClient {
    config: TeamCityConfig,
    base: Url,
    http_client: reqwest::Client,
}

impl TeamCityClient {
    /// Create a new TeamCity client
    pub fn new(config: TeamCityConfig) -> Result<Self> {
        let base = config.base()?;
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TeamCityError::ClientBuild(e.to_string()))?;

        Ok(TeamCityClient {
            config,
            base,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(TeamCityConfig::from_env())
    }

    /// The server URL every endpoint is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(|e| TeamCityError::InvalidUrl {
            url: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "creating request");
        self.http_client
            .request(method, url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(ACCEPT, "application/json")
    }

    /// Send and reject any non-2xx answer.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TeamCityError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self.send(self.request(Method::GET, url)).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self.send(self.request(Method::POST, url).json(body)).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// DELETE that TeamCity acknowledges with 200 or 204.
    async fn delete(&self, path: &str) -> Result<StatusCode> {
        let url = self.endpoint(path)?;
        let response = self.request(Method::DELETE, url).send().await?;
        Ok(response.status())
    }

    /// Fetch the top-level artifact listing of a build.
    pub async fn artifact_children(&self, build_id: u64) -> Result<ArtifactChildren> {
        self.get_json(&format!(
            "httpAuth/app/rest/builds/id:{build_id}/artifacts/children/"
        ))
        .await
    }

    /// Download the zip of every artifact the build published.
    pub async fn download_artifact_archive(
        &self,
        build_id: u64,
        build_type_id: &str,
    ) -> Result<Vec<u8>> {
        let mut url = self.endpoint("downloadArtifacts.html")?;
        url.query_pairs_mut()
            .append_pair("buildId", &build_id.to_string())
            .append_pair("buildTypeId", build_type_id);

        let request = self.request(Method::GET, url).timeout(DOWNLOAD_TIMEOUT);
        let body = self.send(request).await?.bytes().await?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl CiService for TeamCityClient {
    async fn trigger_build(
        &self,
        build_type_id: &str,
        branch_name: &str,
        properties: &BTreeMap<String, String>,
    ) -> ServiceResult<TriggerOutcome> {
        let body = TriggerRequest::new(build_type_id, branch_name, properties);
        debug!(build_type_id, branch_name, properties = properties.len(), "triggering build");

        let queued: QueuedBuild = self
            .post_json("httpAuth/app/rest/buildQueue", &body)
            .await?;

        info!(
            build_id = queued.id,
            web_url = %queued.web_url,
            project = %queued.build_type.project_name,
            state = %queued.state,
            "build queued"
        );
        Ok(queued.into_outcome(build_type_id))
    }

    async fn build_status(&self, build_id: u64) -> ServiceResult<BuildStatus> {
        let snapshot: BuildSnapshot = self
            .get_json(&format!("app/rest/builds/id:{build_id}"))
            .await?;
        Ok(snapshot.into())
    }

    async fn build_has_artifacts(&self, build_id: u64) -> ServiceResult<bool> {
        let children = self.artifact_children(build_id).await?;
        debug!(build_id, count = children.count, "artifact listing");
        Ok(children.count > 0)
    }

    async fn download_and_unzip_artifacts(
        &self,
        build_id: u64,
        build_type_id: &str,
        dest: &Path,
    ) -> ServiceResult<()> {
        let archive = self
            .download_artifact_archive(build_id, build_type_id)
            .await?;
        artifacts::unpack_archive(build_id, &archive, dest).await?;
        Ok(())
    }

    async fn list_projects(&self) -> ServiceResult<Vec<String>> {
        let projects: ProjectList = self.get_json("app/rest/projects").await?;
        Ok(projects.project.into_iter().map(|p| p.id).collect())
    }

    async fn project_templates(&self, project_id: &str) -> ServiceResult<Vec<String>> {
        let templates: TemplateList = self
            .get_json(&format!("app/rest/projects/id:{project_id}/templates"))
            .await?;
        Ok(templates.build_type.into_iter().map(|t| t.id).collect())
    }

    async fn template_vcs_root_ids(&self, template_ids: &[String]) -> ServiceResult<Vec<String>> {
        let mut root_ids = Vec::new();
        for template_id in template_ids {
            let entries: VcsRootEntries = self
                .get_json(&format!(
                    "app/rest/buildTypes/id:{template_id}/vcs-root-entries?fields=vcs-root-entry"
                ))
                .await?;
            root_ids.extend(entries.entries.into_iter().map(|e| e.id));
        }
        Ok(root_ids)
    }

    async fn list_vcs_roots(&self) -> ServiceResult<Vec<VcsRootRef>> {
        let mut roots = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some("app/rest/vcs-roots".to_string());

        while let Some(href) = next.take() {
            if !seen.insert(href.clone()) {
                return Err(TeamCityError::UnexpectedResponse(format!(
                    "vcs root pagination loops back to {href}"
                ))
                .into());
            }
            let page: VcsRootPage = self.get_json(&href).await?;
            debug!(page = seen.len(), roots = page.roots.len(), "vcs root page");
            roots.extend(page.roots.into_iter().map(VcsRootRef::from));
            next = page.next_href.filter(|h| !h.is_empty());
        }
        Ok(roots)
    }

    async fn vcs_root_has_instance(&self, root_id: &str) -> ServiceResult<bool> {
        let root: Counted = self
            .get_json(&format!("app/rest/vcs-roots/id:{root_id}"))
            .await?;
        if root.count != 0 {
            return Ok(true);
        }

        let instances: Counted = self
            .get_json(&format!(
                "app/rest/vcs-root-instances?locator=vcsRoot:(id:{root_id})"
            ))
            .await?;
        Ok(instances.count != 0)
    }

    async fn delete_vcs_root(&self, root_id: &str) -> ServiceResult<bool> {
        let status = self.delete(&format!("app/rest/vcs-roots/{root_id}")).await?;
        if matches!(status, StatusCode::OK | StatusCode::NO_CONTENT) {
            Ok(true)
        } else {
            warn!(root_id, status = status.as_u16(), "server refused vcs root deletion");
            Ok(false)
        }
    }

    async fn clear_queue(&self) -> ServiceResult<()> {
        let status = self.delete("app/rest/buildQueue").await?;
        if matches!(status, StatusCode::OK | StatusCode::NO_CONTENT) {
            info!("build queue cleared");
            Ok(())
        } else {
            let url = self.endpoint("app/rest/buildQueue")?;
            Err(TeamCityError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> TeamCityClient {
        TeamCityClient::new(TeamCityConfig::new(base).with_credentials("u", "p")).unwrap()
    }

    #[test]
    fn test_relative_endpoints_keep_context_path() {
        let client = client("https://ci.example.com/tc");
        let url = client.endpoint("app/rest/builds/id:42").unwrap();
        assert_eq!(url.as_str(), "https://ci.example.com/tc/app/rest/builds/id:42");
    }

    #[test]
    fn test_absolute_hrefs_replace_the_path() {
        let client = client("https://ci.example.com/tc");
        let url = client
            .endpoint("/tc/app/rest/vcs-roots?locator=count:100,start:100")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://ci.example.com/tc/app/rest/vcs-roots?locator=count:100,start:100"
        );
    }

    #[test]
    fn test_missing_url_fails_construction() {
        let err = TeamCityClient::new(TeamCityConfig::new("")).unwrap_err();
        assert!(matches!(err, TeamCityError::MissingUrl));
    }
}
