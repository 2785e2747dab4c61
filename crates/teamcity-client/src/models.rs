//! Wire shapes of the TeamCity REST API.
//!
//! Only the fields bbox reads are modelled. Everything defaults so that a
//! server omitting an empty list (TeamCity drops `"file": []` and friends)
//! still decodes.

use std::collections::BTreeMap;

use bbox_core::{BuildState, BuildStatus, BuildStatusCode, TriggerOutcome, VcsRootRef};
use serde::{Deserialize, Serialize};

/// Body of `POST httpAuth/app/rest/buildQueue`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest<'a> {
    pub branch_name: &'a str,
    pub build_type: IdRef<'a>,
    pub properties: Properties<'a>,
}

impl<'a> TriggerRequest<'a> {
    pub fn new(
        build_type_id: &'a str,
        branch_name: &'a str,
        properties: &'a BTreeMap<String, String>,
    ) -> Self {
        TriggerRequest {
            branch_name,
            build_type: IdRef { id: build_type_id },
            properties: Properties {
                property: properties
                    .iter()
                    .map(|(name, value)| Property { name, value })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IdRef<'a> {
    pub id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct Properties<'a> {
    pub property: Vec<Property<'a>>,
}

#[derive(Debug, Serialize)]
pub struct Property<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// Queued build as returned by the trigger call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedBuild {
    pub id: u64,
    #[serde(default)]
    pub build_type_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub build_type: BuildTypeSummary,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTypeSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub project_name: String,
}

impl QueuedBuild {
    pub fn into_outcome(self, requested_id: &str) -> TriggerOutcome {
        let build_type_id = if self.build_type_id.is_empty() {
            requested_id.to_string()
        } else {
            self.build_type_id
        };
        let name = if self.build_type.name.is_empty() {
            build_type_id.clone()
        } else {
            self.build_type.name
        };
        TriggerOutcome {
            build_id: self.id,
            build_type_id,
            name,
            web_url: self.web_url,
        }
    }
}

/// `GET app/rest/builds/id:{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSnapshot {
    pub id: u64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl From<BuildSnapshot> for BuildStatus {
    fn from(snapshot: BuildSnapshot) -> Self {
        BuildStatus::new(
            snapshot.id,
            BuildState::parse(&snapshot.state),
            snapshot.status.as_deref().map(BuildStatusCode::parse),
        )
    }
}

/// `GET httpAuth/app/rest/builds/id:{id}/artifacts/children/`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactChildren {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub file: Vec<ArtifactFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactFile {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// `GET app/rest/projects`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectList {
    #[serde(default)]
    pub project: Vec<Entity>,
}

/// `GET app/rest/projects/id:{id}/templates`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateList {
    #[serde(default)]
    pub build_type: Vec<Entity>,
}

/// `GET app/rest/buildTypes/id:{id}/vcs-root-entries`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VcsRootEntries {
    #[serde(rename = "vcs-root-entry", default)]
    pub entries: Vec<Entity>,
}

/// Anything identified by an `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct Entity {
    pub id: String,
}

/// One page of `GET app/rest/vcs-roots`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsRootPage {
    #[serde(rename = "vcs-root", default)]
    pub roots: Vec<VcsRootEntity>,
    #[serde(default)]
    pub next_href: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VcsRootEntity {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub href: String,
}

impl From<VcsRootEntity> for VcsRootRef {
    fn from(root: VcsRootEntity) -> Self {
        VcsRootRef {
            id: root.id,
            name: root.name,
            href: root.href,
        }
    }
}

/// Any collection response where only `count` matters.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Counted {
    #[serde(default)]
    pub count: u64,
}
