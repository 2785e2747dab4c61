//! Validated build requests.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::error::ValidationError;

static BUILD_TYPE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap_or_else(|e| panic!("build type pattern: {e}"))
});

// Git ref rules: no spaces or ~^:\?*[]@{} anywhere, no leading slash.
static BRANCH_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^ ~^:\\?*\[\]@{}/][^ ~^:\\?*\[\]@{}]*$")
        .unwrap_or_else(|e| panic!("branch pattern: {e}"))
});

static PROPERTY_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\w+[a-zA-Z0-9\\;,*/_.-]*$").unwrap_or_else(|e| panic!("key pattern: {e}"))
});

static PROPERTY_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9\\;,*/@:_.-]*$").unwrap_or_else(|e| panic!("value pattern: {e}"))
});

/// One build to trigger, wait for, and optionally collect artifacts from.
///
/// Only constructible through [`BuildRequest::new`], so every instance in
/// circulation has passed validation. Fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildRequest {
    build_type_id: String,
    branch_name: String,
    download_artifacts: bool,
    require_artifacts: bool,
    properties: BTreeMap<String, String>,
}

impl BuildRequest {
    /// Validate and build a request with no artifact handling.
    pub fn new(
        build_type_id: impl Into<String>,
        branch_name: impl Into<String>,
        properties: BTreeMap<String, String>,
    ) -> Result<Self, ValidationError> {
        let build_type_id = build_type_id.into();
        let branch_name = branch_name.into();

        validate_build_type_id(&build_type_id)?;
        validate_branch_name(&branch_name)?;
        for (key, value) in &properties {
            validate_property(key, value)?;
        }

        Ok(Self {
            build_type_id,
            branch_name,
            download_artifacts: false,
            require_artifacts: false,
            properties,
        })
    }

    /// Set artifact handling. `require` only has an effect when `download`
    /// is set, since artifacts are never checked otherwise.
    pub fn with_artifacts(mut self, download: bool, require: bool) -> Self {
        self.download_artifacts = download;
        self.require_artifacts = require;
        self
    }

    pub fn build_type_id(&self) -> &str {
        &self.build_type_id
    }

    pub fn branch_name(&self) -> &str {
        &self.branch_name
    }

    pub fn download_artifacts(&self) -> bool {
        self.download_artifacts
    }

    pub fn require_artifacts(&self) -> bool {
        self.download_artifacts && self.require_artifacts
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

pub fn validate_build_type_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyBuildTypeId);
    }
    if !BUILD_TYPE_ID.is_match(id) {
        return Err(ValidationError::InvalidBuildTypeId(id.to_string()));
    }
    Ok(())
}

pub fn validate_branch_name(branch: &str) -> Result<(), ValidationError> {
    if branch.is_empty() {
        return Err(ValidationError::EmptyBranch);
    }
    if !BRANCH_NAME.is_match(branch) {
        return Err(ValidationError::InvalidBranch(branch.to_string()));
    }
    Ok(())
}

pub fn validate_property(key: &str, value: &str) -> Result<(), ValidationError> {
    if !PROPERTY_KEY.is_match(key) {
        return Err(ValidationError::InvalidPropertyKey(key.to_string()));
    }
    if !PROPERTY_VALUE.is_match(value) {
        return Err(ValidationError::InvalidPropertyValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}
