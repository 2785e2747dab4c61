//! VCS roots and the reports produced by unused-root discovery.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Reference to a VCS root as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VcsRootRef {
    pub id: String,
    pub name: String,
    pub href: String,
}

/// How a single root is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "usage", rename_all = "snake_case")]
pub enum RootUsage {
    /// No instances and not referenced by any template.
    Unused,
    /// Attached to at least one build configuration.
    HasInstances,
    /// Referenced by a template (templates never create instances).
    ReferencedByTemplate,
    /// The instance check failed; the root is left alone.
    Unresolved { reason: String },
}

/// A root and the usage verdict reached for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootVerdict {
    pub root: VcsRootRef,
    #[serde(flatten)]
    pub usage: RootUsage,
}

/// A root whose deletion failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionFailure {
    pub root: VcsRootRef,
    pub reason: String,
}

/// What actually happened during the delete phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionSummary {
    pub deleted: Vec<VcsRootRef>,
    pub failed: Vec<DeletionFailure>,
}

impl DeletionSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of an unused-root discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnusedRootReport {
    /// Number of roots the server listed.
    pub total_roots: usize,
    /// Root ids referenced by any template in any project.
    pub template_roots: BTreeSet<String>,
    /// Roots safe to delete, sorted by id.
    pub candidates: Vec<VcsRootRef>,
    /// Roots whose usage could not be determined, sorted by id.
    pub unresolved: Vec<RootVerdict>,
    /// Present only when a delete phase ran.
    pub deletion: Option<DeletionSummary>,
}

impl UnusedRootReport {
    /// Whether anything in the run needs operator attention.
    pub fn has_problems(&self) -> bool {
        !self.unresolved.is_empty()
            || self
                .deletion
                .as_ref()
                .map(|d| !d.is_clean())
                .unwrap_or(false)
    }
}
