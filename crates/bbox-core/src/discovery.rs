//! Unused VCS root discovery and cleanup.
//!
//! A root is unused when it has no instances *and* no template in any
//! project references it. Templates never create instances, so a root that
//! only a template uses would otherwise look unused.
//!
//! Discovery runs in two stages:
//! 1. Resolve the template-root set (projects, then templates per project,
//!    then roots per template) while listing all roots concurrently. Any
//!    listing failure aborts the run, since a partial union could mark a
//!    referenced root as unused.
//! 2. Classify every root: template-referenced roots need no remote call,
//!    the rest are checked for instances. A failed check leaves the root
//!    unresolved rather than guessing.
//!
//! The stages run one after another on the same [`FanOut`], never nested.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::domain::{
    DeletionFailure, DeletionSummary, DiscoveryError, ListingFailure, RootUsage, RootVerdict,
    UnusedRootReport, VcsRootRef,
};
use crate::fanout::FanOut;
use crate::metrics::METRICS;
use crate::obs;
use crate::service::CiService;

/// Options for a cleanup run.
#[derive(Debug, Clone, Default)]
pub struct CleanupConfig {
    /// Delete candidates without asking.
    pub auto_confirm_delete: bool,
}

/// Finds and optionally deletes unused VCS roots.
pub struct UnusedRootCleaner {
    service: Arc<dyn CiService>,
    fanout: FanOut,
    config: CleanupConfig,
}

impl UnusedRootCleaner {
    pub fn new(service: Arc<dyn CiService>, fanout: FanOut, config: CleanupConfig) -> Self {
        Self {
            service,
            fanout,
            config,
        }
    }

    /// Discover, then delete the candidates if auto-confirm is set or
    /// `confirm` approves them. `confirm` is not called when there is
    /// nothing to delete.
    pub async fn run<F>(&self, confirm: F) -> Result<UnusedRootReport, DiscoveryError>
    where
        F: FnOnce(&[VcsRootRef]) -> bool,
    {
        let mut report = self.discover().await?;
        if report.candidates.is_empty() {
            return Ok(report);
        }

        if self.config.auto_confirm_delete || confirm(&report.candidates) {
            report.deletion = Some(self.delete_roots(report.candidates.clone()).await);
        } else {
            info!(
                candidates = report.candidates.len(),
                "deletion declined, nothing removed"
            );
        }
        Ok(report)
    }

    /// Compute the unused-root report without changing anything.
    #[instrument(skip(self))]
    pub async fn discover(&self) -> Result<UnusedRootReport, DiscoveryError> {
        let (roots, template_roots) =
            tokio::join!(self.service.list_vcs_roots(), self.resolve_template_roots());

        let mut failures = Vec::new();
        let roots = match roots {
            Ok(roots) => Some(roots),
            Err(e) => {
                failures.push(ListingFailure {
                    scope: "vcs-roots".to_string(),
                    reason: e.to_string(),
                });
                None
            }
        };
        let template_roots = match template_roots {
            Ok(set) => Some(set),
            Err(DiscoveryError::Listing { failures: more }) => {
                failures.extend(more);
                None
            }
        };
        let (Some(roots), Some(template_roots)) = (roots, template_roots) else {
            warn!(failures = failures.len(), "discovery aborted");
            return Err(DiscoveryError::Listing { failures });
        };

        let total_roots = roots.len();
        let template_roots = Arc::new(template_roots);
        let verdicts = self.classify_roots(roots, Arc::clone(&template_roots)).await;

        let mut candidates = Vec::new();
        let mut unresolved = Vec::new();
        for verdict in verdicts {
            match verdict.usage {
                RootUsage::Unused => candidates.push(verdict.root),
                RootUsage::Unresolved { .. } => unresolved.push(verdict),
                RootUsage::HasInstances | RootUsage::ReferencedByTemplate => {}
            }
        }
        candidates.sort();
        unresolved.sort_by(|a, b| a.root.id.cmp(&b.root.id));

        obs::emit_discovery_completed(total_roots, candidates.len(), unresolved.len());
        Ok(UnusedRootReport {
            total_roots,
            template_roots: Arc::unwrap_or_clone(template_roots),
            candidates,
            unresolved,
            deletion: None,
        })
    }

    /// Union of the VCS root ids referenced by every template in every project.
    pub async fn resolve_template_roots(&self) -> Result<BTreeSet<String>, DiscoveryError> {
        let projects = self.service.list_projects().await.map_err(|e| {
            DiscoveryError::Listing {
                failures: vec![ListingFailure {
                    scope: "projects".to_string(),
                    reason: e.to_string(),
                }],
            }
        })?;
        info!(projects = projects.len(), "resolving project templates");

        let service = Arc::clone(&self.service);
        let per_project = self
            .fanout
            .run(
                projects,
                move |project_id: String| {
                    let service = Arc::clone(&service);
                    async move {
                        let templates = service
                            .project_templates(&project_id)
                            .await
                            .map_err(|e| e.to_string());
                        (project_id, templates)
                    }
                },
                |project_id, detail| (project_id, Err(format!("worker aborted: {detail}"))),
            )
            .await;
        let templates: BTreeSet<String> = gather("project", per_project)?;

        let service = Arc::clone(&self.service);
        let per_template = self
            .fanout
            .run(
                templates.into_iter().collect(),
                move |template_id: String| {
                    let service = Arc::clone(&service);
                    async move {
                        let roots = service
                            .template_vcs_root_ids(std::slice::from_ref(&template_id))
                            .await
                            .map_err(|e| e.to_string());
                        (template_id, roots)
                    }
                },
                |template_id, detail| (template_id, Err(format!("worker aborted: {detail}"))),
            )
            .await;
        gather("template", per_template)
    }

    /// Decide how each root is used.
    pub async fn classify_roots(
        &self,
        roots: Vec<VcsRootRef>,
        template_roots: Arc<BTreeSet<String>>,
    ) -> Vec<RootVerdict> {
        let service = Arc::clone(&self.service);
        self.fanout
            .run(
                roots,
                move |root: VcsRootRef| {
                    let service = Arc::clone(&service);
                    let template_roots = Arc::clone(&template_roots);
                    async move {
                        let usage = if template_roots.contains(&root.id) {
                            RootUsage::ReferencedByTemplate
                        } else {
                            match service.vcs_root_has_instance(&root.id).await {
                                Ok(true) => RootUsage::HasInstances,
                                Ok(false) => RootUsage::Unused,
                                Err(e) => {
                                    warn!(root_id = %root.id, error = %e, "instance check failed");
                                    RootUsage::Unresolved {
                                        reason: e.to_string(),
                                    }
                                }
                            }
                        };
                        RootVerdict { root, usage }
                    }
                },
                |root, detail| RootVerdict {
                    root,
                    usage: RootUsage::Unresolved {
                        reason: format!("worker aborted: {detail}"),
                    },
                },
            )
            .await
    }

    /// Delete each root independently. One failure never stops the others.
    pub async fn delete_roots(&self, roots: Vec<VcsRootRef>) -> DeletionSummary {
        let service = Arc::clone(&self.service);
        let outcomes = self
            .fanout
            .run(
                roots,
                move |root: VcsRootRef| {
                    let service = Arc::clone(&service);
                    async move {
                        match service.delete_vcs_root(&root.id).await {
                            Ok(true) => Ok(root),
                            Ok(false) => Err(DeletionFailure {
                                root,
                                reason: "server refused deletion".to_string(),
                            }),
                            Err(e) => Err(DeletionFailure {
                                root,
                                reason: e.to_string(),
                            }),
                        }
                    }
                },
                |root, detail| {
                    Err(DeletionFailure {
                        root,
                        reason: format!("worker aborted: {detail}"),
                    })
                },
            )
            .await;

        let mut summary = DeletionSummary::default();
        for outcome in outcomes {
            let root_id = match &outcome {
                Ok(root) => &root.id,
                Err(failure) => &failure.root.id,
            };
            let _span = obs::UnitSpan::enter("vcs_root", root_id);
            match outcome {
                Ok(root) => {
                    METRICS.inc_roots_deleted();
                    obs::emit_vcs_root_deleted(&root.id);
                    summary.deleted.push(root);
                }
                Err(failure) => {
                    warn!(root_id = %failure.root.id, reason = %failure.reason, "delete failed");
                    summary.failed.push(failure);
                }
            }
        }
        summary.deleted.sort();
        summary.failed.sort_by(|a, b| a.root.id.cmp(&b.root.id));
        summary
    }
}

/// Union successful listings, or report every failed one.
fn gather(
    kind: &str,
    outcomes: Vec<(String, Result<Vec<String>, String>)>,
) -> Result<BTreeSet<String>, DiscoveryError> {
    let mut ids = BTreeSet::new();
    let mut failures = Vec::new();
    for (scope_id, outcome) in outcomes {
        match outcome {
            Ok(found) => ids.extend(found),
            Err(reason) => failures.push(ListingFailure {
                scope: format!("{kind}:{scope_id}"),
                reason,
            }),
        }
    }
    if failures.is_empty() {
        Ok(ids)
    } else {
        failures.sort_by(|a, b| a.scope.cmp(&b.scope));
        Err(DiscoveryError::Listing { failures })
    }
}
