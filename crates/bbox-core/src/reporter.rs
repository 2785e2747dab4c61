//! Result aggregation and rendering.
//!
//! - [`BuildReport`]: every build result in arrival order plus one
//!   "did anything fail" flag, rendered as an aligned table or JSON
//! - [`render_root_report`]: plain-text view of an [`UnusedRootReport`]

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::domain::{BuildResult, UnusedRootReport};

const BUILD_COLUMNS: [&str; 6] = [
    "Build Name",
    "Branch Name",
    "Status",
    "Artifacts Downloaded",
    "Error",
    "Web URL",
];

/// Consolidated outcome of a multi-trigger run.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub results: Vec<BuildResult>,
    pub any_failed: bool,
    pub generated_at: DateTime<Utc>,
}

impl BuildReport {
    /// Drain `rx` until every producer is done. Results keep arrival order.
    pub async fn collect(mut rx: mpsc::Receiver<BuildResult>) -> Self {
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        Self::from_results(results)
    }

    pub fn from_results(results: Vec<BuildResult>) -> Self {
        let any_failed = results.iter().any(|r| r.failed);
        Self {
            results,
            any_failed,
            generated_at: Utc::now(),
        }
    }

    /// `true` when at least one unit failed.
    pub fn any_failed(&self) -> bool {
        self.any_failed
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.failed).count()
    }

    pub fn passed_count(&self) -> usize {
        self.results.len() - self.failed_count()
    }

    /// Render as an aligned, tab-free text table.
    pub fn render_table(&self) -> String {
        let rows: Vec<Vec<String>> = self
            .results
            .iter()
            .map(|r| {
                vec![
                    r.name.clone(),
                    r.branch_name.clone(),
                    r.final_status.to_string(),
                    r.artifacts_downloaded.to_string(),
                    r.error.as_ref().map(ToString::to_string).unwrap_or_default(),
                    r.web_url.clone(),
                ]
            })
            .collect();
        render_rows(&BUILD_COLUMNS, &rows)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn render_rows(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, headers.iter().copied(), &widths);
    for row in rows {
        push_row(&mut out, row.iter().map(String::as_str), &widths);
    }
    out
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let mut line = String::new();
    for (cell, width) in cells.zip(widths) {
        let _ = write!(line, "{cell:<width$}  ");
    }
    out.push_str(line.trim_end());
    out.push('\n');
}

/// Render discovery (and deletion, if it ran) for the terminal.
pub fn render_root_report(report: &UnusedRootReport) -> String {
    let mut out = String::new();

    if report.candidates.is_empty() {
        out.push_str("No unused VCS roots found.\n");
    } else {
        out.push_str("Unused VCS roots:\n");
        let rows: Vec<Vec<String>> = report
            .candidates
            .iter()
            .map(|root| vec![root.id.clone(), root.name.clone(), root.href.clone()])
            .collect();
        out.push_str(&render_rows(&["ID", "Name", "Href"], &rows));
    }

    if !report.unresolved.is_empty() {
        out.push_str("\nCould not determine usage (left untouched):\n");
        for verdict in &report.unresolved {
            let reason = match &verdict.usage {
                crate::domain::RootUsage::Unresolved { reason } => reason.as_str(),
                _ => "",
            };
            let _ = writeln!(out, "  {}: {}", verdict.root.id, reason);
        }
    }

    if let Some(deletion) = &report.deletion {
        if !deletion.deleted.is_empty() {
            out.push_str("\nDeleted:\n");
            for root in &deletion.deleted {
                let _ = writeln!(out, "  {}", root.id);
            }
        }
        if !deletion.failed.is_empty() {
            out.push_str("\nFailed to delete:\n");
            for failure in &deletion.failed {
                let _ = writeln!(out, "  {}: {}", failure.root.id, failure.reason);
            }
        }
    }

    let _ = writeln!(
        out,
        "\n{} roots scanned, {} referenced by templates, {} unused, {} unresolved{}",
        report.total_roots,
        report.template_roots.len(),
        report.candidates.len(),
        report.unresolved.len(),
        report
            .deletion
            .as_ref()
            .map(|d| format!(", {} deleted, {} failed", d.deleted.len(), d.failed.len()))
            .unwrap_or_default(),
    );
    out
}
