//! Upgrade report model, sanitizer, and evidence gate.
//!
//! The model's JSON output is never trusted as-is. It passes through two
//! stages: `sanitize` fixes mechanical defects (non-positive effort points,
//! "no impacts found" placeholder rows), then `apply_gate` drops every
//! claim whose evidence labels are not in the allowed `S1..Sn` set. A report
//! that loses all impacts becomes a canonical "nothing found" report rather
//! than an error.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub const GATE_REASON: &str = "EVIDENCE_NOT_ALLOWED_OR_MISSING";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeReport {
    #[serde(default)]
    pub project: ProjectRef,
    #[serde(default)]
    pub impacts: Vec<Impact>,
    #[serde(default)]
    pub workpoints: Vec<Workpoint>,
    #[serde(default)]
    pub unknowns: Vec<Unknown>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Impact {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub affected_areas: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Workpoint {
    #[serde(default)]
    pub impact_id: String,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Unknown {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub why: String,
    #[serde(default)]
    pub next_step: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// What the gate did, for the caller's audit trail.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatingStats {
    pub allowed_sources: Vec<String>,
    pub impacts_before: usize,
    pub impacts_removed: usize,
    pub workpoints_before: usize,
    pub workpoints_removed: usize,
    pub unknowns_before: usize,
    pub unknowns_removed: usize,
    pub not_found_substituted: bool,
    pub reason: String,
}

// ============ Sanitizer ============

/// Fix mechanical defects in a parsed report.
///
/// - Workpoint `points < 1` are clamped to 1 (the model sometimes emits 0
///   or negative effort for trivial items).
/// - Impacts whose title or recommendation is a "no impact(s) found"
///   placeholder are removed along with their workpoints; one Unknown
///   explains the removal.
pub fn sanitize(mut report: UpgradeReport) -> UpgradeReport {
    for wp in &mut report.workpoints {
        if wp.points < 1 {
            wp.points = 1;
        }
    }

    let placeholder_ids: Vec<String> = report
        .impacts
        .iter()
        .filter(|impact| is_placeholder(&impact.title) || is_placeholder(&impact.recommendation))
        .map(|impact| impact.id.clone())
        .collect();

    if placeholder_ids.is_empty() {
        return report;
    }

    let had_evidence = report
        .impacts
        .iter()
        .map(|i| &i.evidence)
        .chain(report.workpoints.iter().map(|w| &w.evidence))
        .chain(report.unknowns.iter().map(|u| &u.evidence))
        .any(|e| !e.is_empty());

    report
        .impacts
        .retain(|impact| !placeholder_ids.contains(&impact.id));
    report
        .workpoints
        .retain(|wp| !placeholder_ids.contains(&wp.impact_id));

    report.unknowns.push(Unknown {
        question: "Were placeholder impact rows masking real findings?".to_string(),
        why: "The model emitted 'no impacts found' filler rows, which were removed.".to_string(),
        next_step: "Re-run analysis with refreshed evidence for this upgrade path.".to_string(),
        evidence: if had_evidence {
            vec!["S1".to_string()]
        } else {
            Vec::new()
        },
    });

    report
}

fn is_placeholder(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("no impact found") || lower.contains("no impacts found")
}

// ============ Evidence gate ============

/// Filter a report down to claims backed by allowed evidence labels.
///
/// Allowed labels are `S1..S<source_count>`. An impact survives if any of
/// its evidence labels is allowed; a workpoint needs allowed evidence AND,
/// when it names an impact, a surviving impact; an unknown needs allowed
/// evidence. A report left with zero impacts is replaced by the canonical
/// not-found body.
pub fn apply_gate(report: UpgradeReport, source_count: usize) -> (UpgradeReport, GatingStats) {
    let allowed: HashSet<String> = (1..=source_count).map(|i| format!("S{}", i)).collect();

    let mut stats = GatingStats {
        allowed_sources: {
            let mut list: Vec<String> = (1..=source_count).map(|i| format!("S{}", i)).collect();
            list.sort_by_key(|s| s[1..].parse::<usize>().unwrap_or(0));
            list
        },
        impacts_before: report.impacts.len(),
        workpoints_before: report.workpoints.len(),
        unknowns_before: report.unknowns.len(),
        reason: GATE_REASON.to_string(),
        ..GatingStats::default()
    };

    let impacts: Vec<Impact> = report
        .impacts
        .into_iter()
        .filter(|impact| has_allowed_evidence(&impact.evidence, &allowed))
        .collect();
    stats.impacts_removed = stats.impacts_before - impacts.len();

    let surviving_ids: HashSet<&str> = impacts.iter().map(|i| i.id.as_str()).collect();
    let workpoints: Vec<Workpoint> = report
        .workpoints
        .into_iter()
        .filter(|wp| {
            has_allowed_evidence(&wp.evidence, &allowed)
                && (wp.impact_id.is_empty() || surviving_ids.contains(wp.impact_id.as_str()))
        })
        .collect();
    stats.workpoints_removed = stats.workpoints_before - workpoints.len();

    let unknowns: Vec<Unknown> = report
        .unknowns
        .into_iter()
        .filter(|unknown| has_allowed_evidence(&unknown.evidence, &allowed))
        .collect();
    stats.unknowns_removed = stats.unknowns_before - unknowns.len();

    if impacts.is_empty() {
        stats.not_found_substituted = true;
        let gated = not_found_report(report.project, source_count > 0);
        return (gated, stats);
    }

    (
        UpgradeReport {
            project: report.project,
            impacts,
            workpoints,
            unknowns,
        },
        stats,
    )
}

fn has_allowed_evidence(evidence: &[String], allowed: &HashSet<String>) -> bool {
    evidence.iter().any(|label| allowed.contains(label))
}

/// Canonical body for "the evidence does not support any impact".
fn not_found_report(project: ProjectRef, had_sources: bool) -> UpgradeReport {
    UpgradeReport {
        project,
        impacts: Vec::new(),
        workpoints: Vec::new(),
        unknowns: vec![Unknown {
            question: "No upgrade impacts were supported by the available evidence.".to_string(),
            why: "Every claimed impact cited evidence outside the retrieved set.".to_string(),
            next_step: "Ingest release notes and the migration guide for the target version, then re-run the analysis.".to_string(),
            evidence: if had_sources {
                vec!["S1".to_string()]
            } else {
                Vec::new()
            },
        }],
    }
}
