//! ReportProcessor: scans report files an action wrote and enforces
//! success criteria
//!
//! The one supported report kind is SARIF: a JSON document whose
//! `$schema` basename starts with "sarif". Results map onto
//! vulnerability severities; any non-suppressed finding at or above
//! the configured threshold fails the plan.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CatalystError, Result};
use crate::features::Feature;
use crate::runner::plan::Plan;
use crate::runner::step::RunCtx;

// ═══════════════════════════════════════════
// Report model
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportResult {
    Succeeded,
    Failed,
}

impl fmt::Display for ReportResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("SUCCEEDED"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

/// Aggregation of all reports detected for one action
#[derive(Debug, Default, Clone)]
pub struct Report {
    pub result: Option<ReportResult>,
    pub vulnerabilities: Vec<Vulnerability>,
}

#[derive(Debug, Clone)]
pub struct Vulnerability {
    pub severity: VulnerabilitySeverity,
    pub rule_id: String,
    pub message: String,
    pub locations: Vec<Location>,
    pub suppressions: Vec<Suppression>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub uri: String,
    pub start_line: Option<i64>,
    pub end_line: Option<i64>,
    pub snippet: String,
}

#[derive(Debug, Clone)]
pub struct Suppression {
    pub kind: String,
    pub justification: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VulnerabilitySeverity {
    Critical,
    High,
    Medium,
    Low,
    Informational,
    #[serde(other)]
    Unknown,
}

impl VulnerabilitySeverity {
    /// Ordinal used for threshold comparison; unrecognised → 0
    pub fn ordinal(&self) -> u32 {
        match self {
            Self::Critical => 1000,
            Self::High => 500,
            Self::Medium => 100,
            Self::Low => 10,
            Self::Informational => 1,
            Self::Unknown => 0,
        }
    }

    /// A severity exceeds the threshold iff its ordinal is at least
    /// the threshold's ordinal.
    pub fn exceeds(&self, threshold: &Self) -> bool {
        self.ordinal() >= threshold.ordinal()
    }
}

impl fmt::Display for VulnerabilitySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Informational => "INFORMATIONAL",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Required results for an action to pass
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SuccessCriteria {
    #[serde(rename = "vulnerabilityThreshold")]
    pub vulnerability_threshold: VulnerabilitySeverity,
}

impl Default for SuccessCriteria {
    fn default() -> Self {
        Self {
            vulnerability_threshold: VulnerabilitySeverity::Unknown,
        }
    }
}

// ═══════════════════════════════════════════
// SARIF subset
// ═══════════════════════════════════════════

#[derive(Deserialize)]
struct SarifReport {
    #[serde(rename = "$schema")]
    schema: String,
    #[serde(default)]
    runs: Vec<SarifRun>,
}

#[derive(Deserialize)]
struct SarifRun {
    #[serde(default)]
    results: Vec<SarifResult>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SarifResult {
    level: Option<String>,
    kind: Option<String>,
    #[serde(rename = "ruleId")]
    rule_id: Option<String>,
    message: SarifMessage,
    locations: Vec<SarifLocation>,
    suppressions: Vec<SarifSuppression>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SarifMessage {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SarifLocation {
    #[serde(rename = "physicalLocation")]
    physical_location: Option<SarifPhysicalLocation>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SarifPhysicalLocation {
    #[serde(rename = "artifactLocation")]
    artifact_location: Option<SarifArtifactLocation>,
    region: Option<SarifRegion>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SarifArtifactLocation {
    uri: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SarifRegion {
    #[serde(rename = "startLine")]
    start_line: Option<i64>,
    #[serde(rename = "endLine")]
    end_line: Option<i64>,
    snippet: Option<SarifSnippet>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SarifSnippet {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SarifSuppression {
    kind: Option<String>,
    justification: Option<String>,
}

fn level_to_severity(level: Option<&str>) -> VulnerabilitySeverity {
    match level {
        Some("error") => VulnerabilitySeverity::High,
        Some("warning") => VulnerabilitySeverity::Medium,
        Some("note") => VulnerabilitySeverity::Low,
        Some("none") => VulnerabilitySeverity::Informational,
        _ => VulnerabilitySeverity::Medium,
    }
}

/// Parse one candidate file as SARIF and fold its results into the
/// report. Non-SARIF content is skipped silently.
fn handle_sarif(contents: &[u8], threshold: &VulnerabilitySeverity, report: &mut Report) {
    let Ok(sarif) = serde_json::from_slice::<SarifReport>(contents) else {
        debug!("skipping non-sarif report");
        return;
    };
    let basename = Path::new(&sarif.schema)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !basename.starts_with("sarif") {
        return;
    }
    for run in &sarif.runs {
        for result in &run.results {
            // Only consider results with empty kind or kind "fail"
            if result
                .kind
                .as_deref()
                .is_some_and(|k| !k.is_empty() && k != "fail")
            {
                continue;
            }
            let severity = level_to_severity(result.level.as_deref());
            debug!("got result with severity {severity} (threshold={threshold})");
            if severity.exceeds(threshold) && result.suppressions.is_empty() {
                report.result = Some(ReportResult::Failed);
            }
            report.vulnerabilities.push(Vulnerability {
                severity,
                rule_id: result.rule_id.clone().unwrap_or_default(),
                message: result.message.text.clone().unwrap_or_default(),
                locations: result.locations.iter().map(convert_location).collect(),
                suppressions: result
                    .suppressions
                    .iter()
                    .map(|s| Suppression {
                        kind: s.kind.clone().unwrap_or_default(),
                        justification: s.justification.clone().unwrap_or_default(),
                    })
                    .collect(),
            });
        }
    }
}

fn convert_location(location: &SarifLocation) -> Location {
    let mut converted = Location::default();
    if let Some(physical) = &location.physical_location {
        if let Some(artifact) = &physical.artifact_location {
            converted.uri = artifact.uri.clone().unwrap_or_default();
        }
        if let Some(region) = &physical.region {
            converted.start_line = region.start_line;
            converted.end_line = region.end_line;
            if let Some(snippet) = &region.snippet {
                converted.snippet = snippet.text.clone().unwrap_or_default();
            }
        }
    }
    converted
}

/// Walk the report directory and fold every parseable report into the
/// shared report slot.
pub fn process_reports(
    report_dir: &Path,
    threshold: &VulnerabilitySeverity,
    report: &mut Report,
) -> Result<()> {
    for entry in walkdir::WalkDir::new(report_dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        match std::fs::read(entry.path()) {
            Ok(contents) => handle_sarif(&contents, threshold, report),
            Err(err) => {
                warn!("unable to read report '{}': {err}", entry.path().display());
            }
        }
    }
    if report.result.is_none() {
        report.result = Some(ReportResult::Succeeded);
    }
    Ok(())
}

// ═══════════════════════════════════════════
// Feature
// ═══════════════════════════════════════════

pub struct ReportProcessor {
    report: Arc<Mutex<Report>>,
    criteria: SuccessCriteria,
    report_dir: PathBuf,
}

impl ReportProcessor {
    pub fn new(
        report: Arc<Mutex<Report>>,
        criteria: SuccessCriteria,
        report_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            report,
            criteria,
            report_dir: report_dir.into(),
        }
    }
}

#[async_trait]
impl Feature for ReportProcessor {
    async fn after(&self, _ctx: &RunCtx, _plan: &mut Plan, result: Result<()>) -> Result<()> {
        let mut report = self.report.lock().unwrap();
        if let Err(err) = process_reports(
            &self.report_dir,
            &self.criteria.vulnerability_threshold,
            &mut report,
        ) {
            warn!("failed to process report: {err}");
        }
        match report.result {
            Some(ReportResult::Succeeded) => result,
            other => Err(CatalystError::ReportThreshold {
                result: other
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "FAILED".to_string()),
            }),
        }
    }
}
