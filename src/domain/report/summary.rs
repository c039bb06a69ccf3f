use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::native::{NativeReport, VulnerabilityItem};
use super::record::{Report, SbomReportData};
use super::severity::Severity;
use crate::domain::adapter::Scanner;
use crate::domain::errors::Result;
use crate::domain::job::JobStatus;

/// CVE ids to leave out of a summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CveAllowlist(HashSet<String>);

impl CveAllowlist {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(ids.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, cve_id: &str) -> bool {
        self.0.contains(cve_id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SummaryOptions {
    pub allowlist: CveAllowlist,
}

impl SummaryOptions {
    pub fn with_allowlist(allowlist: CveAllowlist) -> Self {
        Self { allowlist }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VulnerabilitySummary {
    pub total: usize,
    pub fixable: usize,
    pub summary: BTreeMap<Severity, usize>,
}

impl VulnerabilitySummary {
    pub fn of<'a>(items: impl IntoIterator<Item = &'a VulnerabilityItem>) -> Self {
        let mut summary = VulnerabilitySummary::default();
        for item in items {
            summary.total += 1;
            if item.is_fixable() {
                summary.fixable += 1;
            }
            *summary.summary.entry(item.severity).or_default() += 1;
        }
        summary
    }

    fn add(&mut self, other: &VulnerabilitySummary) {
        self.total += other.total;
        self.fixable += other.fixable;
        for (severity, count) in &other.summary {
            *self.summary.entry(*severity).or_default() += count;
        }
    }
}

/// Summary of a native vulnerability report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeReportSummary {
    pub report_id: String,
    pub scan_status: String,
    pub severity: Severity,
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<VulnerabilitySummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cve_bypassed: Vec<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanner: Option<Scanner>,
    pub complete_percent: u8,
    pub total_count: usize,
    pub complete_count: usize,
}

impl NativeReportSummary {
    pub fn generate(report: &Report, options: &SummaryOptions) -> Result<Self> {
        let native = Self::report_of(report)?;
        Ok(Self::generate_with(report, native.as_ref(), options))
    }

    /// The parsed report of a row, when the row finished with data.
    pub fn report_of(report: &Report) -> Result<Option<NativeReport>> {
        let has_data = matches!(
            report.job_status(),
            Some(JobStatus::Success | JobStatus::Stopped)
        );
        if !has_data || report.report.is_empty() {
            return Ok(None);
        }
        NativeReport::from_json(&report.report).map(Some)
    }

    pub fn generate_with(
        report: &Report,
        native: Option<&NativeReport>,
        options: &SummaryOptions,
    ) -> Self {
        let succeeded = report.job_status() == Some(JobStatus::Success);
        let mut summary = NativeReportSummary {
            report_id: report.uuid.clone(),
            scan_status: report.status.clone(),
            severity: Severity::Unknown,
            duration: report.duration_secs(),
            summary: None,
            cve_bypassed: Vec::new(),
            start_time: report.start_time,
            end_time: report.end_time,
            scanner: None,
            complete_percent: if succeeded { 100 } else { 0 },
            total_count: 1,
            complete_count: usize::from(succeeded),
        };
        if let Some(native) = native {
            summary.apply_report(native, options);
        }
        summary
    }

    /// Replaces the vulnerability figures with those of `native`.
    pub fn apply_report(&mut self, native: &NativeReport, options: &SummaryOptions) {
        let (kept, bypassed): (Vec<_>, Vec<_>) = native
            .vulnerabilities
            .iter()
            .partition(|v| !options.allowlist.contains(&v.id));

        self.severity = if options.allowlist.is_empty() {
            native.severity.max(native.computed_severity())
        } else {
            Severity::highest(kept.iter().map(|v| v.severity))
        };
        self.summary = Some(VulnerabilitySummary::of(kept));
        self.cve_bypassed = bypassed.into_iter().map(|v| v.id.clone()).collect();
        self.scanner = native.scanner.clone();
    }

    /// Combines summaries of the same MIME type across the artifacts of an index.
    pub fn merge(mut self, other: NativeReportSummary) -> NativeReportSummary {
        self.scan_status = merge_status(&self.scan_status, &other.scan_status).to_string();
        self.severity = self.severity.max(other.severity);
        self.summary = match (self.summary.take(), other.summary) {
            (Some(mut mine), Some(theirs)) => {
                mine.add(&theirs);
                Some(mine)
            }
            (mine, theirs) => mine.or(theirs),
        };
        for cve in other.cve_bypassed {
            if !self.cve_bypassed.contains(&cve) {
                self.cve_bypassed.push(cve);
            }
        }
        self.start_time = self.start_time.min(other.start_time);
        self.end_time = self.end_time.max(other.end_time);
        self.duration = self
            .end_time
            .map(|end| (end - self.start_time).num_seconds())
            .unwrap_or_default();
        self.scanner = self.scanner.or(other.scanner);
        self.total_count += other.total_count;
        self.complete_count += other.complete_count;
        self.complete_percent = (self.complete_count * 100 / self.total_count.max(1)) as u8;
        self
    }
}

/// Status of a merged summary: anything in flight wins, then success,
/// then stopped, then errors.
pub fn merge_status<'a>(a: &'a str, b: &'a str) -> &'a str {
    fn rank(status: &str) -> u8 {
        match status.parse::<JobStatus>() {
            Ok(JobStatus::Pending | JobStatus::Scheduled | JobStatus::Running) => 3,
            Ok(JobStatus::Success) => 2,
            Ok(JobStatus::Stopped) => 1,
            Ok(JobStatus::Error) | Err(_) => 0,
        }
    }
    if rank(b) > rank(a) { b } else { a }
}

/// Summary of an SBOM report row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SbomSummary {
    pub report_id: String,
    pub scan_status: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbom_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanner: Option<Scanner>,
}

impl SbomSummary {
    pub fn generate(report: &Report) -> Result<Self> {
        let data = if report.report.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<SbomReportData>(&report.report)?)
        };
        Ok(Self {
            report_id: report.uuid.clone(),
            scan_status: report.status.clone(),
            start_time: report.start_time,
            end_time: report.end_time,
            duration: report.duration_secs(),
            sbom_digest: data.as_ref().map(|d| d.sbom_digest.clone()),
            scanner: data.and_then(|d| d.scanner),
        })
    }
}

/// A per-MIME summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Summary {
    Vulnerability(NativeReportSummary),
    Sbom(SbomSummary),
}
