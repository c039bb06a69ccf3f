mod native;
mod record;
mod severity;
mod stats;
mod summary;

pub use native::{Cvss, NativeReport, VulnerabilityItem, VulnerabilityKey};
pub use record::{
    Report, ReportVulnerabilityRecord, SbomAdapterReport, SbomReportData, VulnerabilityRecord,
};
pub use severity::Severity;
pub use stats::{ScanStats, StatusMetrics};
pub use summary::{
    CveAllowlist, NativeReportSummary, SbomSummary, Summary, SummaryOptions, VulnerabilitySummary,
    merge_status,
};

#[cfg(test)]
pub(crate) use native::fixtures;
