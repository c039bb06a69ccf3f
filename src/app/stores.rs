use crate::domain::errors::Result;
use crate::domain::query::Query;
use crate::domain::registration::Registration;
use crate::domain::report::{Report, ScanStats, Severity, VulnerabilityRecord};

/// Persistence of scanner registrations.
///
/// Lookups return `Ok(None)` for absent rows so callers can tell "absent"
/// apart from a failure. Writes violating the unique name or url fail with
/// `Conflict`.
#[async_trait::async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Stores a new registration under a fresh uuid and returns it.
    async fn create(&self, registration: Registration) -> Result<String>;

    async fn get(&self, uuid: &str) -> Result<Option<Registration>>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Registration>>;

    async fn get_default(&self) -> Result<Option<Registration>>;

    /// Matching registrations, default first then newest first.
    async fn list(&self, query: &Query) -> Result<Vec<Registration>>;

    async fn count(&self, query: &Query) -> Result<usize>;

    async fn update(&self, registration: &Registration) -> Result<()>;

    async fn delete(&self, uuid: &str) -> Result<()>;

    /// Makes `uuid` the only default, enabling it. Fails when the target is
    /// missing or disabled, leaving every row untouched.
    async fn set_as_default(&self, uuid: &str) -> Result<()>;
}

/// Persistence of report rows, for one report table.
#[async_trait::async_trait]
pub trait ReportStore: Send + Sync {
    /// Inserts a placeholder row, replacing a finished row for the same
    /// `(digest, registration_uuid, mime_type)`. Returns the new uuid.
    async fn create(&self, report: Report) -> Result<String>;

    async fn get(&self, uuid: &str) -> Result<Option<Report>>;

    async fn list(&self, query: &Query) -> Result<Vec<Report>>;

    /// Rows of `digest`, optionally narrowed to a registration and MIME types.
    async fn get_by(
        &self,
        digest: &str,
        registration_uuid: Option<&str>,
        mime_types: &[String],
    ) -> Result<Vec<Report>>;

    /// Moves every row of `track_id` to `status` unless that would regress
    /// `(status_rev, status_code)`. Returns how many rows changed.
    async fn update_status(&self, track_id: &str, status: &str, rev: i64) -> Result<usize>;

    /// Overwrites the report body unless the row already moved past `rev`.
    async fn update_report_data(&self, uuid: &str, report: &str, rev: i64) -> Result<bool>;

    async fn update_scan_job_id(&self, uuid: &str, job_id: &str) -> Result<()>;

    async fn delete_by_digests(&self, digests: &[String]) -> Result<()>;

    async fn get_stats(&self, requester: &str) -> Result<ScanStats>;

    /// Whether any row references the registration.
    async fn references_registration(&self, registration_uuid: &str) -> Result<bool>;
}

/// Persistence of normalised vulnerability records and their report links.
#[async_trait::async_trait]
pub trait VulnerabilityRecordStore: Send + Sync {
    async fn list_by_cve_ids(
        &self,
        registration_uuid: &str,
        cve_ids: &[String],
    ) -> Result<Vec<VulnerabilityRecord>>;

    /// Inserts the record and returns its id; `Conflict` on a duplicate key.
    async fn create(&self, record: VulnerabilityRecord) -> Result<i64>;

    async fn update_severity(&self, id: i64, severity: Severity) -> Result<()>;

    /// Links records to a report; existing links are kept.
    async fn insert_for_report(&self, report_uuid: &str, record_ids: &[i64]) -> Result<()>;

    async fn get_for_report(&self, report_uuid: &str) -> Result<Vec<VulnerabilityRecord>>;

    /// Drops the links of the reports; the records themselves stay.
    async fn delete_for_reports(&self, report_uuids: &[String]) -> Result<()>;
}
