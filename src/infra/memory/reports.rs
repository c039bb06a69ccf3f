use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::InMemoryVulnerabilityRecordStore;
use crate::app::{ReportStore, VulnerabilityRecordStore};
use crate::domain::errors::{Error, Result};
use crate::domain::job::JobStatus;
use crate::domain::query::Query;
use crate::domain::report::{Report, ScanStats};

/// A report table (`scan_report` or `sbom_report`).
#[derive(Default)]
pub struct InMemoryReportStore {
    rows: RwLock<HashMap<String, Report>>,
    vulnerabilities: Option<Arc<InMemoryVulnerabilityRecordStore>>,
}

impl InMemoryReportStore {
    /// A table whose rows own links in `vulnerabilities`.
    pub fn with_vulnerabilities(vulnerabilities: Arc<InMemoryVulnerabilityRecordStore>) -> Self {
        Self {
            rows: RwLock::default(),
            vulnerabilities: Some(vulnerabilities),
        }
    }

    async fn drop_links(&self, report_uuids: &[String]) -> Result<()> {
        match &self.vulnerabilities {
            Some(vulnerabilities) if !report_uuids.is_empty() => {
                vulnerabilities.delete_for_reports(report_uuids).await
            }
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ReportStore for InMemoryReportStore {
    async fn create(&self, mut report: Report) -> Result<String> {
        report.validate()?;

        let replaced = {
            let mut rows = self.rows.write().await;

            let previous = rows
                .values()
                .find(|r| {
                    r.digest == report.digest
                        && r.registration_uuid == report.registration_uuid
                        && r.mime_type == report.mime_type
                })
                .cloned();
            if let Some(previous) = &previous {
                if previous.is_in_progress() {
                    return Err(Error::Conflict(format!(
                        "a previous scanning is {}",
                        previous.status
                    )));
                }
                rows.remove(&previous.uuid);
            }

            report.uuid = Uuid::new_v4().to_string();
            report.start_time = Utc::now();
            report.end_time = None;
            report.status = JobStatus::Pending.to_string();
            report.status_code = JobStatus::Pending.code();
            report.status_rev = 0;
            rows.insert(report.uuid.clone(), report.clone());

            previous.map(|p| p.uuid)
        };

        if let Some(previous) = replaced {
            self.drop_links(&[previous]).await?;
        }
        Ok(report.uuid)
    }

    async fn get(&self, uuid: &str) -> Result<Option<Report>> {
        Ok(self.rows.read().await.get(uuid).cloned())
    }

    async fn list(&self, query: &Query) -> Result<Vec<Report>> {
        let mut matching: Vec<Report> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| query.matches(|key| r.query_field(key)))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(query.paginate(matching))
    }

    async fn get_by(
        &self,
        digest: &str,
        registration_uuid: Option<&str>,
        mime_types: &[String],
    ) -> Result<Vec<Report>> {
        let mut matching: Vec<Report> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.digest == digest)
            .filter(|r| registration_uuid.is_none_or(|uuid| r.registration_uuid == uuid))
            .filter(|r| mime_types.is_empty() || mime_types.contains(&r.mime_type))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.mime_type.cmp(&b.mime_type));
        Ok(matching)
    }

    async fn update_status(&self, track_id: &str, status: &str, rev: i64) -> Result<usize> {
        let code = JobStatus::code_of(status);
        let now = Utc::now();

        let mut rows = self.rows.write().await;
        let mut updated = 0;
        for row in rows.values_mut().filter(|r| r.track_id == track_id) {
            let newer = row.status_rev < rev || (row.status_rev == rev && code > row.status_code);
            if !newer {
                continue;
            }
            row.status = status.to_string();
            row.status_code = code;
            row.status_rev = rev;
            if code == JobStatus::FINAL_CODE {
                row.end_time = Some(now);
            }
            updated += 1;
        }
        Ok(updated)
    }

    async fn update_report_data(&self, uuid: &str, report: &str, rev: i64) -> Result<bool> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(uuid)
            .ok_or_else(|| Error::NotFound(format!("report {uuid}")))?;
        if row.status_rev > rev {
            return Ok(false);
        }
        row.report = report.to_string();
        Ok(true)
    }

    async fn update_scan_job_id(&self, uuid: &str, job_id: &str) -> Result<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(uuid)
            .ok_or_else(|| Error::NotFound(format!("report {uuid}")))?;
        row.job_id = job_id.to_string();
        Ok(())
    }

    async fn delete_by_digests(&self, digests: &[String]) -> Result<()> {
        let removed: Vec<String> = {
            let mut rows = self.rows.write().await;
            let uuids: Vec<String> = rows
                .values()
                .filter(|r| digests.contains(&r.digest))
                .map(|r| r.uuid.clone())
                .collect();
            for uuid in &uuids {
                rows.remove(uuid);
            }
            uuids
        };
        self.drop_links(&removed).await
    }

    async fn get_stats(&self, requester: &str) -> Result<ScanStats> {
        let rows = self.rows.read().await;
        Ok(ScanStats::from_rows(
            requester,
            rows.values()
                .filter(|r| r.requester == requester)
                .map(|r| (r.track_id.as_str(), r.status.as_str())),
        ))
    }

    async fn references_registration(&self, registration_uuid: &str) -> Result<bool> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .any(|r| r.registration_uuid == registration_uuid))
    }
}
