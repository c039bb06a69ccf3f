use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::stores::VulnerabilityRecordStore;
use crate::domain::errors::Result;
use crate::domain::report::{NativeReport, Report, VulnerabilityKey, VulnerabilityRecord};

/// Moves native reports between their JSON form and the normalised
/// `vulnerability_record` rows shared by every report of a registration.
pub struct ReportConverter {
    records: Arc<dyn VulnerabilityRecordStore>,
}

impl ReportConverter {
    pub fn new(records: Arc<dyn VulnerabilityRecordStore>) -> Self {
        Self { records }
    }

    /// Stores the vulnerabilities of `raw_report` as rows linked to `report_uuid`
    /// and returns the report blob without its vulnerability list.
    pub async fn to_relational(
        &self,
        report_uuid: &str,
        registration_uuid: &str,
        raw_report: &str,
    ) -> Result<String> {
        let mut report = NativeReport::from_json(raw_report)?;
        let items = std::mem::take(&mut report.vulnerabilities);

        let cve_ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let mut known: HashMap<VulnerabilityKey, VulnerabilityRecord> = self
            .records
            .list_by_cve_ids(registration_uuid, &cve_ids)
            .await?
            .into_iter()
            .map(|r| (r.key(), r))
            .collect();

        let mut ids = Vec::with_capacity(items.len());
        for item in &items {
            let record = VulnerabilityRecord::from_item(item, registration_uuid);
            let id = match known.get(&record.key()) {
                Some(existing) => {
                    if existing.severity != record.severity {
                        debug!(
                            cve_id = %record.cve_id,
                            from = %existing.severity,
                            to = %record.severity,
                            "updating the severity of a vulnerability record"
                        );
                        self.records.update_severity(existing.id, record.severity).await?;
                    }
                    existing.id
                }
                None => self.create_or_reuse(record, &mut known).await?,
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        self.records.insert_for_report(report_uuid, &ids).await?;
        report.to_json()
    }

    /// A concurrent check-in may have created the same record in the meantime.
    async fn create_or_reuse(
        &self,
        record: VulnerabilityRecord,
        known: &mut HashMap<VulnerabilityKey, VulnerabilityRecord>,
    ) -> Result<i64> {
        let key = record.key();
        match self.records.create(record.clone()).await {
            Ok(id) => {
                known.insert(key, VulnerabilityRecord { id, ..record });
                Ok(id)
            }
            Err(err) if err.is_conflict() => {
                let existing = self
                    .records
                    .list_by_cve_ids(&record.registration_uuid, std::slice::from_ref(&record.cve_id))
                    .await?
                    .into_iter()
                    .find(|r| r.key() == key)
                    .ok_or(err)?;
                let id = existing.id;
                known.insert(key, existing);
                Ok(id)
            }
            Err(err) => Err(err),
        }
    }

    /// Reassembles the full native report of a stored row.
    pub async fn from_relational(&self, report: &Report) -> Result<String> {
        if report.report.is_empty() {
            return Ok(String::new());
        }

        let records = self.records.get_for_report(&report.uuid).await?;
        if records.is_empty() {
            return Ok(report.report.clone());
        }

        let mut native = NativeReport::from_json(&report.report)?;
        native.vulnerabilities = records.iter().map(|r| r.to_item(&report.digest)).collect();
        native.to_json()
    }
}
