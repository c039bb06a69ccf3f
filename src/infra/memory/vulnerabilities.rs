use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use crate::app::VulnerabilityRecordStore;
use crate::domain::errors::{Error, Result};
use crate::domain::report::{ReportVulnerabilityRecord, Severity, VulnerabilityRecord};

#[derive(Default, Debug)]
struct Tables {
    next_id: i64,
    records: HashMap<i64, VulnerabilityRecord>,
    links: HashSet<ReportVulnerabilityRecord>,
}

/// `vulnerability_record` and `report_vulnerability_record` tables.
#[derive(Default, Debug)]
pub struct InMemoryVulnerabilityRecordStore {
    tables: RwLock<Tables>,
}

impl InMemoryVulnerabilityRecordStore {
    pub async fn record_count(&self) -> usize {
        self.tables.read().await.records.len()
    }

    pub async fn link_count(&self) -> usize {
        self.tables.read().await.links.len()
    }
}

#[async_trait::async_trait]
impl VulnerabilityRecordStore for InMemoryVulnerabilityRecordStore {
    async fn list_by_cve_ids(
        &self,
        registration_uuid: &str,
        cve_ids: &[String],
    ) -> Result<Vec<VulnerabilityRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables
            .records
            .values()
            .filter(|r| r.registration_uuid == registration_uuid && cve_ids.contains(&r.cve_id))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn create(&self, mut record: VulnerabilityRecord) -> Result<i64> {
        let mut tables = self.tables.write().await;

        let key = record.key();
        let duplicated = tables
            .records
            .values()
            .any(|r| r.registration_uuid == record.registration_uuid && r.key() == key);
        if duplicated {
            return Err(Error::Conflict(format!(
                "vulnerability record {} of {}@{} already exists",
                record.cve_id, record.package, record.package_version
            )));
        }

        tables.next_id += 1;
        record.id = tables.next_id;
        tables.records.insert(record.id, record);
        Ok(tables.next_id)
    }

    async fn update_severity(&self, id: i64, severity: Severity) -> Result<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("vulnerability record {id}")))?;
        record.severity = severity;
        Ok(())
    }

    async fn insert_for_report(&self, report_uuid: &str, record_ids: &[i64]) -> Result<()> {
        let mut tables = self.tables.write().await;
        for id in record_ids {
            tables.links.insert(ReportVulnerabilityRecord {
                report_uuid: report_uuid.to_string(),
                vuln_record_id: *id,
            });
        }
        Ok(())
    }

    async fn get_for_report(&self, report_uuid: &str) -> Result<Vec<VulnerabilityRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables
            .links
            .iter()
            .filter(|link| link.report_uuid == report_uuid)
            .filter_map(|link| tables.records.get(&link.vuln_record_id))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn delete_for_reports(&self, report_uuids: &[String]) -> Result<()> {
        self.tables
            .write()
            .await
            .links
            .retain(|link| !report_uuids.contains(&link.report_uuid));
        Ok(())
    }
}
