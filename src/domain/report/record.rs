use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::native::{Cvss, VulnerabilityItem, VulnerabilityKey};
use super::severity::Severity;
use crate::domain::adapter::Scanner;
use crate::domain::errors::{Error, Result};
use crate::domain::job::JobStatus;

/// One scan of an artifact digest by one registration for one produced MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub uuid: String,
    pub digest: String,
    pub registration_uuid: String,
    pub mime_type: String,
    #[serde(default)]
    pub job_id: String,
    pub track_id: String,
    pub requester: String,
    pub status: String,
    pub status_code: i32,
    pub status_rev: i64,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub report: String,
}

impl Report {
    pub fn placeholder(
        digest: impl Into<String>,
        registration_uuid: impl Into<String>,
        mime_type: impl Into<String>,
        track_id: impl Into<String>,
        requester: impl Into<String>,
    ) -> Self {
        Self {
            uuid: String::new(),
            digest: digest.into(),
            registration_uuid: registration_uuid.into(),
            mime_type: mime_type.into(),
            job_id: String::new(),
            track_id: track_id.into(),
            requester: requester.into(),
            status: JobStatus::Pending.to_string(),
            status_code: JobStatus::Pending.code(),
            status_rev: 0,
            start_time: Utc::now(),
            end_time: None,
            report: String::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.digest.is_empty() || self.registration_uuid.is_empty() || self.mime_type.is_empty()
        {
            return Err(Error::BadRequest(
                "malformed report: digest, registration uuid and mime type are required".into(),
            ));
        }
        Ok(())
    }

    /// Pending, scheduled or running.
    pub fn is_in_progress(&self) -> bool {
        self.status_code <= JobStatus::Running.code()
    }

    /// Parsed job status, `None` when the status holds an error message.
    pub fn job_status(&self) -> Option<JobStatus> {
        self.status.parse().ok()
    }

    pub fn duration_secs(&self) -> i64 {
        self.end_time
            .map(|end| (end - self.start_time).num_seconds())
            .unwrap_or_default()
    }

    /// Field values a [`Query`](crate::domain::query::Query) keyword is matched against.
    pub fn query_field(&self, key: &str) -> Option<Vec<String>> {
        let v = match key {
            "uuid" => self.uuid.clone(),
            "digest" => self.digest.clone(),
            "registration_uuid" => self.registration_uuid.clone(),
            "mime_type" => self.mime_type.clone(),
            "job_id" => self.job_id.clone(),
            "track_id" => self.track_id.clone(),
            "requester" => self.requester.clone(),
            "status" => self.status.clone(),
            "status_code" => self.status_code.to_string(),
            "status_rev" => self.status_rev.to_string(),
            _ => return None,
        };
        Some(vec![v])
    }
}

/// A normalised CVE row shared by every report of the same registration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    pub id: i64,
    pub cve_id: String,
    pub registration_uuid: String,
    pub package: String,
    pub package_version: String,
    pub package_type: String,
    pub severity: Severity,
    #[serde(default)]
    pub fixed_version: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub cvss3_score: Option<f64>,
    #[serde(default)]
    pub cvss2_score: Option<f64>,
    #[serde(default)]
    pub cvss3_vector: String,
    #[serde(default)]
    pub cvss2_vector: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cwe_ids: Vec<String>,
    #[serde(default)]
    pub vendor_attributes: Option<Value>,
}

impl VulnerabilityRecord {
    pub fn from_item(item: &VulnerabilityItem, registration_uuid: &str) -> Self {
        let cvss = item.preferred_cvss.clone().unwrap_or_default();
        let cvss3_score = cvss.score_v3.or_else(|| {
            item.vendor_attributes
                .as_ref()
                .and_then(v3_score_from_vendor_attributes)
        });

        Self {
            id: 0,
            cve_id: item.id.clone(),
            registration_uuid: registration_uuid.to_string(),
            package: item.package.clone(),
            package_version: item.version.clone(),
            package_type: "Unknown".to_string(),
            severity: item.severity,
            fixed_version: item.fix_version.clone(),
            urls: item.links.clone(),
            cvss3_score,
            cvss2_score: cvss.score_v2,
            cvss3_vector: cvss.vector_v3,
            cvss2_vector: cvss.vector_v2,
            description: item.description.clone(),
            cwe_ids: item.cwe_ids.clone(),
            vendor_attributes: item.vendor_attributes.clone(),
        }
    }

    pub fn to_item(&self, artifact_digest: &str) -> VulnerabilityItem {
        let cvss = Cvss {
            score_v3: self.cvss3_score,
            score_v2: self.cvss2_score,
            vector_v3: self.cvss3_vector.clone(),
            vector_v2: self.cvss2_vector.clone(),
        };
        VulnerabilityItem {
            id: self.cve_id.clone(),
            package: self.package.clone(),
            version: self.package_version.clone(),
            fix_version: self.fixed_version.clone(),
            severity: self.severity,
            description: self.description.clone(),
            links: self.urls.clone(),
            preferred_cvss: (!cvss.is_empty()).then_some(cvss),
            cwe_ids: self.cwe_ids.clone(),
            vendor_attributes: self.vendor_attributes.clone(),
            artifact_digests: vec![artifact_digest.to_string()],
        }
    }

    pub fn key(&self) -> VulnerabilityKey {
        (
            self.cve_id.clone(),
            self.package.clone(),
            self.package_version.clone(),
        )
    }
}

/// NVD's V3 score when present, otherwise the first vendor's.
fn v3_score_from_vendor_attributes(attributes: &Value) -> Option<f64> {
    let vendors = attributes.get("CVSS")?.as_object()?;
    if let Some(score) = vendors.get("nvd").and_then(|v| v.get("V3Score")?.as_f64()) {
        return Some(score);
    }
    vendors.values().find_map(|v| v.get("V3Score")?.as_f64())
}

/// Join row between a report and a vulnerability record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportVulnerabilityRecord {
    pub report_uuid: String,
    pub vuln_record_id: i64,
}

/// What an SBOM-capable adapter returns for a scan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SbomAdapterReport {
    #[serde(default)]
    pub generated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanner: Option<Scanner>,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub sbom: Value,
}

/// What is kept in an SBOM report row once the document itself is archived.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SbomReportData {
    pub sbom_digest: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanner: Option<Scanner>,
}
