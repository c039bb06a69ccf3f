use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::severity::Severity;
use crate::domain::adapter::Scanner;
use crate::domain::errors::{Error, Result};

/// Identity of a vulnerability within a report: `(id, package, version)`.
pub type VulnerabilityKey = (String, String, String);

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cvss {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_v3: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_v2: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vector_v3: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vector_v2: String,
}

impl Cvss {
    pub fn is_empty(&self) -> bool {
        *self == Cvss::default()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VulnerabilityItem {
    pub id: String,
    pub package: String,
    pub version: String,
    #[serde(default)]
    pub fix_version: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_cvss: Option<Cvss>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cwe_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_attributes: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact_digests: Vec<String>,
}

impl VulnerabilityItem {
    pub fn key(&self) -> VulnerabilityKey {
        (self.id.clone(), self.package.clone(), self.version.clone())
    }

    pub fn is_fixable(&self) -> bool {
        !self.fix_version.is_empty()
    }
}

/// The canonical vulnerability report exchanged with adapters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NativeReport {
    #[serde(default)]
    pub generated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanner: Option<Scanner>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vulnerabilities: Vec<VulnerabilityItem>,
}

impl NativeReport {
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|e| Error::internal_with("malformed native vulnerability report", e))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Highest severity among the listed vulnerabilities.
    pub fn computed_severity(&self) -> Severity {
        Severity::highest(self.vulnerabilities.iter().map(|v| v.severity))
    }

    /// Union of two reports of the same MIME type.
    ///
    /// Items are de-duplicated by `(id, package, version)` keeping the first
    /// occurrence, whose severity is raised to the highest seen and whose
    /// artifact digests absorb the duplicate's.
    pub fn merge(self, other: NativeReport) -> NativeReport {
        let generated_at = if other.generated_at > self.generated_at {
            other.generated_at
        } else {
            self.generated_at
        };
        let severity = self.severity.max(other.severity);
        let scanner = self.scanner.or(other.scanner);

        let mut positions: HashMap<VulnerabilityKey, usize> = HashMap::new();
        let mut vulnerabilities: Vec<VulnerabilityItem> = Vec::new();
        for item in self.vulnerabilities.into_iter().chain(other.vulnerabilities) {
            match positions.get(&item.key()) {
                Some(&i) => {
                    let kept = &mut vulnerabilities[i];
                    kept.severity = kept.severity.max(item.severity);
                    for digest in item.artifact_digests {
                        if !kept.artifact_digests.contains(&digest) {
                            kept.artifact_digests.push(digest);
                        }
                    }
                }
                None => {
                    positions.insert(item.key(), vulnerabilities.len());
                    vulnerabilities.push(item);
                }
            }
        }

        NativeReport {
            generated_at,
            scanner,
            severity,
            vulnerabilities,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn item(id: &str, severity: Severity, fix_version: &str) -> VulnerabilityItem {
        VulnerabilityItem {
            id: id.to_string(),
            package: "openssl".to_string(),
            version: "1.1.1".to_string(),
            fix_version: fix_version.to_string(),
            severity,
            description: format!("{id} description"),
            links: vec![format!("https://avd.aquasec.com/nvd/{}", id.to_lowercase())],
            ..Default::default()
        }
    }

    pub fn report(items: Vec<VulnerabilityItem>) -> NativeReport {
        let mut report = NativeReport {
            generated_at: "2024-03-01T10:00:00Z".to_string(),
            scanner: Some(Scanner {
                name: "Trivy".into(),
                vendor: "Aqua Security".into(),
                version: "0.50.1".into(),
            }),
            severity: Severity::Unknown,
            vulnerabilities: items,
        };
        report.severity = report.computed_severity();
        report
    }
}
