use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use super::artifact::Artifact;
use super::errors::{Error, Result};
use super::mime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityType {
    #[default]
    Vulnerability,
    Sbom,
}

impl Display for CapabilityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CapabilityType::Vulnerability => "vulnerability",
            CapabilityType::Sbom => "sbom",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scanner {
    pub name: String,
    pub vendor: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerCapability {
    #[serde(rename = "type", default)]
    pub capability_type: CapabilityType,
    pub consumes_mime_types: Vec<String>,
    pub produces_mime_types: Vec<String>,
}

impl ScannerCapability {
    pub fn consumes(&self, media_type: &str) -> bool {
        self.consumes_mime_types.iter().any(|m| m == media_type)
    }
}

/// What an adapter reports about itself on `GET /metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerAdapterMetadata {
    pub scanner: Scanner,
    pub capabilities: Vec<ScannerCapability>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ScannerAdapterMetadata {
    pub fn validate(&self) -> Result<()> {
        let scanner = &self.scanner;
        if scanner.name.is_empty() || scanner.vendor.is_empty() || scanner.version.is_empty() {
            return Err(Error::Scanner(
                "invalid scanner adapter metadata: scanner name, vendor and version are required"
                    .into(),
            ));
        }

        if self.capabilities.is_empty() {
            return Err(Error::Scanner(
                "invalid scanner adapter metadata: no capabilities advertised".into(),
            ));
        }

        for capability in &self.capabilities {
            let consumes_artifact = capability
                .consumes_mime_types
                .iter()
                .any(|m| mime::ARTIFACT_MIME_TYPES.contains(&m.as_str()));
            if !consumes_artifact {
                return Err(Error::Scanner(format!(
                    "invalid scanner adapter metadata: {} capability consumes none of {:?}",
                    capability.capability_type,
                    mime::ARTIFACT_MIME_TYPES
                )));
            }

            let produces_report = capability.produces_mime_types.iter().any(|m| {
                mime::is_vulnerability_report(m) || mime::is_sbom_report(m)
            });
            if !produces_report {
                return Err(Error::Scanner(format!(
                    "invalid scanner adapter metadata: {} capability produces no known report type",
                    capability.capability_type
                )));
            }
        }

        let produces_native = self
            .capabilities_of(CapabilityType::Vulnerability)
            .any(|c| c.produces_mime_types.iter().any(|m| m == mime::MIME_TYPE_NATIVE_REPORT));
        if !produces_native {
            return Err(Error::Scanner(format!(
                "invalid scanner adapter metadata: no capability produces {}",
                mime::MIME_TYPE_NATIVE_REPORT
            )));
        }

        Ok(())
    }

    pub fn capabilities_of(
        &self,
        capability_type: CapabilityType,
    ) -> impl Iterator<Item = &ScannerCapability> {
        self.capabilities
            .iter()
            .filter(move |c| c.capability_type == capability_type)
    }

    /// The capability of the given type that consumes `media_type`.
    pub fn capability_for(
        &self,
        media_type: &str,
        capability_type: CapabilityType,
    ) -> Option<&ScannerCapability> {
        self.capabilities_of(capability_type)
            .find(|c| c.consumes(media_type))
    }

    pub fn supports(&self, media_type: &str, capability_type: CapabilityType) -> bool {
        self.capability_for(media_type, capability_type).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub url: String,
    pub authorization: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledCapability {
    #[serde(rename = "type")]
    pub capability_type: CapabilityType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produces_mime_types: Vec<String>,
}

/// Body of `POST /scan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub registry: Registry,
    pub artifact: Artifact,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_capabilities: Vec<EnabledCapability>,
}

impl ScanRequest {
    pub fn validate(&self) -> Result<()> {
        if self.registry.url.is_empty() {
            return Err(Error::BadRequest("scan request: missing registry url".into()));
        }
        if self.artifact.repository.is_empty()
            || self.artifact.digest.is_empty()
            || self.artifact.manifest_media_type.is_empty()
        {
            return Err(Error::BadRequest(
                "scan request: artifact repository, digest and mime type are required".into(),
            ));
        }
        Ok(())
    }

    pub fn capability_type(&self) -> CapabilityType {
        self.enabled_capabilities
            .first()
            .map(|c| c.capability_type)
            .unwrap_or_default()
    }

    /// JSON with the registry authorization hidden, for logs.
    pub fn to_redacted_json(&self) -> String {
        let mut copy = self.clone();
        copy.registry.authorization = "[HIDDEN]".into();
        serde_json::to_string(&copy).unwrap_or_default()
    }
}

/// Body of a `202 Accepted` answer to `POST /scan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn a_native_scanner_is_valid() {
        assert!(native_metadata().validate().is_ok());
    }

    #[test]
    fn metadata_deserializes_from_the_adapter_contract() {
        let json = r#"{
            "scanner": {"name": "Trivy", "vendor": "Aqua Security", "version": "0.50.1"},
            "capabilities": [{
                "consumes_mime_types": ["application/vnd.docker.distribution.manifest.v2+json"],
                "produces_mime_types": ["application/vnd.scanner.adapter.vuln.report.harbor+json; version=1.0"]
            }],
            "properties": {"harbor.scanner-adapter/scanner-type": "os-package-vulnerability"}
        }"#;

        let metadata: ScannerAdapterMetadata = serde_json::from_str(json).unwrap();

        assert_eq!(metadata.capabilities[0].capability_type, CapabilityType::Vulnerability);
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn scanner_identity_is_required() {
        let mut metadata = native_metadata();
        metadata.scanner.vendor.clear();

        assert!(matches!(metadata.validate(), Err(Error::Scanner(_))));
    }

    #[test]
    fn at_least_one_capability_is_required() {
        let mut metadata = native_metadata();
        metadata.capabilities.clear();

        assert!(metadata.validate().is_err());
    }

    #[test]
    fn a_scanner_not_producing_the_native_report_is_rejected() {
        let metadata = metadata_consuming(
            &[mime::MIME_TYPE_DOCKER_ARTIFACT],
            &[mime::MIME_TYPE_GENERIC_VULNERABILITY_REPORT],
        );

        assert!(metadata.validate().is_err());
    }

    #[test]
    fn a_capability_consuming_unknown_types_is_rejected() {
        let metadata = metadata_consuming(&["text/plain"], &[mime::MIME_TYPE_NATIVE_REPORT]);

        assert!(metadata.validate().is_err());
    }

    #[test]
    fn capabilities_are_selected_by_media_type() {
        let metadata =
            metadata_consuming(&[mime::MIME_TYPE_OCI_ARTIFACT], &[mime::MIME_TYPE_NATIVE_REPORT]);

        assert!(metadata.supports(mime::MIME_TYPE_OCI_ARTIFACT, CapabilityType::Vulnerability));
        assert!(!metadata.supports(mime::MIME_TYPE_DOCKER_ARTIFACT, CapabilityType::Vulnerability));
        assert!(!metadata.supports(mime::MIME_TYPE_OCI_ARTIFACT, CapabilityType::Sbom));
    }
}
