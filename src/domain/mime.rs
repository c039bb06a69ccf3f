//! Media types exchanged with scanner adapters.

pub const MIME_TYPE_OCI_ARTIFACT: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MIME_TYPE_DOCKER_ARTIFACT: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MIME_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MIME_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

pub const MIME_TYPE_ADAPTER_META: &str = "application/vnd.scanner.adapter.metadata+json; version=1.0";
pub const MIME_TYPE_SCAN_REQUEST: &str =
    "application/vnd.scanner.adapter.scan.request+json; version=1.0";
pub const MIME_TYPE_SCAN_RESPONSE: &str =
    "application/vnd.scanner.adapter.scan.response+json; version=1.0";

pub const MIME_TYPE_NATIVE_REPORT: &str =
    "application/vnd.scanner.adapter.vuln.report.harbor+json; version=1.0";
pub const MIME_TYPE_GENERIC_VULNERABILITY_REPORT: &str =
    "application/vnd.security.vulnerability.report; version=1.1";

pub const MIME_TYPE_SBOM_REPORT: &str = "application/vnd.security.sbom.report+json; version=1.0";
pub const MIME_TYPE_SBOM_SPDX: &str = "application/spdx+json";
pub const MIME_TYPE_SBOM_CYCLONEDX: &str = "application/vnd.cyclonedx+json";

pub const ARTIFACT_MIME_TYPES: &[&str] = &[MIME_TYPE_OCI_ARTIFACT, MIME_TYPE_DOCKER_ARTIFACT];
pub const VULNERABILITY_REPORT_MIME_TYPES: &[&str] =
    &[MIME_TYPE_NATIVE_REPORT, MIME_TYPE_GENERIC_VULNERABILITY_REPORT];
pub const SBOM_REPORT_MIME_TYPES: &[&str] = &[MIME_TYPE_SBOM_REPORT];

pub fn is_vulnerability_report(mime_type: &str) -> bool {
    VULNERABILITY_REPORT_MIME_TYPES.contains(&mime_type)
}

pub fn is_sbom_report(mime_type: &str) -> bool {
    SBOM_REPORT_MIME_TYPES.contains(&mime_type)
}

pub fn is_image_index(media_type: &str) -> bool {
    media_type == MIME_TYPE_OCI_INDEX || media_type == MIME_TYPE_DOCKER_MANIFEST_LIST
}
