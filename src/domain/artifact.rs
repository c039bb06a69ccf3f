use serde::{Deserialize, Serialize};

use super::mime;

/// A content-addressed object of the registry, as handed to scanner adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: i64,
    #[serde(rename = "namespace_id", default)]
    pub project_id: i64,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub digest: String,
    #[serde(rename = "mime_type")]
    pub manifest_media_type: String,
    /// Digests of the artifacts this one references (index children).
    #[serde(default, skip_serializing)]
    pub references: Vec<String>,
    /// Accessories (signatures, SBOMs) are never scanned.
    #[serde(default, skip_serializing)]
    pub is_accessory: bool,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl Artifact {
    pub fn new(
        project_id: i64,
        repository: impl Into<String>,
        digest: impl Into<String>,
        manifest_media_type: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            project_id,
            repository: repository.into(),
            tag: None,
            digest: digest.into(),
            manifest_media_type: manifest_media_type.into(),
            references: Vec::new(),
            is_accessory: false,
        }
    }

    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    pub fn is_image_index(&self) -> bool {
        mime::is_image_index(&self.manifest_media_type)
    }

    /// The project segment of `project/repo/...`.
    pub fn project_name(&self) -> &str {
        self.repository
            .split_once('/')
            .map(|(project, _)| project)
            .unwrap_or(&self.repository)
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.repository, self.digest)
    }
}
