use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::scanner_controller::{RegistrationOptions, ScannerController};
use super::services::{ArtifactController, WalkAction, walk};
use crate::domain::adapter::{CapabilityType, ScannerAdapterMetadata};
use crate::domain::artifact::Artifact;
use crate::domain::errors::Result;

/// Tells whether artifacts can be scanned by their project's scanner.
///
/// Scanner metadata is looked up once per project for the lifetime of the
/// checker; build a new one per batch of checks.
pub struct Checker {
    scanners: Arc<ScannerController>,
    artifacts: Arc<dyn ArtifactController>,
    metadata: Mutex<HashMap<i64, Option<Arc<ScannerAdapterMetadata>>>>,
}

impl Checker {
    pub fn new(scanners: Arc<ScannerController>, artifacts: Arc<dyn ArtifactController>) -> Self {
        Self {
            scanners,
            artifacts,
            metadata: Mutex::default(),
        }
    }

    async fn metadata_of(&self, project_id: i64) -> Result<Option<Arc<ScannerAdapterMetadata>>> {
        let mut memo = self.metadata.lock().await;
        if let Some(metadata) = memo.get(&project_id) {
            return Ok(metadata.clone());
        }

        let metadata = match self
            .scanners
            .get_registration_by_project(project_id, RegistrationOptions::default())
            .await?
        {
            Some(registration) if !registration.disabled => {
                Some(Arc::new(self.scanners.ping(&registration).await?))
            }
            _ => None,
        };
        memo.insert(project_id, metadata.clone());
        Ok(metadata)
    }

    /// True when `artifact`, or an artifact it references, is consumable by
    /// a vulnerability capability of the project's scanner.
    pub async fn is_scannable(&self, artifact: &Artifact) -> Result<bool> {
        let Some(metadata) = self.metadata_of(artifact.project_id).await? else {
            return Ok(false);
        };

        let mut scannable = false;
        walk(self.artifacts.as_ref(), artifact, |a| {
            if a.is_accessory {
                return Ok(WalkAction::Skip);
            }
            if metadata.supports(&a.manifest_media_type, CapabilityType::Vulnerability) {
                scannable = true;
                return Ok(WalkAction::Break);
            }
            Ok(WalkAction::Continue)
        })
        .await?;
        Ok(scannable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::mocks::{StaticPool, adapter_with_metadata};
    use crate::domain::adapter::fixtures::metadata_consuming;
    use crate::domain::mime;
    use crate::domain::registration::Registration;
    use crate::infra::memory::{
        InMemoryArtifactStore, InMemoryProjectMetadataStore, InMemoryRegistrationStore,
        InMemoryReportStore,
    };

    async fn checker(consumes: &[&str]) -> (Checker, Arc<InMemoryArtifactStore>, Arc<StaticPool>) {
        let pool = Arc::new(StaticPool::new(adapter_with_metadata(metadata_consuming(
            consumes,
            &[mime::MIME_TYPE_NATIVE_REPORT],
        ))));
        let scanners = Arc::new(ScannerController::new(
            Arc::new(InMemoryRegistrationStore::default()),
            Arc::new(InMemoryReportStore::default()),
            Arc::new(InMemoryProjectMetadataStore::default()),
            pool.clone(),
        ));
        scanners
            .create(Registration::new("trivy", "http://trivy:8080"))
            .await
            .unwrap();
        let artifacts = Arc::new(InMemoryArtifactStore::default());
        (Checker::new(scanners, artifacts.clone()), artifacts, pool)
    }

    #[tokio::test]
    async fn a_consumable_image_is_scannable() {
        let (checker, _, _) = checker(&[mime::MIME_TYPE_DOCKER_ARTIFACT]).await;
        let image = Artifact::new(1, "library/app", "sha256:a", mime::MIME_TYPE_DOCKER_ARTIFACT);

        assert!(checker.is_scannable(&image).await.unwrap());
    }

    #[tokio::test]
    async fn an_index_is_scannable_through_its_children() {
        let (checker, artifacts, _) = checker(&[mime::MIME_TYPE_OCI_ARTIFACT]).await;
        artifacts
            .add(Artifact::new(1, "library/app", "sha256:child", mime::MIME_TYPE_OCI_ARTIFACT))
            .await;
        let index = Artifact::new(1, "library/app", "sha256:index", mime::MIME_TYPE_OCI_INDEX)
            .with_references(vec!["sha256:child".into()]);

        assert!(checker.is_scannable(&index).await.unwrap());
    }

    #[tokio::test]
    async fn unconsumed_media_types_are_not_scannable() {
        let (checker, _, _) = checker(&[mime::MIME_TYPE_OCI_ARTIFACT]).await;
        let image = Artifact::new(1, "library/app", "sha256:a", mime::MIME_TYPE_DOCKER_ARTIFACT);

        assert!(!checker.is_scannable(&image).await.unwrap());
    }

    #[tokio::test]
    async fn metadata_is_fetched_once_per_project() {
        let (checker, _, pool) = checker(&[mime::MIME_TYPE_DOCKER_ARTIFACT]).await;
        let fetched_on_create = pool.fetches();

        for digest in ["sha256:a", "sha256:b", "sha256:c"] {
            let image = Artifact::new(1, "library/app", digest, mime::MIME_TYPE_DOCKER_ARTIFACT);
            checker.is_scannable(&image).await.unwrap();
        }

        assert!(pool.fetches() - fetched_on_create <= 1);
    }
}
