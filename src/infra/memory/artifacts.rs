use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::app::ArtifactController;
use crate::domain::artifact::Artifact;
use crate::domain::errors::Result;

/// Artifacts keyed by digest. Children are resolved through `references`.
#[derive(Default, Debug)]
pub struct InMemoryArtifactStore {
    artifacts: RwLock<HashMap<String, Artifact>>,
}

impl InMemoryArtifactStore {
    pub async fn add(&self, artifact: Artifact) {
        self.artifacts
            .write()
            .await
            .insert(artifact.digest.clone(), artifact);
    }

    pub async fn remove(&self, digest: &str) -> Option<Artifact> {
        self.artifacts.write().await.remove(digest)
    }
}

#[async_trait::async_trait]
impl ArtifactController for InMemoryArtifactStore {
    async fn get(&self, project_id: i64, digest: &str) -> Result<Option<Artifact>> {
        Ok(self
            .artifacts
            .read()
            .await
            .get(digest)
            .filter(|a| a.project_id == project_id)
            .cloned())
    }

    async fn children(&self, artifact: &Artifact) -> Result<Vec<Artifact>> {
        let artifacts = self.artifacts.read().await;
        Ok(artifact
            .references
            .iter()
            .filter_map(|digest| artifacts.get(digest))
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<Artifact>> {
        let artifacts = self.artifacts.read().await;
        let referenced: Vec<&String> = artifacts.values().flat_map(|a| &a.references).collect();
        let mut top_level: Vec<Artifact> = artifacts
            .values()
            .filter(|a| !a.is_accessory && !referenced.contains(&&a.digest))
            .cloned()
            .collect();
        top_level.sort_by(|a, b| a.repository.cmp(&b.repository).then(a.digest.cmp(&b.digest)));
        Ok(top_level)
    }
}
