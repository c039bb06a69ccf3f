use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::app::ProjectMetadataStore;
use crate::domain::errors::Result;

#[derive(Default, Debug)]
pub struct InMemoryProjectMetadataStore {
    entries: RwLock<HashMap<(i64, String), String>>,
}

#[async_trait::async_trait]
impl ProjectMetadataStore for InMemoryProjectMetadataStore {
    async fn get(&self, project_id: i64, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(project_id, key.to_string()))
            .cloned())
    }

    async fn set(&self, project_id: i64, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert((project_id, key.to_string()), value.to_string());
        Ok(())
    }

    async fn delete(&self, project_id: i64, key: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .remove(&(project_id, key.to_string()));
        Ok(())
    }
}
