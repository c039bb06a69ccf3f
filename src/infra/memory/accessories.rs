use std::collections::HashMap;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::app::AccessoryStore;
use crate::domain::artifact::Artifact;
use crate::domain::errors::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accessory {
    pub subject_digest: String,
    pub media_type: String,
    pub document: Bytes,
}

/// Content-addressed accessories attached to artifacts.
#[derive(Debug, Default)]
pub struct InMemoryAccessoryStore {
    accessories: RwLock<HashMap<String, Accessory>>,
}

impl InMemoryAccessoryStore {
    pub async fn get(&self, digest: &str) -> Option<Accessory> {
        self.accessories.read().await.get(digest).cloned()
    }

    pub async fn len(&self) -> usize {
        self.accessories.read().await.len()
    }
}

pub fn content_digest(document: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(document)))
}

#[async_trait::async_trait]
impl AccessoryStore for InMemoryAccessoryStore {
    async fn push(&self, subject: &Artifact, media_type: &str, document: Vec<u8>) -> Result<String> {
        if document.is_empty() {
            return Err(Error::BadRequest(format!(
                "refusing to attach an empty {media_type} document to {subject}"
            )));
        }
        let digest = content_digest(&document);
        self.accessories.write().await.insert(
            digest.clone(),
            Accessory {
                subject_digest: subject.digest.clone(),
                media_type: media_type.to_string(),
                document: Bytes::from(document),
            },
        );
        Ok(digest)
    }

    async fn delete(&self, digest: &str) -> Result<()> {
        self.accessories.write().await.remove(digest);
        Ok(())
    }
}
