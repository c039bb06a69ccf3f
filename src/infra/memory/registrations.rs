use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::app::RegistrationStore;
use crate::domain::errors::{Error, Result};
use crate::domain::query::Query;
use crate::domain::registration::Registration;

/// `scanner_registration` table.
#[derive(Default, Debug)]
pub struct InMemoryRegistrationStore {
    rows: RwLock<HashMap<String, Registration>>,
}

fn check_unique<'a>(
    rows: impl Iterator<Item = &'a Registration>,
    candidate: &Registration,
) -> Result<()> {
    for row in rows.filter(|r| r.uuid != candidate.uuid) {
        if row.name == candidate.name {
            return Err(Error::Conflict(format!(
                "registration name {} already exists",
                candidate.name
            )));
        }
        if row.url == candidate.url {
            return Err(Error::Conflict(format!(
                "registration url {} already exists",
                candidate.url
            )));
        }
    }
    Ok(())
}

fn unset_other_defaults(rows: &mut HashMap<String, Registration>, keep: &str) {
    rows.values_mut()
        .filter(|r| r.uuid != keep)
        .for_each(|r| r.is_default = false);
}

#[async_trait::async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn create(&self, mut registration: Registration) -> Result<String> {
        let mut rows = self.rows.write().await;

        registration.uuid = Uuid::new_v4().to_string();
        check_unique(rows.values(), &registration)?;

        let now = Utc::now();
        registration.create_time = Some(now);
        registration.update_time = Some(now);

        let uuid = registration.uuid.clone();
        if registration.is_default {
            unset_other_defaults(&mut rows, &uuid);
        }
        rows.insert(uuid.clone(), registration);
        Ok(uuid)
    }

    async fn get(&self, uuid: &str) -> Result<Option<Registration>> {
        Ok(self.rows.read().await.get(uuid).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Registration>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn get_default(&self) -> Result<Option<Registration>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.is_default)
            .cloned())
    }

    async fn list(&self, query: &Query) -> Result<Vec<Registration>> {
        let mut matching: Vec<Registration> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| query.matches(|key| r.query_field(key)))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(b.create_time.cmp(&a.create_time))
        });
        Ok(query.paginate(matching))
    }

    async fn count(&self, query: &Query) -> Result<usize> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|r| query.matches(|key| r.query_field(key)))
            .count())
    }

    async fn update(&self, registration: &Registration) -> Result<()> {
        let mut rows = self.rows.write().await;

        let Some(existing) = rows.get(&registration.uuid) else {
            return Err(Error::NotFound(format!("registration {}", registration.uuid)));
        };
        check_unique(rows.values(), registration)?;

        let mut updated = registration.clone();
        updated.create_time = existing.create_time;
        updated.update_time = Some(Utc::now());
        updated.metadata = None;
        updated.health = None;

        if updated.is_default {
            unset_other_defaults(&mut rows, &updated.uuid);
        }
        rows.insert(updated.uuid.clone(), updated);
        Ok(())
    }

    async fn delete(&self, uuid: &str) -> Result<()> {
        self.rows.write().await.remove(uuid);
        Ok(())
    }

    async fn set_as_default(&self, uuid: &str) -> Result<()> {
        let mut rows = self.rows.write().await;

        let Some(target) = rows.get_mut(uuid) else {
            return Err(Error::NotFound(format!("registration {uuid}")));
        };
        if target.disabled {
            return Err(Error::PreconditionFailed(format!(
                "registration {} is deactivated and cannot be the default",
                target.name
            )));
        }
        target.is_default = true;
        target.update_time = Some(Utc::now());

        unset_other_defaults(&mut rows, uuid);
        Ok(())
    }
}
