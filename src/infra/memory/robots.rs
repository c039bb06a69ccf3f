use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::RwLock;

use crate::app::{RobotAccountManager, RobotRequest};
use crate::domain::errors::{Error, Result};
use crate::domain::job::RobotAccount;

pub const DEFAULT_ROBOT_PREFIX: &str = "robot$";
const SECRET_LENGTH: usize = 32;

/// Robot accounts minted for adapters, with their granted actions.
#[derive(Debug)]
pub struct InMemoryRobotAccountManager {
    name_prefix: String,
    next_id: AtomicI64,
    accounts: RwLock<HashMap<i64, (RobotAccount, Vec<String>)>>,
}

impl Default for InMemoryRobotAccountManager {
    fn default() -> Self {
        Self::with_name_prefix(DEFAULT_ROBOT_PREFIX)
    }
}

impl InMemoryRobotAccountManager {
    pub fn with_name_prefix(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            next_id: AtomicI64::new(0),
            accounts: RwLock::default(),
        }
    }

    pub async fn get(&self, id: i64) -> Option<RobotAccount> {
        self.accounts.read().await.get(&id).map(|(a, _)| a.clone())
    }

    pub async fn actions_of(&self, id: i64) -> Vec<String> {
        self.accounts
            .read()
            .await
            .get(&id)
            .map(|(_, actions)| actions.clone())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }
}

#[async_trait::async_trait]
impl RobotAccountManager for InMemoryRobotAccountManager {
    async fn create(&self, request: RobotRequest) -> Result<RobotAccount> {
        if request.name.is_empty() {
            return Err(Error::BadRequest("robot account name is required".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let secret: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LENGTH)
            .map(char::from)
            .collect();
        let account = RobotAccount {
            id,
            name: format!("{}{}", self.name_prefix, request.name),
            secret,
            project_id: request.project_id,
            expires_at: Utc::now().timestamp() + request.ttl_secs,
        };

        self.accounts
            .write()
            .await
            .insert(id, (account.clone(), request.actions));
        Ok(account)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.accounts
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("robot account {id}")))
    }
}
