use std::collections::{HashSet, VecDeque};

use crate::domain::artifact::Artifact;
use crate::domain::errors::Result;
use crate::domain::job::{JobData, RobotAccount};

/// What a walk visitor wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    Continue,
    /// Do not descend into the children of the visited artifact.
    Skip,
    /// Stop the walk without error.
    Break,
}

/// Read-only view of the registry's artifacts.
#[async_trait::async_trait]
pub trait ArtifactController: Send + Sync {
    async fn get(&self, project_id: i64, digest: &str) -> Result<Option<Artifact>>;

    /// The artifacts `artifact` references.
    async fn children(&self, artifact: &Artifact) -> Result<Vec<Artifact>>;

    /// Every top-level artifact of the registry.
    async fn list(&self) -> Result<Vec<Artifact>>;
}

/// Breadth-first walk from `root`, visiting each digest once.
pub async fn walk<F>(artifacts: &dyn ArtifactController, root: &Artifact, mut visit: F) -> Result<()>
where
    F: FnMut(&Artifact) -> Result<WalkAction> + Send,
{
    let mut queue = VecDeque::from([root.clone()]);
    let mut walked = HashSet::new();

    while let Some(artifact) = queue.pop_front() {
        walked.insert(artifact.digest.clone());

        match visit(&artifact)? {
            WalkAction::Break => return Ok(()),
            WalkAction::Skip => continue,
            WalkAction::Continue => {}
        }

        if artifact.references.is_empty() {
            continue;
        }
        for child in artifacts.children(&artifact).await? {
            if !walked.contains(&child.digest) {
                queue.push_back(child);
            }
        }
    }

    Ok(())
}

/// Key/value metadata attached to projects.
#[async_trait::async_trait]
pub trait ProjectMetadataStore: Send + Sync {
    async fn get(&self, project_id: i64, key: &str) -> Result<Option<String>>;

    async fn set(&self, project_id: i64, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, project_id: i64, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotRequest {
    pub name: String,
    pub project_id: i64,
    pub ttl_secs: i64,
    pub actions: Vec<String>,
}

/// Mints and revokes the short-lived credentials adapters pull with.
#[async_trait::async_trait]
pub trait RobotAccountManager: Send + Sync {
    async fn create(&self, request: RobotRequest) -> Result<RobotAccount>;

    async fn delete(&self, id: i64) -> Result<()>;
}

/// The job runtime scan jobs are submitted to.
#[async_trait::async_trait]
pub trait JobService: Send + Sync {
    /// Enqueues the job and returns its id.
    async fn submit(&self, job: JobData) -> Result<String>;

    async fn stop(&self, job_id: &str) -> Result<()>;

    /// Captured log of the job, `None` when the job is unknown.
    async fn get_job_log(&self, job_id: &str) -> Result<Option<String>>;
}

/// Stores documents attached to an artifact as OCI accessories.
#[async_trait::async_trait]
pub trait AccessoryStore: Send + Sync {
    /// Archives `document` as an accessory of `subject` and returns its digest.
    async fn push(&self, subject: &Artifact, media_type: &str, document: Vec<u8>)
    -> Result<String>;

    async fn delete(&self, digest: &str) -> Result<()>;
}
