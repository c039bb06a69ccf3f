use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::job::HookEvent;
use super::scan_controller::{ScanController, ScanOption, track_id_of_hook_url};
use super::services::ProjectMetadataStore;
use crate::domain::artifact::Artifact;
use crate::domain::errors::Result;

/// Project metadata key switching scan-on-push on.
pub const AUTO_SCAN_KEY: &str = "auto_scan";

/// Registry events the orchestrator reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactEvent {
    Pushed(Artifact),
    Deleted(Vec<Artifact>),
}

pub struct ArtifactEventHandler {
    scans: Arc<ScanController>,
    project_metadata: Arc<dyn ProjectMetadataStore>,
}

impl ArtifactEventHandler {
    pub fn new(scans: Arc<ScanController>, project_metadata: Arc<dyn ProjectMetadataStore>) -> Self {
        Self {
            scans,
            project_metadata,
        }
    }

    pub async fn handle(&self, event: &ArtifactEvent) -> Result<()> {
        match event {
            ArtifactEvent::Pushed(artifact) => {
                let auto_scan = self
                    .project_metadata
                    .get(artifact.project_id, AUTO_SCAN_KEY)
                    .await?;
                if auto_scan.as_deref() != Some("true") {
                    debug!(artifact = %artifact, "auto scan disabled for the project");
                    return Ok(());
                }
                info!(artifact = %artifact, "scanning pushed artifact");
                self.scans
                    .scan(artifact, &[ScanOption::FromEvent(true)])
                    .await
            }
            ArtifactEvent::Deleted(artifacts) => {
                let digests: Vec<String> = artifacts.iter().map(|a| a.digest.clone()).collect();
                self.scans.delete_by_digests(&digests).await
            }
        }
    }
}

/// Delivers status changes of the job runtime to the scan controller.
pub struct JobHookDispatcher {
    scans: Arc<ScanController>,
}

impl JobHookDispatcher {
    pub fn new(scans: Arc<ScanController>) -> Self {
        Self { scans }
    }

    pub async fn dispatch(&self, event: &HookEvent) -> Result<()> {
        let Some(track_id) = track_id_of_hook_url(&event.hook_url) else {
            warn!(hook_url = %event.hook_url, "dropping status change for an unknown hook");
            return Ok(());
        };
        self.scans.handle_job_hooks(track_id, &event.change).await
    }

    /// Runs until every sender of `events` is gone.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<HookEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.dispatch(&event).await {
                error!(
                    hook_url = %event.hook_url,
                    job_id = %event.change.job_id,
                    status = %event.change.status,
                    "failed to handle job hook: {e}"
                );
            }
        }
        debug!("job hook dispatcher finished");
    }
}
