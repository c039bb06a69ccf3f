use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::checker::Checker;
use super::scan_controller::{ScanController, ScanOption};
use super::scanner_controller::ScannerController;
use super::services::ArtifactController;
use crate::domain::errors::{ErrorKind, Result};
use crate::domain::report::ScanStats;

/// Outcome of one scan-all run, counted per artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanAllSummary {
    pub total: usize,
    pub submitted: usize,
    pub conflict: usize,
    pub precondition: usize,
    pub unsupported: usize,
    pub unknown: usize,
}

/// Scans every top-level artifact of the registry on behalf of a requester.
pub struct ScanAll {
    scans: Arc<ScanController>,
    scanners: Arc<ScannerController>,
    artifacts: Arc<dyn ArtifactController>,
}

impl ScanAll {
    pub fn new(
        scans: Arc<ScanController>,
        scanners: Arc<ScannerController>,
        artifacts: Arc<dyn ArtifactController>,
    ) -> Self {
        Self {
            scans,
            scanners,
            artifacts,
        }
    }

    /// Enqueues a scan of every scannable artifact. Failures are counted
    /// and logged; the run stops early once `stop` turns true.
    pub async fn run(&self, requester: &str, stop: &watch::Receiver<bool>) -> Result<ScanAllSummary> {
        let checker = Checker::new(self.scanners.clone(), self.artifacts.clone());
        let options = [ScanOption::Requester(requester.to_string())];
        let mut summary = ScanAllSummary::default();

        for artifact in self.artifacts.list().await? {
            if *stop.borrow() {
                info!(requester, total = summary.total, "scan all stopped");
                break;
            }
            summary.total += 1;

            match checker.is_scannable(&artifact).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(artifact = %artifact, "skipping unscannable artifact");
                    summary.unsupported += 1;
                    continue;
                }
                Err(e) => {
                    warn!(artifact = %artifact, "scan all: {e}");
                    summary.unknown += 1;
                    continue;
                }
            }

            match self.scans.scan(&artifact, &options).await {
                Ok(()) => summary.submitted += 1,
                Err(e) => {
                    warn!(artifact = %artifact, requester, "scan all: {e}");
                    match e.kind() {
                        ErrorKind::Conflict => summary.conflict += 1,
                        ErrorKind::PreconditionFailed => summary.precondition += 1,
                        ErrorKind::BadRequest => summary.unsupported += 1,
                        _ => summary.unknown += 1,
                    }
                }
            }
        }

        info!(
            requester,
            total = summary.total,
            submitted = summary.submitted,
            conflict = summary.conflict,
            precondition = summary.precondition,
            unsupported = summary.unsupported,
            unknown = summary.unknown,
            "scan all finished"
        );
        Ok(summary)
    }

    pub async fn get_stats(&self, requester: &str) -> Result<ScanStats> {
        self.scans.get_stats(requester).await
    }
}
