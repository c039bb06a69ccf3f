use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::client_pool::{HttpClientPool, PoolConfig};
use super::job_log_layer::JobLogBuffer;
use super::local_job_runtime::LocalJobService;
use super::memory::{
    InMemoryAccessoryStore, InMemoryArtifactStore, InMemoryProjectMetadataStore,
    InMemoryRegistrationStore, InMemoryReportStore, InMemoryRobotAccountManager,
    InMemoryVulnerabilityRecordStore,
};
use crate::app::component_factory::{
    BackgroundTask, ComponentFactory, ComponentFactoryError, Components, Config,
};
use crate::app::{
    ArtifactEventHandler, JobHookDispatcher, ReportConverter, ScanAll, ScanController,
    ScanControllerDeps, ScanJob, ScanJobSettings, ScanSettings, ScannerController,
};
use crate::domain::job::IMAGE_SCAN_JOB;

/// Builds the components over in-process stores, the HTTP client pool and
/// the local job runtime. The registry-facing stores are exposed so the
/// embedding process can feed them.
#[derive(Default)]
pub struct ConcreteComponentFactory {
    artifacts: Arc<InMemoryArtifactStore>,
    project_metadata: Arc<InMemoryProjectMetadataStore>,
    accessories: Arc<InMemoryAccessoryStore>,
    job_logs: JobLogBuffer,
}

impl ConcreteComponentFactory {
    pub fn artifacts(&self) -> Arc<InMemoryArtifactStore> {
        self.artifacts.clone()
    }

    pub fn project_metadata(&self) -> Arc<InMemoryProjectMetadataStore> {
        self.project_metadata.clone()
    }

    pub fn accessories(&self) -> Arc<InMemoryAccessoryStore> {
        self.accessories.clone()
    }

    /// Buffer the job log tracing layer must write to.
    pub fn job_logs(&self) -> JobLogBuffer {
        self.job_logs.clone()
    }
}

struct PoolEviction(Arc<HttpClientPool>);

impl BackgroundTask for PoolEviction {
    fn name(&self) -> &str {
        "client pool eviction"
    }

    fn spawn(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.0.spawn_eviction(shutdown)
    }
}

impl ComponentFactory for ConcreteComponentFactory {
    fn create_components(&self, config: Config) -> Result<Components, ComponentFactoryError> {
        config.validate()?;

        let pool = Arc::new(HttpClientPool::new(PoolConfig {
            eviction_interval: Duration::from_secs(config.client_pool.eviction_interval_secs),
            expiration: Duration::from_secs(config.client_pool.expiration_secs),
            request_timeout: Duration::from_secs(config.client_pool.request_timeout_secs),
        }));

        let vulnerabilities = Arc::new(InMemoryVulnerabilityRecordStore::default());
        let reports = Arc::new(InMemoryReportStore::with_vulnerabilities(vulnerabilities.clone()));
        let scanners = Arc::new(ScannerController::new(
            Arc::new(InMemoryRegistrationStore::default()),
            reports.clone(),
            self.project_metadata.clone(),
            pool.clone(),
        ));

        let (hooks, hook_events) = mpsc::unbounded_channel();
        let scan_job = ScanJob::new(
            pool.clone(),
            ScanJobSettings {
                first_check_interval: config.job.first_check_interval(),
                check_timeout: config.job.check_timeout(),
            },
        );
        let jobs = LocalJobService::new(config.job.max_attempts, self.job_logs.clone(), hooks)
            .with_job(IMAGE_SCAN_JOB, Arc::new(scan_job));

        let scans = Arc::new(ScanController::new(
            ScanControllerDeps {
                scanners: scanners.clone(),
                reports,
                sbom_reports: Arc::new(InMemoryReportStore::default()),
                converter: ReportConverter::new(vulnerabilities),
                artifacts: self.artifacts.clone(),
                robots: Arc::new(InMemoryRobotAccountManager::with_name_prefix(
                    config.robot.name_prefix.clone(),
                )),
                jobs: Arc::new(jobs),
                accessories: self.accessories.clone(),
            },
            ScanSettings {
                external_url: config.registry.external_url.clone(),
                core_internal_url: config.registry.core_internal_url.clone(),
                robot_ttl_secs: config.robot.ttl_seconds,
            },
        ));

        Ok(Components {
            scan_all: Arc::new(ScanAll::new(
                scans.clone(),
                scanners.clone(),
                self.artifacts.clone(),
            )),
            artifact_events: Arc::new(ArtifactEventHandler::new(
                scans.clone(),
                self.project_metadata.clone(),
            )),
            job_hooks: JobHookDispatcher::new(scans.clone()),
            hook_events,
            background: vec![Box::new(PoolEviction(pool))],
            scanners,
            scans,
        })
    }
}
