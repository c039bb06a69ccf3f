use std::sync::Arc;
use std::time::Duration;

use mockito::{Mock, Server, ServerGuard};
use scan_orchestrator::app::component_factory::{
    ComponentFactory, Components, Config, JobConfig, RegistryConfig,
};
use scan_orchestrator::app::{ArtifactEventHandler, ScanAll, ScanController, ScannerController};
use scan_orchestrator::domain::artifact::Artifact;
use scan_orchestrator::domain::mime;
use scan_orchestrator::domain::registration::Registration;
use scan_orchestrator::domain::report::Report;
use scan_orchestrator::infra::memory::{InMemoryArtifactStore, InMemoryProjectMetadataStore};
use scan_orchestrator::infra::ConcreteComponentFactory;
use serde_json::json;
use tokio::task::JoinHandle;

pub const DIGEST: &str = "sha256:4c1f2b3a";

/// An orchestrator wired by the concrete factory, talking to a mocked adapter.
pub struct Orchestrator {
    pub adapter: ServerGuard,
    pub scanners: Arc<ScannerController>,
    pub scans: Arc<ScanController>,
    pub scan_all: Arc<ScanAll>,
    pub artifact_events: Arc<ArtifactEventHandler>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub project_metadata: Arc<InMemoryProjectMetadataStore>,
    mocks: Vec<Mock>,
    dispatcher: JoinHandle<()>,
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

pub fn metadata(consumes: &[&str]) -> String {
    json!({
        "scanner": {"name": "Trivy", "vendor": "Aqua Security", "version": "0.50.1"},
        "capabilities": [{
            "consumes_mime_types": consumes,
            "produces_mime_types": [mime::MIME_TYPE_NATIVE_REPORT]
        }],
        "properties": {}
    })
    .to_string()
}

pub fn native_report() -> String {
    json!({
        "generated_at": "2024-03-01T10:00:00Z",
        "scanner": {"name": "Trivy", "vendor": "Aqua Security", "version": "0.50.1"},
        "severity": "High",
        "vulnerabilities": [
            {"id": "CVE-2024-0001", "package": "openssl", "version": "3.0.1", "fix_version": "3.0.2", "severity": "High"},
            {"id": "CVE-2024-0002", "package": "zlib", "version": "1.2.11", "severity": "Medium"},
            {"id": "CVE-2024-0003", "package": "busybox", "version": "1.36.0", "fix_version": "1.36.1", "severity": "Low"}
        ]
    })
    .to_string()
}

pub fn image(digest: &str) -> Artifact {
    Artifact::new(1, "library/app", digest, mime::MIME_TYPE_DOCKER_ARTIFACT)
}

async fn mock_metadata(adapter: &mut ServerGuard, consumes: &[&str]) -> Mock {
    adapter
        .mock("GET", "/api/v1/metadata")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(metadata(consumes))
        .create_async()
        .await
}

pub async fn orchestrator(consumes: &[&str]) -> Orchestrator {
    let mut adapter = Server::new_async().await;
    let metadata = mock_metadata(&mut adapter, consumes).await;

    let factory = ConcreteComponentFactory::default();
    let Components {
        scanners,
        scans,
        scan_all,
        artifact_events,
        job_hooks,
        hook_events,
        ..
    } = factory
        .create_components(Config {
            registry: RegistryConfig {
                external_url: "https://registry.example.com".into(),
                core_internal_url: "http://core:8080".into(),
            },
            job: JobConfig {
                first_check_interval_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        })
        .expect("components");

    scanners
        .ensure_scanner(Registration::new("trivy", adapter.url()), false)
        .await
        .expect("scanner installed");

    let artifacts = factory.artifacts();
    artifacts.add(image(DIGEST)).await;

    Orchestrator {
        adapter,
        scanners,
        scans,
        scan_all,
        artifact_events,
        artifacts,
        project_metadata: factory.project_metadata(),
        mocks: vec![metadata],
        dispatcher: tokio::spawn(job_hooks.run(hook_events)),
    }
}

impl Orchestrator {
    /// Makes the adapter accept every scan and serve `report` at once.
    pub async fn serve_report(&mut self, report: &str) {
        let submit = self
            .adapter
            .mock("POST", "/api/v1/scan")
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "scan-1"}"#)
            .create_async()
            .await;
        let fetch = self
            .adapter
            .mock("GET", "/api/v1/scan/scan-1/report")
            .with_status(200)
            .with_body(report)
            .create_async()
            .await;
        self.mocks.extend([submit, fetch]);
    }

    /// Makes the adapter accept every scan and never have the report ready.
    pub async fn serve_report_never_ready(&mut self) {
        let submit = self
            .adapter
            .mock("POST", "/api/v1/scan")
            .with_status(202)
            .with_body(r#"{"id": "scan-1"}"#)
            .create_async()
            .await;
        let fetch = self
            .adapter
            .mock("GET", "/api/v1/scan/scan-1/report")
            .with_status(302)
            .with_header("Refresh-After", "60")
            .create_async()
            .await;
        self.mocks.extend([submit, fetch]);
    }

    /// Waits until the native report of `artifact` reaches a final status.
    pub async fn finished_report(&self, artifact: &Artifact) -> Report {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let reports = self.scans.get_report(artifact, &[]).await.expect("reports");
                if let Some(report) = reports.into_iter().find(|r| !r.is_in_progress()) {
                    return report;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("the scan did not finish in time")
    }
}
