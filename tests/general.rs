mod setup;

use std::time::Duration;

use scan_orchestrator::app::{ArtifactEvent, AUTO_SCAN_KEY, ProjectMetadataStore, ScanOption};
use scan_orchestrator::domain::artifact::Artifact;
use scan_orchestrator::domain::mime;
use scan_orchestrator::domain::report::{
    CveAllowlist, NativeReport, Severity, Summary, SummaryOptions,
};
use setup::{DIGEST, Orchestrator, image, native_report, orchestrator};
use tokio::sync::watch;

const DOCKER: &[&str] = &[mime::MIME_TYPE_DOCKER_ARTIFACT];

async fn wait_for_status(o: &Orchestrator, status: &str) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let reports = o.scans.get_report(&image(DIGEST), &[]).await.unwrap();
            if reports.iter().any(|r| r.status == status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn the_first_scanner_installed_becomes_the_default() {
    let o = orchestrator(DOCKER).await;

    let registration = o.scanners.get_by_name("trivy").await.unwrap().unwrap();

    assert!(!registration.uuid.is_empty());
    assert!(registration.is_default);
}

#[tokio::test]
async fn a_scan_runs_to_a_normalised_report_and_its_summary() {
    let mut o = orchestrator(DOCKER).await;
    o.serve_report(&native_report()).await;

    o.scans.scan(&image(DIGEST), &[]).await.unwrap();
    let report = o.finished_report(&image(DIGEST)).await;

    assert_eq!(report.status, "Success");
    let full = NativeReport::from_json(&report.report).unwrap();
    assert_eq!(full.vulnerabilities.len(), 3);

    let summaries = o
        .scans
        .get_summary(
            &image(DIGEST),
            &[],
            &SummaryOptions::with_allowlist(CveAllowlist::new(["CVE-2024-0001"])),
        )
        .await
        .unwrap();
    let Some(Summary::Vulnerability(summary)) = summaries.get(mime::MIME_TYPE_NATIVE_REPORT) else {
        panic!("expected a native report summary");
    };
    assert_eq!(summary.severity, Severity::Medium);
    assert_eq!(summary.cve_bypassed, vec!["CVE-2024-0001".to_string()]);
    let counts = summary.summary.as_ref().unwrap();
    assert_eq!(counts.total, 2);
    assert_eq!(counts.fixable, 1);
}

#[tokio::test]
async fn scanning_an_artifact_already_being_scanned_conflicts() {
    let mut o = orchestrator(DOCKER).await;
    o.serve_report_never_ready().await;

    o.scans.scan(&image(DIGEST), &[]).await.unwrap();
    let err = o.scans.scan(&image(DIGEST), &[]).await.unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(o.scans.get_report(&image(DIGEST), &[]).await.unwrap().len(), 1);
}

#[tokio::test]
async fn an_unsupported_media_type_is_reported_without_creating_rows() {
    let o = orchestrator(&[mime::MIME_TYPE_OCI_ARTIFACT]).await;

    let err = o.scans.scan(&image(DIGEST), &[]).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("trivy"));
    assert!(message.contains(mime::MIME_TYPE_DOCKER_ARTIFACT));
    assert!(o.scans.get_report(&image(DIGEST), &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn a_running_scan_can_be_stopped() {
    let mut o = orchestrator(DOCKER).await;
    o.serve_report_never_ready().await;
    o.scans.scan(&image(DIGEST), &[]).await.unwrap();
    wait_for_status(&o, "Running").await;

    o.scans.stop(&image(DIGEST)).await.unwrap();

    assert_eq!(o.finished_report(&image(DIGEST)).await.status, "Stopped");
}

#[tokio::test]
async fn pushed_artifacts_are_scanned_only_when_the_project_asks_for_it() {
    let mut o = orchestrator(DOCKER).await;
    o.serve_report(&native_report()).await;
    let pushed = ArtifactEvent::Pushed(image(DIGEST));

    o.artifact_events.handle(&pushed).await.unwrap();
    assert!(o.scans.get_report(&image(DIGEST), &[]).await.unwrap().is_empty());

    o.project_metadata.set(1, AUTO_SCAN_KEY, "true").await.unwrap();
    o.artifact_events.handle(&pushed).await.unwrap();

    assert_eq!(o.finished_report(&image(DIGEST)).await.status, "Success");
}

#[tokio::test]
async fn deleting_an_artifact_drops_its_reports() {
    let mut o = orchestrator(DOCKER).await;
    o.serve_report(&native_report()).await;
    o.scans
        .scan(&image(DIGEST), &[ScanOption::Requester("admin".into())])
        .await
        .unwrap();
    o.finished_report(&image(DIGEST)).await;

    o.artifact_events
        .handle(&ArtifactEvent::Deleted(vec![image(DIGEST)]))
        .await
        .unwrap();

    assert!(o.scans.get_report(&image(DIGEST), &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn scan_all_counts_what_it_could_not_submit() {
    let mut o = orchestrator(DOCKER).await;
    o.serve_report(&native_report()).await;
    o.artifacts
        .add(Artifact::new(
            1,
            "library/chart",
            "sha256:9e8d7c6b",
            mime::MIME_TYPE_OCI_ARTIFACT,
        ))
        .await;
    let (_stop, stop_rx) = watch::channel(false);

    let summary = o.scan_all.run("scan-all-1", &stop_rx).await.unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.submitted, 1);
    assert_eq!(summary.unsupported, 1);
    let stats = o.scan_all.get_stats("scan-all-1").await.unwrap();
    assert_eq!(stats.total, 1);
}

#[tokio::test]
async fn a_stopped_scan_all_submits_nothing() {
    let o = orchestrator(DOCKER).await;
    let (_stop, stop_rx) = watch::channel(true);

    let summary = o.scan_all.run("scan-all-2", &stop_rx).await.unwrap();

    assert_eq!(summary.submitted, 0);
    assert!(o.scans.get_report(&image(DIGEST), &[]).await.unwrap().is_empty());
}
