use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::adapter_client::{AdapterClient, AdapterClientError, ClientPool};
use super::job::{Job, JobContext, JobError};
use crate::domain::job::{CheckInReport, JobParameters, ScanJobParameters};
use crate::domain::mime;
use crate::domain::report::{NativeReport, SbomAdapterReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanJobSettings {
    /// Delay before the first report poll.
    pub first_check_interval: Duration,
    /// Ceiling on the polling of one report.
    pub check_timeout: Duration,
}

impl Default for ScanJobSettings {
    fn default() -> Self {
        Self {
            first_check_interval: Duration::from_secs(2),
            check_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Submits an artifact to an adapter and checks in one report per requested MIME type.
pub struct ScanJob {
    pool: Arc<dyn ClientPool>,
    settings: ScanJobSettings,
}

impl ScanJob {
    pub fn new(pool: Arc<dyn ClientPool>, settings: ScanJobSettings) -> Self {
        Self { pool, settings }
    }
}

fn parameters_of(parameters: &JobParameters) -> Result<ScanJobParameters, JobError> {
    ScanJobParameters::from_job_parameters(parameters)
        .map_err(|e| JobError::InvalidParameters(e.to_string()))
}

/// Checks the raw report is what `mime_type` promises and normalises native reports.
fn resolve_report(mime_type: &str, raw: String) -> Result<String, JobError> {
    let invalid = |message: String| JobError::InvalidReport {
        mime_type: mime_type.to_string(),
        message,
    };

    if mime_type == mime::MIME_TYPE_NATIVE_REPORT {
        let report = NativeReport::from_json(&raw).map_err(|e| invalid(e.to_string()))?;
        return report.to_json().map_err(|e| invalid(e.to_string()));
    }
    if mime::is_sbom_report(mime_type) {
        serde_json::from_str::<SbomAdapterReport>(&raw).map_err(|e| invalid(e.to_string()))?;
    }
    Ok(raw)
}

struct ReportTarget<'a> {
    client: &'a dyn AdapterClient,
    scan_id: &'a str,
    digest: &'a str,
    registration_uuid: &'a str,
}

impl ScanJob {
    async fn poll_report(
        &self,
        ctx: &JobContext,
        target: &ReportTarget<'_>,
        mime_type: &str,
    ) -> Result<(), JobError> {
        let polling = async {
            let mut wait = self.settings.first_check_interval;
            loop {
                tokio::time::sleep(wait).await;

                match target.client.get_scan_report(target.scan_id, mime_type).await {
                    Ok(raw) => return resolve_report(mime_type, raw),
                    Err(AdapterClientError::ReportNotReady { retry_after }) => {
                        debug!(retry_after, "report is not ready yet");
                        wait = Duration::from_secs(retry_after);
                    }
                    Err(err) => return Err(JobError::from(err)),
                }
            }
        };

        let raw_report = tokio::select! {
            polled = tokio::time::timeout(self.settings.check_timeout, polling) => {
                polled.map_err(|_| JobError::Timeout { mime_type: mime_type.to_string() })??
            }
            _ = ctx.stopped() => return Err(JobError::Stopped),
        };

        let check_in = CheckInReport {
            digest: target.digest.to_string(),
            registration_uuid: target.registration_uuid.to_string(),
            mime_type: mime_type.to_string(),
            raw_report,
        }
        .to_json()
        .map_err(|e| JobError::InvalidReport {
            mime_type: mime_type.to_string(),
            message: e.to_string(),
        })?;

        ctx.check_in(check_in)?;
        info!("report checked in");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Job for ScanJob {
    fn validate(&self, parameters: &JobParameters) -> Result<(), JobError> {
        parameters_of(parameters).map(|_| ())
    }

    async fn run(&self, ctx: &JobContext, parameters: &JobParameters) -> Result<(), JobError> {
        let params = parameters_of(parameters)?;
        info!(
            registration = %params.registration.to_redacted_json(),
            request = %params.request.to_redacted_json(),
            robot = ?params.robot,
            mime_types = ?params.mime_types,
            "starting scan job"
        );

        let client = self.pool.get(&params.registration.endpoint()).await?;
        let response = tokio::select! {
            submitted = client.submit_scan(&params.request) => submitted?,
            _ = ctx.stopped() => return Err(JobError::Stopped),
        };
        info!(scan_id = %response.id, "scan request accepted by the adapter");

        let target = ReportTarget {
            client: client.as_ref(),
            scan_id: &response.id,
            digest: &params.request.artifact.digest,
            registration_uuid: &params.registration.uuid,
        };
        let results = join_all(params.mime_types.iter().map(|mime_type| {
            self.poll_report(ctx, &target, mime_type)
                .instrument(info_span!("report", mime_type = %mime_type))
        }))
        .await;

        let errors: Vec<JobError> = results
            .into_iter()
            .zip(&params.mime_types)
            .filter_map(|(result, mime_type)| match result {
                Ok(()) => None,
                Err(JobError::Stopped) => {
                    warn!(mime_type = %mime_type, "report polling stopped");
                    Some(JobError::Stopped)
                }
                Err(err) => {
                    error!(mime_type = %mime_type, error = %err, "failed to get the report");
                    Some(err)
                }
            })
            .collect();

        match JobError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::mocks::{MockAdapter, StaticPool};
    use crate::domain::adapter::{Registry, ScanRequest, ScanResponse};
    use crate::domain::artifact::Artifact;
    use crate::domain::job::RobotAccount;
    use crate::domain::registration::Registration;
    use crate::domain::report::{Severity, fixtures};
    use mockall::Sequence;
    use tokio::sync::{mpsc, watch};

    fn job_parameters(mime_types: &[&str]) -> JobParameters {
        let mut registration = Registration::new("trivy", "http://trivy:8080");
        registration.uuid = "reg-1".into();
        ScanJobParameters {
            registration,
            request: ScanRequest {
                registry: Registry {
                    url: "https://core.local".into(),
                    authorization: "Basic xyz".into(),
                },
                artifact: Artifact::new(
                    1,
                    "library/app",
                    "sha256:abc",
                    mime::MIME_TYPE_DOCKER_ARTIFACT,
                ),
                enabled_capabilities: Vec::new(),
            },
            mime_types: mime_types.iter().map(|m| m.to_string()).collect(),
            robot: Some(RobotAccount {
                id: 7,
                name: "robot$scanner".into(),
                secret: "s3cr3t".into(),
                project_id: 1,
                expires_at: 0,
            }),
        }
        .into_job_parameters()
        .unwrap()
    }

    struct Harness {
        ctx: JobContext,
        check_ins: mpsc::UnboundedReceiver<String>,
        stop: watch::Sender<bool>,
    }

    fn harness() -> Harness {
        let (check_in_tx, check_ins) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        Harness {
            ctx: JobContext::new("job-1", check_in_tx, stop_rx),
            check_ins,
            stop,
        }
    }

    fn job(adapter: MockAdapter) -> ScanJob {
        ScanJob::new(
            Arc::new(StaticPool::new(Arc::new(adapter))),
            ScanJobSettings::default(),
        )
    }

    fn native_body() -> String {
        fixtures::report(vec![fixtures::item("CVE-1", Severity::High, "1.0.1")])
            .to_json()
            .unwrap()
    }

    fn accepting(adapter: &mut MockAdapter) {
        adapter.expect_submit_scan().times(1).returning(|_| {
            Ok(ScanResponse {
                id: "scan-1".into(),
            })
        });
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_reports_are_polled_until_they_arrive() {
        let mut adapter = MockAdapter::new();
        accepting(&mut adapter);
        let mut seq = Sequence::new();
        adapter
            .expect_get_scan_report()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(AdapterClientError::ReportNotReady { retry_after: 3 }));
        let body = native_body();
        adapter
            .expect_get_scan_report()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_, _| Ok(body.clone()));
        let mut h = harness();

        job(adapter)
            .run(&h.ctx, &job_parameters(&[mime::MIME_TYPE_NATIVE_REPORT]))
            .await
            .unwrap();

        let check_in = CheckInReport::from_json(&h.check_ins.recv().await.unwrap()).unwrap();
        assert_eq!(check_in.digest, "sha256:abc");
        assert_eq!(check_in.registration_uuid, "reg-1");
        assert_eq!(check_in.mime_type, mime::MIME_TYPE_NATIVE_REPORT);
        let report = NativeReport::from_json(&check_in.raw_report).unwrap();
        assert_eq!(report.vulnerabilities.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_mime_type_does_not_stop_the_others() {
        let mut adapter = MockAdapter::new();
        accepting(&mut adapter);
        let body = native_body();
        adapter
            .expect_get_scan_report()
            .returning(move |_, mime_type| {
                if mime_type == mime::MIME_TYPE_NATIVE_REPORT {
                    Ok(body.clone())
                } else {
                    Err(AdapterClientError::Unsupported(mime_type.to_string()))
                }
            });
        let mut h = harness();

        let err = job(adapter)
            .run(
                &h.ctx,
                &job_parameters(&[
                    mime::MIME_TYPE_NATIVE_REPORT,
                    mime::MIME_TYPE_GENERIC_VULNERABILITY_REPORT,
                ]),
            )
            .await
            .unwrap_err();

        assert!(!err.is_retriable());
        assert!(h.check_ins.recv().await.is_some());
        assert!(h.check_ins.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn polling_gives_up_after_the_timeout() {
        let mut adapter = MockAdapter::new();
        accepting(&mut adapter);
        adapter
            .expect_get_scan_report()
            .returning(|_, _| Err(AdapterClientError::ReportNotReady { retry_after: 60 }));
        let h = harness();

        let err = job(adapter)
            .run(&h.ctx, &job_parameters(&[mime::MIME_TYPE_NATIVE_REPORT]))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Timeout { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_ends_the_workers_without_checking_in() {
        let mut adapter = MockAdapter::new();
        accepting(&mut adapter);
        adapter
            .expect_get_scan_report()
            .returning(|_, _| Err(AdapterClientError::ReportNotReady { retry_after: 5 }));
        let mut h = harness();
        let job = job(adapter);
        let parameters = job_parameters(&[mime::MIME_TYPE_NATIVE_REPORT]);

        let stop = h.stop;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            stop.send(true).unwrap();
        });
        let err = job.run(&h.ctx, &parameters).await.unwrap_err();

        assert!(matches!(err, JobError::Stopped));
        assert!(h.check_ins.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_reports_are_not_checked_in() {
        let mut adapter = MockAdapter::new();
        accepting(&mut adapter);
        adapter
            .expect_get_scan_report()
            .returning(|_, _| Ok("not json".into()));
        let mut h = harness();
        let job = ScanJob::new(
            Arc::new(StaticPool::new(Arc::new(adapter))),
            ScanJobSettings {
                first_check_interval: Duration::from_millis(1),
                ..Default::default()
            },
        );

        let err = job
            .run(&h.ctx, &job_parameters(&[mime::MIME_TYPE_NATIVE_REPORT]))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::InvalidReport { .. }));
        assert!(h.check_ins.try_recv().is_err());
    }

    #[test]
    fn invalid_parameters_fail_validation() {
        let adapter = MockAdapter::new();
        let mut parameters = job_parameters(&[mime::MIME_TYPE_NATIVE_REPORT]);
        parameters.remove(crate::domain::job::PARAM_SCAN_REQUEST);

        let err = job(adapter).validate(&parameters).unwrap_err();

        assert!(matches!(err, JobError::InvalidParameters(_)));
        assert!(!err.is_retriable());
    }

    #[test]
    fn unknown_report_types_pass_through_verbatim() {
        assert_eq!(
            resolve_report("application/x-custom", "anything".into()).unwrap(),
            "anything"
        );
        assert!(resolve_report(mime::MIME_TYPE_SBOM_REPORT, "42".into()).is_err());
    }
}
