use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::report_converter::ReportConverter;
use super::scanner_controller::{RegistrationOptions, ScannerController};
use super::services::{
    AccessoryStore, ArtifactController, JobService, RobotAccountManager, RobotRequest, WalkAction,
    walk,
};
use super::stores::ReportStore;
use crate::domain::adapter::{
    CapabilityType, EnabledCapability, Registry, ScanRequest, ScannerAdapterMetadata,
};
use crate::domain::artifact::Artifact;
use crate::domain::errors::{Error, Result};
use crate::domain::job::{
    CheckInReport, IMAGE_SCAN_JOB, JobData, JobStatus, PARAM_SCAN_REQUEST, RobotAccount,
    ScanJobParameters, StatusChange,
};
use crate::domain::mime;
use crate::domain::registration::Registration;
use crate::domain::report::{
    NativeReport, NativeReportSummary, Report, SbomAdapterReport, SbomReportData, SbomSummary, ScanStats,
    Summary, SummaryOptions,
};

/// Path the job runtime posts scan job status changes to, followed by the track id.
pub const SCAN_HOOK_PATH: &str = "/service/notifications/jobs/scan/";

const ROBOT_ACTIONS: &[&str] = &["pull", "scanner-pull"];

pub fn scan_hook_url(core_internal_url: &str, track_id: &str) -> String {
    format!(
        "{}{SCAN_HOOK_PATH}{track_id}",
        core_internal_url.trim_end_matches('/')
    )
}

/// The track id a scan hook url was built for.
pub fn track_id_of_hook_url(hook_url: &str) -> Option<&str> {
    hook_url
        .rsplit_once(SCAN_HOOK_PATH)
        .map(|(_, track_id)| track_id)
        .filter(|track_id| !track_id.is_empty() && !track_id.contains('/'))
}

/// Recognised scan options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOption {
    /// Who asked for the scan; defaults to the scan's track id.
    Requester(String),
    /// The scan was triggered by a registry event rather than a user.
    FromEvent(bool),
    ScanType(CapabilityType),
}

impl ScanOption {
    pub fn parse(key: &str, value: &str) -> Result<Self> {
        match key {
            "requester" => Ok(ScanOption::Requester(value.to_string())),
            "from_event" => value
                .parse()
                .map(ScanOption::FromEvent)
                .map_err(|_| Error::BadRequest(format!("invalid from_event option {value}"))),
            "scan_type" => match value {
                "vulnerability" => Ok(ScanOption::ScanType(CapabilityType::Vulnerability)),
                "sbom" => Ok(ScanOption::ScanType(CapabilityType::Sbom)),
                other => Err(Error::BadRequest(format!("invalid scan type {other}"))),
            },
            other => Err(Error::BadRequest(format!("unknown scan option {other}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ScanOptions {
    requester: Option<String>,
    from_event: bool,
    scan_type: CapabilityType,
}

impl ScanOptions {
    fn from_options(options: &[ScanOption]) -> Self {
        let mut parsed = ScanOptions::default();
        for option in options {
            match option {
                ScanOption::Requester(requester) => {
                    parsed.requester = Some(requester.clone()).filter(|r| !r.is_empty())
                }
                ScanOption::FromEvent(from_event) => parsed.from_event = *from_event,
                ScanOption::ScanType(scan_type) => parsed.scan_type = *scan_type,
            }
        }
        parsed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    /// Registry address handed to adapters.
    pub external_url: String,
    /// Core address reachable from inside the deployment; hooks go there.
    pub core_internal_url: String,
    pub robot_ttl_secs: i64,
}

/// Stores a scan writes to for one artifact, with the ids of the placeholder rows.
struct Placeholders {
    track_id: String,
    rows: Vec<(String, String)>,
}

/// Orchestrates scans of artifacts and collects their results.
pub struct ScanController {
    scanners: Arc<ScannerController>,
    reports: Arc<dyn ReportStore>,
    sbom_reports: Arc<dyn ReportStore>,
    converter: ReportConverter,
    artifacts: Arc<dyn ArtifactController>,
    robots: Arc<dyn RobotAccountManager>,
    jobs: Arc<dyn JobService>,
    accessories: Arc<dyn AccessoryStore>,
    settings: ScanSettings,
}

pub struct ScanControllerDeps {
    pub scanners: Arc<ScannerController>,
    pub reports: Arc<dyn ReportStore>,
    pub sbom_reports: Arc<dyn ReportStore>,
    pub converter: ReportConverter,
    pub artifacts: Arc<dyn ArtifactController>,
    pub robots: Arc<dyn RobotAccountManager>,
    pub jobs: Arc<dyn JobService>,
    pub accessories: Arc<dyn AccessoryStore>,
}

impl ScanController {
    pub fn new(deps: ScanControllerDeps, settings: ScanSettings) -> Self {
        Self {
            scanners: deps.scanners,
            reports: deps.reports,
            sbom_reports: deps.sbom_reports,
            converter: deps.converter,
            artifacts: deps.artifacts,
            robots: deps.robots,
            jobs: deps.jobs,
            accessories: deps.accessories,
            settings,
        }
    }

    fn store_for(&self, mime_type: &str) -> &Arc<dyn ReportStore> {
        if mime::is_sbom_report(mime_type) {
            &self.sbom_reports
        } else {
            &self.reports
        }
    }

    async fn scannable_registration(&self, project_id: i64) -> Result<Registration> {
        let registration = self
            .scanners
            .get_registration_by_project(project_id, RegistrationOptions::default())
            .await?
            .ok_or_else(|| {
                Error::PreconditionFailed(format!("no available scanner for project {project_id}"))
            })?;
        if registration.disabled {
            return Err(Error::PreconditionFailed(format!(
                "scanner {} is deactivated",
                registration.name
            )));
        }
        Ok(registration)
    }

    /// Artifacts under `root` the scanner can scan: unsupported indexes are
    /// looked through, supported artifacts end the descent.
    async fn collect_scannable(
        &self,
        root: &Artifact,
        metadata: &ScannerAdapterMetadata,
        scan_type: CapabilityType,
    ) -> Result<Vec<Artifact>> {
        let mut collected = Vec::new();
        walk(self.artifacts.as_ref(), root, |artifact| {
            if artifact.is_accessory {
                return Ok(WalkAction::Skip);
            }
            if metadata.supports(&artifact.manifest_media_type, scan_type) {
                collected.push(artifact.clone());
                return Ok(WalkAction::Skip);
            }
            Ok(if artifact.is_image_index() {
                WalkAction::Continue
            } else {
                WalkAction::Skip
            })
        })
        .await?;
        Ok(collected)
    }

    /// Scans `artifact` with the scanner effective for its project.
    pub async fn scan(&self, artifact: &Artifact, options: &[ScanOption]) -> Result<()> {
        let options = ScanOptions::from_options(options);
        let registration = self.scannable_registration(artifact.project_id).await?;
        let metadata = self
            .scanners
            .ping(&registration)
            .await
            .map_err(|e| Error::PreconditionFailed(e.to_string()))?;

        let targets = self
            .collect_scannable(artifact, &metadata, options.scan_type)
            .await?;
        if targets.is_empty() {
            if options.from_event {
                debug!(artifact = %artifact, "artifact is not scannable, skipping event scan");
                return Ok(());
            }
            return Err(Error::BadRequest(format!(
                "the configured scanner {} does not support scanning artifact with mime type {}",
                registration.name, artifact.manifest_media_type
            )));
        }

        let mut conflicts = 0;
        let mut failures: Vec<Error> = Vec::new();
        for target in &targets {
            let placeholders = match self
                .create_placeholders(&registration, &metadata, target, &options)
                .await
            {
                Ok(placeholders) => placeholders,
                Err(e) if e.is_conflict() => {
                    conflicts += 1;
                    failures.push(e);
                    continue;
                }
                Err(e) => {
                    failures.push(e);
                    continue;
                }
            };

            if let Err(e) = self
                .launch(&registration, target, &placeholders, options.scan_type)
                .await
            {
                error!(
                    track_id = %placeholders.track_id,
                    artifact = %target,
                    from_event = options.from_event,
                    "failed to launch scan job: {e}"
                );
                failures.push(e);
            }
        }

        if conflicts == targets.len() {
            return Err(failures.swap_remove(0));
        }
        if failures.len() == targets.len() {
            return Err(failures.swap_remove(0));
        }
        Ok(())
    }

    async fn create_placeholders(
        &self,
        registration: &Registration,
        metadata: &ScannerAdapterMetadata,
        artifact: &Artifact,
        options: &ScanOptions,
    ) -> Result<Placeholders> {
        let capability = metadata
            .capability_for(&artifact.manifest_media_type, options.scan_type)
            .ok_or_else(|| {
                Error::BadRequest(format!(
                    "the configured scanner {} does not support scanning artifact with mime type {}",
                    registration.name, artifact.manifest_media_type
                ))
            })?;

        let track_id = Uuid::new_v4().to_string();
        let requester = options.requester.clone().unwrap_or_else(|| track_id.clone());

        let mut rows = Vec::new();
        let mut conflict: Option<Error> = None;
        let mut failure: Option<Error> = None;
        let known = capability
            .produces_mime_types
            .iter()
            .filter(|m| mime::is_vulnerability_report(m) || mime::is_sbom_report(m));
        for mime_type in known {
            let placeholder = Report::placeholder(
                &artifact.digest,
                &registration.uuid,
                mime_type,
                &track_id,
                &requester,
            );
            match self.store_for(mime_type).create(placeholder).await {
                Ok(uuid) => rows.push((mime_type.clone(), uuid)),
                Err(e) => {
                    warn!(
                        track_id = %track_id,
                        mime_type = %mime_type,
                        artifact = %artifact,
                        "failed to create report placeholder: {e}"
                    );
                    if e.is_conflict() {
                        conflict.get_or_insert(e);
                    } else {
                        failure.get_or_insert(e);
                    }
                }
            }
        }

        if rows.is_empty() {
            return Err(conflict.or(failure).unwrap_or_else(|| {
                Error::BadRequest(format!(
                    "scanner {} produces no report for {}",
                    registration.name, artifact.manifest_media_type
                ))
            }));
        }
        Ok(Placeholders { track_id, rows })
    }

    async fn launch(
        &self,
        registration: &Registration,
        artifact: &Artifact,
        placeholders: &Placeholders,
        scan_type: CapabilityType,
    ) -> Result<()> {
        let track_id = &placeholders.track_id;
        let mime_types: Vec<String> = placeholders.rows.iter().map(|(m, _)| m.clone()).collect();

        let robot = match self.mint_robot(registration, artifact).await {
            Ok(robot) => robot,
            Err(e) => {
                self.fail_track(track_id, &mime_types, &e).await;
                return Err(e);
            }
        };
        let robot_id = robot.id;

        let submitted = self
            .submit_job(registration, artifact, track_id, mime_types.clone(), scan_type, robot)
            .await;
        let job_id = match submitted {
            Ok(job_id) => job_id,
            Err(e) => {
                self.fail_track(track_id, &mime_types, &e).await;
                if let Err(revoke) = self.robots.delete(robot_id).await {
                    warn!(track_id = %track_id, robot_id, "failed to revoke robot account: {revoke}");
                }
                return Err(e);
            }
        };

        for (mime_type, uuid) in &placeholders.rows {
            if let Err(e) = self.store_for(mime_type).update_scan_job_id(uuid, &job_id).await {
                warn!(report_uuid = %uuid, job_id = %job_id, "failed to record scan job id: {e}");
            }
        }
        info!(
            track_id = %track_id,
            job_id = %job_id,
            registration = %registration.name,
            artifact = %artifact,
            "scan job submitted"
        );
        Ok(())
    }

    async fn mint_robot(
        &self,
        registration: &Registration,
        artifact: &Artifact,
    ) -> Result<RobotAccount> {
        let suffix = Uuid::new_v4().simple().to_string();
        self.robots
            .create(RobotRequest {
                name: format!("scanner-{}-{}", registration.name.to_lowercase(), &suffix[..8]),
                project_id: artifact.project_id,
                ttl_secs: self.settings.robot_ttl_secs,
                actions: ROBOT_ACTIONS.iter().map(|a| a.to_string()).collect(),
            })
            .await
            .map_err(|e| e.context("create robot account"))
    }

    async fn submit_job(
        &self,
        registration: &Registration,
        artifact: &Artifact,
        track_id: &str,
        mime_types: Vec<String>,
        scan_type: CapabilityType,
        robot: RobotAccount,
    ) -> Result<String> {
        let credential = STANDARD.encode(format!("{}:{}", robot.name, robot.secret));
        let registry_url = if registration.use_internal_addr {
            &self.settings.core_internal_url
        } else {
            &self.settings.external_url
        };
        let enabled_capabilities = match scan_type {
            CapabilityType::Sbom => vec![EnabledCapability {
                capability_type: scan_type,
                produces_mime_types: mime_types.clone(),
            }],
            CapabilityType::Vulnerability => Vec::new(),
        };
        let request = ScanRequest {
            registry: Registry {
                url: registry_url.clone(),
                authorization: format!("Basic {credential}"),
            },
            artifact: artifact.clone(),
            enabled_capabilities,
        };

        let parameters = ScanJobParameters {
            registration: registration.clone(),
            request,
            mime_types,
            robot: Some(robot),
        }
        .into_job_parameters()?;

        self.jobs
            .submit(JobData {
                name: IMAGE_SCAN_JOB.to_string(),
                parameters,
                status_hook: scan_hook_url(&self.settings.core_internal_url, track_id),
            })
            .await
    }

    /// Marks every row of a track as failed with `error` as status text.
    async fn fail_track(&self, track_id: &str, mime_types: &[String], error: &Error) {
        let mut stores: Vec<&Arc<dyn ReportStore>> = Vec::new();
        for mime_type in mime_types {
            let store = self.store_for(mime_type);
            if !stores.iter().any(|s| Arc::ptr_eq(s, store)) {
                stores.push(store);
            }
        }
        for store in stores {
            if let Err(e) = store.update_status(track_id, &error.to_string(), 0).await {
                error!(track_id = %track_id, "failed to mark the scan as failed: {e}");
            }
        }
    }

    /// Applies a status change posted by the job runtime for `track_id`.
    pub async fn handle_job_hooks(&self, track_id: &str, change: &StatusChange) -> Result<()> {
        if track_id.is_empty() {
            return Err(Error::BadRequest("empty track id".into()));
        }

        if change.status == JobStatus::Success.as_str() {
            if let Some(robot_id) = change.robot_id() {
                if let Err(e) = self.robots.delete(robot_id).await {
                    warn!(track_id = %track_id, robot_id, "failed to revoke robot account: {e}");
                }
            }
        }

        if let Some(check_in) = change.check_in.as_deref().filter(|c| !c.is_empty()) {
            return self.check_in(track_id, change, check_in).await;
        }

        let rev = change.metadata.revision;
        let updated = self.reports.update_status(track_id, &change.status, rev).await?
            + self.sbom_reports.update_status(track_id, &change.status, rev).await?;
        debug!(
            track_id = %track_id,
            job_id = %change.job_id,
            status = %change.status,
            rev,
            updated,
            "scan status changed"
        );
        Ok(())
    }

    async fn check_in(&self, track_id: &str, change: &StatusChange, data: &str) -> Result<()> {
        let check_in = CheckInReport::from_json(data)?;
        let store = self.store_for(&check_in.mime_type);
        let rows = store
            .get_by(
                &check_in.digest,
                Some(&check_in.registration_uuid),
                std::slice::from_ref(&check_in.mime_type),
            )
            .await?;
        let row = rows
            .iter()
            .find(|r| r.track_id == track_id)
            .or(rows.first())
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no report of {} for {} to check in",
                    check_in.mime_type, check_in.digest
                ))
            })?;

        let rev = change.metadata.revision;
        if row.status_rev > rev {
            debug!(report_uuid = %row.uuid, rev, "ignoring a check-in older than the report");
            return Ok(());
        }

        let data = if check_in.mime_type == mime::MIME_TYPE_NATIVE_REPORT {
            self.converter
                .to_relational(&row.uuid, &check_in.registration_uuid, &check_in.raw_report)
                .await?
        } else if mime::is_sbom_report(&check_in.mime_type) {
            self.archive_sbom(change, &check_in).await?
        } else {
            check_in.raw_report.clone()
        };

        if store.update_report_data(&row.uuid, &data, rev).await? {
            info!(report_uuid = %row.uuid, mime_type = %check_in.mime_type, "report checked in");
        }
        Ok(())
    }

    /// Pushes the SBOM document next to the artifact and returns what the row keeps of it.
    async fn archive_sbom(&self, change: &StatusChange, check_in: &CheckInReport) -> Result<String> {
        let report: SbomAdapterReport = serde_json::from_str(&check_in.raw_report)
            .map_err(|e| Error::BadRequest(format!("malformed SBOM report: {e}")))?;

        let subject = change
            .metadata
            .parameters
            .get(PARAM_SCAN_REQUEST)
            .and_then(|v| v.as_str())
            .and_then(|json| serde_json::from_str::<ScanRequest>(json).ok())
            .map(|request| request.artifact)
            .filter(|artifact| artifact.digest == check_in.digest)
            .unwrap_or_else(|| Artifact::new(0, "", &check_in.digest, ""));

        let document = serde_json::to_vec(&report.sbom)?;
        let sbom_digest = self
            .accessories
            .push(&subject, &report.media_type, document)
            .await?;

        Ok(serde_json::to_string(&SbomReportData {
            sbom_digest,
            media_type: report.media_type,
            scanner: report.scanner,
        })?)
    }

    /// Leaf artifacts whose reports make up the reports of `artifact`.
    async fn report_subjects(&self, artifact: &Artifact) -> Result<Vec<Artifact>> {
        if !artifact.is_image_index() {
            return Ok(vec![artifact.clone()]);
        }
        let mut subjects = Vec::new();
        walk(self.artifacts.as_ref(), artifact, |a| {
            if a.is_accessory {
                return Ok(WalkAction::Skip);
            }
            if !a.is_image_index() {
                subjects.push(a.clone());
            }
            Ok(WalkAction::Continue)
        })
        .await?;
        Ok(subjects)
    }

    /// Reports of `artifact` for `mime_types` (the native report when empty).
    pub async fn get_report(&self, artifact: &Artifact, mime_types: &[String]) -> Result<Vec<Report>> {
        let registration = self
            .scanners
            .get_registration_by_project(artifact.project_id, RegistrationOptions::default())
            .await?
            .ok_or_else(|| Error::NotFound("no scanner registration configured".into()))?;

        let mime_types = if mime_types.is_empty() {
            vec![mime::MIME_TYPE_NATIVE_REPORT.to_string()]
        } else {
            mime_types.to_vec()
        };

        let mut digests = vec![artifact.digest.clone()];
        for subject in self.report_subjects(artifact).await? {
            if !digests.contains(&subject.digest) {
                digests.push(subject.digest);
            }
        }

        let mut reports = Vec::new();
        for mime_type in &mime_types {
            for digest in &digests {
                let rows = self
                    .store_for(mime_type)
                    .get_by(digest, Some(&registration.uuid), std::slice::from_ref(mime_type))
                    .await?;
                for mut row in rows {
                    if row.mime_type == mime::MIME_TYPE_NATIVE_REPORT {
                        row.report = self.converter.from_relational(&row).await?;
                    }
                    reports.push(row);
                }
            }
        }
        Ok(reports)
    }

    /// One summary per MIME type, merged across the artifacts of an index.
    pub async fn get_summary(
        &self,
        artifact: &Artifact,
        mime_types: &[String],
        options: &SummaryOptions,
    ) -> Result<HashMap<String, Summary>> {
        let mut summaries: HashMap<String, Summary> = HashMap::new();
        let mut natives: HashMap<String, NativeReport> = HashMap::new();
        for report in self.get_report(artifact, mime_types).await? {
            let summary = if mime::is_sbom_report(&report.mime_type) {
                Summary::Sbom(SbomSummary::generate(&report)?)
            } else {
                let native = NativeReportSummary::report_of(&report)?;
                let summary = NativeReportSummary::generate_with(&report, native.as_ref(), options);
                if let Some(native) = native {
                    let merged = match natives.remove(&report.mime_type) {
                        Some(seen) => seen.merge(native),
                        None => native,
                    };
                    natives.insert(report.mime_type.clone(), merged);
                }
                Summary::Vulnerability(summary)
            };

            let merged = match (summaries.remove(&report.mime_type), summary) {
                (Some(Summary::Vulnerability(a)), Summary::Vulnerability(b)) => {
                    Summary::Vulnerability(a.merge(b))
                }
                (Some(existing), _) => existing,
                (None, summary) => summary,
            };
            summaries.insert(report.mime_type, merged);
        }

        // Vulnerabilities shared by several artifacts of an index count once.
        for (mime_type, native) in &natives {
            if let Some(Summary::Vulnerability(summary)) = summaries.get_mut(mime_type) {
                summary.apply_report(native, options);
            }
        }
        Ok(summaries)
    }

    /// The job log of a report, or the failure text when the job never ran.
    pub async fn get_scan_log(&self, report_uuid: &str) -> Result<Option<String>> {
        let row = match self.reports.get(report_uuid).await? {
            Some(row) => Some(row),
            None => self.sbom_reports.get(report_uuid).await?,
        };
        let Some(row) = row else {
            return Ok(None);
        };

        if row.job_status().is_none() {
            return Ok(Some(row.status));
        }
        if row.job_id.is_empty() {
            return Ok(None);
        }
        self.jobs.get_job_log(&row.job_id).await
    }

    pub async fn get_stats(&self, requester: &str) -> Result<ScanStats> {
        self.reports.get_stats(requester).await
    }

    /// Stops the running scan jobs of `artifact`.
    pub async fn stop(&self, artifact: &Artifact) -> Result<()> {
        let registration = self.scannable_registration(artifact.project_id).await?;

        let mut job_ids: Vec<String> = Vec::new();
        for store in [&self.reports, &self.sbom_reports] {
            for row in store.get_by(&artifact.digest, Some(&registration.uuid), &[]).await? {
                if row.is_in_progress() && !row.job_id.is_empty() && !job_ids.contains(&row.job_id) {
                    job_ids.push(row.job_id);
                }
            }
        }
        if job_ids.is_empty() {
            return Err(Error::BadRequest(format!("no scan job is running for {artifact}")));
        }

        for job_id in &job_ids {
            self.jobs.stop(job_id).await?;
            info!(job_id = %job_id, artifact = %artifact, "scan job stop requested");
        }
        Ok(())
    }

    /// Drops every report of the artifacts, with archived SBOM documents.
    pub async fn delete_by_digests(&self, digests: &[String]) -> Result<()> {
        for digest in digests {
            for row in self.sbom_reports.get_by(digest, None, &[]).await? {
                let Ok(data) = serde_json::from_str::<SbomReportData>(&row.report) else {
                    continue;
                };
                if let Err(e) = self.accessories.delete(&data.sbom_digest).await {
                    warn!(report_uuid = %row.uuid, "failed to delete archived SBOM: {e}");
                }
            }
        }

        self.reports.delete_by_digests(digests).await?;
        self.sbom_reports.delete_by_digests(digests).await
    }
}
