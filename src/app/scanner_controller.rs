use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::adapter_client::ClientPool;
use super::services::ProjectMetadataStore;
use super::stores::{RegistrationStore, ReportStore};
use crate::domain::adapter::ScannerAdapterMetadata;
use crate::domain::errors::{Error, Result};
use crate::domain::query::{Keyword, Query};
use crate::domain::registration::Registration;

/// Project metadata key binding a project to a registration uuid.
pub const PROJECT_SCANNER_KEY: &str = "projectScanner";

const RESERVED_NAMES: &[&str] = &["Trivy"];
const METADATA_CACHE_TTL: Duration = Duration::from_secs(30);
const MAX_NAME_RESOLUTION_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationOptions {
    /// Ping the resolved registration and fill its health fields.
    pub ping: bool,
}

struct CachedMetadata {
    fetched_at: Instant,
    outcome: std::result::Result<ScannerAdapterMetadata, String>,
}

/// Lifecycle of scanner registrations and their per-project bindings.
pub struct ScannerController {
    registrations: Arc<dyn RegistrationStore>,
    reports: Arc<dyn ReportStore>,
    project_metadata: Arc<dyn ProjectMetadataStore>,
    pool: Arc<dyn ClientPool>,
    metadata_cache: RwLock<HashMap<String, CachedMetadata>>,
}

impl ScannerController {
    pub fn new(
        registrations: Arc<dyn RegistrationStore>,
        reports: Arc<dyn ReportStore>,
        project_metadata: Arc<dyn ProjectMetadataStore>,
        pool: Arc<dyn ClientPool>,
    ) -> Self {
        Self {
            registrations,
            reports,
            project_metadata,
            pool,
            metadata_cache: RwLock::default(),
        }
    }

    pub async fn list(&self, query: &Query) -> Result<Vec<Registration>> {
        self.registrations.list(query).await
    }

    pub async fn count(&self, query: &Query) -> Result<usize> {
        self.registrations.count(query).await
    }

    /// Validates and pings the registration before storing it. The first
    /// registration ever created becomes the default.
    pub async fn create(&self, registration: Registration) -> Result<String> {
        reject_reserved_name(&registration)?;
        registration.validate(false)?;
        self.ping(&registration).await?;

        self.insert(registration).await
    }

    pub async fn get(&self, uuid: &str) -> Result<Option<Registration>> {
        self.registrations.get(uuid).await
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Registration>> {
        self.registrations.get_by_name(name).await
    }

    pub async fn registration_exists(&self, uuid: &str) -> Result<bool> {
        Ok(self.registrations.get(uuid).await?.is_some())
    }

    pub async fn update(&self, registration: &Registration) -> Result<()> {
        registration.validate(true)?;
        if registration.is_default && registration.disabled {
            return Err(Error::BadRequest(format!(
                "default scanner {} cannot be deactivated",
                registration.name
            )));
        }

        let Some(existing) = self.registrations.get(&registration.uuid).await? else {
            return Err(Error::NotFound(format!("registration {}", registration.uuid)));
        };
        if existing.name != registration.name {
            reject_reserved_name(registration)?;
        }

        self.evict_metadata(&registration.uuid).await;
        self.ping(registration).await?;
        self.registrations.update(registration).await
    }

    /// Deletes and returns the registration, `None` if it did not exist.
    pub async fn delete(&self, uuid: &str) -> Result<Option<Registration>> {
        let Some(registration) = self.registrations.get(uuid).await? else {
            return Ok(None);
        };

        if registration.immutable {
            return Err(Error::PreconditionFailed(format!(
                "registration {} is immutable and cannot be deleted",
                registration.name
            )));
        }
        if self.reports.references_registration(uuid).await? {
            return Err(Error::Conflict(format!(
                "registration {} is still referenced by scan reports",
                registration.name
            )));
        }

        self.registrations.delete(uuid).await?;
        self.evict_metadata(uuid).await;
        info!(registration = %registration.name, "scanner registration deleted");

        Ok(Some(registration))
    }

    pub async fn set_as_default(&self, uuid: &str) -> Result<()> {
        self.registrations.set_as_default(uuid).await
    }

    pub async fn set_registration_by_project(&self, project_id: i64, uuid: &str) -> Result<()> {
        if project_id == 0 {
            return Err(Error::BadRequest("invalid project id".into()));
        }
        if uuid.is_empty() {
            return Err(Error::BadRequest("missing registration uuid".into()));
        }
        if !self.registration_exists(uuid).await? {
            return Err(Error::NotFound(format!("registration {uuid}")));
        }

        self.project_metadata
            .set(project_id, PROJECT_SCANNER_KEY, uuid)
            .await
    }

    /// The registration effective for the project: its own binding, else
    /// the system default, else `None`.
    pub async fn get_registration_by_project(
        &self,
        project_id: i64,
        options: RegistrationOptions,
    ) -> Result<Option<Registration>> {
        if project_id == 0 {
            return Err(Error::BadRequest("invalid project id".into()));
        }

        let mut registration = None;
        let bound = self
            .project_metadata
            .get(project_id, PROJECT_SCANNER_KEY)
            .await
            .map_err(|e| e.context("get project scanner"))?;
        if let Some(uuid) = bound.filter(|uuid| !uuid.is_empty()) {
            registration = self.registrations.get(&uuid).await?;
            if registration.is_none() {
                debug!(project_id, registration = %uuid, "clearing stale project scanner binding");
                self.project_metadata
                    .delete(project_id, PROJECT_SCANNER_KEY)
                    .await
                    .map_err(|e| e.context("get project scanner"))?;
            }
        }

        if registration.is_none() {
            registration = self.registrations.get_default().await?;
        }
        let Some(mut registration) = registration else {
            return Ok(None);
        };

        if options.ping {
            match self.ping(&registration).await {
                Ok(metadata) => registration.mark_healthy(metadata),
                Err(e) => {
                    error!(registration = %registration.name, "get project scanner: {e}");
                    registration.mark_unhealthy();
                }
            }
        }

        Ok(Some(registration))
    }

    /// Fetches and validates the adapter metadata. Results for stored
    /// registrations are cached for a short while.
    pub async fn ping(&self, registration: &Registration) -> Result<ScannerAdapterMetadata> {
        let cacheable = !registration.uuid.is_empty();
        if cacheable {
            if let Some(cached) = self.metadata_cache.read().await.get(&registration.uuid) {
                if cached.fetched_at.elapsed() < METADATA_CACHE_TTL {
                    return cached.outcome.clone().map_err(Error::Scanner);
                }
            }
        }

        let outcome = self.fetch_metadata(registration).await;
        if cacheable {
            self.metadata_cache.write().await.insert(
                registration.uuid.clone(),
                CachedMetadata {
                    fetched_at: Instant::now(),
                    outcome: outcome.clone(),
                },
            );
        }
        outcome.map_err(Error::Scanner)
    }

    async fn fetch_metadata(
        &self,
        registration: &Registration,
    ) -> std::result::Result<ScannerAdapterMetadata, String> {
        let client = self
            .pool
            .get(&registration.endpoint())
            .await
            .map_err(|e| format!("scanner {}: {e}", registration.name))?;
        let metadata = client
            .get_metadata()
            .await
            .map_err(|e| format!("scanner {}: {e}", registration.name))?;
        metadata.validate().map_err(|e| match e {
            Error::Scanner(message) => format!("scanner {}: {message}", registration.name),
            other => format!("scanner {}: {other}", registration.name),
        })?;
        Ok(metadata)
    }

    pub async fn get_metadata(&self, uuid: &str) -> Result<ScannerAdapterMetadata> {
        let Some(registration) = self.registrations.get(uuid).await? else {
            return Err(Error::NotFound(format!("registration {uuid}")));
        };
        self.ping(&registration).await
    }

    /// Installs the registration unless one with the same url exists.
    /// With `resolve_conflict`, a taken name gets a random suffix.
    pub async fn ensure_scanner(
        &self,
        mut registration: Registration,
        resolve_conflict: bool,
    ) -> Result<String> {
        let by_url = Query::new().with_keyword("url", Keyword::exact(&registration.url));
        if let Some(existing) = self.registrations.list(&by_url).await?.into_iter().next() {
            debug!(registration = %existing.name, url = %existing.url, "scanner already installed");
            return Ok(existing.uuid);
        }

        registration.validate(false)?;
        let base_name = registration.name.clone();
        let mut attempts = 0;
        loop {
            match self.insert(registration.clone()).await {
                Err(e) if e.is_conflict() && resolve_conflict => {
                    attempts += 1;
                    if attempts >= MAX_NAME_RESOLUTION_ATTEMPTS {
                        return Err(e);
                    }
                    registration.name = format!("{base_name}-{}", random_suffix());
                    warn!(
                        name = %base_name,
                        retry_name = %registration.name,
                        "scanner name taken, retrying with another name"
                    );
                }
                outcome => return outcome,
            }
        }
    }

    async fn insert(&self, mut registration: Registration) -> Result<String> {
        if self.registrations.count(&Query::new()).await? == 0 {
            registration.is_default = true;
        }
        registration.metadata = None;
        registration.health = None;

        let name = registration.name.clone();
        let uuid = self.registrations.create(registration).await?;
        info!(registration = %name, uuid = %uuid, "scanner registration created");
        Ok(uuid)
    }

    async fn evict_metadata(&self, uuid: &str) {
        self.metadata_cache.write().await.remove(uuid);
    }
}

fn reject_reserved_name(registration: &Registration) -> Result<()> {
    if RESERVED_NAMES.contains(&registration.name.as_str()) {
        return Err(Error::BadRequest(format!(
            "scanner name {} is reserved",
            registration.name
        )));
    }
    Ok(())
}

fn random_suffix() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::mocks::{StaticPool, adapter_with_metadata, failing_adapter};
    use crate::domain::adapter::fixtures::native_metadata;
    use crate::domain::errors::ErrorKind;
    use crate::domain::report::Report;
    use crate::infra::memory::{
        InMemoryProjectMetadataStore, InMemoryRegistrationStore, InMemoryReportStore,
    };

    struct Fixture {
        controller: ScannerController,
        reports: Arc<InMemoryReportStore>,
        project_metadata: Arc<InMemoryProjectMetadataStore>,
        pool: Arc<StaticPool>,
    }

    fn fixture_with(pool: StaticPool) -> Fixture {
        let reports = Arc::new(InMemoryReportStore::default());
        let project_metadata = Arc::new(InMemoryProjectMetadataStore::default());
        let pool = Arc::new(pool);
        Fixture {
            controller: ScannerController::new(
                Arc::new(InMemoryRegistrationStore::default()),
                reports.clone(),
                project_metadata.clone(),
                pool.clone(),
            ),
            reports,
            project_metadata,
            pool,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(StaticPool::new(adapter_with_metadata(native_metadata())))
    }

    fn trivy() -> Registration {
        Registration::new("trivy", "https://s/")
    }

    #[tokio::test]
    async fn the_first_registration_becomes_the_default() {
        let f = fixture();

        let uuid = f.controller.create(trivy()).await.unwrap();

        assert!(!uuid.is_empty());
        assert!(f.controller.get(&uuid).await.unwrap().unwrap().is_default);

        let second = f
            .controller
            .create(Registration::new("clair", "https://clair/"))
            .await
            .unwrap();
        assert!(!f.controller.get(&second).await.unwrap().unwrap().is_default);
    }

    #[tokio::test]
    async fn the_reserved_name_is_rejected() {
        let f = fixture();

        let err = f
            .controller
            .create(Registration::new("Trivy", "https://s/"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn an_unreachable_adapter_fails_creation_with_a_scanner_error() {
        let f = fixture_with(StaticPool::new(failing_adapter("connection refused")));

        let err = f.controller.create(trivy()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Scanner);
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(f.controller.count(&Query::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn the_default_registration_cannot_be_disabled() {
        let f = fixture();
        let uuid = f.controller.create(trivy()).await.unwrap();
        let mut registration = f.controller.get(&uuid).await.unwrap().unwrap();
        registration.disabled = true;

        let err = f.controller.update(&registration).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn immutable_or_referenced_registrations_are_not_deleted() {
        let f = fixture();
        let uuid = f.controller.create(trivy()).await.unwrap();
        f.reports
            .create(Report::placeholder("sha256:abc", &uuid, "mime", "t1", "me"))
            .await
            .unwrap();

        let err = f.controller.delete(&uuid).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let immutable = Registration {
            immutable: true,
            ..Registration::new("builtin", "https://builtin/")
        };
        let immutable = f.controller.ensure_scanner(immutable, false).await.unwrap();
        let err = f.controller.delete(&immutable).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    }

    #[tokio::test]
    async fn deleting_returns_the_deleted_registration() {
        let f = fixture();
        let uuid = f.controller.create(trivy()).await.unwrap();

        let deleted = f.controller.delete(&uuid).await.unwrap();

        assert_eq!(deleted.map(|r| r.name), Some("trivy".to_string()));
        assert!(f.controller.delete(&uuid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn a_project_binding_wins_over_the_default() {
        let f = fixture();
        let default = f.controller.create(trivy()).await.unwrap();
        let other = f
            .controller
            .create(Registration::new("clair", "https://clair/"))
            .await
            .unwrap();

        f.controller.set_registration_by_project(7, &other).await.unwrap();

        let for_7 = f
            .controller
            .get_registration_by_project(7, RegistrationOptions::default())
            .await
            .unwrap()
            .unwrap();
        let for_8 = f
            .controller
            .get_registration_by_project(8, RegistrationOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(for_7.uuid, other);
        assert_eq!(for_8.uuid, default);
    }

    #[tokio::test]
    async fn a_stale_project_binding_is_cleared() {
        let f = fixture();
        let default = f.controller.create(trivy()).await.unwrap();
        f.project_metadata
            .set(7, PROJECT_SCANNER_KEY, "gone")
            .await
            .unwrap();

        let resolved = f
            .controller
            .get_registration_by_project(7, RegistrationOptions::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.uuid, default);
        assert_eq!(
            f.project_metadata.get(7, PROJECT_SCANNER_KEY).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn no_registration_at_all_resolves_to_none() {
        let f = fixture();

        let resolved = f
            .controller
            .get_registration_by_project(7, RegistrationOptions { ping: true })
            .await
            .unwrap();

        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn pinging_on_resolution_fills_the_health_fields() {
        let f = fixture();
        f.controller.create(trivy()).await.unwrap();

        let resolved = f
            .controller
            .get_registration_by_project(7, RegistrationOptions { ping: true })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.health.as_deref(), Some("healthy"));
        assert_eq!(resolved.adapter.as_deref(), Some("Trivy"));
        assert_eq!(resolved.vendor.as_deref(), Some("Aqua Security"));
    }

    #[tokio::test(start_paused = true)]
    async fn metadata_is_cached_per_registration() {
        let f = fixture();
        let uuid = f.controller.create(trivy()).await.unwrap();
        let fetches = f.pool.fetches();

        f.controller.get_metadata(&uuid).await.unwrap();
        f.controller.get_metadata(&uuid).await.unwrap();
        assert_eq!(f.pool.fetches(), fetches + 1);

        tokio::time::advance(METADATA_CACHE_TTL + Duration::from_secs(1)).await;
        f.controller.get_metadata(&uuid).await.unwrap();
        assert_eq!(f.pool.fetches(), fetches + 2);
    }

    #[tokio::test]
    async fn ensuring_a_scanner_twice_installs_it_once() {
        let f = fixture();

        let first = f.controller.ensure_scanner(trivy(), false).await.unwrap();
        let second = f.controller.ensure_scanner(trivy(), false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.controller.count(&Query::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ensuring_a_scanner_with_a_taken_name() {
        let f = fixture();
        f.controller.ensure_scanner(trivy(), false).await.unwrap();
        let same_name = Registration::new("trivy", "https://other/");

        let err = f
            .controller
            .ensure_scanner(same_name.clone(), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let uuid = f.controller.ensure_scanner(same_name, true).await.unwrap();
        let installed = f.controller.get(&uuid).await.unwrap().unwrap();
        assert!(installed.name.starts_with("trivy-"));
        assert_eq!(f.controller.count(&Query::new()).await.unwrap(), 2);
    }
}
