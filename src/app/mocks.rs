use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mockall::mock;

use super::adapter_client::{AdapterClient, AdapterClientError, ClientPool};
use super::services::{JobService, RobotAccountManager, RobotRequest};
use super::stores::ReportStore;
use crate::domain::adapter::{ScanRequest, ScanResponse, ScannerAdapterMetadata};
use crate::domain::errors::Result;
use crate::domain::job::{JobData, RobotAccount};
use crate::domain::query::Query;
use crate::domain::registration::AdapterEndpoint;
use crate::domain::report::{Report, ScanStats};

mock! {
    pub Adapter {}
    #[async_trait::async_trait]
    impl AdapterClient for Adapter {
        async fn get_metadata(&self) -> std::result::Result<ScannerAdapterMetadata, AdapterClientError>;
        async fn submit_scan(&self, request: &ScanRequest) -> std::result::Result<ScanResponse, AdapterClientError>;
        async fn get_scan_report(&self, scan_request_id: &str, mime_type: &str) -> std::result::Result<String, AdapterClientError>;
    }
}

mock! {
    pub RobotManager {}
    #[async_trait::async_trait]
    impl RobotAccountManager for RobotManager {
        async fn create(&self, request: RobotRequest) -> Result<RobotAccount>;
        async fn delete(&self, id: i64) -> Result<()>;
    }
}

mock! {
    pub Jobs {}
    #[async_trait::async_trait]
    impl JobService for Jobs {
        async fn submit(&self, job: JobData) -> Result<String>;
        async fn stop(&self, job_id: &str) -> Result<()>;
        async fn get_job_log(&self, job_id: &str) -> Result<Option<String>>;
    }
}

mock! {
    pub Reports {}
    #[async_trait::async_trait]
    impl ReportStore for Reports {
        async fn create(&self, report: Report) -> Result<String>;
        async fn get(&self, uuid: &str) -> Result<Option<Report>>;
        async fn list(&self, query: &Query) -> Result<Vec<Report>>;
        async fn get_by<'a, 'b, 'c, 'd>(
            &'a self,
            digest: &'b str,
            registration_uuid: Option<&'c str>,
            mime_types: &'d [String],
        ) -> Result<Vec<Report>>;
        async fn update_status(&self, track_id: &str, status: &str, rev: i64) -> Result<usize>;
        async fn update_report_data(&self, uuid: &str, report: &str, rev: i64) -> Result<bool>;
        async fn update_scan_job_id(&self, uuid: &str, job_id: &str) -> Result<()>;
        async fn delete_by_digests(&self, digests: &[String]) -> Result<()>;
        async fn get_stats(&self, requester: &str) -> Result<ScanStats>;
        async fn references_registration(&self, registration_uuid: &str) -> Result<bool>;
    }
}

/// A pool handing out the same client for every endpoint.
pub struct StaticPool {
    client: Arc<dyn AdapterClient>,
    fetches: AtomicUsize,
}

impl StaticPool {
    pub fn new(client: Arc<dyn AdapterClient>) -> Self {
        Self {
            client,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ClientPool for StaticPool {
    async fn get(
        &self,
        _endpoint: &AdapterEndpoint,
    ) -> std::result::Result<Arc<dyn AdapterClient>, AdapterClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.client.clone())
    }
}

pub fn adapter_with_metadata(metadata: ScannerAdapterMetadata) -> Arc<dyn AdapterClient> {
    let mut adapter = MockAdapter::new();
    adapter
        .expect_get_metadata()
        .returning(move || Ok(metadata.clone()));
    Arc::new(adapter)
}

pub fn failing_adapter(message: &str) -> Arc<dyn AdapterClient> {
    let message = message.to_string();
    let mut adapter = MockAdapter::new();
    adapter
        .expect_get_metadata()
        .returning(move || Err(AdapterClientError::Transport(message.clone())));
    Arc::new(adapter)
}
