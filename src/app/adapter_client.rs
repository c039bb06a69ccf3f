use std::sync::Arc;

use thiserror::Error;

use crate::domain::adapter::{ScanRequest, ScanResponse, ScannerAdapterMetadata};
use crate::domain::errors::Error;
use crate::domain::registration::AdapterEndpoint;

pub const DEFAULT_REFRESH_AFTER_SECS: u64 = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterClientError {
    /// The adapter answered `302 Found`; the report is not there yet.
    #[error("report is not ready yet, retry after {retry_after} seconds")]
    ReportNotReady { retry_after: u64 },

    #[error("{message} (expected status {expected}, got {actual})")]
    UnexpectedStatus {
        expected: u16,
        actual: u16,
        message: String,
    },

    /// The adapter refused the artifact or the requested report type.
    #[error("unsupported by the scanner adapter: {0}")]
    Unsupported(String),

    #[error("failed to reach the scanner adapter: {0}")]
    Transport(String),

    #[error("unexpected response from the scanner adapter: {0}")]
    Decode(String),

    #[error("invalid scanner adapter client configuration: {0}")]
    Configuration(String),
}

impl AdapterClientError {
    pub fn is_report_not_ready(&self) -> bool {
        matches!(self, AdapterClientError::ReportNotReady { .. })
    }
}

impl From<AdapterClientError> for Error {
    fn from(value: AdapterClientError) -> Self {
        Error::Scanner(value.to_string())
    }
}

/// The HTTP contract every scanner adapter implements.
#[async_trait::async_trait]
pub trait AdapterClient: Send + Sync {
    async fn get_metadata(&self) -> Result<ScannerAdapterMetadata, AdapterClientError>;

    async fn submit_scan(&self, request: &ScanRequest) -> Result<ScanResponse, AdapterClientError>;

    /// The raw report body for `mime_type`, or `ReportNotReady`.
    async fn get_scan_report(
        &self,
        scan_request_id: &str,
        mime_type: &str,
    ) -> Result<String, AdapterClientError>;
}

/// Hands out adapter clients shared per endpoint.
#[async_trait::async_trait]
pub trait ClientPool: Send + Sync {
    async fn get(
        &self,
        endpoint: &AdapterEndpoint,
    ) -> Result<Arc<dyn AdapterClient>, AdapterClientError>;
}
