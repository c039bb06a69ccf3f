use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::app::{AdapterClient, AdapterClientError, DEFAULT_REFRESH_AFTER_SECS};
use crate::domain::adapter::{ErrorResponse, ScanRequest, ScanResponse, ScannerAdapterMetadata};
use crate::domain::mime::{MIME_TYPE_ADAPTER_META, MIME_TYPE_SCAN_REQUEST, MIME_TYPE_SCAN_RESPONSE};
use crate::domain::registration::{AdapterEndpoint, AuthType};

/// Version prefix of the scanner adapter API. `/metadata`, `/scan` and
/// `/scan/{id}/report` are relative to it, as published in the adapter's
/// OpenAPI description (`/api/v1/metadata` and so on).
const API_PREFIX: &str = "/api/v1";
const API_KEY_HEADER: &str = "X-ScannerAdapter-API-Key";
const REFRESH_AFTER_HEADER: &str = "Refresh-After";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials set on every request sent to an adapter.
#[derive(Clone, PartialEq, Eq)]
pub enum Authorizer {
    None,
    Basic(String),
    Bearer(String),
    ApiKey(String),
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Authorizer::None => "None",
            Authorizer::Basic(_) => "Basic",
            Authorizer::Bearer(_) => "Bearer",
            Authorizer::ApiKey(_) => "ApiKey",
        };
        write!(f, "Authorizer::{kind}")
    }
}

impl Authorizer {
    pub fn for_endpoint(endpoint: &AdapterEndpoint) -> Result<Self, AdapterClientError> {
        let credential = || {
            endpoint
                .credential
                .as_ref()
                .map(|c| c.0.clone())
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    AdapterClientError::Configuration(format!(
                        "auth type {} requires an access credential",
                        endpoint.auth
                    ))
                })
        };

        Ok(match endpoint.auth {
            AuthType::None => Authorizer::None,
            AuthType::Basic => Authorizer::Basic(credential()?),
            AuthType::Bearer => Authorizer::Bearer(credential()?),
            AuthType::ApiKey => Authorizer::ApiKey(credential()?),
        })
    }

    pub fn apply_to(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Authorizer::None => request,
            Authorizer::Basic(credential) => {
                request.header(AUTHORIZATION, format!("Basic {}", STANDARD.encode(credential)))
            }
            Authorizer::Bearer(credential) => {
                request.header(AUTHORIZATION, format!("Bearer {credential}"))
            }
            Authorizer::ApiKey(credential) => request.header(API_KEY_HEADER, credential),
        }
    }
}

/// Talks to one scanner adapter over its v1 REST API.
#[derive(Debug, Clone)]
pub struct HttpAdapterClient {
    client: Client,
    base_url: String,
    authorizer: Authorizer,
}

impl HttpAdapterClient {
    pub fn new(endpoint: &AdapterEndpoint, timeout: Duration) -> Result<Self, AdapterClientError> {
        let authorizer = Authorizer::for_endpoint(endpoint)?;
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(endpoint.skip_cert_verify)
            // 302 means "not ready" on report fetches.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AdapterClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("{}{API_PREFIX}", endpoint.url.trim_end_matches('/')),
            authorizer,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, AdapterClientError> {
        self.authorizer
            .apply_to(request)
            .send()
            .await
            .map_err(|e| AdapterClientError::Transport(e.to_string()))
    }
}

async fn unexpected(response: Response, expected: StatusCode) -> AdapterClientError {
    let actual = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                actual.canonical_reason().unwrap_or("no message").to_string()
            } else {
                body.trim().to_string()
            }
        });

    match actual {
        StatusCode::UNSUPPORTED_MEDIA_TYPE | StatusCode::UNPROCESSABLE_ENTITY => {
            AdapterClientError::Unsupported(message)
        }
        _ => AdapterClientError::UnexpectedStatus {
            expected: expected.as_u16(),
            actual: actual.as_u16(),
            message,
        },
    }
}

fn refresh_after(headers: &HeaderMap) -> u64 {
    headers
        .get(REFRESH_AFTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_REFRESH_AFTER_SECS)
}

#[async_trait::async_trait]
impl AdapterClient for HttpAdapterClient {
    async fn get_metadata(&self) -> Result<ScannerAdapterMetadata, AdapterClientError> {
        let response = self
            .send(
                self.client
                    .get(self.url("/metadata"))
                    .header(ACCEPT, MIME_TYPE_ADAPTER_META),
            )
            .await?;

        if response.status() != StatusCode::OK {
            return Err(unexpected(response, StatusCode::OK).await);
        }
        response
            .json()
            .await
            .map_err(|e| AdapterClientError::Decode(e.to_string()))
    }

    async fn submit_scan(&self, request: &ScanRequest) -> Result<ScanResponse, AdapterClientError> {
        let body = serde_json::to_vec(request).map_err(|e| AdapterClientError::Decode(e.to_string()))?;
        debug!(request = %request.to_redacted_json(), "submitting scan request");

        let response = self
            .send(
                self.client
                    .post(self.url("/scan"))
                    .header(CONTENT_TYPE, MIME_TYPE_SCAN_REQUEST)
                    .header(ACCEPT, MIME_TYPE_SCAN_RESPONSE)
                    .body(body),
            )
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(unexpected(response, StatusCode::ACCEPTED).await);
        }
        response
            .json()
            .await
            .map_err(|e| AdapterClientError::Decode(e.to_string()))
    }

    async fn get_scan_report(
        &self,
        scan_request_id: &str,
        mime_type: &str,
    ) -> Result<String, AdapterClientError> {
        let response = self
            .send(
                self.client
                    .get(self.url(&format!("/scan/{scan_request_id}/report")))
                    .header(ACCEPT, mime_type),
            )
            .await?;

        match response.status() {
            StatusCode::OK => response
                .text()
                .await
                .map_err(|e| AdapterClientError::Decode(e.to_string())),
            StatusCode::FOUND => Err(AdapterClientError::ReportNotReady {
                retry_after: refresh_after(response.headers()),
            }),
            _ => Err(unexpected(response, StatusCode::OK).await),
        }
    }
}
