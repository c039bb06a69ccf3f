use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::adapter::ScannerAdapterMetadata;
use super::errors::{Error, Result};

pub const HEALTHY: &str = "healthy";
pub const UNHEALTHY: &str = "unhealthy";

/// How a client authenticates against a scanner adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AuthType {
    #[default]
    #[serde(rename = "")]
    None,
    Basic,
    Bearer,
    #[serde(rename = "X-ScannerAdapter-API-Key")]
    ApiKey,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "",
            AuthType::Basic => "Basic",
            AuthType::Bearer => "Bearer",
            AuthType::ApiKey => "X-ScannerAdapter-API-Key",
        }
    }
}

impl Display for AuthType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(AuthType::None),
            "Basic" => Ok(AuthType::Basic),
            "Bearer" => Ok(AuthType::Bearer),
            "X-ScannerAdapter-API-Key" => Ok(AuthType::ApiKey),
            other => Err(Error::BadRequest(format!("auth type {other} is not supported"))),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessCredential(pub String);

impl std::fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("[redacted]")
    }
}

impl Display for AccessCredential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("[redacted]")
    }
}

/// Everything needed to talk to one adapter; identifies a pooled client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdapterEndpoint {
    pub url: String,
    pub auth: AuthType,
    pub credential: Option<AccessCredential>,
    pub skip_cert_verify: bool,
}

/// Named configuration of one scanner adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Registration {
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub auth: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_credential: Option<AccessCredential>,
    #[serde(default)]
    pub skip_cert_verify: bool,
    #[serde(default)]
    pub use_internal_addr: bool,
    #[serde(default)]
    pub immutable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,

    // Filled by a ping, never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ScannerAdapterMetadata>,
}

impl Registration {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_auth(mut self, auth: AuthType, credential: impl Into<String>) -> Self {
        self.auth = auth;
        self.access_credential = Some(AccessCredential(credential.into()));
        self
    }

    pub fn endpoint(&self) -> AdapterEndpoint {
        AdapterEndpoint {
            url: self.url.clone(),
            auth: self.auth,
            credential: self.access_credential.clone(),
            skip_cert_verify: self.skip_cert_verify,
        }
    }

    pub fn validate(&self, check_uuid: bool) -> Result<()> {
        if check_uuid && self.uuid.is_empty() {
            return Err(Error::BadRequest("malformed registration: missing uuid".into()));
        }

        let name_pattern = Regex::new(r"^[A-Za-z0-9]+(?:[._-][A-Za-z0-9]+)*$")
            .map_err(|e| Error::internal_with("invalid name pattern", e))?;
        if !name_pattern.is_match(&self.name) {
            return Err(Error::BadRequest(format!(
                "malformed registration: invalid name {:?}",
                self.name
            )));
        }

        let url = Url::parse(&self.url).map_err(|e| {
            Error::BadRequest(format!("malformed registration: invalid url {}: {e}", self.url))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none_or(str::is_empty) {
            return Err(Error::BadRequest(format!(
                "malformed registration: url {} must be http(s) with a host",
                self.url
            )));
        }

        let has_credential = self
            .access_credential
            .as_ref()
            .is_some_and(|c| !c.0.is_empty());
        match (self.auth, has_credential) {
            (AuthType::None, true) => Err(Error::BadRequest(
                "malformed registration: access credential given without auth type".into(),
            )),
            (AuthType::None, false) => Ok(()),
            (auth, false) => Err(Error::BadRequest(format!(
                "malformed registration: auth type {auth} requires an access credential"
            ))),
            (_, true) => Ok(()),
        }
    }

    /// JSON with the credential hidden, for logs.
    pub fn to_redacted_json(&self) -> String {
        let mut copy = self.clone();
        if copy.access_credential.is_some() {
            copy.access_credential = Some(AccessCredential("[HIDDEN]".into()));
        }
        serde_json::to_string(&copy).unwrap_or_default()
    }

    /// Copies the scanner identity of a successful ping into the registration.
    pub fn mark_healthy(&mut self, metadata: ScannerAdapterMetadata) {
        self.health = Some(HEALTHY.to_string());
        self.adapter = Some(metadata.scanner.name.clone());
        self.vendor = Some(metadata.scanner.vendor.clone());
        self.version = Some(metadata.scanner.version.clone());
        self.metadata = Some(metadata);
    }

    pub fn mark_unhealthy(&mut self) {
        self.health = Some(UNHEALTHY.to_string());
    }

    /// Field values a [`Query`](super::query::Query) keyword is matched against.
    pub fn query_field(&self, key: &str) -> Option<Vec<String>> {
        let v = match key {
            "uuid" => self.uuid.clone(),
            "name" => self.name.clone(),
            "description" => self.description.clone(),
            "url" => self.url.clone(),
            "disabled" => self.disabled.to_string(),
            "is_default" => self.is_default.to_string(),
            "auth" => self.auth.to_string(),
            "immutable" => self.immutable.to_string(),
            "use_internal_addr" => self.use_internal_addr.to_string(),
            "skip_cert_verify" => self.skip_cert_verify.to_string(),
            _ => return None,
        };
        Some(vec![v])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn a_registration() -> Registration {
        Registration::new("trivy-adapter", "https://scanner.local:8080")
    }

    #[test]
    fn a_well_formed_registration_is_valid() {
        assert!(a_registration().validate(false).is_ok());
        assert!(
            a_registration()
                .with_auth(AuthType::Bearer, "token")
                .validate(false)
                .is_ok()
        );
    }

    #[rstest]
    #[case::empty_name(Registration::new("", "https://s"))]
    #[case::bad_name(Registration::new("bad name", "https://s"))]
    #[case::bad_scheme(Registration::new("s", "ftp://s"))]
    #[case::not_a_url(Registration::new("s", "not a url"))]
    #[case::auth_without_credential(Registration { auth: AuthType::Basic, ..Registration::new("s", "http://s") })]
    #[case::credential_without_auth(Registration { access_credential: Some(AccessCredential("x".into())), ..Registration::new("s", "http://s") })]
    fn malformed_registrations_are_rejected(#[case] registration: Registration) {
        let err = registration.validate(false).unwrap_err();

        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn uuid_is_required_when_asked_for() {
        assert!(a_registration().validate(true).is_err());
    }

    #[test]
    fn auth_types_use_their_wire_names() {
        let json = serde_json::to_string(&AuthType::ApiKey).unwrap();

        assert_eq!(json, "\"X-ScannerAdapter-API-Key\"");
        assert_eq!(
            serde_json::from_str::<AuthType>("\"\"").unwrap(),
            AuthType::None
        );
        assert_eq!("Bearer".parse::<AuthType>().unwrap(), AuthType::Bearer);
    }

    #[test]
    fn the_credential_never_leaks_through_debug_or_logs() {
        let registration = a_registration().with_auth(AuthType::Basic, "admin:secret");

        assert!(!format!("{registration:?}").contains("secret"));
        assert!(!registration.to_redacted_json().contains("secret"));
        assert!(
            serde_json::to_string(&registration)
                .unwrap()
                .contains("admin:secret")
        );
    }
}
