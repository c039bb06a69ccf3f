use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::event_hooks::{ArtifactEventHandler, JobHookDispatcher};
use super::job::HookEvent;
use super::scan_all::ScanAll;
use super::scan_controller::ScanController;
use super::scanner_controller::ScannerController;
use crate::domain::registration::{AccessCredential, AuthType, Registration};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub robot: RobotConfig,
    pub client_pool: ClientPoolConfig,
    pub job: JobConfig,
    pub logging: LoggingConfig,
    pub scanners: Vec<ScannerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry address handed to adapters.
    pub external_url: String,
    /// Core address reachable from inside the deployment.
    pub core_internal_url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub ttl_seconds: i64,
    pub name_prefix: String,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 1800,
            name_prefix: "robot$".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientPoolConfig {
    pub eviction_interval_secs: u64,
    pub expiration_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ClientPoolConfig {
    fn default() -> Self {
        Self {
            eviction_interval_secs: 60,
            expiration_secs: 300,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub max_attempts: u32,
    pub first_check_interval_secs: u64,
    pub check_timeout_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            first_check_interval_secs: 2,
            check_timeout_secs: 30 * 60,
        }
    }
}

impl JobConfig {
    pub fn first_check_interval(&self) -> Duration {
        Duration::from_secs(self.first_check_interval_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// A scanner installed at boot unless one with the same url exists.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub name: String,
    pub url: String,
    pub description: String,
    pub auth: String,
    pub access_credential: Option<String>,
    pub skip_cert_verify: bool,
    pub use_internal_addr: bool,
    pub immutable: bool,
    /// Retry with a suffixed name when the name is taken.
    pub resolve_conflict: bool,
}

impl ScannerConfig {
    pub fn to_registration(&self) -> Result<Registration, ComponentFactoryError> {
        let auth: AuthType = self
            .auth
            .parse()
            .map_err(|e| ComponentFactoryError::InvalidConfiguration(format!("scanner {}: {e}", self.name)))?;
        Ok(Registration {
            name: self.name.clone(),
            url: self.url.clone(),
            description: self.description.clone(),
            auth,
            access_credential: self.access_credential.clone().map(AccessCredential),
            skip_cert_verify: self.skip_cert_verify,
            use_internal_addr: self.use_internal_addr,
            immutable: self.immutable,
            ..Default::default()
        })
    }
}

impl Config {
    pub fn from_yaml(content: &str) -> Result<Self, ComponentFactoryError> {
        let config: Config = marked_yaml::from_yaml(0, content)
            .map_err(|e| ComponentFactoryError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ComponentFactoryError> {
        if self.registry.core_internal_url.is_empty() {
            return Err(ComponentFactoryError::MissingSetting("registry.core_internal_url"));
        }
        if self.registry.external_url.is_empty() {
            return Err(ComponentFactoryError::MissingSetting("registry.external_url"));
        }
        if self.job.max_attempts == 0 {
            return Err(ComponentFactoryError::InvalidConfiguration(
                "job.max_attempts must be at least 1".into(),
            ));
        }
        for scanner in &self.scanners {
            scanner.to_registration()?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ComponentFactoryError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("missing configuration setting {0}")]
    MissingSetting(&'static str),
}

/// A long-running task the binary starts and stops with the process.
pub trait BackgroundTask: Send + Sync {
    fn name(&self) -> &str;

    fn spawn(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()>;
}

pub struct Components {
    pub scanners: Arc<ScannerController>,
    pub scans: Arc<ScanController>,
    pub scan_all: Arc<ScanAll>,
    pub artifact_events: Arc<ArtifactEventHandler>,
    pub job_hooks: JobHookDispatcher,
    /// Status changes of scan jobs, to be fed to `job_hooks`.
    pub hook_events: mpsc::UnboundedReceiver<HookEvent>,
    pub background: Vec<Box<dyn BackgroundTask>>,
}

pub trait ComponentFactory {
    fn create_components(&self, config: Config) -> Result<Components, ComponentFactoryError>;
}
