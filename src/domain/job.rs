use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::adapter::ScanRequest;
use super::errors::{Error, Result};
use super::registration::Registration;

pub const IMAGE_SCAN_JOB: &str = "IMAGE_SCAN";

pub const PARAM_REGISTRATION: &str = "registration";
pub const PARAM_SCAN_REQUEST: &str = "scanRequest";
pub const PARAM_MIME_TYPES: &str = "mimeTypes";
pub const PARAM_ROBOT_ACCOUNT: &str = "robotAccount";
pub const PARAM_ROBOT_ID: &str = "robot_id";

/// Status of a job in the job runtime. Final statuses share one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Stopped,
    Error,
    Success,
}

impl JobStatus {
    pub const FINAL_CODE: i32 = 3;

    pub fn code(&self) -> i32 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Scheduled => 1,
            JobStatus::Running => 2,
            JobStatus::Stopped | JobStatus::Error | JobStatus::Success => Self::FINAL_CODE,
        }
    }

    pub fn is_final(&self) -> bool {
        self.code() == Self::FINAL_CODE
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Scheduled => "Scheduled",
            JobStatus::Running => "Running",
            JobStatus::Stopped => "Stopped",
            JobStatus::Error => "Error",
            JobStatus::Success => "Success",
        }
    }

    /// Code of a stored status text; free-form texts are error messages.
    pub fn code_of(status: &str) -> i32 {
        status
            .parse::<JobStatus>()
            .map(|s| s.code())
            .unwrap_or(Self::FINAL_CODE)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(JobStatus::Pending),
            "Scheduled" => Ok(JobStatus::Scheduled),
            "Running" => Ok(JobStatus::Running),
            "Stopped" => Ok(JobStatus::Stopped),
            "Error" => Ok(JobStatus::Error),
            "Success" => Ok(JobStatus::Success),
            other => Err(Error::BadRequest(format!("unknown job status {other}"))),
        }
    }
}

pub type JobParameters = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default)]
    pub revision: i64,
    #[serde(default)]
    pub parameters: JobParameters,
}

/// Payload the job runtime posts to a status hook.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusChange {
    pub job_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in: Option<String>,
    #[serde(default)]
    pub metadata: JobMetadata,
}

impl StatusChange {
    pub fn robot_id(&self) -> Option<i64> {
        self.metadata
            .parameters
            .get(PARAM_ROBOT_ID)
            .and_then(Value::as_i64)
    }
}

/// A job submission as understood by the job runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    pub name: String,
    pub parameters: JobParameters,
    pub status_hook: String,
}

/// Result for one produced MIME type, checked in by a running scan job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInReport {
    pub digest: String,
    pub registration_uuid: String,
    pub mime_type: String,
    pub raw_report: String,
}

impl CheckInReport {
    pub fn from_json(data: &str) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::BadRequest("empty check-in data".into()));
        }
        serde_json::from_str(data)
            .map_err(|e| Error::BadRequest(format!("malformed check-in data: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Short-lived credential minted so an adapter can pull the scanned artifact.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotAccount {
    pub id: i64,
    pub name: String,
    pub secret: String,
    pub project_id: i64,
    pub expires_at: i64,
}

impl std::fmt::Debug for RobotAccount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotAccount")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("secret", &"[redacted]")
            .field("project_id", &self.project_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Typed view over the parameters of an image scan job.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanJobParameters {
    pub registration: Registration,
    pub request: ScanRequest,
    pub mime_types: Vec<String>,
    pub robot: Option<RobotAccount>,
}

impl ScanJobParameters {
    pub fn into_job_parameters(self) -> Result<JobParameters> {
        let mut params = JobParameters::new();
        params.insert(
            PARAM_REGISTRATION.into(),
            Value::String(serde_json::to_string(&self.registration)?),
        );
        params.insert(
            PARAM_SCAN_REQUEST.into(),
            Value::String(serde_json::to_string(&self.request)?),
        );
        params.insert(
            PARAM_MIME_TYPES.into(),
            Value::Array(self.mime_types.into_iter().map(Value::String).collect()),
        );
        if let Some(robot) = self.robot {
            params.insert(PARAM_ROBOT_ID.into(), Value::from(robot.id));
            params.insert(
                PARAM_ROBOT_ACCOUNT.into(),
                Value::String(serde_json::to_string(&robot)?),
            );
        }
        Ok(params)
    }

    pub fn from_job_parameters(params: &JobParameters) -> Result<Self> {
        let registration: Registration = json_param(params, PARAM_REGISTRATION)?;
        registration.validate(true)?;

        let request: ScanRequest = json_param(params, PARAM_SCAN_REQUEST)?;
        request.validate()?;

        let mime_types = match params.get(PARAM_MIME_TYPES) {
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        Error::BadRequest(format!(
                            "malformed job parameter '{PARAM_MIME_TYPES}', expecting strings but got {v}"
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(Error::BadRequest(format!(
                    "malformed job parameter '{PARAM_MIME_TYPES}', expecting an array but got {other}"
                )));
            }
            None => {
                return Err(Error::BadRequest(format!(
                    "missing job parameter '{PARAM_MIME_TYPES}'"
                )));
            }
        };
        if mime_types.is_empty() {
            return Err(Error::BadRequest(format!(
                "job parameter '{PARAM_MIME_TYPES}' is empty"
            )));
        }

        let robot = match params.get(PARAM_ROBOT_ACCOUNT) {
            Some(_) => Some(json_param(params, PARAM_ROBOT_ACCOUNT)?),
            None => None,
        };

        Ok(Self {
            registration,
            request,
            mime_types,
            robot,
        })
    }
}

fn json_param<T: serde::de::DeserializeOwned>(params: &JobParameters, key: &str) -> Result<T> {
    let value = params
        .get(key)
        .ok_or_else(|| Error::BadRequest(format!("missing job parameter '{key}'")))?;
    let Value::String(json) = value else {
        return Err(Error::BadRequest(format!(
            "malformed job parameter '{key}', expecting string but got {value}"
        )));
    };
    serde_json::from_str(json)
        .map_err(|e| Error::BadRequest(format!("malformed job parameter '{key}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::adapter::Registry;
    use crate::domain::artifact::Artifact;
    use crate::domain::mime;

    fn parameters() -> ScanJobParameters {
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
                    "library/alpine",
                    "sha256:abc",
                    mime::MIME_TYPE_DOCKER_ARTIFACT,
                ),
                enabled_capabilities: vec![],
            },
            mime_types: vec![mime::MIME_TYPE_NATIVE_REPORT.into()],
            robot: Some(RobotAccount {
                id: 42,
                name: "robot$scanner-1".into(),
                secret: "s3cr3t".into(),
                project_id: 1,
                expires_at: 0,
            }),
        }
    }

    #[test]
    fn job_statuses_share_a_final_code() {
        assert!(JobStatus::Success.is_final());
        assert!(JobStatus::Error.is_final());
        assert!(!JobStatus::Running.is_final());
        assert!(JobStatus::Running.code() > JobStatus::Pending.code());
        assert_eq!(JobStatus::code_of("connection refused"), JobStatus::FINAL_CODE);
    }

    #[test]
    fn scan_job_parameters_survive_the_job_runtime() {
        let params = parameters().into_job_parameters().unwrap();

        assert_eq!(params.get(PARAM_ROBOT_ID), Some(&Value::from(42)));
        assert_eq!(
            ScanJobParameters::from_job_parameters(&params).unwrap(),
            parameters()
        );
    }

    #[test]
    fn missing_or_malformed_parameters_are_bad_requests() {
        let mut params = parameters().into_job_parameters().unwrap();
        params.insert(PARAM_MIME_TYPES.into(), Value::from("not-a-list"));
        assert!(matches!(
            ScanJobParameters::from_job_parameters(&params),
            Err(Error::BadRequest(_))
        ));

        params.remove(PARAM_REGISTRATION);
        assert!(matches!(
            ScanJobParameters::from_job_parameters(&params),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn the_robot_id_is_read_from_the_hook_metadata() {
        let change: StatusChange = serde_json::from_str(
            r#"{"job_id": "j1", "status": "Success", "metadata": {"revision": 7, "parameters": {"robot_id": 42}}}"#,
        )
        .unwrap();

        assert_eq!(change.robot_id(), Some(42));
        assert_eq!(change.metadata.revision, 7);
        assert!(change.check_in.is_none());
    }

    #[test]
    fn robot_secrets_are_not_printed() {
        assert!(!format!("{:?}", parameters().robot.unwrap()).contains("s3cr3t"));
    }
}
