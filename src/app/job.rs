use itertools::Itertools;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use super::adapter_client::AdapterClientError;
use crate::domain::errors::Error;
use crate::domain::job::{JobParameters, StatusChange};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("invalid job parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Adapter(#[from] AdapterClientError),

    #[error("timed out waiting for the {mime_type} report")]
    Timeout { mime_type: String },

    #[error("invalid {mime_type} report: {message}")]
    InvalidReport { mime_type: String, message: String },

    #[error("the job was stopped")]
    Stopped,

    #[error("the job runtime stopped listening for check-ins")]
    CheckInClosed,

    #[error("{}", .0.iter().join("; "))]
    Multiple(Vec<JobError>),
}

impl JobError {
    /// Whether another attempt of the job could succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            JobError::InvalidParameters(_)
            | JobError::InvalidReport { .. }
            | JobError::Stopped
            | JobError::Adapter(AdapterClientError::Unsupported(_)) => false,
            JobError::Multiple(errors) => errors.iter().all(JobError::is_retriable),
            _ => true,
        }
    }

    /// Folds worker errors: the first is kept and the rest chained after it.
    pub fn aggregate(mut errors: Vec<JobError>) -> Option<JobError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(JobError::Multiple(errors)),
        }
    }
}

impl From<JobError> for Error {
    fn from(value: JobError) -> Self {
        match value {
            JobError::InvalidParameters(message) => Error::BadRequest(message),
            other => Error::Scanner(other.to_string()),
        }
    }
}

/// What a running job can reach of its runtime.
#[derive(Clone, Debug)]
pub struct JobContext {
    job_id: String,
    check_ins: mpsc::UnboundedSender<String>,
    stop: watch::Receiver<bool>,
}

impl JobContext {
    pub fn new(
        job_id: impl Into<String>,
        check_ins: mpsc::UnboundedSender<String>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            check_ins,
            stop,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Sends a check-in message to whoever watches the job's status hook.
    pub fn check_in(&self, message: String) -> Result<(), JobError> {
        self.check_ins
            .send(message)
            .map_err(|_| JobError::CheckInClosed)
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves once the job is asked to stop; never when the runtime goes away silently.
    pub async fn stopped(&self) {
        let mut stop = self.stop.clone();
        if stop.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// A status change the job runtime delivers to a job's status hook.
#[derive(Debug, Clone, PartialEq)]
pub struct HookEvent {
    pub hook_url: String,
    pub change: StatusChange,
}

/// A kind of job the runtime knows how to run.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    fn validate(&self, parameters: &JobParameters) -> Result<(), JobError>;

    async fn run(&self, ctx: &JobContext, parameters: &JobParameters) -> Result<(), JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case::parameters(JobError::InvalidParameters("x".into()), false)]
    #[case::unsupported(JobError::Adapter(AdapterClientError::Unsupported("x".into())), false)]
    #[case::stopped(JobError::Stopped, false)]
    #[case::transport(JobError::Adapter(AdapterClientError::Transport("x".into())), true)]
    #[case::timeout(JobError::Timeout { mime_type: "x".into() }, true)]
    fn retriability(#[case] error: JobError, #[case] expected: bool) {
        assert_eq!(error.is_retriable(), expected);
    }

    #[test]
    fn aggregated_errors_keep_the_first_and_chain_the_rest() {
        let error = JobError::aggregate(vec![
            JobError::Timeout { mime_type: "a".into() },
            JobError::Adapter(AdapterClientError::Unsupported("b".into())),
        ])
        .unwrap();

        assert_eq!(
            error.to_string(),
            "timed out waiting for the a report; unsupported by the scanner adapter: b"
        );
        assert!(!error.is_retriable());
        assert!(JobError::aggregate(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn stopping_wakes_the_job() {
        let (check_ins, _) = mpsc::unbounded_channel();
        let (stop, receiver) = watch::channel(false);
        let ctx = JobContext::new("job-1", check_ins, receiver);

        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.stopped().await }
        });
        stop.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.is_stopped());
    }

    #[tokio::test]
    async fn checking_in_after_the_runtime_left_fails() {
        let (check_ins, receiver) = mpsc::unbounded_channel();
        let (_stop, stop_receiver) = watch::channel(false);
        let ctx = JobContext::new("job-1", check_ins, stop_receiver);
        drop(receiver);

        assert!(matches!(ctx.check_in("{}".into()), Err(JobError::CheckInClosed)));
    }
}
