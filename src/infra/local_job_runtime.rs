use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, watch};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::job_log_layer::JobLogBuffer;
use crate::app::{HookEvent, Job, JobContext, JobError, JobService};
use crate::domain::errors::{Error, Result};
use crate::domain::job::{JobData, JobMetadata, JobParameters, JobStatus, StatusChange};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

type RunningJobs = Arc<RwLock<HashMap<String, watch::Sender<bool>>>>;

/// In-process job runtime: runs registered job kinds on tokio tasks and
/// reports every status change to the job's status hook.
pub struct LocalJobService {
    kinds: HashMap<String, Arc<dyn Job>>,
    max_attempts: u32,
    running: RunningJobs,
    logs: JobLogBuffer,
    hooks: mpsc::UnboundedSender<HookEvent>,
}

impl LocalJobService {
    pub fn new(
        max_attempts: u32,
        logs: JobLogBuffer,
        hooks: mpsc::UnboundedSender<HookEvent>,
    ) -> Self {
        Self {
            kinds: HashMap::new(),
            max_attempts: max_attempts.max(1),
            running: RunningJobs::default(),
            logs,
            hooks,
        }
    }

    pub fn with_job(mut self, name: impl Into<String>, job: Arc<dyn Job>) -> Self {
        self.kinds.insert(name.into(), job);
        self
    }

    pub async fn is_running(&self, job_id: &str) -> bool {
        self.running.read().await.contains_key(job_id)
    }
}

struct Execution {
    job_id: String,
    job: Arc<dyn Job>,
    parameters: JobParameters,
    hook_url: String,
    max_attempts: u32,
    stop: watch::Receiver<bool>,
    hooks: mpsc::UnboundedSender<HookEvent>,
    running: RunningJobs,
}

impl Execution {
    fn emit(&self, status: JobStatus, check_in: Option<String>, revision: i64) {
        let event = HookEvent {
            hook_url: self.hook_url.clone(),
            change: StatusChange {
                job_id: self.job_id.clone(),
                status: status.to_string(),
                check_in,
                metadata: JobMetadata {
                    revision,
                    parameters: self.parameters.clone(),
                },
            },
        };
        if self.hooks.send(event).is_err() {
            warn!(%status, "nobody is listening to job status hooks");
        }
    }

    async fn attempt(&self, revision: i64) -> std::result::Result<(), JobError> {
        let (check_in_tx, mut check_ins) = mpsc::unbounded_channel();
        let ctx = JobContext::new(&self.job_id, check_in_tx, self.stop.clone());

        let job = self.job.clone();
        let parameters = &self.parameters;
        let run = async move {
            let result = job.run(&ctx, parameters).await;
            drop(ctx);
            result
        };
        let forward = async {
            while let Some(check_in) = check_ins.recv().await {
                self.emit(JobStatus::Running, Some(check_in), revision);
            }
        };

        let (result, ()) = tokio::join!(run, forward);
        result
    }

    async fn run(self) {
        for attempt in 1..=self.max_attempts {
            let revision = i64::from(attempt);
            self.emit(JobStatus::Running, None, revision);

            match self.attempt(revision).await {
                Ok(()) => {
                    info!(attempt, "job succeeded");
                    self.emit(JobStatus::Success, None, revision);
                    break;
                }
                Err(_) if *self.stop.borrow() => {
                    info!(attempt, "job stopped");
                    self.emit(JobStatus::Stopped, None, revision);
                    break;
                }
                Err(err) if err.is_retriable() && attempt < self.max_attempts => {
                    warn!(attempt, error = %err, "job failed, retrying");
                }
                Err(err) => {
                    error!(attempt, error = %err, "job failed");
                    self.emit(JobStatus::Error, None, revision);
                    break;
                }
            }
        }

        self.running.write().await.remove(&self.job_id);
    }
}

#[async_trait::async_trait]
impl JobService for LocalJobService {
    async fn submit(&self, data: JobData) -> Result<String> {
        let job = self
            .kinds
            .get(&data.name)
            .cloned()
            .ok_or_else(|| Error::BadRequest(format!("unknown job kind {}", data.name)))?;
        job.validate(&data.parameters)?;

        let job_id = Uuid::new_v4().simple().to_string();
        let (stop_tx, stop) = watch::channel(false);
        self.running.write().await.insert(job_id.clone(), stop_tx);
        self.logs.open(&job_id);

        let execution = Execution {
            job_id: job_id.clone(),
            job,
            parameters: data.parameters,
            hook_url: data.status_hook,
            max_attempts: self.max_attempts,
            stop,
            hooks: self.hooks.clone(),
            running: self.running.clone(),
        };
        let span = info_span!("job", job_id = %job_id, kind = %data.name);
        tokio::spawn(execution.run().instrument(span));

        Ok(job_id)
    }

    async fn stop(&self, job_id: &str) -> Result<()> {
        let running = self.running.read().await;
        let stop = running
            .get(job_id)
            .ok_or_else(|| Error::NotFound(format!("running job {job_id}")))?;
        // The job may finish between the lookup and the send.
        let _ = stop.send(true);
        Ok(())
    }

    async fn get_job_log(&self, job_id: &str) -> Result<Option<String>> {
        Ok(self.logs.get(job_id))
    }
}
