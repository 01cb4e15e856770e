//! Per-job state machine and the facade exposed to the surrounding application.
//!
//! A job moves `submitting -> polling -> completed | failed`. Submitted jobs
//! go through a single dispatcher that hands out the `max_concurrent_jobs`
//! worker slots strictly in submission order; each admitted job then runs on
//! its own task until it releases its slot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::generation::{GenerationRequest, JobStatusResponse};
use crate::models::job::{GenerationError, Job, JobStatus};
use crate::services::credentials::{mask, CredentialPool};
use crate::services::failover::{submit_with_failover, FailoverOutcome};
use crate::services::poller::{poll_until_terminal, PollTarget};
use crate::services::registry::{JobRegistry, RegistryError};
use crate::services::render::{RenderClient, RenderError};

/// Progress shown while the create request is in flight.
const SUBMITTING_PROGRESS: u8 = 5;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub max_concurrent_jobs: usize,
    pub poll_interval: Duration,
    pub generation_timeout: Duration,
    pub registry_capacity: usize,
}

impl RunnerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs,
            poll_interval: config.poll_interval(),
            generation_timeout: config.generation_timeout(),
            registry_capacity: config.registry_capacity,
        }
    }
}

type QueuedJob = (Uuid, GenerationRequest);

/// Everything a running job needs, shared between the facade and job tasks.
struct JobContext {
    client: RenderClient,
    pool: CredentialPool,
    registry: JobRegistry,
    settings: RunnerSettings,
}

/// Owns the credential pool, the registry and the worker slots.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<JobContext>,
    slots: Arc<Semaphore>,
    queue: mpsc::UnboundedSender<QueuedJob>,
}

impl Orchestrator {
    /// Build the orchestrator and start its dispatcher. Must be called from
    /// within a Tokio runtime. The dispatcher stops once every clone is dropped.
    pub fn new(client: RenderClient, pool: CredentialPool, settings: RunnerSettings) -> Self {
        let ctx = Arc::new(JobContext {
            client,
            pool,
            registry: JobRegistry::new(settings.registry_capacity),
            settings,
        });
        let slots = Arc::new(Semaphore::new(ctx.settings.max_concurrent_jobs.max(1)));
        let (queue, pending) = mpsc::unbounded_channel();

        tokio::spawn(dispatch(Arc::clone(&ctx), Arc::clone(&slots), pending));

        Self { ctx, slots, queue }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, RenderError> {
        let client = RenderClient::new(&config.render_base_url, config.request_timeout())?
            .with_exhaustion_signals(&config.exhaustion_markers, &config.exhaustion_codes);
        let pool = CredentialPool::new(&config.credentials_path);
        Ok(Self::new(client, pool, RunnerSettings::from_config(config)))
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.ctx.pool
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.ctx.registry
    }

    /// Worker slots not currently held by a running job.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Register a job and queue it for a worker slot. The caller's own
    /// admission checks must already have passed.
    pub fn submit_job(
        &self,
        caller_id: String,
        request: GenerationRequest,
    ) -> Result<Uuid, SubmitError> {
        let job = Job::new(caller_id, request.clone());
        let caller = job.caller_id.clone();
        let job_id = self.ctx.registry.insert(job)?;

        if self.queue.send((job_id, request)).is_err() {
            self.ctx.finish(
                job_id,
                Err(GenerationError::SubmissionRejected {
                    message: "orchestrator is shutting down".to_string(),
                }),
            );
            return Err(SubmitError::Closed);
        }

        metrics::counter!("generation_jobs_submitted").increment(1);
        tracing::info!(job_id = %job_id, caller_id = %caller, "Generation job submitted");

        Ok(job_id)
    }

    /// Latest known state of a job, or `None` if the id is unknown.
    pub fn get_job_status(&self, job_id: &Uuid) -> Option<JobStatusResponse> {
        self.ctx.registry.get(job_id).as_ref().map(JobStatusResponse::from)
    }
}

/// Admit queued jobs one at a time, each only once a worker slot is free.
async fn dispatch(
    ctx: Arc<JobContext>,
    slots: Arc<Semaphore>,
    mut pending: mpsc::UnboundedReceiver<QueuedJob>,
) {
    while let Some((job_id, request)) = pending.recv().await {
        let Ok(slot) = Arc::clone(&slots).acquire_owned().await else {
            ctx.finish(
                job_id,
                Err(GenerationError::SubmissionRejected {
                    message: "orchestrator is shutting down".to_string(),
                }),
            );
            continue;
        };
        tokio::spawn(Arc::clone(&ctx).run(job_id, request, slot));
    }
    tracing::debug!("Job dispatcher stopped");
}

impl JobContext {
    async fn run(
        self: Arc<Self>,
        job_id: Uuid,
        request: GenerationRequest,
        _slot: OwnedSemaphorePermit,
    ) {
        metrics::gauge!("generation_jobs_running").increment(1.0);
        let started = Instant::now();

        let outcome = self.execute(job_id, &request).await;
        self.finish(job_id, outcome);

        metrics::gauge!("generation_jobs_running").decrement(1.0);
        metrics::histogram!("generation_duration_seconds").record(started.elapsed().as_secs_f64());
    }

    async fn execute(
        &self,
        job_id: Uuid,
        request: &GenerationRequest,
    ) -> Result<String, GenerationError> {
        self.raise_progress(&job_id, SUBMITTING_PROGRESS);

        let snapshot = self.pool.load().await.map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Failed to load credential pool");
            GenerationError::SubmissionRejected {
                message: "credential store is unavailable".to_string(),
            }
        })?;

        let (credential, task_id, queue_id) =
            match submit_with_failover(&self.client, &self.pool, &snapshot, request).await {
                FailoverOutcome::Submitted {
                    credential,
                    task_id,
                    queue_id,
                } => (credential, task_id, queue_id),
                FailoverOutcome::Failed { message } => {
                    return Err(GenerationError::SubmissionRejected { message })
                }
                FailoverOutcome::AllExhausted { tried: 0 } => {
                    return Err(GenerationError::NoCredentialsAvailable)
                }
                FailoverOutcome::AllExhausted { tried } => {
                    return Err(GenerationError::AllCredentialsExhausted { tried })
                }
            };

        self.registry.update(&job_id, |job| {
            job.credential = Some(credential.clone());
            job.task_id = task_id;
            job.queue_id = queue_id;
        });
        tracing::info!(
            job_id = %job_id,
            credential = %mask(&credential),
            task_id = ?task_id,
            queue_id = ?queue_id,
            "Polling rendering queue"
        );

        let target = PollTarget {
            credential: &credential,
            task_id,
            queue_id,
            interval: self.settings.poll_interval,
            timeout: self.settings.generation_timeout,
        };
        poll_until_terminal(&self.client, target, |progress| {
            self.raise_progress(&job_id, progress);
        })
        .await
    }

    fn raise_progress(&self, job_id: &Uuid, progress: u8) {
        self.registry.update(job_id, |job| {
            if job.status == JobStatus::Processing {
                job.progress = job.progress.max(progress);
            }
        });
    }

    fn finish(&self, job_id: Uuid, outcome: Result<String, GenerationError>) {
        match outcome {
            Ok(result_url) => {
                metrics::counter!("generation_jobs_completed").increment(1);
                tracing::info!(job_id = %job_id, result_url = %result_url, "Generation job completed");
                self.registry.update(&job_id, |job| {
                    job.status = JobStatus::Completed;
                    job.progress = 100;
                    job.result_url = Some(result_url);
                });
            }
            Err(error) => {
                metrics::counter!("generation_jobs_failed", "reason" => error.code()).increment(1);
                tracing::warn!(job_id = %job_id, error = %error, code = error.code(), "Generation job failed");
                self.registry.update(&job_id, |job| {
                    job.status = JobStatus::Failed;
                    job.error = Some(error);
                });
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("job dispatcher is not running")]
    Closed,
}
