use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::identity::IdentityResolver;
use crate::model::{Criterion, JobId, JobResult, JobStatus};
use crate::observability::JobTracker;
use crate::provider::Provider;
use crate::rate_limit::{RateLimitState, RateLimitedClient};
use crate::reasoner::Reasoner;
use crate::store::Storage;

use super::runner::JobRunner;

/// What a poller sees: the current status string, the sampling fraction the
/// selector actually used, and the results accumulated so far from
/// `start_index` onward. Terminal jobs return the same view forever.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub sampling_fraction: f64,
    pub total_results: usize,
    pub results: Vec<JobResult>,
}

/// Submission/poll surface for classification jobs.
///
/// Owns the process-scoped shared state: the rate-limit cooldown every
/// outbound call observes, the identity resolver cache, and the map of
/// cancellation tokens for runs in flight. All of it is instance state so
/// tests can build as many isolated services as they need.
pub struct JobService {
    storage: Arc<dyn Storage>,
    reasoner: Arc<dyn Reasoner>,
    provider: Option<Arc<dyn Provider>>,
    client: RateLimitedClient,
    resolver: Arc<IdentityResolver>,
    tracker: JobTracker,
    config: PipelineConfig,
    running: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl JobService {
    pub fn new(
        storage: Arc<dyn Storage>,
        reasoner: Arc<dyn Reasoner>,
        provider: Option<Arc<dyn Provider>>,
        config: PipelineConfig,
    ) -> Self {
        let client = RateLimitedClient::new(
            Arc::new(RateLimitState::new()),
            config.rate_limit.clone(),
        );
        let resolver = Arc::new(IdentityResolver::new(
            storage.clone(),
            config.identity.clone(),
        ));

        Self {
            storage,
            reasoner,
            provider,
            client,
            resolver,
            tracker: JobTracker::new(),
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn resolver(&self) -> Arc<IdentityResolver> {
        self.resolver.clone()
    }

    pub fn tracker(&self) -> JobTracker {
        self.tracker.clone()
    }

    /// Create a job for a criterion and start processing it in the
    /// background.
    ///
    /// Idempotent on the criterion text: if an identical criterion already
    /// ran to completion, the existing job is returned instead of
    /// recomputing.
    pub async fn create_job(&self, owner_id: i64, criterion: Criterion) -> AppResult<JobId> {
        if let Some(existing) = self
            .storage
            .find_complete_job(owner_id, &criterion.text)
            .await?
        {
            tracing::info!(
                "Found existing completed job {} for criterion: {}",
                existing.id,
                existing.criterion_text
            );
            return Ok(existing.id);
        }

        let job = self.storage.insert_job(owner_id, criterion).await?;
        let job_id = job.id;

        let cancel = CancellationToken::new();
        self.running.lock().unwrap().insert(job_id, cancel.clone());

        let runner = JobRunner::new(
            self.storage.clone(),
            self.reasoner.clone(),
            self.provider.clone(),
            self.client.clone(),
            self.resolver.clone(),
            self.tracker.clone(),
            self.config.clone(),
            cancel,
        );
        let running = self.running.clone();
        tokio::spawn(async move {
            if let Err(err) = runner.run(job_id).await {
                tracing::error!("Error processing job {}: {:?}", job_id, err);
            }
            running.lock().unwrap().remove(&job_id);
        });

        Ok(job_id)
    }

    /// Poll a job. Always answers with a status and whatever results exist
    /// so far; also the point where the job-level timeout is enforced for
    /// runs that stalled between commit points.
    pub async fn get_status(&self, job_id: JobId, start_index: usize) -> AppResult<JobStatusView> {
        let mut job = self
            .storage
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No such job: {job_id}")))?;

        if !job.is_terminal() {
            let age = Utc::now() - job.created_at;
            if age > chrono::Duration::seconds(self.config.job.timeout_secs as i64) {
                tracing::info!(
                    "Job {} exceeded {}s deadline, marking timed out",
                    job_id,
                    self.config.job.timeout_secs
                );
                job.advance(JobStatus::TimedOut);
                self.storage.update_job(&job).await?;
                self.signal_cancel(job_id);
            }
        }

        let results: Vec<JobResult> = job.results.iter().skip(start_index).cloned().collect();
        Ok(JobStatusView {
            job_id,
            status: job.status,
            sampling_fraction: job.sampling_fraction,
            total_results: job.results.len(),
            results,
        })
    }

    /// Stop dispatching work for a job. In-flight tasks drain; accumulated
    /// results stay visible under the terminal status.
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        self.signal_cancel(job_id)
    }

    fn signal_cancel(&self, job_id: JobId) -> bool {
        let running = self.running.lock().unwrap();
        match running.get(&job_id) {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }
}
