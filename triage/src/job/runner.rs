use std::sync::Arc;

use futures::{stream, StreamExt};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{IdentityResolver, Observation};
use crate::model::{Job, JobId, JobResult, JobStatus, Record, RecordId};
use crate::observability::JobTracker;
use crate::provider::Provider;
use crate::rate_limit::RateLimitedClient;
use crate::reasoner::Reasoner;
use crate::selector::CandidateSelector;
use crate::store::Storage;

enum TaskOutcome {
    Included { record_id: RecordId, reason: String },
    NotIncluded,
    Failed { record_id: RecordId, error: AppError },
    Skipped,
}

/// Drives one job through the fan-out pipeline.
///
/// Classification tasks run as a bounded concurrent stream; completions
/// arrive in no particular order and included records are appended to the
/// job's result list, which is persisted every `checkpoint_every` tasks
/// rather than on every append. The job-level deadline is cooperative: it is
/// checked at those commit points (and by pollers), never enforced
/// preemptively, so in-flight tasks finish or hit their own per-task
/// timeout instead of being killed mid-mutation.
pub struct JobRunner {
    storage: Arc<dyn Storage>,
    reasoner: Arc<dyn Reasoner>,
    provider: Option<Arc<dyn Provider>>,
    client: RateLimitedClient,
    resolver: Arc<IdentityResolver>,
    selector: CandidateSelector,
    tracker: JobTracker,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl JobRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn Storage>,
        reasoner: Arc<dyn Reasoner>,
        provider: Option<Arc<dyn Provider>>,
        client: RateLimitedClient,
        resolver: Arc<IdentityResolver>,
        tracker: JobTracker,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let selector = CandidateSelector::new(storage.clone(), &config.selector);
        Self {
            storage,
            reasoner,
            provider,
            client,
            resolver,
            selector,
            tracker,
            config,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, job_id: JobId) -> AppResult<()> {
        let mut job = self
            .storage
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No such job: {job_id}")))?;
        self.tracker.register_job(job.id, job.owner_id);
        let started = Instant::now();

        match self.run_inner(&mut job, started).await {
            Ok(()) => {
                self.tracker.finish_job(job.id, job.status);
                Ok(())
            }
            Err(err) => {
                tracing::error!("Job {} failed: {:?}", job.id, err);
                job.error = Some(err.to_string());
                job.advance(JobStatus::Failed);
                if let Err(persist_err) = self.storage.update_job(&job).await {
                    tracing::error!("Could not persist failed job {}: {:?}", job.id, persist_err);
                }
                self.tracker.finish_job(job.id, JobStatus::Failed);
                Err(err)
            }
        }
    }

    async fn run_inner(&self, job: &mut Job, started: Instant) -> AppResult<()> {
        self.advance(job, JobStatus::Selecting).await?;

        // Turn the free-text criterion into a structural filter plus the
        // residual per-record question, unless the caller already supplied
        // structured fields.
        if job.criterion.filter.is_empty() {
            let criterion_text = job.criterion_text.clone();
            let parsed = self
                .client
                .execute(|| self.reasoner.parse_criterion(&criterion_text))
                .await
                .map_err(|err| AppError::Selection(format!("criterion parse failed: {err}")))?;
            job.criterion = parsed;
        }

        let selection = self.selector.select(&job.criterion.filter).await?;
        job.sampling_fraction = selection.sampling_fraction;
        self.advance(job, JobStatus::SamplingDone).await?;

        let total = selection.records.len();
        self.tracker.set_total_records(job.id, total);
        tracing::info!("{} records to scan for job {}", total, job.id);

        self.advance(job, JobStatus::Classifying).await?;

        let criterion_text = job.criterion.text.clone();
        let cancel = self.cancel.clone();
        let mut outcomes = stream::iter(selection.records.into_iter().map(|record| {
            let criterion = criterion_text.clone();
            let cancel = cancel.clone();
            async move {
                // Cancellation stops tasks that have not started; in-flight
                // ones below run to completion or per-task timeout.
                if cancel.is_cancelled() {
                    return TaskOutcome::Skipped;
                }
                self.classify_record(&criterion, record).await
            }
        }))
        .buffer_unordered(self.config.classifier.max_concurrency);

        let mut processed = 0usize;
        let mut halted = false;

        while let Some(outcome) = outcomes.next().await {
            if halted {
                // Terminal decision already made; drain the tail without
                // appending anything further.
                continue;
            }
            if matches!(outcome, TaskOutcome::Skipped) {
                continue;
            }
            processed += 1;

            match outcome {
                TaskOutcome::Included { record_id, reason } => {
                    job.results.push(JobResult {
                        record_id,
                        included: true,
                        reason,
                    });
                    self.tracker.increment_processed(job.id, 1, 1);
                }
                TaskOutcome::NotIncluded => {
                    self.tracker.increment_processed(job.id, 1, 0);
                }
                TaskOutcome::Failed { record_id, error } => {
                    // Fail-open: the record is excluded, the job carries on
                    tracing::error!("Error classifying record {}: {}", record_id, error);
                    self.tracker.increment_processed(job.id, 1, 0);
                }
                TaskOutcome::Skipped => {}
            }

            if processed % self.config.classifier.checkpoint_every == 0 {
                tracing::info!("Processed {} records for job {}", processed, job.id);
                self.storage.update_job(job).await?;
                if self.commit_point_should_halt(job, started).await? {
                    halted = true;
                }
            }
        }

        if !job.is_terminal() {
            if self.deadline_passed(started) || self.cancel.is_cancelled() {
                self.finish_timed_out(job).await?;
            } else {
                tracing::info!(
                    "Done processing {} records for job {} ({} included)",
                    processed,
                    job.id,
                    job.results.len()
                );
                job.advance(JobStatus::Complete);
                self.storage.update_job(job).await?;
            }
        }

        Ok(())
    }

    async fn classify_record(&self, criterion: &str, record: Record) -> TaskOutcome {
        let record_id = record.id;
        let deadline = Duration::from_secs(self.config.classifier.task_timeout_secs);

        let work = async {
            // Resolve the record's owning identity; a failure here costs
            // stats, not the verdict.
            if let (Some(name), Some(address)) = (&record.alias_name, &record.alias_address) {
                let resolved = match Observation::from_facets(&record.facets) {
                    Some(observation) => {
                        self.resolver
                            .observe(record.owner_id, name, address, observation)
                            .await
                    }
                    None => self.resolver.resolve(record.owner_id, name, address).await,
                };
                if let Err(err) = resolved {
                    tracing::warn!("Could not resolve identity for record {}: {}", record_id, err);
                }
            }

            let content = self.load_content(&record).await?;
            self.client
                .execute(|| self.reasoner.classify(criterion, &content))
                .await
        };

        match tokio::time::timeout(deadline, work).await {
            Ok(Ok(verdict)) => {
                if verdict.included {
                    TaskOutcome::Included {
                        record_id,
                        reason: verdict.reason,
                    }
                } else {
                    TaskOutcome::NotIncluded
                }
            }
            Ok(Err(error)) => TaskOutcome::Failed { record_id, error },
            Err(_elapsed) => TaskOutcome::Failed {
                record_id,
                error: AppError::ClassificationTimeout,
            },
        }
    }

    /// Content is deferred at listing time; fetch it from storage, falling
    /// back to the source provider for records whose blob was never
    /// materialized.
    async fn load_content(&self, record: &Record) -> AppResult<String> {
        if let Some(content) = self.storage.load_content(record.id).await? {
            return Ok(content);
        }
        if let Some(provider) = &self.provider {
            let provider_id = record.id.to_string();
            if let Some(content) = self
                .client
                .execute(|| provider.fetch_content(&provider_id))
                .await?
            {
                return Ok(content);
            }
        }
        Err(AppError::NotFound(format!(
            "content for record {}",
            record.id
        )))
    }

    async fn advance(&self, job: &mut Job, next: JobStatus) -> AppResult<()> {
        if job.advance(next) {
            self.tracker.set_status(job.id, next);
            self.storage.update_job(job).await?;
        }
        Ok(())
    }

    fn deadline_passed(&self, started: Instant) -> bool {
        started.elapsed() >= Duration::from_secs(self.config.job.timeout_secs)
    }

    /// Commit point: observe external terminal transitions (poll-side
    /// timeout, explicit cancel) and enforce the job deadline.
    async fn commit_point_should_halt(&self, job: &mut Job, started: Instant) -> AppResult<bool> {
        if let Some(fresh) = self.storage.get_job(job.id).await? {
            if fresh.is_terminal() {
                tracing::info!("Job {} became {} externally, halting", job.id, fresh.status);
                job.status = fresh.status;
                self.cancel.cancel();
                return Ok(true);
            }
        }
        if self.deadline_passed(started) || self.cancel.is_cancelled() {
            self.finish_timed_out(job).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn finish_timed_out(&self, job: &mut Job) -> AppResult<()> {
        tracing::info!(
            "Job {} timed out with {} accumulated results",
            job.id,
            job.results.len()
        );
        job.advance(JobStatus::TimedOut);
        self.storage.update_job(job).await?;
        self.cancel.cancel();
        Ok(())
    }
}
