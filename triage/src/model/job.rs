use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{RecordFilter, RecordId};

pub type JobId = i64;

/// Lifecycle of a classification run. Transitions are strictly forward in
/// declaration order; the three terminal states never change once reached.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Created,
    Selecting,
    SamplingDone,
    Classifying,
    Complete,
    TimedOut,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::TimedOut | JobStatus::Failed
        )
    }
}

/// What the user asked for: a residual yes/no question put to the classifier
/// for every candidate, plus the structural filter parsed out of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    pub text: String,
    #[serde(default)]
    pub filter: RecordFilter,
}

impl Criterion {
    pub fn from_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            filter: RecordFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub record_id: RecordId,
    pub included: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: i64,
    /// The criterion text as originally submitted; used for idempotent reuse.
    pub criterion_text: String,
    pub criterion: Criterion,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub sampling_fraction: f64,
    pub results: Vec<JobResult>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(id: JobId, owner_id: i64, criterion: Criterion) -> Self {
        Self {
            id,
            owner_id,
            criterion_text: criterion.text.clone(),
            criterion,
            status: JobStatus::Created,
            created_at: Utc::now(),
            sampling_fraction: 1.0,
            results: Vec::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next` if that is a forward transition. Returns false (and
    /// leaves the job untouched) for backward moves or terminal jobs.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if self.is_terminal() || next <= self.status {
            return false;
        }
        self.status = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_status_order_matches_lifecycle() {
        let order: Vec<JobStatus> = JobStatus::iter().collect();
        assert_eq!(order[0], JobStatus::Created);
        assert!(JobStatus::Selecting < JobStatus::Classifying);
        assert!(JobStatus::Classifying < JobStatus::Complete);
    }

    #[test]
    fn test_advance_is_forward_only() {
        let mut job = Job::new(1, 1, Criterion::from_text("funds organ donation?"));
        assert!(job.advance(JobStatus::Selecting));
        assert!(job.advance(JobStatus::Classifying));
        // Backward and no-op transitions are refused
        assert!(!job.advance(JobStatus::Selecting));
        assert!(!job.advance(JobStatus::Classifying));
        assert!(job.advance(JobStatus::Complete));
        // Terminal is sticky
        assert!(!job.advance(JobStatus::Failed));
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[test]
    fn test_status_strings_are_snake_case() {
        assert_eq!(JobStatus::SamplingDone.to_string(), "sampling_done");
        assert_eq!(JobStatus::TimedOut.to_string(), "timed_out");
    }
}
