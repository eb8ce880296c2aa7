use derive_more::derive::Display;
use reqwest::StatusCode;

pub type AppResult<T> = Result<T, AppError>;

/// Error taxonomy for the pipeline.
///
/// Per-record errors (`ClassificationTimeout`, `RequestTimeout`, transient
/// `Internal` failures) are caught by the fan-out executor, logged and the
/// record is excluded from results. Only `Selection` aborts a whole job.
#[derive(Debug, Display)]
pub enum AppError {
    /// The structural pre-filter could not execute. Fatal to the job.
    Selection(String),
    /// Upstream said "rate limited" and the retry budget is exhausted.
    RateLimitExceeded,
    /// Permanently-invalid request. Retrying cannot help.
    BadRequest(String),
    /// A single outbound call exceeded its per-call timeout.
    RequestTimeout,
    /// A classification task exceeded its per-task deadline.
    ClassificationTimeout,
    /// Two writers raced on identity creation. Resolved internally by
    /// re-checking under the resolver lock; callers should not see this.
    IdentityConflict(String),
    /// The job-level deadline passed before the run finished.
    JobTimeout,
    NotFound(String),
    Internal(anyhow::Error),
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        tracing::error!("Reqwest error: {:?}", error);
        match error.status() {
            Some(StatusCode::BAD_REQUEST) => AppError::BadRequest(error.to_string()),
            Some(StatusCode::REQUEST_TIMEOUT) => AppError::RequestTimeout,
            Some(StatusCode::TOO_MANY_REQUESTS) => AppError::RateLimitExceeded,
            _ => AppError::Internal(error.into()),
        }
    }
}

impl AppError {
    /// True for failures worth one immediate retry (network hiccups and
    /// per-call timeouts). Rate limiting and bad requests have their own
    /// handling and are excluded here.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::RequestTimeout | AppError::Internal(_))
    }
}
