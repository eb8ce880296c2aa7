//! Observability Module
//!
//! Tracks active classification jobs for logging and status displays:
//! current state, progress counters and elapsed time per job.

mod job_tracker;

pub use job_tracker::{JobEntry, JobProgress, JobTracker};
