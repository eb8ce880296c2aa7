//! Classification jobs.
//!
//! A job is one classification run: fetch candidates, filter, sample,
//! classify, persist. The module splits into:
//!
//! - **Runner**: drives the bounded fan-out over the candidate set and
//!   checkpoints results as they stream back
//! - **Service**: the submission/poll surface with idempotent creation,
//!   poll-side timeout enforcement and cancellation
//!
//! Job state moves strictly forward
//! (`created -> selecting -> sampling_done -> classifying` and then one of
//! `complete | timed_out | failed`); a terminal job never changes again, so
//! pollers always see a stable answer.

mod runner;
mod service;

pub use runner::JobRunner;
pub use service::{JobService, JobStatusView};
