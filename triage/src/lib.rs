//! Triage: a classification fan-out pipeline.
//!
//! Takes a large, heterogeneous collection of records (mail threads, grant
//! awards), narrows it with structural filters, and asks an external
//! reasoning service to classify each surviving record against a
//! user-supplied criterion. The filtering is the easy part; the point of
//! this crate is driving many slow, fallible, rate-limited calls
//! concurrently with partial-failure tolerance, incremental durability and
//! a client-visible progress/timeout state machine.
//!
//! ## Architecture
//!
//! - [`selector`]: structural pre-filter plus hard-capped uniform sampling
//! - [`identity`]: alias-to-identity resolution with at-most-once creation
//!   under concurrent writers, engagement stats and statistical splitting
//! - [`rate_limit`]: shared cooldown + pacing + bounded retry around every
//!   outbound call
//! - [`job`]: the bounded fan-out executor, checkpointer and the
//!   submission/poll surface
//! - [`store`], [`reasoner`], [`provider`]: the external collaborators as
//!   traits, with an in-memory store for tests and embedders
//!
//! HTTP routing, auth, schema management and source-payload parsing are out
//! of scope; embed this crate behind whatever surface serves your clients.

pub mod config;
pub mod error;
pub mod identity;
pub mod job;
pub mod model;
pub mod observability;
pub mod provider;
pub mod rate_limit;
pub mod reasoner;
pub mod selector;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;

pub type HttpClient = reqwest::Client;

pub use config::PipelineConfig;
pub use error::{AppError, AppResult};
pub use job::{JobService, JobStatusView};
pub use model::{Criterion, Job, JobId, JobStatus, Record, RecordFilter};
pub use reasoner::{HttpReasoner, Reasoner, Verdict};
pub use store::{MemoryStore, Storage};
