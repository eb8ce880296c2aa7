pub mod identity;
pub mod job;
pub mod record;

pub use identity::{Alias, AliasKey, AliasStats, Identity};
pub use job::{Criterion, Job, JobId, JobResult, JobStatus};
pub use record::{Record, RecordFilter, RecordId};
