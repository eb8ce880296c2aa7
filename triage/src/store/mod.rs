//! Storage seam.
//!
//! The pipeline is written against this trait rather than a concrete
//! database so the schema stays out of scope and every test can run on an
//! isolated in-memory instance. Implementations must support listing with
//! the heavy content blob deferred (`list_records` returns no content;
//! `load_content` fetches it on demand) and fresh re-reads of jobs so
//! pollers observe concurrent writes.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::model::{AliasKey, Criterion, Identity, Job, JobId, Record, RecordFilter, RecordId};

#[async_trait]
pub trait Storage: Send + Sync {
    // -- records

    /// True matching count for a filter, before any cap is applied.
    async fn count_records(&self, filter: &RecordFilter) -> anyhow::Result<u64>;

    /// All matching, non-excluded records ordered by amount descending then
    /// id. Content blobs are not loaded.
    async fn list_records(&self, filter: &RecordFilter) -> anyhow::Result<Vec<Record>>;

    async fn load_content(&self, id: RecordId) -> anyhow::Result<Option<String>>;

    async fn set_excluded(&self, id: RecordId, excluded: bool) -> anyhow::Result<()>;

    // -- identities

    async fn get_identity(&self, id: i64) -> anyhow::Result<Option<Identity>>;

    async fn list_identities(&self, owner_id: i64) -> anyhow::Result<Vec<Identity>>;

    /// Exact (name, address) alias match within an owner scope.
    async fn find_identity_by_alias(
        &self,
        owner_id: i64,
        key: &AliasKey,
    ) -> anyhow::Result<Option<Identity>>;

    /// Close match: an identity already owning the same address, or failing
    /// that the same display name.
    async fn find_identity_near(
        &self,
        owner_id: i64,
        key: &AliasKey,
    ) -> anyhow::Result<Option<Identity>>;

    /// Create a fresh identity owning exactly this alias. Fails if storage
    /// already holds the alias (the caller re-checks under its lock).
    async fn insert_identity(&self, owner_id: i64, key: &AliasKey) -> anyhow::Result<Identity>;

    /// Attach a new alias to an existing identity; returns the updated row.
    async fn attach_alias(&self, identity_id: i64, key: &AliasKey) -> anyhow::Result<Identity>;

    /// Full-row write of aliases and stats.
    async fn update_identity(&self, identity: &Identity) -> anyhow::Result<()>;

    /// Move one alias out into a brand-new identity; both rows get their
    /// aggregate stats recomputed. Returns the new identity.
    async fn split_alias(&self, identity_id: i64, alias_id: i64) -> anyhow::Result<Identity>;

    // -- jobs

    async fn insert_job(&self, owner_id: i64, criterion: Criterion) -> anyhow::Result<Job>;

    /// Checkpoint write. Writes against a job that has already reached a
    /// terminal state in storage are ignored, which keeps polled status
    /// monotonic when a runner and a poll-side timeout race.
    async fn update_job(&self, job: &Job) -> anyhow::Result<()>;

    /// Fresh read, never served from a cache.
    async fn get_job(&self, id: JobId) -> anyhow::Result<Option<Job>>;

    /// A completed job with this exact criterion text, if one exists.
    async fn find_complete_job(
        &self,
        owner_id: i64,
        criterion_text: &str,
    ) -> anyhow::Result<Option<Job>>;
}
