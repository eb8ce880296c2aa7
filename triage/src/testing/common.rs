//! Shared fixtures for tests: seeded stores, scripted reasoners and a
//! storage wrapper that can be told to fail.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::config::{PipelineConfig, RateLimitConfig};
use crate::error::{AppError, AppResult};
use crate::model::{
    AliasKey, Criterion, Identity, Job, JobId, Record, RecordFilter, RecordId,
};
use crate::reasoner::{Reasoner, Verdict};
use crate::store::{MemoryStore, Storage};

/// Install a test subscriber so `RUST_LOG=triage=debug` works in tests.
/// Safe to call from every test; only the first call wins.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn make_record(id: RecordId, owner_id: i64) -> Record {
    Record {
        id,
        owner_id,
        source: "seed".to_string(),
        agency: None,
        category: None,
        posted_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        amount: None,
        facets: BTreeMap::new(),
        alias_name: None,
        alias_address: None,
        excluded: false,
    }
}

/// A store with `n` records for one owner. Records carry a parseable id in
/// their content, an alias rotating through 7 senders, and engagement
/// facets so classification also exercises the identity path.
pub fn seeded_store(owner_id: i64, n: usize) -> MemoryStore {
    let store = MemoryStore::new();
    for i in 1..=n as i64 {
        let mut record = make_record(i, owner_id);
        record.alias_name = Some(format!("Sender {}", i % 7));
        record.alias_address = Some(format!("sender{}@example.com", i % 7));
        record.facets = BTreeMap::from([
            ("unread".to_string(), i % 3 == 0),
            ("replied".to_string(), i % 5 == 0),
            ("important".to_string(), i % 11 == 0),
        ]);
        store.insert_record(record, format!("id:{i} sample record body"));
    }
    store
}

/// Pipeline config with a rate limiter that never stalls a test.
pub fn fast_test_config() -> PipelineConfig {
    PipelineConfig {
        rate_limit: RateLimitConfig {
            rate_limit_per_sec: 10_000,
            refill_interval_ms: 100,
            refill_amount: 1_000,
            max_attempts: 5,
            backoff_base_secs: 30,
            backoff_step_secs: 10,
            call_timeout_secs: 20,
        },
        ..Default::default()
    }
}

fn parse_seeded_id(content: &str) -> Option<i64> {
    content
        .strip_prefix("id:")?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// Deterministic classifier: includes records whose seeded id is even.
/// Optionally fails permanently for a subset of ids.
pub struct EvenIdReasoner {
    fail_on: Option<fn(i64) -> bool>,
}

impl EvenIdReasoner {
    pub fn new() -> Self {
        Self { fail_on: None }
    }

    pub fn failing_on(fail_on: fn(i64) -> bool) -> Self {
        Self {
            fail_on: Some(fail_on),
        }
    }
}

impl Default for EvenIdReasoner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reasoner for EvenIdReasoner {
    async fn classify(&self, _criterion: &str, content: &str) -> AppResult<Verdict> {
        let id = parse_seeded_id(content)
            .ok_or_else(|| AppError::BadRequest(format!("unparseable content: {content}")))?;
        if let Some(fail_on) = self.fail_on {
            if fail_on(id) {
                return Err(AppError::BadRequest(format!("record {id} is poisoned")));
            }
        }
        Ok(Verdict {
            included: id % 2 == 0,
            reason: format!("id {id} is {}", if id % 2 == 0 { "even" } else { "odd" }),
        })
    }
}

/// Sleeps on every call, then includes the record.
pub struct SleepyReasoner(pub Duration);

#[async_trait]
impl Reasoner for SleepyReasoner {
    async fn classify(&self, _criterion: &str, _content: &str) -> AppResult<Verdict> {
        tokio::time::sleep(self.0).await;
        Ok(Verdict {
            included: true,
            reason: "eventually".to_string(),
        })
    }
}

/// Delegates to a `MemoryStore` but can be told to fail candidate listing,
/// to exercise the fatal selection path.
pub struct FlakyStore {
    inner: MemoryStore,
    fail_listing: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_listing: AtomicBool::new(false),
        }
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Relaxed);
    }
}

#[async_trait]
impl Storage for FlakyStore {
    async fn count_records(&self, filter: &RecordFilter) -> anyhow::Result<u64> {
        self.inner.count_records(filter).await
    }

    async fn list_records(&self, filter: &RecordFilter) -> anyhow::Result<Vec<Record>> {
        if self.fail_listing.load(Relaxed) {
            return Err(anyhow!("storage unavailable"));
        }
        self.inner.list_records(filter).await
    }

    async fn load_content(&self, id: RecordId) -> anyhow::Result<Option<String>> {
        self.inner.load_content(id).await
    }

    async fn set_excluded(&self, id: RecordId, excluded: bool) -> anyhow::Result<()> {
        self.inner.set_excluded(id, excluded).await
    }

    async fn get_identity(&self, id: i64) -> anyhow::Result<Option<Identity>> {
        self.inner.get_identity(id).await
    }

    async fn list_identities(&self, owner_id: i64) -> anyhow::Result<Vec<Identity>> {
        self.inner.list_identities(owner_id).await
    }

    async fn find_identity_by_alias(
        &self,
        owner_id: i64,
        key: &AliasKey,
    ) -> anyhow::Result<Option<Identity>> {
        self.inner.find_identity_by_alias(owner_id, key).await
    }

    async fn find_identity_near(
        &self,
        owner_id: i64,
        key: &AliasKey,
    ) -> anyhow::Result<Option<Identity>> {
        self.inner.find_identity_near(owner_id, key).await
    }

    async fn insert_identity(&self, owner_id: i64, key: &AliasKey) -> anyhow::Result<Identity> {
        self.inner.insert_identity(owner_id, key).await
    }

    async fn attach_alias(&self, identity_id: i64, key: &AliasKey) -> anyhow::Result<Identity> {
        self.inner.attach_alias(identity_id, key).await
    }

    async fn update_identity(&self, identity: &Identity) -> anyhow::Result<()> {
        self.inner.update_identity(identity).await
    }

    async fn split_alias(&self, identity_id: i64, alias_id: i64) -> anyhow::Result<Identity> {
        self.inner.split_alias(identity_id, alias_id).await
    }

    async fn insert_job(&self, owner_id: i64, criterion: Criterion) -> anyhow::Result<Job> {
        self.inner.insert_job(owner_id, criterion).await
    }

    async fn update_job(&self, job: &Job) -> anyhow::Result<()> {
        self.inner.update_job(job).await
    }

    async fn get_job(&self, id: JobId) -> anyhow::Result<Option<Job>> {
        self.inner.get_job(id).await
    }

    async fn find_complete_job(
        &self,
        owner_id: i64,
        criterion_text: &str,
    ) -> anyhow::Result<Option<Job>> {
        self.inner.find_complete_job(owner_id, criterion_text).await
    }
}
