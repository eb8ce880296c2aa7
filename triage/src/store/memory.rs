use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::model::{
    Alias, AliasKey, AliasStats, Criterion, Identity, Job, JobId, JobStatus, Record, RecordFilter,
    RecordId,
};

use super::Storage;

#[derive(Default)]
struct Inner {
    records: BTreeMap<RecordId, Record>,
    contents: HashMap<RecordId, String>,
    identities: BTreeMap<i64, Identity>,
    jobs: BTreeMap<JobId, Job>,
    next_identity_id: i64,
    next_alias_id: i64,
    next_job_id: i64,
}

/// In-memory `Storage`. One mutex around everything; it exists for tests
/// and for embedders running without a database, not for throughput.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one record and its content blob.
    pub fn insert_record(&self, record: Record, content: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.contents.insert(record.id, content.into());
        inner.records.insert(record.id, record);
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    pub fn identity_count(&self) -> usize {
        self.inner.lock().unwrap().identities.len()
    }
}

fn matching(inner: &Inner, filter: &RecordFilter) -> Vec<Record> {
    let mut out: Vec<Record> = inner
        .records
        .values()
        .filter(|r| !r.excluded && filter.matches(r))
        .cloned()
        .collect();
    // Amount-descending keeps the most significant records first when a
    // consumer truncates; ties break on id for a stable order.
    out.sort_by(|a, b| {
        b.amount
            .unwrap_or(0.0)
            .partial_cmp(&a.amount.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    out
}

#[async_trait]
impl Storage for MemoryStore {
    async fn count_records(&self, filter: &RecordFilter) -> anyhow::Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(matching(&inner, filter).len() as u64)
    }

    async fn list_records(&self, filter: &RecordFilter) -> anyhow::Result<Vec<Record>> {
        let inner = self.inner.lock().unwrap();
        Ok(matching(&inner, filter))
    }

    async fn load_content(&self, id: RecordId) -> anyhow::Result<Option<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.contents.get(&id).cloned())
    }

    async fn set_excluded(&self, id: RecordId, excluded: bool) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no such record: {id}"))?;
        record.excluded = excluded;
        Ok(())
    }

    async fn get_identity(&self, id: i64) -> anyhow::Result<Option<Identity>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.identities.get(&id).cloned())
    }

    async fn list_identities(&self, owner_id: i64) -> anyhow::Result<Vec<Identity>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .identities
            .values()
            .filter(|i| i.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn find_identity_by_alias(
        &self,
        owner_id: i64,
        key: &AliasKey,
    ) -> anyhow::Result<Option<Identity>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .identities
            .values()
            .find(|i| i.owner_id == owner_id && i.aliases.iter().any(|a| &a.key() == key))
            .cloned())
    }

    async fn find_identity_near(
        &self,
        owner_id: i64,
        key: &AliasKey,
    ) -> anyhow::Result<Option<Identity>> {
        let inner = self.inner.lock().unwrap();
        // Address match is the stronger signal; fall back to display name.
        let by_address = inner.identities.values().find(|i| {
            i.owner_id == owner_id && i.aliases.iter().any(|a| a.key().address == key.address)
        });
        if let Some(found) = by_address {
            return Ok(Some(found.clone()));
        }
        Ok(inner
            .identities
            .values()
            .find(|i| {
                i.owner_id == owner_id
                    && !key.name.is_empty()
                    && i.aliases.iter().any(|a| a.name == key.name)
            })
            .cloned())
    }

    async fn insert_identity(&self, owner_id: i64, key: &AliasKey) -> anyhow::Result<Identity> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner
            .identities
            .values()
            .any(|i| i.owner_id == owner_id && i.aliases.iter().any(|a| &a.key() == key));
        if duplicate {
            return Err(anyhow!(
                "alias already owned: {} <{}>",
                key.name,
                key.address
            ));
        }

        inner.next_identity_id += 1;
        inner.next_alias_id += 1;
        let identity = Identity {
            id: inner.next_identity_id,
            owner_id,
            aliases: vec![Alias {
                id: inner.next_alias_id,
                name: key.name.clone(),
                address: key.address.clone(),
                stats: AliasStats::default(),
            }],
            stats: AliasStats::default(),
        };
        inner.identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn attach_alias(&self, identity_id: i64, key: &AliasKey) -> anyhow::Result<Identity> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_alias_id += 1;
        let alias_id = inner.next_alias_id;
        let identity = inner
            .identities
            .get_mut(&identity_id)
            .ok_or_else(|| anyhow!("no such identity: {identity_id}"))?;
        identity.aliases.push(Alias {
            id: alias_id,
            name: key.name.clone(),
            address: key.address.clone(),
            stats: AliasStats::default(),
        });
        Ok(identity.clone())
    }

    async fn update_identity(&self, identity: &Identity) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.identities.contains_key(&identity.id) {
            return Err(anyhow!("no such identity: {}", identity.id));
        }
        inner.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn split_alias(&self, identity_id: i64, alias_id: i64) -> anyhow::Result<Identity> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_identity_id += 1;
        let new_id = inner.next_identity_id;

        let identity = inner
            .identities
            .get_mut(&identity_id)
            .ok_or_else(|| anyhow!("no such identity: {identity_id}"))?;
        let position = identity
            .aliases
            .iter()
            .position(|a| a.id == alias_id)
            .ok_or_else(|| anyhow!("identity {identity_id} has no alias {alias_id}"))?;
        if identity.aliases.len() < 2 {
            return Err(anyhow!("cannot split the only alias of {identity_id}"));
        }

        let alias = identity.aliases.remove(position);
        identity.recompute_stats();
        let owner_id = identity.owner_id;

        let mut split = Identity {
            id: new_id,
            owner_id,
            aliases: vec![alias],
            stats: AliasStats::default(),
        };
        split.recompute_stats();
        inner.identities.insert(split.id, split.clone());
        Ok(split)
    }

    async fn insert_job(&self, owner_id: i64, criterion: Criterion) -> anyhow::Result<Job> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_job_id += 1;
        let job = Job::new(inner.next_job_id, owner_id, criterion);
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update_job(&self, job: &Job) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.jobs.get(&job.id) {
            None => Err(anyhow!("no such job: {}", job.id)),
            Some(current) if current.is_terminal() => {
                // Terminal jobs never mutate again; late checkpoints from a
                // racing runner are dropped.
                tracing::warn!(
                    "Ignoring write to terminal job {} ({} -> {})",
                    job.id,
                    current.status,
                    job.status
                );
                Ok(())
            }
            Some(_) => {
                inner.jobs.insert(job.id, job.clone());
                Ok(())
            }
        }
    }

    async fn get_job(&self, id: JobId) -> anyhow::Result<Option<Job>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.jobs.get(&id).cloned())
    }

    async fn find_complete_job(
        &self,
        owner_id: i64,
        criterion_text: &str,
    ) -> anyhow::Result<Option<Job>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .values()
            .find(|j| {
                j.owner_id == owner_id
                    && j.status == JobStatus::Complete
                    && j.criterion_text == criterion_text
            })
            .cloned())
    }
}
