use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::config::IdentityConfig;
use crate::error::AppResult;
use crate::model::{AliasKey, Identity};
use crate::store::Storage;

/// One engagement observation for an alias, typically derived from the
/// labels on a single thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Observation {
    pub unread: bool,
    pub replied: bool,
    pub important: bool,
}

impl Observation {
    /// Build an observation from a record's facet flags, if it carries any
    /// of the engagement facets. Grant-style records usually carry none.
    pub fn from_facets(facets: &BTreeMap<String, bool>) -> Option<Self> {
        let unread = facets.get("unread").copied();
        let replied = facets.get("replied").copied();
        let important = facets.get("important").copied();
        if unread.is_none() && replied.is_none() && important.is_none() {
            return None;
        }
        Some(Self {
            unread: unread.unwrap_or(false),
            replied: replied.unwrap_or(false),
            important: important.unwrap_or(false),
        })
    }
}

/// An identity with its derived ranking numbers.
#[derive(Debug, Clone)]
pub struct RankedIdentity {
    pub identity: Identity,
    pub importance_score: f64,
    pub value_prop: f64,
}

/// Resolves aliases to identity ids with at-most-once creation.
///
/// Lookups are served from a cache of confirmed results and take no lock.
/// Creation is serialized on one coarse mutex: after a cache miss the
/// resolver re-queries storage under the lock, so the worker that loses the
/// race finds the row the winner just inserted instead of creating a twin.
/// Creation is rare relative to lookups, so the serialization is cheap.
pub struct IdentityResolver {
    storage: Arc<dyn Storage>,
    config: IdentityConfig,
    cache: RwLock<HashMap<(i64, AliasKey), i64>>,
    create_lock: Mutex<()>,
}

impl IdentityResolver {
    pub fn new(storage: Arc<dyn Storage>, config: IdentityConfig) -> Self {
        Self {
            storage,
            config,
            cache: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    /// Resolve an alias to its identity id, creating the identity if this
    /// alias has never been seen for the owner.
    pub async fn resolve(&self, owner_id: i64, name: &str, address: &str) -> AppResult<i64> {
        let key = AliasKey::new(name, address);

        if let Some(id) = self.cache.read().unwrap().get(&(owner_id, key.clone())) {
            return Ok(*id);
        }

        let _guard = self.create_lock.lock().await;

        // Another worker may have inserted the alias between our cache miss
        // and taking the lock; storage is the source of truth here.
        if let Some(existing) = self.storage.find_identity_by_alias(owner_id, &key).await? {
            self.remember(owner_id, &key, existing.id);
            return Ok(existing.id);
        }

        let identity = match self.storage.find_identity_near(owner_id, &key).await? {
            Some(near) => self.storage.attach_alias(near.id, &key).await?,
            None => {
                tracing::info!("Creating new identity: {} <{}>", key.name, key.address);
                match self.storage.insert_identity(owner_id, &key).await {
                    Ok(identity) => identity,
                    Err(err) => {
                        // Insert can still conflict with writers outside this
                        // process; the row that won is the answer.
                        match self.storage.find_identity_by_alias(owner_id, &key).await? {
                            Some(existing) => {
                                tracing::warn!(
                                    "Identity insert conflicted, reusing {}: {err}",
                                    existing.id
                                );
                                existing
                            }
                            None => return Err(err.into()),
                        }
                    }
                }
            }
        };

        self.remember(owner_id, &key, identity.id);
        Ok(identity.id)
    }

    /// Resolve and fold one engagement observation into the alias stats.
    pub async fn observe(
        &self,
        owner_id: i64,
        name: &str,
        address: &str,
        observation: Observation,
    ) -> AppResult<i64> {
        let identity_id = self.resolve(owner_id, name, address).await?;
        let key = AliasKey::new(name, address);

        // Stats writes share the creation lock; they are read-modify-write.
        let _guard = self.create_lock.lock().await;
        let mut identity = self
            .storage
            .get_identity(identity_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("identity {identity_id} disappeared"))?;

        if let Some(alias) = identity.aliases.iter_mut().find(|a| &a.key() == &key) {
            alias.stats.total += 1;
            if observation.unread {
                alias.stats.unread += 1;
            }
            if observation.replied {
                alias.stats.replied += 1;
            }
            if observation.important {
                alias.stats.important += 1;
            }
        }
        identity.recompute_stats();
        self.storage.update_identity(&identity).await?;
        Ok(identity_id)
    }

    /// Recompute aggregates for an owner's identities and split out any
    /// alias whose importance dwarfs its identity's aggregate score. Returns
    /// the ids of identities created by splits.
    pub async fn recompute(&self, owner_id: i64) -> AppResult<Vec<i64>> {
        let _guard = self.create_lock.lock().await;
        let mut created = Vec::new();

        for identity in self.storage.list_identities(owner_id).await? {
            let mut identity = identity;
            identity.recompute_stats();
            self.storage.update_identity(&identity).await?;

            if identity.aliases.len() < 2 {
                continue;
            }
            let aggregate = identity.importance_score(&self.config);
            let eligible = identity.aliases.iter().find(|alias| {
                let score = alias.importance_score(&self.config);
                score > self.config.split_min_score
                    && score > aggregate * self.config.split_multiplier
            });

            if let Some(alias) = eligible {
                tracing::warn!(
                    "Splitting {}: {} vs aggregate {}",
                    alias.address,
                    alias.importance_score(&self.config),
                    aggregate
                );
                let alias_key = alias.key();
                let split = self.storage.split_alias(identity.id, alias.id).await?;
                self.remember(owner_id, &alias_key, split.id);
                created.push(split.id);
            }
        }

        Ok(created)
    }

    /// Identities ranked by the expected value of acting on them.
    pub async fn ranked(&self, owner_id: i64) -> AppResult<Vec<RankedIdentity>> {
        let mut ranked: Vec<RankedIdentity> = self
            .storage
            .list_identities(owner_id)
            .await?
            .into_iter()
            .map(|identity| {
                let importance_score = identity.importance_score(&self.config);
                let value_prop = identity.value_prop(&self.config);
                RankedIdentity {
                    identity,
                    importance_score,
                    value_prop,
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.value_prop
                .partial_cmp(&a.value_prop)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(ranked)
    }

    fn remember(&self, owner_id: i64, key: &AliasKey, identity_id: i64) {
        self.cache
            .write()
            .unwrap()
            .insert((owner_id, key.clone()), identity_id);
    }
}
