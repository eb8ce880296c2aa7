//! Source provider seam.
//!
//! A provider is where records come from before they land in storage: a
//! mailbox API, a government data feed. The pipeline only needs paginated
//! id listing and fetch-by-id for full content; the source-specific payload
//! parsing happens elsewhere. Providers are often rate limited themselves,
//! so every call here is routed through the shared `RateLimitedClient`.

use async_trait::async_trait;

use crate::error::AppResult;
use crate::rate_limit::RateLimitedClient;

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub query: Option<String>,
    pub page_token: Option<String>,
    pub max_results: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ListPage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn list_ids(&self, options: ListOptions) -> AppResult<ListPage>;

    async fn fetch_content(&self, id: &str) -> AppResult<Option<String>>;
}

/// Page through a provider listing until `max_items` ids are collected or
/// the pages run out.
pub async fn list_all_ids(
    provider: &dyn Provider,
    client: &RateLimitedClient,
    query: Option<String>,
    max_items: usize,
) -> AppResult<Vec<String>> {
    let mut ids = Vec::new();
    let mut next_page_token: Option<String> = None;

    loop {
        let options = ListOptions {
            query: query.clone(),
            page_token: next_page_token.clone(),
            max_results: None,
        };
        let page = client.execute(|| provider.list_ids(options.clone())).await?;

        ids.extend(page.ids);
        next_page_token = page.next_page_token;
        if next_page_token.is_none() || ids.len() >= max_items {
            break;
        }
    }

    ids.truncate(max_items);
    Ok(ids)
}

/// List up to `overfetch_factor * needed` ids, then subsample down to
/// `needed`. The over-fetch keeps the sample representative of the source
/// rather than of whatever ordering the provider returns pages in.
pub async fn collect_candidate_ids(
    provider: &dyn Provider,
    client: &RateLimitedClient,
    query: Option<String>,
    needed: usize,
    overfetch_factor: usize,
) -> AppResult<Vec<String>> {
    let mut ids = list_all_ids(provider, client, query, needed * overfetch_factor).await?;

    if ids.len() > needed {
        let picked = rand::seq::index::sample(&mut rand::rng(), ids.len(), needed);
        let mut sampled = Vec::with_capacity(needed);
        for index in picked.iter() {
            sampled.push(std::mem::take(&mut ids[index]));
        }
        return Ok(sampled);
    }

    Ok(ids)
}
