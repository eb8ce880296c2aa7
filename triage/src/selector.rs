use std::sync::Arc;

use crate::config::SelectorConfig;
use crate::error::{AppError, AppResult};
use crate::model::{Record, RecordFilter};
use crate::store::Storage;

/// Output of the selection phase: a bounded, possibly-sampled candidate set.
#[derive(Debug)]
pub struct Selection {
    pub records: Vec<Record>,
    pub true_count: u64,
    pub sampling_fraction: f64,
}

/// Runs the structural pre-filter and bounds the fan-out cost.
///
/// When more records match than the cap allows, a uniform random sample of
/// exactly `cap` records is taken and the resulting fraction recorded, so a
/// caller can still extrapolate totals from partial coverage.
pub struct CandidateSelector {
    storage: Arc<dyn Storage>,
    cap: usize,
}

impl CandidateSelector {
    pub fn new(storage: Arc<dyn Storage>, config: &SelectorConfig) -> Self {
        Self {
            storage,
            cap: config.candidate_cap,
        }
    }

    pub async fn select(&self, filter: &RecordFilter) -> AppResult<Selection> {
        let records = self
            .storage
            .list_records(filter)
            .await
            .map_err(|e| AppError::Selection(e.to_string()))?;
        let true_count = records.len() as u64;

        if records.len() <= self.cap {
            return Ok(Selection {
                records,
                true_count,
                sampling_fraction: 1.0,
            });
        }

        tracing::info!(
            "Sampling down from {} to {} records",
            true_count,
            self.cap
        );
        let records = sample_uniform(records, self.cap);
        Ok(Selection {
            records,
            true_count,
            sampling_fraction: self.cap as f64 / true_count as f64,
        })
    }
}

/// Uniform sample of `amount` items, preserving the input ordering.
fn sample_uniform(records: Vec<Record>, amount: usize) -> Vec<Record> {
    let mut picked = rand::seq::index::sample(&mut rand::rng(), records.len(), amount).into_vec();
    picked.sort_unstable();

    let mut picked = picked.into_iter().peekable();
    records
        .into_iter()
        .enumerate()
        .filter_map(|(i, record)| {
            if picked.peek() == Some(&i) {
                picked.next();
                Some(record)
            } else {
                None
            }
        })
        .collect()
}
