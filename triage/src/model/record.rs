use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RecordId = i64;

/// A candidate record: a mail thread, a grant award, anything with an owner
/// and a blob of text a classifier can read.
///
/// The heavy content blob is deliberately not part of this struct; it stays
/// behind `Storage::load_content` and is only fetched for records that reach
/// the classification stage. Records are never physically deleted; exclusion
/// is a flag so re-runs stay idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub owner_id: i64,
    /// Data source the record was ingested from.
    pub source: String,
    /// Owning agency (grants) or sender domain (mail).
    pub agency: Option<String>,
    pub category: Option<String>,
    pub posted_at: DateTime<Utc>,
    pub amount: Option<f64>,
    /// Boolean facets derived at ingest time.
    pub facets: BTreeMap<String, bool>,
    /// Raw alias of whoever sent/owns this record, as observed in the source.
    pub alias_name: Option<String>,
    pub alias_address: Option<String>,
    pub excluded: bool,
}

/// Structural pre-filter. Every present field narrows the match (AND
/// semantics); an empty filter matches everything not excluded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub posted_after: Option<DateTime<Utc>>,
    pub posted_before: Option<DateTime<Utc>>,
    /// Exact, case-insensitive agency name.
    pub agency: Option<String>,
    /// Substring match on the source name.
    pub source: Option<String>,
    pub category: Option<String>,
    pub amount_min: Option<f64>,
    pub amount_max: Option<f64>,
    /// Each entry requires the record facet to be present with this value.
    #[serde(default)]
    pub facets: BTreeMap<String, bool>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        *self == RecordFilter::default()
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(after) = self.posted_after {
            if record.posted_at < after {
                return false;
            }
        }
        if let Some(before) = self.posted_before {
            if record.posted_at > before {
                return false;
            }
        }
        if let Some(agency) = &self.agency {
            match &record.agency {
                Some(a) if a.eq_ignore_ascii_case(agency) => {}
                _ => return false,
            }
        }
        if let Some(source) = &self.source {
            if !record
                .source
                .to_lowercase()
                .contains(&source.to_lowercase())
            {
                return false;
            }
        }
        if let Some(category) = &self.category {
            match &record.category {
                Some(c) if c == category => {}
                _ => return false,
            }
        }
        if let Some(min) = self.amount_min {
            match record.amount {
                Some(amount) if amount >= min => {}
                _ => return false,
            }
        }
        if let Some(max) = self.amount_max {
            match record.amount {
                Some(amount) if amount <= max => {}
                _ => return false,
            }
        }
        for (facet, wanted) in &self.facets {
            if record.facets.get(facet) != Some(wanted) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record {
            id: 1,
            owner_id: 1,
            source: "NSF Awards 2024".to_string(),
            agency: Some("NSF".to_string()),
            category: Some("research".to_string()),
            posted_at: Utc::now(),
            amount: Some(50_000.0),
            facets: BTreeMap::from([("hard_science".to_string(), true)]),
            alias_name: None,
            alias_address: None,
            excluded: false,
        }
    }

    #[test]
    fn test_empty_filter_matches() {
        assert!(RecordFilter::default().matches(&record()));
        assert!(RecordFilter::default().is_empty());
    }

    #[test]
    fn test_fields_narrow_monotonically() {
        let r = record();

        let mut filter = RecordFilter {
            agency: Some("nsf".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&r));

        filter.source = Some("awards".to_string());
        assert!(filter.matches(&r));

        filter.amount_min = Some(100_000.0);
        assert!(!filter.matches(&r));
    }

    #[test]
    fn test_facet_must_match_value() {
        let r = record();
        let filter = RecordFilter {
            facets: BTreeMap::from([("hard_science".to_string(), false)]),
            ..Default::default()
        };
        assert!(!filter.matches(&r));

        let filter = RecordFilter {
            facets: BTreeMap::from([("carbon".to_string(), true)]),
            ..Default::default()
        };
        // Facet absent on the record is not a match
        assert!(!filter.matches(&r));
    }
}
