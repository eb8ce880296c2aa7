use std::collections::HashSet;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::config::IdentityConfig;

/// Consumer webmail domains. Mail from these is far more likely to be a
/// person than an automated sender, so their aliases get a scoring bonus.
static PERSONAL_DOMAINS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "gmail.com",
        "yahoo.com",
        "hotmail.com",
        "outlook.com",
        "aol.com",
        "msn.com",
        "icloud.com",
    ])
});

pub fn is_personal_domain(address: &str) -> bool {
    let domain = address.split('@').nth(1).unwrap_or(address);
    PERSONAL_DOMAINS.contains(domain)
}

/// Normalized (name, address) pair as observed in source data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AliasKey {
    pub name: String,
    pub address: String,
}

impl AliasKey {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            address: address.trim().to_lowercase(),
        }
    }
}

/// Engagement counters for one alias (or one identity in aggregate).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AliasStats {
    pub total: u64,
    pub unread: u64,
    pub replied: u64,
    pub important: u64,
}

impl AliasStats {
    pub fn read_fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        1.0 - self.unread as f64 / self.total as f64
    }

    pub fn replied_fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.replied as f64 / self.total as f64
    }

    pub fn important_fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.important as f64 / self.total as f64
    }

    /// Heuristic importance of keeping records from this alias around.
    /// Empirically tuned; the personal-domain bonus is the only knob that
    /// moved enough in practice to stay configurable.
    pub fn importance_score(&self, personal: bool, personal_domain_bonus: f64) -> f64 {
        let bonus = if personal { personal_domain_bonus } else { 1.0 };
        (self.read_fraction() + 0.01).sqrt()
            * (self.replied_fraction() + 0.3).powi(2)
            * self.important_fraction()
            * bonus
    }

    /// Expected value of removing this alias's records, used for ranking.
    pub fn value_prop(&self, score: f64) -> f64 {
        let sigmoid = 1.0 / (1.0 + (-score * 100.0).exp());
        (1.0 - sigmoid) * self.total as f64
    }

    pub fn add(&mut self, other: &AliasStats) {
        self.total += other.total;
        self.unread += other.unread;
        self.replied += other.replied;
        self.important += other.important;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub stats: AliasStats,
}

impl Alias {
    pub fn key(&self) -> AliasKey {
        AliasKey::new(&self.name, &self.address)
    }

    pub fn is_personal_domain(&self) -> bool {
        is_personal_domain(&self.address)
    }

    pub fn importance_score(&self, config: &IdentityConfig) -> f64 {
        self.stats
            .importance_score(self.is_personal_domain(), config.personal_domain_bonus)
    }
}

/// A canonical sender/grantee. Owns one or more raw aliases; the invariant
/// upheld by the resolver is that storage never holds two identities for the
/// same (owner, alias) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub owner_id: i64,
    pub aliases: Vec<Alias>,
    /// Aggregate of all alias stats, recomputed whenever aliases change.
    pub stats: AliasStats,
}

impl Identity {
    pub fn primary_alias(&self) -> Option<&Alias> {
        self.aliases.iter().max_by_key(|a| a.stats.total)
    }

    pub fn is_personal_domain(&self) -> bool {
        self.aliases.iter().any(|a| a.is_personal_domain())
    }

    pub fn recompute_stats(&mut self) {
        let mut stats = AliasStats::default();
        for alias in &self.aliases {
            stats.add(&alias.stats);
        }
        self.stats = stats;
    }

    pub fn importance_score(&self, config: &IdentityConfig) -> f64 {
        self.stats
            .importance_score(self.is_personal_domain(), config.personal_domain_bonus)
    }

    pub fn value_prop(&self, config: &IdentityConfig) -> f64 {
        self.stats.value_prop(self.importance_score(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: u64, unread: u64, replied: u64, important: u64) -> AliasStats {
        AliasStats {
            total,
            unread,
            replied,
            important,
        }
    }

    #[test]
    fn test_personal_domain_detection() {
        assert!(is_personal_domain("alice@gmail.com"));
        assert!(is_personal_domain("bob@ICLOUD.com".to_lowercase().as_str()));
        assert!(!is_personal_domain("noreply@bigcorp.com"));
    }

    #[test]
    fn test_importance_score_rewards_engagement() {
        let config = IdentityConfig::default();
        let engaged = stats(10, 0, 5, 8);
        let ignored = stats(100, 95, 0, 0);
        let engaged_score = engaged.importance_score(false, config.personal_domain_bonus);
        let ignored_score = ignored.importance_score(false, config.personal_domain_bonus);
        assert!(engaged_score > ignored_score);
        // A fully-ignored sender scores zero important_fraction
        assert_eq!(ignored_score, 0.0);
    }

    #[test]
    fn test_personal_bonus_multiplies() {
        let s = stats(10, 2, 3, 4);
        let base = s.importance_score(false, 8.0);
        let boosted = s.importance_score(true, 8.0);
        assert!((boosted - base * 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_value_prop_decreases_with_score() {
        let s = stats(50, 40, 0, 1);
        let low = s.value_prop(0.001);
        let high = s.value_prop(1.0);
        assert!(low > high);
        assert!(low <= 50.0);
    }

    #[test]
    fn test_recompute_aggregates_aliases() {
        let mut identity = Identity {
            id: 1,
            owner_id: 1,
            aliases: vec![
                Alias {
                    id: 1,
                    name: "News".to_string(),
                    address: "news@corp.com".to_string(),
                    stats: stats(10, 8, 0, 0),
                },
                Alias {
                    id: 2,
                    name: "Alice".to_string(),
                    address: "alice@corp.com".to_string(),
                    stats: stats(5, 1, 3, 2),
                },
            ],
            stats: AliasStats::default(),
        };
        identity.recompute_stats();
        assert_eq!(identity.stats.total, 15);
        assert_eq!(identity.stats.replied, 3);
        assert_eq!(identity.primary_alias().unwrap().id, 1);
    }
}
