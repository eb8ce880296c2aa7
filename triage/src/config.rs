use config::{Config, ConfigError};
use serde::Deserialize;

/// Candidate selection limits.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorConfig {
    /// Hard cap on candidates per job. Above this the selector samples.
    pub candidate_cap: usize,
    /// When listing ids from a provider, fetch up to this multiple of the
    /// needed count before subsampling.
    pub overfetch_factor: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            candidate_cap: 1200,
            overfetch_factor: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub rate_limit_per_sec: usize,
    pub refill_interval_ms: usize,
    pub refill_amount: usize,
    /// Total attempts for a call that keeps getting rate limited.
    pub max_attempts: u32,
    /// Backoff grows linearly: base, base + step, base + 2*step, ...
    pub backoff_base_secs: u64,
    pub backoff_step_secs: u64,
    /// Per-call timeout, distinct from both the per-task and job deadlines.
    pub call_timeout_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_sec: 200,
            refill_interval_ms: 50,
            refill_amount: 10,
            max_attempts: 5,
            backoff_base_secs: 30,
            backoff_step_secs: 10,
            call_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Bounded number of in-flight classification tasks.
    pub max_concurrency: usize,
    /// Per-task deadline; tasks exceeding it are excluded, not retried.
    pub task_timeout_secs: u64,
    /// Persist accumulated results after every N completed tasks.
    pub checkpoint_every: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 200,
            task_timeout_secs: 12,
            checkpoint_every: 40,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Job-level deadline, checked cooperatively at commit points and polls.
    pub timeout_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self { timeout_secs: 75 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// An alias is split out when its importance exceeds the identity's
    /// aggregate by this multiple.
    pub split_multiplier: f64,
    /// ...and its own score is above this floor.
    pub split_min_score: f64,
    /// Multiplier applied to aliases on consumer webmail domains.
    pub personal_domain_bonus: f64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            split_multiplier: 5.0,
            split_min_score: 1.0,
            personal_domain_bonus: 8.0,
        }
    }
}

/// Connection details for the external reasoning service.
#[derive(Debug, Clone, Deserialize)]
pub struct ReasonerConfig {
    pub endpoint: String,
    pub key: String,
    /// Model used for per-record classification.
    pub model: String,
    /// Larger model used to parse a free-text criterion into a filter.
    pub parse_model: String,
    pub temperature: f64,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.mistral.ai/v1/chat/completions".to_string(),
            key: String::new(),
            model: "mistral-small-latest".to_string(),
            parse_model: "mistral-large-latest".to_string(),
            temperature: 0.0,
        }
    }
}

/// Top-level pipeline configuration.
///
/// Deliberately not a global: every component takes its section by value so
/// tests can build isolated instances with different knobs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub reasoner: ReasonerConfig,
}

impl PipelineConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        builder.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_carry_tuned_constants() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.selector.candidate_cap, 1200);
        assert_eq!(cfg.classifier.task_timeout_secs, 12);
        assert_eq!(cfg.classifier.checkpoint_every, 40);
        assert_eq!(cfg.job.timeout_secs, 75);
        assert_eq!(cfg.rate_limit.max_attempts, 5);
        assert_eq!(cfg.rate_limit.backoff_base_secs, 30);
        assert_eq!(cfg.identity.split_multiplier, 5.0);
        assert_eq!(cfg.identity.personal_domain_bonus, 8.0);
    }

    #[test]
    fn test_partial_toml_overlays_defaults() {
        let toml = r#"
            [classifier]
            max_concurrency = 8
            task_timeout_secs = 2
            checkpoint_every = 5

            [job]
            timeout_secs = 10
        "#;
        let cfg: PipelineConfig = toml::from_str(toml).expect("valid toml");
        assert_eq!(cfg.classifier.max_concurrency, 8);
        assert_eq!(cfg.job.timeout_secs, 10);
        // Untouched sections keep their defaults
        assert_eq!(cfg.selector.candidate_cap, 1200);
        assert_eq!(cfg.rate_limit.max_attempts, 5);
    }
}
