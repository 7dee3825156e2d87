//! Orchestration settings.

use std::time::Duration;

use chrono::{DateTime, Utc};

use domain::DEFAULT_SAGA_MAX_RETRIES;

/// Tunables for the orchestration engine.
///
/// Passed explicitly to the services that need them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationConfig {
    /// Retry budget given to newly created sagas.
    pub max_retry_attempts: u32,

    /// A non-terminal saga older than this is reported as stuck.
    pub stuck_saga_threshold: Duration,

    /// How long a compensation claim holds before another caller may take
    /// the step over.
    pub compensation_lease: Duration,

    /// How many times a mutation reloads and re-applies after losing an
    /// optimistic concurrency race.
    pub max_conflict_retries: u32,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: DEFAULT_SAGA_MAX_RETRIES,
            stuck_saga_threshold: Duration::from_secs(30 * 60),
            compensation_lease: Duration::from_secs(5 * 60),
            max_conflict_retries: 3,
        }
    }
}

impl OrchestrationConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_retry_attempts: env_parse("SAGA_MAX_RETRY_ATTEMPTS")
                .unwrap_or(defaults.max_retry_attempts),
            stuck_saga_threshold: env_parse("SAGA_STUCK_THRESHOLD_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stuck_saga_threshold),
            compensation_lease: env_parse("SAGA_COMPENSATION_LEASE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.compensation_lease),
            max_conflict_retries: env_parse("SAGA_MAX_CONFLICT_RETRIES")
                .unwrap_or(defaults.max_conflict_retries),
        }
    }

    /// Returns the start-time cutoff before which active sagas count as stuck.
    pub fn stuck_cutoff(&self) -> DateTime<Utc> {
        cutoff(self.stuck_saga_threshold)
    }

    /// Returns the time before which a compensation claim has lapsed.
    pub fn lease_cutoff(&self) -> DateTime<Utc> {
        cutoff(self.compensation_lease)
    }
}

fn cutoff(age: Duration) -> DateTime<Utc> {
    let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_sub_signed(age)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
