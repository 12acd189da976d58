use crate::core::DEFAULT_CELL;
use crate::retry::{Backoff, DEFAULT_MAX_ATTEMPTS, RetryPolicy};
use crate::store::{DurabilityMode, StorageLocation, StoreConfig};
use crate::worker_pool::DEFAULT_CONCURRENCY;
use std::time::Duration;

pub const DEFAULT_TOTAL_UNITS: usize = 1000;

/// Stress run configuration
///
/// Defaults reproduce the canonical scenario: 1000 increments from
/// 10 concurrent workers, three attempts each, 60s busy timeout.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Store location, or `:memory:`
    pub storage_location: StorageLocation,

    /// Wait budget for the exclusive section
    pub busy_wait_timeout: Duration,

    pub durability_mode: DurabilityMode,

    /// Units in flight at once
    pub concurrency: usize,

    /// Units dispatched in total
    pub total_units: usize,

    /// Tries per unit, first one included
    pub max_attempts: u32,

    pub backoff: Backoff,

    /// Upper bound of random extra delay between attempts
    pub jitter: Option<Duration>,

    /// Cell being incremented
    pub cell: String,
}

impl HarnessConfig {
    pub fn new(storage_location: StorageLocation) -> Self {
        Self {
            storage_location,
            busy_wait_timeout: Duration::from_secs(60),
            durability_mode: DurabilityMode::Relaxed,
            concurrency: DEFAULT_CONCURRENCY,
            total_units: DEFAULT_TOTAL_UNITS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::Immediate,
            jitter: None,
            cell: DEFAULT_CELL.to_string(),
        }
    }

    pub fn busy_wait_timeout(mut self, timeout: Duration) -> Self {
        self.busy_wait_timeout = timeout;
        self
    }

    pub fn durability_mode(mut self, mode: DurabilityMode) -> Self {
        self.durability_mode = mode;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn total_units(mut self, total: usize) -> Self {
        self.total_units = total;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn jitter(mut self, max_extra: Duration) -> Self {
        self.jitter = Some(max_extra);
        self
    }

    pub fn cell(mut self, cell: &str) -> Self {
        self.cell = cell.to_string();
        self
    }

    /// Store settings derived from this run
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.storage_location.clone())
            .busy_timeout(self.busy_wait_timeout)
            .durability(self.durability_mode)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_attempts).backoff(self.backoff);
        match self.jitter {
            Some(max_extra) => policy.jitter(max_extra),
            None => policy,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be > 0".to_string());
        }

        if self.max_attempts == 0 {
            return Err("max_attempts must be > 0".to_string());
        }

        if self.cell.is_empty() {
            return Err("Cell name cannot be empty".to_string());
        }

        self.store_config().validate()
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new(StorageLocation::Memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_canonical_scenario() {
        let config = HarnessConfig::default();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.total_units, 1000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.busy_wait_timeout, Duration::from_secs(60));
        assert_eq!(config.durability_mode, DurabilityMode::Relaxed);
        assert_eq!(config.cell, "counter");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        assert!(HarnessConfig::default().concurrency(0).validate().is_err());
        assert!(HarnessConfig::default().max_attempts(0).validate().is_err());
        assert!(HarnessConfig::default().cell("").validate().is_err());
        assert!(HarnessConfig::default().total_units(0).validate().is_ok());
    }

    #[test]
    fn test_derived_store_and_retry_settings() {
        let config = HarnessConfig::new(StorageLocation::parse("run/counter.log"))
            .busy_wait_timeout(Duration::ZERO)
            .durability_mode(DurabilityMode::Full)
            .max_attempts(5)
            .backoff(Backoff::exponential());

        let store = config.store_config();
        assert_eq!(store.busy_timeout, Duration::ZERO);
        assert_eq!(store.durability, DurabilityMode::Full);
        assert!(!store.location.is_memory());

        assert_eq!(config.retry_policy().max_attempts(), 5);
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::new(5).backoff(Backoff::exponential())
        );
    }
}
