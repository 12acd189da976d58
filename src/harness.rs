// ============================================================================
// Stress Harness
// ============================================================================
//
// Uninitialized -> Seeded -> Running -> Completed
//
// Transitions only move forward. A second run needs a new harness.
//
// ============================================================================

use crate::aggregate::{AggregateResult, ResultAggregator};
use crate::config::HarnessConfig;
use crate::core::{HarnessError, Result};
use crate::increment::increment;
use crate::resource::ResourceConnector;
use crate::retry::RetryPolicy;
use crate::store::{CounterStore, StoreStats};
use crate::worker_pool::WorkerPool;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Value the counter is recreated with before a run.
pub const SEED_VALUE: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    Uninitialized,
    Seeded,
    Running,
    Completed,
}

impl HarnessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Seeded => "seeded",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for HarnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Harness<C: ResourceConnector> {
    connector: Arc<C>,
    pool: WorkerPool,
    policy: RetryPolicy,
    total_units: usize,
    state: HarnessState,
}

impl<C: ResourceConnector> Harness<C> {
    pub fn new(connector: C, pool: WorkerPool, policy: RetryPolicy, total_units: usize) -> Self {
        Self {
            connector: Arc::new(connector),
            pool,
            policy,
            total_units,
            state: HarnessState::Uninitialized,
        }
    }

    pub fn from_config(connector: C, config: &HarnessConfig) -> Self {
        Self::new(
            connector,
            WorkerPool::new(config.concurrency),
            config.retry_policy(),
            config.total_units,
        )
    }

    pub fn state(&self) -> HarnessState {
        self.state
    }

    fn expect_state(&self, expected: HarnessState) -> Result<()> {
        if self.state != expected {
            return Err(HarnessError::InvalidState {
                expected: expected.as_str(),
                found: self.state.as_str(),
            });
        }
        Ok(())
    }

    /// Drop-and-recreate the counter at [`SEED_VALUE`].
    ///
    /// A failed seed leaves the harness uninitialized.
    pub async fn seed(&mut self) -> Result<()> {
        self.expect_state(HarnessState::Uninitialized)?;
        self.connector.reset_counter(SEED_VALUE).await?;
        self.state = HarnessState::Seeded;
        info!(seed = SEED_VALUE, "counter seeded");
        Ok(())
    }

    /// Dispatch every unit, then read the counter and finalize the tally.
    ///
    /// Individual unit failures never fail the run; they are counted.
    pub async fn run(&mut self) -> Result<AggregateResult> {
        self.expect_state(HarnessState::Seeded)?;
        self.state = HarnessState::Running;
        info!(
            units = self.total_units,
            concurrency = self.pool.concurrency(),
            max_attempts = self.policy.max_attempts(),
            "stress run started"
        );

        let started = Instant::now();
        let aggregator = Arc::new(ResultAggregator::new());
        let connector = Arc::clone(&self.connector);
        let policy = self.policy;

        self.pool
            .dispatch(
                self.total_units,
                move |_index| {
                    let connector = Arc::clone(&connector);
                    async move {
                        policy
                            .run(|_attempt| {
                                let connector = Arc::clone(&connector);
                                async move {
                                    let mut handle = connector.connect().await?;
                                    increment(&mut handle).await
                                }
                            })
                            .await
                    }
                },
                Arc::clone(&aggregator),
            )
            .await;

        let final_value = self.connector.read_counter().await?;
        let result = aggregator
            .finalize(final_value)
            .with_elapsed(started.elapsed());
        self.state = HarnessState::Completed;

        info!(
            final_value = result.final_counter_value,
            max_successful = ?result.max_successful_value,
            errors = result.error_count,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "stress run completed"
        );
        Ok(result)
    }

    /// `seed` followed by `run`.
    pub async fn execute(&mut self) -> Result<AggregateResult> {
        self.seed().await?;
        self.run().await
    }
}

/// Outcome of a run against the in-process store
#[derive(Debug, Clone, Serialize)]
pub struct StoreRun {
    #[serde(flatten)]
    pub result: AggregateResult,
    pub store: StoreStats,
}

/// Open the configured store and run one seeded stress pass against it.
pub async fn run_store(config: &HarnessConfig) -> Result<StoreRun> {
    config.validate().map_err(HarnessError::Config)?;
    let store = CounterStore::open(config.store_config())?;
    let mut harness = Harness::from_config(store.connector(&config.cell), config);
    let result = harness.execute().await?;
    Ok(StoreRun {
        result,
        store: store.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::CounterResource;
    use crate::store::StoreConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_state_transitions() {
        let store = CounterStore::in_memory();
        let mut harness = Harness::new(store.connector("counter"), WorkerPool::new(2), RetryPolicy::default(), 5);
        assert_eq!(harness.state(), HarnessState::Uninitialized);

        assert!(matches!(
            harness.run().await,
            Err(HarnessError::InvalidState { expected: "seeded", .. })
        ));

        harness.seed().await.unwrap();
        assert_eq!(harness.state(), HarnessState::Seeded);
        assert!(harness.seed().await.is_err());

        let result = harness.run().await.unwrap();
        assert_eq!(harness.state(), HarnessState::Completed);
        assert_eq!(result.final_counter_value, 5);

        assert!(harness.run().await.is_err());
        assert!(harness.seed().await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_seeding_resets_previous_value() {
        let store = CounterStore::in_memory();
        store.reset_cell("counter", 500).await.unwrap();

        let mut harness = Harness::new(store.connector("counter"), WorkerPool::new(4), RetryPolicy::default(), 20);
        let result = harness.execute().await.unwrap();
        assert_eq!(result.final_counter_value, 20);
        assert_eq!(result.max_successful_value, Some(20));
    }

    #[tokio::test]
    async fn test_run_store_with_defaults_scaled_down() {
        let config = HarnessConfig::default().total_units(50).concurrency(5);
        let run = run_store(&config).await.unwrap();
        assert_eq!(run.result.final_counter_value, 50);
        assert_eq!(run.result.error_count, 0);
        assert_eq!(run.store.commits, 50);
    }

    #[tokio::test]
    async fn test_run_store_rejects_invalid_config() {
        let config = HarnessConfig::default().max_attempts(0);
        assert!(matches!(run_store(&config).await, Err(HarnessError::Config(_))));
    }

    /// Resource whose handles are always busy.
    struct AlwaysBusy {
        begins: Arc<AtomicU32>,
        seeds: AtomicUsize,
        fail_seed: bool,
    }

    struct BusyHandle {
        begins: Arc<AtomicU32>,
    }

    #[async_trait]
    impl CounterResource for BusyHandle {
        async fn begin_exclusive(&mut self) -> Result<()> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            Err(HarnessError::Busy { waited: Duration::ZERO })
        }
        async fn read(&mut self) -> Result<i64> {
            unreachable!("never inside a transaction")
        }
        async fn write(&mut self, _value: i64) -> Result<()> {
            unreachable!("never inside a transaction")
        }
        async fn commit(&mut self) -> Result<()> {
            unreachable!("never inside a transaction")
        }
        async fn rollback(&mut self) -> Result<()> {
            Ok(())
        }
        fn in_transaction(&self) -> bool {
            false
        }
    }

    #[async_trait]
    impl ResourceConnector for AlwaysBusy {
        type Handle = BusyHandle;

        async fn connect(&self) -> Result<BusyHandle> {
            Ok(BusyHandle {
                begins: Arc::clone(&self.begins),
            })
        }
        async fn reset_counter(&self, _value: i64) -> Result<()> {
            self.seeds.fetch_add(1, Ordering::SeqCst);
            if self.fail_seed {
                return Err(HarnessError::Connection("store unavailable".into()));
            }
            Ok(())
        }
        async fn read_counter(&self) -> Result<i64> {
            Ok(SEED_VALUE)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_always_busy_units_fail_after_budget() {
        let begins = Arc::new(AtomicU32::new(0));
        let resource = AlwaysBusy {
            begins: Arc::clone(&begins),
            seeds: AtomicUsize::new(0),
            fail_seed: false,
        };
        let mut harness = Harness::new(resource, WorkerPool::new(3), RetryPolicy::new(3), 10);

        let result = harness.execute().await.unwrap();
        assert_eq!(begins.load(Ordering::SeqCst), 30);
        assert_eq!(result.error_count, 10);
        assert_eq!(result.exhausted_units, 10);
        assert_eq!(result.max_successful_value, None);
        assert_eq!(result.final_counter_value, SEED_VALUE);
    }

    #[tokio::test]
    async fn test_failed_seed_fails_the_run() {
        let resource = AlwaysBusy {
            begins: Arc::new(AtomicU32::new(0)),
            seeds: AtomicUsize::new(0),
            fail_seed: true,
        };
        let mut harness = Harness::new(resource, WorkerPool::new(1), RetryPolicy::default(), 1);

        assert!(matches!(harness.execute().await, Err(HarnessError::Connection(_))));
        assert_eq!(harness.state(), HarnessState::Uninitialized);
    }

    #[tokio::test]
    async fn test_zero_units_completes_with_seed() {
        let store = CounterStore::open(StoreConfig::memory()).unwrap();
        let mut harness = Harness::new(store.connector("counter"), WorkerPool::new(1), RetryPolicy::default(), 0);
        let result = harness.execute().await.unwrap();
        assert_eq!(result.final_counter_value, SEED_VALUE);
        assert_eq!(result.total_units(), 0);
    }
}
