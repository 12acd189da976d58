// ============================================================================
// counterstress Library
// ============================================================================
//
// Many workers increment one shared counter through exclusive transactions.
// Transient "busy" failures are retried under a bounded policy; the run
// reports the highest committed value, the final counter value and the
// number of units that never got their increment in.
//
// ============================================================================

pub mod aggregate;
pub mod config;
pub mod core;
pub mod harness;
pub mod http;
pub mod increment;
pub mod resource;
pub mod retry;
pub mod store;
pub mod worker_pool;

pub use aggregate::{AggregateResult, OutcomeSink, ResultAggregator};
pub use config::{DEFAULT_TOTAL_UNITS, HarnessConfig};
pub use crate::core::{AttemptOutcome, ErrorKind, HarnessError, IncrementAttempt, Result, WorkerOutcome};
pub use harness::{Harness, HarnessState, SEED_VALUE, StoreRun, run_store};
pub use http::{HttpCounterClient, HttpStressConfig, HttpStressReport, run_http_stress};
pub use increment::increment;
pub use resource::{CounterResource, ResourceConnector};
pub use retry::{Backoff, RetryPolicy, Retrying};
pub use store::{
    CounterStore, DurabilityMode, StorageLocation, StoreConfig, StoreConnection, StoreConnector,
    StoreStats,
};
pub use worker_pool::{DEFAULT_CONCURRENCY, WorkerPool};
