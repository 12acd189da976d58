//! Order-independent tally of worker outcomes.

use crate::core::{HarnessError, WorkerOutcome};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Receives exactly one outcome per dispatched unit, possibly from many tasks at once.
pub trait OutcomeSink<T>: Send + Sync + 'static {
    fn on_outcome(&self, outcome: Result<T, HarnessError>);
}

/// Lock-free accumulator of worker outcomes
///
/// Every counter is an atomic, so concurrent `on_outcome` calls never lose updates.
#[derive(Debug)]
pub struct ResultAggregator {
    successes: AtomicU64,
    /// `i64::MIN` until the first valued success arrives
    max_value: AtomicI64,
    valued_successes: AtomicU64,
    exhausted: AtomicU64,
    fatal: AtomicU64,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            successes: AtomicU64::new(0),
            max_value: AtomicI64::new(i64::MIN),
            valued_successes: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            fatal: AtomicU64::new(0),
        }
    }

    pub fn record(&self, outcome: WorkerOutcome) {
        match outcome {
            WorkerOutcome::Success(value) => self.record_success(Some(value)),
            WorkerOutcome::Failure(err) => self.record_failure(&err),
        }
    }

    /// Success that may not carry the committed value (the HTTP path never sees it).
    pub fn record_success(&self, value: Option<i64>) {
        if let Some(value) = value {
            self.max_value.fetch_max(value, Ordering::Relaxed);
            self.valued_successes.fetch_add(1, Ordering::Relaxed);
        }
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, err: &HarnessError) {
        if err.is_exhausted() {
            self.exhausted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fatal.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed) + self.fatal.load(Ordering::Relaxed)
    }

    pub fn observed(&self) -> u64 {
        self.successes() + self.error_count()
    }

    /// Snapshot of the tally, paired with the authoritative final read.
    pub fn finalize(&self, final_counter_value: i64) -> AggregateResult {
        let max_successful_value = (self.valued_successes.load(Ordering::Relaxed) > 0)
            .then(|| self.max_value.load(Ordering::Relaxed));
        let exhausted = self.exhausted.load(Ordering::Relaxed);
        let fatal = self.fatal.load(Ordering::Relaxed);

        AggregateResult {
            max_successful_value,
            final_counter_value,
            error_count: exhausted + fatal,
            successful_units: self.successes(),
            exhausted_units: exhausted,
            fatal_units: fatal,
            elapsed: Duration::ZERO,
        }
    }
}

impl OutcomeSink<i64> for ResultAggregator {
    fn on_outcome(&self, outcome: Result<i64, HarnessError>) {
        self.record(WorkerOutcome::from(outcome));
    }
}

impl OutcomeSink<()> for ResultAggregator {
    fn on_outcome(&self, outcome: Result<(), HarnessError>) {
        match outcome {
            Ok(()) => self.record_success(None),
            Err(err) => self.record_failure(&err),
        }
    }
}

/// Final report of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    pub max_successful_value: Option<i64>,
    pub final_counter_value: i64,
    pub error_count: u64,
    pub successful_units: u64,
    /// Units that kept hitting a busy store until the attempt budget ran out
    pub exhausted_units: u64,
    pub fatal_units: u64,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl AggregateResult {
    pub fn total_units(&self) -> u64 {
        self.successful_units + self.error_count
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl fmt::Display for AggregateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_successful_value {
            Some(max) => writeln!(f, "{}", max)?,
            None => writeln!(f, "-")?,
        }
        writeln!(f, "{}", self.final_counter_value)?;
        write!(f, "num errors = {}", self.error_count)
    }
}
