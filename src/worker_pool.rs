//! Bounded fan-out of independent units of work.

use crate::aggregate::OutcomeSink;
use crate::core::HarnessError;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};

pub const DEFAULT_CONCURRENCY: usize = 10;

/// Runs units on the multi-threaded runtime with at most `concurrency` in flight
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `count` units and feed each outcome into `sink`.
    ///
    /// `unit` is called with the unit index. Every unit produces exactly one
    /// outcome: a unit that panics is reported as [`HarnessError::WorkerPanicked`].
    /// Returns the number of outcomes delivered, which always equals `count`.
    pub async fn dispatch<T, F, Fut, S>(&self, count: usize, unit: F, sink: Arc<S>) -> usize
    where
        T: Send + 'static,
        F: Fn(usize) -> Fut,
        Fut: Future<Output = Result<T, HarnessError>> + Send + 'static,
        S: OutcomeSink<T>,
    {
        let mut in_flight = JoinSet::new();
        let mut delivered = 0usize;

        for index in 0..count {
            while in_flight.len() >= self.concurrency {
                if let Some(joined) = in_flight.join_next().await {
                    delivered += settle::<T, S>(joined, sink.as_ref());
                }
            }

            let task = unit(index);
            let task_sink = Arc::clone(&sink);
            in_flight.spawn(async move {
                let outcome = task.await;
                task_sink.on_outcome(outcome);
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            delivered += settle::<T, S>(joined, sink.as_ref());
        }

        debug!(count, delivered, concurrency = self.concurrency, "dispatch finished");
        delivered
    }
}

fn settle<T, S>(joined: Result<(), tokio::task::JoinError>, sink: &S) -> usize
where
    S: OutcomeSink<T> + ?Sized,
{
    if let Err(join_err) = joined {
        let reason = if join_err.is_panic() {
            panic_message(join_err.into_panic())
        } else {
            join_err.to_string()
        };
        error!(%reason, "unit of work did not complete");
        sink.on_outcome(Err(HarnessError::WorkerPanicked(reason)));
    }
    1
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
