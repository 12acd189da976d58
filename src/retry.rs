//! Bounded retry of transient failures.
//!
//! A [`RetryPolicy`] decides, from the returned error value alone, whether
//! another attempt is worth making. Only [`ErrorKind::Transient`] failures are
//! retried; everything else comes back on first occurrence. Once the attempt
//! budget is spent the last transient error is returned wrapped in
//! [`HarnessError::RetriesExhausted`], never swallowed.

use crate::core::{ErrorKind, HarnessError, Result};
use rand::Rng;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Retry right away.
    #[default]
    Immediate,
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn exponential() -> Self {
        Self::Exponential {
            base: Duration::from_millis(10),
            max: Duration::from_millis(160),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Immediate => Duration::ZERO,
            Self::Exponential { base, max } => {
                let cap = max.max(base);
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(cap)
            }
        }
    }
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "immediate" | "none" => Ok(Self::Immediate),
            "exponential" | "exp" => Ok(Self::exponential()),
            other => Err(format!("unknown backoff '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    /// Upper bound of random extra delay, to break lock-step retries
    jitter: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; zero is normalized to one.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Immediate,
            jitter: None,
        }
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn jitter(mut self, max_extra: Duration) -> Self {
        self.jitter = (!max_extra.is_zero()).then_some(max_extra);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause before the attempt following `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff.delay(attempt);
        match self.jitter {
            Some(max_extra) => {
                let extra_us = rand::rng().random_range(0..=max_extra.as_micros() as u64);
                base + Duration::from_micros(extra_us)
            }
            None => base,
        }
    }

    /// Run `operation` until it succeeds, fails fatally, or the budget is spent.
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.kind() == ErrorKind::Fatal {
                warn!(attempt, error = %err, "fatal failure, not retrying");
                return Err(err);
            }

            if attempt >= self.max_attempts {
                warn!(attempts = attempt, error = %err, "retries exhausted");
                return Err(HarnessError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt);
            debug!(attempt, ?delay, error = %err, "transient failure, retrying");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    /// Compose this policy with an operation into a reusable retrying operation.
    pub fn wrap<F>(self, operation: F) -> Retrying<F> {
        Retrying {
            policy: self,
            operation,
        }
    }
}

/// An operation bundled with the policy that retries it.
#[derive(Debug, Clone)]
pub struct Retrying<F> {
    policy: RetryPolicy,
    operation: F,
}

impl<F> Retrying<F> {
    pub async fn call<T, Fut>(&self) -> Result<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.policy.run(|attempt| (self.operation)(attempt)).await
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}
