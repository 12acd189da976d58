//! Network variant: the same increment-under-contention idea driven against
//! a remote counter service.
//!
//! The service contract is two routes on one base URL:
//! - `POST /` increments the counter and must answer 200
//! - `GET /` answers 200 with the current value as a plain integer body

use crate::aggregate::ResultAggregator;
use crate::core::{HarnessError, Result};
use crate::retry::RetryPolicy;
use crate::worker_pool::{DEFAULT_CONCURRENCY, WorkerPool};
use reqwest::StatusCode;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_HTTP_UNITS: usize = 100;

#[derive(Debug, Clone)]
pub struct HttpCounterClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCounterClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(HarnessError::Config(format!(
                "Counter URL must start with http:// or https://, got '{}'",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarnessError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            base_url: format!("{}/", base_url.trim_end_matches('/')),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /`. Any status other than 200 is an error.
    pub async fn increment(&self) -> Result<()> {
        let response = self.client.post(&self.base_url).send().await?;
        self.expect_ok(response.status())
    }

    /// `GET /`, parsed as an integer.
    pub async fn get(&self) -> Result<i64> {
        let response = self.client.get(&self.base_url).send().await?;
        self.expect_ok(response.status())?;
        let body = response.text().await?;
        body.trim().parse::<i64>().map_err(|_| {
            HarnessError::MalformedResponse(format!("expected an integer body, got '{}'", body.trim()))
        })
    }

    fn expect_ok(&self, status: StatusCode) -> Result<()> {
        if status != StatusCode::OK {
            return Err(HarnessError::HttpStatus {
                status: status.as_u16(),
                url: self.base_url.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HttpStressConfig {
    pub base_url: String,
    pub concurrency: usize,
    pub total_units: usize,
    /// `None` sends each increment exactly once
    pub retry: Option<RetryPolicy>,
    pub request_timeout: Duration,
}

impl Default for HttpStressConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            total_units: DEFAULT_HTTP_UNITS,
            retry: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Counter values around an HTTP stress run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpStressReport {
    pub before: i64,
    pub after: i64,
    pub successful_units: u64,
    pub error_count: u64,
    pub elapsed_ms: u64,
}

impl HttpStressReport {
    /// Increments the service applied during the run.
    pub fn applied(&self) -> i64 {
        self.after - self.before
    }
}

impl fmt::Display for HttpStressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "before: {}", self.before)?;
        writeln!(f, "after: {}", self.after)?;
        write!(f, "num errors = {}", self.error_count)
    }
}

/// Read, fan out `total_units` increments, read again.
///
/// Failures of the surrounding reads fail the run; failed increments are counted.
pub async fn run_http_stress(config: &HttpStressConfig) -> Result<HttpStressReport> {
    let client = HttpCounterClient::with_timeout(&config.base_url, config.request_timeout)?;
    let before = client.get().await?;
    info!(url = client.base_url(), before, units = config.total_units, "http stress run started");

    let started = Instant::now();
    let aggregator = Arc::new(ResultAggregator::new());
    let retry = config.retry;

    WorkerPool::new(config.concurrency)
        .dispatch(
            config.total_units,
            |_index| {
                let client = client.clone();
                async move {
                    match retry {
                        Some(policy) => policy.run(|_attempt| client.increment()).await,
                        None => client.increment().await,
                    }
                }
            },
            Arc::clone(&aggregator),
        )
        .await;

    let after = client.get().await?;
    let report = HttpStressReport {
        before,
        after,
        successful_units: aggregator.successes(),
        error_count: aggregator.error_count(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(after, errors = report.error_count, "http stress run completed");
    Ok(report)
}
