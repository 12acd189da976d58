use std::time::Duration;
use thiserror::Error;

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The resource could not serialize the transaction within its wait budget.
    Transient,
    /// Anything else. Never retried.
    Fatal,
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Store busy: exclusive section not acquired within {waited:?}")]
    Busy { waited: Duration },

    #[error("Cell '{0}' not found")]
    CellNotFound(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Counter overflow at value {0}")]
    Overflow(i64),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Store corrupted: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid harness state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<HarnessError>,
    },
}

impl HarnessError {
    /// Only a busy resource is worth another attempt: a busy store, or a
    /// counter service answering 429/503.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy { .. } => ErrorKind::Transient,
            Self::HttpStatus { status: 429 | 503, .. } => ErrorKind::Transient,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for HarnessError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for HarnessError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Io(format!("Failed to encode log frame: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for HarnessError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Corrupt(format!("Failed to decode log frame: {}", err))
    }
}

impl From<reqwest::Error> for HarnessError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => Self::Connection(err.to_string()),
        }
    }
}
