use super::{ErrorKind, HarnessError};

/// Name of the cell the harness increments unless configured otherwise.
pub const DEFAULT_CELL: &str = "counter";

/// Where one try of the read-modify-write cycle ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Successor computed, not yet committed.
    Pending,
    Committed,
}

/// One try of the increment transaction.
///
/// Lives for a single retry iteration on a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementAttempt {
    pub observed_value: i64,
    pub computed_successor: i64,
    pub outcome: AttemptOutcome,
}

impl IncrementAttempt {
    pub fn observe(observed_value: i64) -> Result<Self, HarnessError> {
        let computed_successor = observed_value
            .checked_add(1)
            .ok_or(HarnessError::Overflow(observed_value))?;
        Ok(Self {
            observed_value,
            computed_successor,
            outcome: AttemptOutcome::Pending,
        })
    }

    pub fn committed(mut self) -> Self {
        self.outcome = AttemptOutcome::Committed;
        self
    }
}

/// Result of exactly one dispatched unit of work.
#[derive(Debug)]
pub enum WorkerOutcome {
    Success(i64),
    Failure(HarnessError),
}

impl WorkerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Kind of the failure, `None` on success.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(err) => Some(err.kind()),
        }
    }
}

impl From<Result<i64, HarnessError>> for WorkerOutcome {
    fn from(result: Result<i64, HarnessError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Failure(err),
        }
    }
}
