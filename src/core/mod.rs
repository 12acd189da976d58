pub mod error;
pub mod types;

pub use error::{ErrorKind, HarnessError, Result};
pub use types::{AttemptOutcome, DEFAULT_CELL, IncrementAttempt, WorkerOutcome};
