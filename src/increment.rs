//! The unit of work: one read-modify-write transaction.

use crate::core::{IncrementAttempt, Result};
use crate::resource::CounterResource;
use tracing::{trace, warn};

/// Begin exclusive, read, add one, write, commit.
///
/// Returns the committed successor. When any step after `begin_exclusive`
/// fails the transaction is rolled back before the error is returned, so a
/// failed increment never leaves a write behind. No retrying happens here.
pub async fn increment<R>(handle: &mut R) -> Result<i64>
where
    R: CounterResource + ?Sized,
{
    attempt(handle).await.map(|attempt| attempt.computed_successor)
}

/// Same as [`increment`] but returns the full attempt record.
pub async fn attempt<R>(handle: &mut R) -> Result<IncrementAttempt>
where
    R: CounterResource + ?Sized,
{
    handle.begin_exclusive().await?;

    match read_modify_write(handle).await {
        Ok(attempt) => {
            trace!(
                observed = attempt.observed_value,
                successor = attempt.computed_successor,
                "increment committed"
            );
            Ok(attempt)
        }
        Err(err) => {
            if handle.in_transaction() {
                if let Err(rollback_err) = handle.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed increment also failed");
                }
            }
            Err(err)
        }
    }
}

async fn read_modify_write<R>(handle: &mut R) -> Result<IncrementAttempt>
where
    R: CounterResource + ?Sized,
{
    let attempt = IncrementAttempt::observe(handle.read().await?)?;
    handle.write(attempt.computed_successor).await?;
    handle.commit().await?;
    Ok(attempt.committed())
}
