//! The transactional counter contract.
//!
//! Anything that can hand out isolated handles supporting
//! begin-exclusive / read / write / commit / rollback over one integer cell
//! can be driven by the harness. [`crate::store::CounterStore`] is the
//! in-process implementation; tests plug in scripted doubles.

use crate::core::Result;
use async_trait::async_trait;

/// One handle onto a single counter cell.
///
/// A handle is owned by exactly one unit of work and never shared across tasks.
#[async_trait]
pub trait CounterResource: Send {
    /// Enter the exclusive writer section, waiting up to the busy timeout.
    ///
    /// Fails with [`crate::HarnessError::Busy`] when the wait budget runs out.
    async fn begin_exclusive(&mut self) -> Result<()>;

    /// Current value of the cell as seen by the open transaction.
    async fn read(&mut self) -> Result<i64>;

    /// Stage a new value. Nothing is visible to others before `commit`.
    async fn write(&mut self, value: i64) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Whether a transaction is currently open on this handle.
    fn in_transaction(&self) -> bool;
}

/// The resource as a whole: opens fresh, independent handles and
/// administers the counter outside of worker transactions.
#[async_trait]
pub trait ResourceConnector: Send + Sync + 'static {
    type Handle: CounterResource + 'static;

    async fn connect(&self) -> Result<Self::Handle>;

    /// Drop and recreate the counter holding `value`.
    async fn reset_counter(&self, value: i64) -> Result<()>;

    /// Authoritative committed value of the counter.
    async fn read_counter(&self) -> Result<i64>;
}
