use super::CounterStore;
use crate::core::{HarnessError, Result};
use crate::resource::{CounterResource, ResourceConnector};
use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Handle onto one cell of a [`CounterStore`]
///
/// Similar to a single SQLite connection: it owns at most one transaction,
/// and the transaction owns the writer section until it ends.
pub struct StoreConnection {
    /// Unique connection ID
    id: u64,
    /// Cell this handle reads and writes
    cell: String,
    store: CounterStore,
    state: ConnectionState,
    txn: Option<OpenTransaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Active,
    InTransaction,
    Closed,
}

struct OpenTransaction {
    id: u64,
    /// Released on commit, rollback or drop
    _writer: OwnedMutexGuard<()>,
    staged: Option<i64>,
}

impl StoreConnection {
    pub(crate) fn new(id: u64, cell: String, store: CounterStore) -> Self {
        Self {
            id,
            cell,
            store,
            state: ConnectionState::Active,
            txn: None,
        }
    }

    /// Get connection ID
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cell(&self) -> &str {
        &self.cell
    }

    /// Check if connection is active
    pub fn is_active(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    /// Close the connection, rolling back any open transaction
    pub fn close(&mut self) {
        self.abort();
        self.state = ConnectionState::Closed;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(HarnessError::Connection("Connection is closed".into()));
        }
        Ok(())
    }

    fn open_txn(&mut self) -> Result<&mut OpenTransaction> {
        self.ensure_open()?;
        self.txn
            .as_mut()
            .ok_or_else(|| HarnessError::Transaction("No active transaction".into()))
    }

    fn abort(&mut self) -> bool {
        match self.txn.take() {
            Some(txn) => {
                self.store.note_rollback(txn.id);
                if self.state == ConnectionState::InTransaction {
                    self.state = ConnectionState::Active;
                }
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CounterResource for StoreConnection {
    async fn begin_exclusive(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state == ConnectionState::InTransaction {
            return Err(HarnessError::Transaction("Transaction already active".into()));
        }

        let writer = self
            .store
            .acquire_writer(self.store.config().busy_timeout)
            .await?;
        let id = self.store.next_txn_id();
        self.txn = Some(OpenTransaction {
            id,
            _writer: writer,
            staged: None,
        });
        self.state = ConnectionState::InTransaction;
        debug!(connection = self.id, txn_id = id, "exclusive transaction started");
        Ok(())
    }

    async fn read(&mut self) -> Result<i64> {
        if let Some(staged) = self.open_txn()?.staged {
            return Ok(staged);
        }
        self.store.read_committed(&self.cell)
    }

    async fn write(&mut self, value: i64) -> Result<()> {
        self.open_txn()?.staged = Some(value);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.open_txn()?;
        let Some(txn) = self.txn.take() else {
            return Err(HarnessError::Transaction("No active transaction".into()));
        };
        self.state = ConnectionState::Active;

        let writes = txn
            .staged
            .map(|value| vec![(self.cell.clone(), value)])
            .unwrap_or_default();
        match self.store.commit_writes(txn.id, writes) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.store.note_rollback(txn.id);
                Err(err)
            }
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.abort() {
            return Err(HarnessError::Transaction("No active transaction".into()));
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state == ConnectionState::InTransaction
    }
}

impl Drop for StoreConnection {
    fn drop(&mut self) {
        if self.abort() {
            debug!(connection = self.id, "open transaction rolled back on drop");
        }
    }
}

/// Hands out one fresh [`StoreConnection`] per unit of work
#[derive(Clone)]
pub struct StoreConnector {
    store: CounterStore,
    cell: String,
}

impl StoreConnector {
    pub fn new(store: CounterStore, cell: &str) -> Self {
        Self {
            store,
            cell: cell.to_string(),
        }
    }

    pub fn cell(&self) -> &str {
        &self.cell
    }
}

#[async_trait]
impl ResourceConnector for StoreConnector {
    type Handle = StoreConnection;

    async fn connect(&self) -> Result<StoreConnection> {
        Ok(self.store.connect(&self.cell))
    }

    async fn reset_counter(&self, value: i64) -> Result<()> {
        self.store.reset_cell(&self.cell, value).await
    }

    async fn read_counter(&self) -> Result<i64> {
        self.store.read_committed(&self.cell)
    }
}
