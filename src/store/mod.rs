// ============================================================================
// Counter Store
// ============================================================================
//
// In-process transactional store of named integer cells.
//
// - One writer section (tokio mutex) serializes every read-modify-write.
// - Writes are staged on the handle and become visible only at commit.
// - File-backed stores append each commit to a log and replay it on open.
//
// ============================================================================

pub mod config;
pub mod connection;
pub mod persistence;

pub use config::{MEMORY_LOCATION, StorageLocation, StoreConfig};
pub use connection::{StoreConnection, StoreConnector};
pub use persistence::{CommitLog, DurabilityMode, LogRecord};

use crate::core::{HarnessError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex as WriterLock, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Shared handle to a counter store. Cloning is cheap.
#[derive(Clone)]
pub struct CounterStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: StoreConfig,
    /// Committed cell values
    cells: RwLock<HashMap<String, i64>>,
    /// The exclusive writer section
    writer: Arc<WriterLock<()>>,
    log: Mutex<Option<CommitLog>>,
    next_txn_id: AtomicU64,
    next_connection_id: AtomicU64,
    stats: StatCounters,
}

#[derive(Default)]
struct StatCounters {
    commits: AtomicU64,
    rollbacks: AtomicU64,
    busy: AtomicU64,
}

impl CounterStore {
    /// Open a store, replaying its commit log if it is file-backed
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate().map_err(HarnessError::Config)?;

        let (cells, log) = match &config.location {
            StorageLocation::Memory => (HashMap::new(), None),
            StorageLocation::File(path) => {
                let mut log = CommitLog::open(path, config.durability)?;
                log.set_compaction_threshold(config.compaction_threshold);
                let records = log.read_all()?;
                let cells = persistence::replay(&records);
                info!(
                    location = %config.location,
                    records = records.len(),
                    cells = cells.len(),
                    "counter store recovered"
                );
                (cells, Some(log))
            }
        };

        Ok(Self::from_parts(config, cells, log))
    }

    /// Open an isolated in-memory store
    pub fn in_memory() -> Self {
        Self::from_parts(StoreConfig::memory(), HashMap::new(), None)
    }

    fn from_parts(config: StoreConfig, cells: HashMap<String, i64>, log: Option<CommitLog>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                cells: RwLock::new(cells),
                writer: Arc::new(WriterLock::new(())),
                log: Mutex::new(log),
                next_txn_id: AtomicU64::new(1),
                next_connection_id: AtomicU64::new(1),
                stats: StatCounters::default(),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Open a new handle bound to `cell`
    pub fn connect(&self, cell: &str) -> StoreConnection {
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        StoreConnection::new(id, cell.to_string(), self.clone())
    }

    /// Connector that hands out a fresh handle per call
    pub fn connector(&self, cell: &str) -> StoreConnector {
        StoreConnector::new(self.clone(), cell)
    }

    /// Drop-and-recreate `cell` with `value`, committed under the writer section
    pub async fn reset_cell(&self, cell: &str, value: i64) -> Result<()> {
        let _guard = self.acquire_writer(self.inner.config.busy_timeout).await?;
        let record = LogRecord::Reset {
            cell: cell.to_string(),
            value,
        };
        self.append_and_apply(&record)?;
        info!(cell, value, "cell reset");
        Ok(())
    }

    /// Latest committed value of `cell`, outside any transaction
    pub fn read_committed(&self, cell: &str) -> Result<i64> {
        let cells = self.inner.cells.read()?;
        cells
            .get(cell)
            .copied()
            .ok_or_else(|| HarnessError::CellNotFound(cell.to_string()))
    }

    /// Rewrite the commit log down to one record per cell
    pub async fn checkpoint(&self) -> Result<()> {
        let _guard = self.acquire_writer(self.inner.config.busy_timeout).await?;
        let cells = self.inner.cells.read()?.clone();
        let mut log = self.inner.log.lock()?;
        if let Some(log) = log.as_mut() {
            log.compact(&cells)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let stats = &self.inner.stats;
        StoreStats {
            commits: stats.commits.load(Ordering::Relaxed),
            rollbacks: stats.rollbacks.load(Ordering::Relaxed),
            busy_rejections: stats.busy.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn next_txn_id(&self) -> u64 {
        self.inner.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Wait for the writer section. A zero timeout means try once.
    pub(crate) async fn acquire_writer(&self, timeout: Duration) -> Result<OwnedMutexGuard<()>> {
        let writer = Arc::clone(&self.inner.writer);
        let acquired = if timeout.is_zero() {
            writer.try_lock_owned().ok()
        } else {
            tokio::time::timeout(timeout, writer.lock_owned()).await.ok()
        };

        acquired.ok_or_else(|| {
            self.inner.stats.busy.fetch_add(1, Ordering::Relaxed);
            HarnessError::Busy { waited: timeout }
        })
    }

    /// Make a transaction's writes durable, then visible.
    ///
    /// Caller must hold the writer section.
    pub(crate) fn commit_writes(&self, txn_id: u64, writes: Vec<(String, i64)>) -> Result<()> {
        if !writes.is_empty() {
            self.append_and_apply(&LogRecord::Commit { txn_id, writes })?;
        }
        self.inner.stats.commits.fetch_add(1, Ordering::Relaxed);
        debug!(txn_id, "transaction committed");
        Ok(())
    }

    pub(crate) fn note_rollback(&self, txn_id: u64) {
        self.inner.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
        debug!(txn_id, "transaction rolled back");
    }

    fn append_and_apply(&self, record: &LogRecord) -> Result<()> {
        {
            let mut log = self.inner.log.lock()?;
            if let Some(log) = log.as_mut() {
                log.append(record)?;
            }
        }

        let mut cells = self.inner.cells.write()?;
        match record {
            LogRecord::Reset { cell, value } => {
                cells.insert(cell.clone(), *value);
            }
            LogRecord::Commit { writes, .. } => {
                for (cell, value) in writes {
                    cells.insert(cell.clone(), *value);
                }
            }
        }

        // The record is already durable; a failed compaction only leaves a longer log.
        let mut log = self.inner.log.lock()?;
        if let Some(log) = log.as_mut() {
            if log.needs_compaction() {
                if let Err(err) = log.compact(&cells) {
                    warn!(error = %err, "commit log compaction failed");
                }
            }
        }
        Ok(())
    }
}

/// Counter store statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub commits: u64,
    pub rollbacks: u64,
    pub busy_rejections: u64,
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Store Stats: {} commits, {} rollbacks, {} busy rejections",
            self.commits, self.rollbacks, self.busy_rejections
        )
    }
}
