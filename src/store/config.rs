use super::persistence::DurabilityMode;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Marker location for a store that never touches the disk.
pub const MEMORY_LOCATION: &str = ":memory:";

/// Where a store keeps its commit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Memory,
    File(PathBuf),
}

impl StorageLocation {
    pub fn parse(location: &str) -> Self {
        if location.is_empty() || location == MEMORY_LOCATION {
            Self::Memory
        } else {
            Self::File(PathBuf::from(location))
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str(MEMORY_LOCATION),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Counter store configuration
///
/// Mirrors the knobs a SQLite-backed counter would set through pragmas:
/// busy timeout and synchronous mode.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Commit log location
    pub location: StorageLocation,

    /// How long `begin_exclusive` waits for the writer section before reporting busy
    pub busy_timeout: Duration,

    /// Commit durability
    pub durability: DurabilityMode,

    /// Log records between compactions
    pub compaction_threshold: usize,
}

impl StoreConfig {
    /// Create a configuration for the given location
    pub fn new(location: StorageLocation) -> Self {
        Self {
            location,
            busy_timeout: Duration::from_secs(60),
            durability: DurabilityMode::Relaxed,
            compaction_threshold: 10_000,
        }
    }

    /// In-memory store with default settings
    pub fn memory() -> Self {
        Self::new(StorageLocation::Memory)
    }

    /// File-backed store with default settings
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(StorageLocation::File(path.into()))
    }

    /// Set the busy timeout
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set the durability mode
    pub fn durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Set the compaction threshold
    pub fn compaction_threshold(mut self, threshold: usize) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if let StorageLocation::File(path) = &self.location {
            if path.as_os_str().is_empty() {
                return Err("Storage path cannot be empty".to_string());
            }
            if path.is_dir() {
                return Err(format!("Storage path '{}' is a directory", path.display()));
            }
        }

        if self.compaction_threshold == 0 {
            return Err("compaction_threshold must be > 0".to_string());
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::memory()
    }
}
