//! Chain persistence backends
//!
//! The chain is persisted as one ordered JSON array of blocks, rewritten on
//! every commit through a temp file and an atomic rename so an interrupted
//! write leaves the previous file intact. Full snapshots are kept every
//! `snapshot_interval` blocks for recovery.

use crate::chain::Block;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Storage for the committed block sequence
pub trait ChainStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Load the primary chain; `None` when nothing has been stored yet
    fn load(&self) -> Result<Option<Vec<Block>>>;

    /// Recovery candidates, newest first
    fn snapshots(&self) -> Result<Vec<Vec<Block>>> {
        Ok(Vec::new())
    }

    /// Atomically replace the stored chain
    fn persist(&self, chain: &[Block]) -> Result<()>;
}

/// JSON file store under a data directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
    snapshot_interval: u64,
    snapshot_retain: usize,
}

impl JsonFileStore {
    /// Chain file name inside the data directory
    pub const CHAIN_FILE: &'static str = "chain.json";
    /// Snapshot sub-directory
    pub const SNAPSHOT_DIR: &'static str = "snapshots";

    /// Open (and create) a data directory
    pub fn open(dir: impl Into<PathBuf>, snapshot_interval: u64, snapshot_retain: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.join(Self::SNAPSHOT_DIR)).map_err(|e| {
            Error::persistence(format!("Cannot create data directory {}: {}", dir.display(), e))
        })?;
        Ok(Self {
            dir,
            snapshot_interval,
            snapshot_retain,
        })
    }

    /// Path of the primary chain file
    pub fn chain_path(&self) -> PathBuf {
        self.dir.join(Self::CHAIN_FILE)
    }

    fn snapshot_dir(&self) -> PathBuf {
        self.dir.join(Self::SNAPSHOT_DIR)
    }

    fn snapshot_path(&self, height: u64) -> PathBuf {
        self.snapshot_dir().join(format!("chain-{:010}.json", height))
    }

    /// Write `chain` to `path` via temp file + rename in the same directory
    fn write_atomic(&self, path: &Path, chain: &[Block]) -> Result<()> {
        let parent = path.parent().unwrap_or(&self.dir);
        let mut file = NamedTempFile::new_in(parent)
            .map_err(|e| Error::persistence(format!("Cannot create temp file: {}", e)))?;
        serde_json::to_writer(&mut file, chain)
            .map_err(|e| Error::persistence(format!("Cannot encode chain: {}", e)))?;
        file.flush()
            .and_then(|_| file.as_file().sync_all())
            .map_err(|e| Error::persistence(format!("Cannot flush chain: {}", e)))?;
        file.persist(path)
            .map_err(|e| Error::persistence(format!("Cannot replace {}: {}", path.display(), e.error)))?;
        Ok(())
    }

    fn read_chain(path: &Path) -> Result<Vec<Block>> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Snapshot files sorted newest first
    fn snapshot_files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.snapshot_dir())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("chain-") && n.ends_with(".json"))
            })
            .collect();
        // Zero-padded heights sort lexicographically
        files.sort();
        files.reverse();
        Ok(files)
    }

    fn write_snapshot(&self, chain: &[Block]) -> Result<()> {
        let height = chain.len().saturating_sub(1) as u64;
        let path = self.snapshot_path(height);
        self.write_atomic(&path, chain)?;
        info!(height, path = %path.display(), "Wrote chain snapshot");

        for stale in self.snapshot_files()?.into_iter().skip(self.snapshot_retain.max(1)) {
            if let Err(e) = std::fs::remove_file(&stale) {
                warn!(path = %stale.display(), error = %e, "Failed to prune snapshot");
            }
        }
        Ok(())
    }
}

impl ChainStore for JsonFileStore {
    fn name(&self) -> &'static str {
        "json-file"
    }

    fn load(&self) -> Result<Option<Vec<Block>>> {
        let path = self.chain_path();
        if !path.exists() {
            return Ok(None);
        }
        let chain = Self::read_chain(&path)
            .map_err(|e| Error::persistence(format!("Cannot read {}: {}", path.display(), e)))?;
        debug!(blocks = chain.len(), path = %path.display(), "Loaded chain file");
        Ok(Some(chain))
    }

    fn snapshots(&self) -> Result<Vec<Vec<Block>>> {
        let mut snapshots = Vec::new();
        for path in self.snapshot_files()? {
            match Self::read_chain(&path) {
                Ok(chain) => snapshots.push(chain),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot"),
            }
        }
        Ok(snapshots)
    }

    fn persist(&self, chain: &[Block]) -> Result<()> {
        self.write_atomic(&self.chain_path(), chain)?;

        let height = chain.len().saturating_sub(1) as u64;
        if self.snapshot_interval > 0 && height > 0 && height % self.snapshot_interval == 0 {
            // The primary write already succeeded; a failed snapshot is not fatal
            if let Err(e) = self.write_snapshot(chain) {
                warn!(height, error = %e, "Snapshot failed");
            }
        }
        Ok(())
    }
}

/// In-memory store for tests and ephemeral nodes
#[derive(Debug, Default)]
pub struct MemoryStore {
    chain: Mutex<Option<Vec<Block>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing chain
    pub fn with_chain(chain: Vec<Block>) -> Self {
        Self {
            chain: Mutex::new(Some(chain)),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make subsequent writes fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored blocks
    pub fn stored_len(&self) -> usize {
        self.chain.lock().as_ref().map_or(0, Vec::len)
    }
}

impl ChainStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&self) -> Result<Option<Vec<Block>>> {
        Ok(self.chain.lock().clone())
    }

    fn persist(&self, chain: &[Block]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::persistence("memory store is failing writes"));
        }
        *self.chain.lock() = Some(chain.to_vec());
        Ok(())
    }
}
