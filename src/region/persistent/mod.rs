//! Durable region store.
//!
//! Wraps [`InMemoryRegionStore`] with an append-only, checksummed log so that
//! regions drawn by operators survive a restart. Mutations are logged before
//! they are applied; opening the store replays the log.
//!
//! ```text
//! add/update/remove ──► RegionLog (append, crc32) ──► InMemoryRegionStore ──► snapshots
//! ```

mod codec;
mod log;

pub use log::{RegionLog, RegionRecord, RegionRecordKind};

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::RegionError;
use crate::geofence::{Geofence, GeofenceId};

use super::store::{InMemoryRegionStore, RegionSnapshot, RegionStore};

/// File name of the log inside the data directory.
pub const LOG_FILE_NAME: &str = "regions.log";

/// Configuration for the durable store.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Whether to fsync after every record.
    pub sync_on_write: bool,
    /// Compact on open once the log holds this many more records than live regions.
    pub compact_after_records: u64,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            compact_after_records: 1024,
        }
    }
}

fn io_err(context: &str, e: &std::io::Error) -> RegionError {
    RegionError::Backend(format!("{context}: {e}"))
}

fn lock_err(context: &'static str) -> RegionError {
    RegionError::Backend(format!("poisoned lock: {context}"))
}

/// Region store backed by a log file.
#[derive(Debug)]
pub struct PersistentRegionStore {
    memory: InMemoryRegionStore,
    log: Mutex<RegionLog>,
}

impl PersistentRegionStore {
    /// Opens or creates the store in `dir`.
    ///
    /// # Errors
    /// - If the directory or log cannot be created or read
    /// - If a replayed record no longer validates (logged and skipped, not an error)
    pub fn open(dir: impl AsRef<Path>, config: Option<PersistentConfig>) -> Result<Self, RegionError> {
        let cfg = config.unwrap_or_default();
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| io_err("create data dir", &e))?;

        let path = dir.join(LOG_FILE_NAME);
        let (mut log, records) = RegionLog::open(&path, cfg.sync_on_write)
            .map_err(|e| io_err("open region log", &e))?;

        let memory = InMemoryRegionStore::new();
        let replayed = records.len();
        for record in records {
            let applied = match record.kind {
                RegionRecordKind::Put { geofence } => {
                    let id = geofence.geofence_id.clone();
                    if memory.get(&id)?.is_some() {
                        memory.update(geofence).map(|_| ())
                    } else {
                        memory.add(geofence).map(|_| ())
                    }
                }
                RegionRecordKind::Delete { geofence_id } => memory.remove(&geofence_id).map(|_| ()),
            };
            if let Err(e) = applied {
                warn!(sequence = record.sequence, error = %e, "skipping region log record");
            }
        }

        let live = memory.len()?;
        info!(path = %path.display(), replayed, live, "region store opened");

        if log.sequence().saturating_sub(live as u64) >= cfg.compact_after_records {
            let snapshot = memory.snapshot()?;
            log.compact(snapshot.iter().map(|e| &e.geofence))
                .map_err(|e| io_err("compact region log", &e))?;
        }

        Ok(Self {
            memory,
            log: Mutex::new(log),
        })
    }

    /// Rewrites the log to the live set.
    ///
    /// # Errors
    ///
    /// `Backend` if the rewrite fails; the previous log is left intact.
    pub fn compact(&self) -> Result<(), RegionError> {
        let mut log = self.log.lock().map_err(|_| lock_err("region.compact"))?;
        let snapshot = self.memory.snapshot()?;
        log.compact(snapshot.iter().map(|e| &e.geofence))
            .map_err(|e| io_err("compact region log", &e))
    }
}

impl RegionStore for PersistentRegionStore {
    fn add(&self, geofence: Geofence) -> Result<u64, RegionError> {
        geofence.validate()?;
        let mut log = self.log.lock().map_err(|_| lock_err("region.add"))?;
        if self.memory.get(&geofence.geofence_id)?.is_some() {
            return Err(RegionError::DuplicateRegion(geofence.geofence_id));
        }
        log.append(RegionRecordKind::Put {
            geofence: geofence.clone(),
        })
        .map_err(|e| io_err("append region log", &e))?;
        self.memory.add(geofence)
    }

    fn update(&self, geofence: Geofence) -> Result<u64, RegionError> {
        geofence.validate()?;
        let mut log = self.log.lock().map_err(|_| lock_err("region.update"))?;
        if self.memory.get(&geofence.geofence_id)?.is_none() {
            return Err(RegionError::NotFound(geofence.geofence_id));
        }
        log.append(RegionRecordKind::Put {
            geofence: geofence.clone(),
        })
        .map_err(|e| io_err("append region log", &e))?;
        self.memory.update(geofence)
    }

    fn remove(&self, id: &GeofenceId) -> Result<Geofence, RegionError> {
        let mut log = self.log.lock().map_err(|_| lock_err("region.remove"))?;
        if self.memory.get(id)?.is_none() {
            return Err(RegionError::NotFound(id.clone()));
        }
        log.append(RegionRecordKind::Delete {
            geofence_id: id.clone(),
        })
        .map_err(|e| io_err("append region log", &e))?;
        self.memory.remove(id)
    }

    fn snapshot(&self) -> Result<Arc<RegionSnapshot>, RegionError> {
        self.memory.snapshot()
    }
}
