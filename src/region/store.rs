//! Region store contract and the in-memory backend.
//!
//! Readers take an `Arc<RegionSnapshot>`; writers clone-and-swap the snapshot
//! under a write lock (`Arc::make_mut` only copies when a reader still holds
//! the previous snapshot). A snapshot handed out is never mutated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::RegionError;
use crate::geofence::{Geofence, GeofenceId};

fn lock_err(context: &'static str) -> RegionError {
    RegionError::Backend(format!("poisoned lock: {context}"))
}

/// A stored region plus the generation it was written at.
///
/// Generations are store-wide and strictly increasing: every add and every
/// update gets a fresh one, so a region recreated under a reused id is
/// distinguishable from its predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionEntry {
    /// The region.
    pub geofence: Geofence,
    /// Generation assigned when this version was stored.
    pub generation: u64,
}

/// Immutable view of the active regions.
#[derive(Debug, Clone, Default)]
pub struct RegionSnapshot {
    entries: Vec<RegionEntry>,
    index: HashMap<GeofenceId, usize>,
    revision: u64,
}

impl RegionSnapshot {
    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &RegionEntry> {
        self.entries.iter()
    }

    /// Looks up one region.
    #[must_use]
    pub fn get(&self, id: &GeofenceId) -> Option<&RegionEntry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    /// True if the id is active.
    #[must_use]
    pub fn contains(&self, id: &GeofenceId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of active regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no region is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest generation ever assigned by the store that produced this snapshot.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    fn insert(&mut self, geofence: Geofence) -> u64 {
        self.revision += 1;
        let generation = self.revision;
        self.index.insert(geofence.geofence_id.clone(), self.entries.len());
        self.entries.push(RegionEntry { geofence, generation });
        generation
    }

    fn replace(&mut self, slot: usize, geofence: Geofence) -> u64 {
        self.revision += 1;
        let generation = self.revision;
        self.entries[slot] = RegionEntry { geofence, generation };
        generation
    }

    fn take(&mut self, slot: usize) -> Geofence {
        let entry = self.entries.remove(slot);
        self.index.remove(&entry.geofence.geofence_id);
        // Everything after the removed slot shifted down by one.
        for i in self.index.values_mut() {
            if *i > slot {
                *i -= 1;
            }
        }
        entry.geofence
    }
}

/// Storage contract for active regions.
///
/// Implementations must be safe for concurrent readers and writers.
pub trait RegionStore: Send + Sync {
    /// Adds a region. Geometry is validated first; a rejected region never
    /// enters the store. Returns the assigned generation.
    ///
    /// # Errors
    /// - `Invalid`: degenerate geometry or empty id
    /// - `DuplicateRegion`: the id is already active
    fn add(&self, geofence: Geofence) -> Result<u64, RegionError>;

    /// Replaces an existing region in place under a new generation.
    ///
    /// # Errors
    /// - `Invalid`: degenerate geometry or empty id
    /// - `NotFound`: the id is not active
    fn update(&self, geofence: Geofence) -> Result<u64, RegionError>;

    /// Removes a region, returning it.
    ///
    /// # Errors
    /// - `NotFound`: the id is not active (store unchanged)
    fn remove(&self, id: &GeofenceId) -> Result<Geofence, RegionError>;

    /// Current consistent view.
    fn snapshot(&self) -> Result<Arc<RegionSnapshot>, RegionError>;

    /// Looks up one region.
    fn get(&self, id: &GeofenceId) -> Result<Option<Geofence>, RegionError> {
        Ok(self.snapshot()?.get(id).map(|e| e.geofence.clone()))
    }

    /// All active regions in insertion order.
    fn list(&self) -> Result<Vec<Geofence>, RegionError> {
        Ok(self.snapshot()?.iter().map(|e| e.geofence.clone()).collect())
    }

    /// Number of active regions.
    fn len(&self) -> Result<usize, RegionError> {
        Ok(self.snapshot()?.len())
    }
}

/// Thread-safe in-memory region store.
#[derive(Debug, Default)]
pub struct InMemoryRegionStore {
    state: RwLock<Arc<RegionSnapshot>>,
}

impl InMemoryRegionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with regions; fails on the first rejected one.
    ///
    /// # Errors
    ///
    /// Same as [`RegionStore::add`].
    pub fn with_regions(regions: impl IntoIterator<Item = Geofence>) -> Result<Self, RegionError> {
        let store = Self::new();
        for g in regions {
            store.add(g)?;
        }
        Ok(store)
    }
}

impl RegionStore for InMemoryRegionStore {
    fn add(&self, geofence: Geofence) -> Result<u64, RegionError> {
        geofence.validate()?;

        let mut state = self.state.write().map_err(|_| lock_err("region.add"))?;
        if state.contains(&geofence.geofence_id) {
            return Err(RegionError::DuplicateRegion(geofence.geofence_id));
        }

        let id = geofence.geofence_id.clone();
        let kind = geofence.shape.kind();
        let generation = Arc::make_mut(&mut state).insert(geofence);
        debug!(region = %id, shape = kind, generation, "region added");
        Ok(generation)
    }

    fn update(&self, geofence: Geofence) -> Result<u64, RegionError> {
        geofence.validate()?;

        let mut state = self.state.write().map_err(|_| lock_err("region.update"))?;
        let Some(&slot) = state.index.get(&geofence.geofence_id) else {
            return Err(RegionError::NotFound(geofence.geofence_id));
        };

        let id = geofence.geofence_id.clone();
        let generation = Arc::make_mut(&mut state).replace(slot, geofence);
        debug!(region = %id, generation, "region updated");
        Ok(generation)
    }

    fn remove(&self, id: &GeofenceId) -> Result<Geofence, RegionError> {
        let mut state = self.state.write().map_err(|_| lock_err("region.remove"))?;
        let Some(&slot) = state.index.get(id) else {
            return Err(RegionError::NotFound(id.clone()));
        };

        let removed = Arc::make_mut(&mut state).take(slot);
        debug!(region = %id, "region removed");
        Ok(removed)
    }

    fn snapshot(&self) -> Result<Arc<RegionSnapshot>, RegionError> {
        let state = self.state.read().map_err(|_| lock_err("region.snapshot"))?;
        Ok(Arc::clone(&state))
    }
}
