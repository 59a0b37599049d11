//! Region store: the set of active geofences.
//!
//! The drawing UI adds and deletes regions while the detector reads them on
//! every tick. Reads are snapshot based, so a tick always sees one consistent
//! region set even while regions are being edited.

/// Durable, log-backed store.
#[cfg(feature = "persistent")]
pub mod persistent;
/// Store trait, snapshots and the in-memory backend.
pub mod store;

#[cfg(feature = "persistent")]
pub use persistent::{PersistentConfig, PersistentRegionStore};
pub use store::{InMemoryRegionStore, RegionEntry, RegionSnapshot, RegionStore};
