//! Per (device, region) containment memory.
//!
//! Entries live in an arena of slots with a free list. A two-level index
//! (device → region → slot) serves lookups without building a composite key,
//! and a reverse index (region → slots) lets a region purge touch only its
//! own entries. Purging a device or a region costs O(entries removed).

use std::collections::{HashMap, HashSet};

use crate::geofence::GeofenceId;
use crate::location::DeviceId;

/// Remembered containment for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairState {
    /// Whether the device was inside at the last evaluation.
    pub inside: bool,
    /// Region generation the answer was computed against.
    pub generation: u64,
    /// Location timestamp of the last evaluation (ms since epoch).
    pub observed_at: i64,
}

#[derive(Debug)]
struct Slot {
    device: DeviceId,
    region: GeofenceId,
    state: PairState,
}

/// Arena-backed store of pair states.
#[derive(Debug, Default)]
pub struct TransitionStates {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<DeviceId, HashMap<GeofenceId, usize>>,
    by_region: HashMap<GeofenceId, HashSet<usize>>,
    live: usize,
}

impl TransitionStates {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State for a pair, if any.
    #[must_use]
    pub fn get(&self, device: &DeviceId, region: &GeofenceId) -> Option<PairState> {
        let slot = *self.index.get(device)?.get(region)?;
        self.slots[slot].as_ref().map(|s| s.state)
    }

    /// Inserts or overwrites the state for a pair.
    pub fn upsert(&mut self, device: &DeviceId, region: &GeofenceId, state: PairState) {
        if let Some(&slot) = self.index.get(device).and_then(|m| m.get(region)) {
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.state = state;
                return;
            }
        }

        let entry = Slot {
            device: device.clone(),
            region: region.clone(),
            state,
        };
        let slot = if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(entry);
            slot
        } else {
            self.slots.push(Some(entry));
            self.slots.len() - 1
        };

        self.index
            .entry(device.clone())
            .or_default()
            .insert(region.clone(), slot);
        self.by_region.entry(region.clone()).or_default().insert(slot);
        self.live += 1;
    }

    /// Drops every entry for a device. Returns how many were removed.
    pub fn remove_device(&mut self, device: &DeviceId) -> usize {
        let Some(regions) = self.index.remove(device) else {
            return 0;
        };

        let removed = regions.len();
        for (region, slot) in regions {
            if let Some(slots) = self.by_region.get_mut(&region) {
                slots.remove(&slot);
                if slots.is_empty() {
                    self.by_region.remove(&region);
                }
            }
            self.release(slot);
        }
        removed
    }

    /// Drops every entry for a region. Returns how many were removed.
    pub fn remove_region(&mut self, region: &GeofenceId) -> usize {
        let Some(slots) = self.by_region.remove(region) else {
            return 0;
        };

        let removed = slots.len();
        for slot in slots {
            if let Some(entry) = self.slots[slot].as_ref() {
                if let Some(regions) = self.index.get_mut(&entry.device) {
                    regions.remove(region);
                    if regions.is_empty() {
                        self.index.remove(&entry.device);
                    }
                }
            }
            self.release(slot);
        }
        removed
    }

    /// Drops entries of every region for which `keep` is false.
    pub fn retain_regions(&mut self, mut keep: impl FnMut(&GeofenceId) -> bool) -> usize {
        let gone: Vec<GeofenceId> = self.by_region.keys().filter(|r| !keep(r)).cloned().collect();
        gone.iter().map(|r| self.remove_region(r)).sum()
    }

    /// Number of live entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    /// True when nothing is remembered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of devices with at least one entry.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.index.len()
    }

    /// Number of regions with at least one entry.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.by_region.len()
    }

    fn release(&mut self, slot: usize) {
        if self.slots[slot].take().is_some() {
            self.free.push(slot);
            self.live -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn st(inside: bool) -> PairState {
        PairState {
            inside,
            generation: 1,
            observed_at: 0,
        }
    }

    fn d(id: &str) -> DeviceId {
        DeviceId::new(id)
    }

    fn r(id: &str) -> GeofenceId {
        GeofenceId::new(id)
    }

    #[test]
    fn test_upsert_and_get() {
        let mut states = TransitionStates::new();
        assert!(states.get(&d("a"), &r("x")).is_none());

        states.upsert(&d("a"), &r("x"), st(false));
        states.upsert(&d("a"), &r("x"), st(true));
        assert_eq!(states.get(&d("a"), &r("x")), Some(st(true)));
        assert_eq!(states.len(), 1);
    }

    #[test]
    fn test_remove_device_only_touches_that_device() {
        let mut states = TransitionStates::new();
        states.upsert(&d("a"), &r("x"), st(true));
        states.upsert(&d("a"), &r("y"), st(false));
        states.upsert(&d("b"), &r("x"), st(true));

        assert_eq!(states.remove_device(&d("a")), 2);
        assert_eq!(states.len(), 1);
        assert!(states.get(&d("a"), &r("x")).is_none());
        assert!(states.get(&d("b"), &r("x")).is_some());
        assert_eq!(states.region_count(), 1);
        assert_eq!(states.remove_device(&d("a")), 0);
    }

    #[test]
    fn test_remove_region_only_touches_that_region() {
        let mut states = TransitionStates::new();
        states.upsert(&d("a"), &r("x"), st(true));
        states.upsert(&d("b"), &r("x"), st(true));
        states.upsert(&d("b"), &r("y"), st(true));

        assert_eq!(states.remove_region(&r("x")), 2);
        assert_eq!(states.len(), 1);
        assert_eq!(states.device_count(), 1);
        assert!(states.get(&d("b"), &r("y")).is_some());
    }

    #[test]
    fn test_slots_are_reused() {
        let mut states = TransitionStates::new();
        for i in 0..10 {
            states.upsert(&d(&format!("dev{i}")), &r("x"), st(true));
        }
        states.remove_region(&r("x"));
        assert!(states.is_empty());

        for i in 0..10 {
            states.upsert(&d(&format!("dev{i}")), &r("y"), st(false));
        }
        assert_eq!(states.slots.len(), 10);
        assert_eq!(states.len(), 10);
    }

    #[test]
    fn test_retain_regions() {
        let mut states = TransitionStates::new();
        states.upsert(&d("a"), &r("keep"), st(true));
        states.upsert(&d("a"), &r("drop"), st(true));
        assert_eq!(states.retain_regions(|id| id.as_str() == "keep"), 1);
        assert!(states.get(&d("a"), &r("keep")).is_some());
        assert!(states.get(&d("a"), &r("drop")).is_none());
    }
}
