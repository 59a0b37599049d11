//! Shard worker: owns a disjoint slice of devices.
//!
//! Each shard holds the feed entries and transition state for the devices
//! hashed onto it and processes its queue strictly in order, so every
//! (device, region) pair has exactly one writer.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, trace, warn};

use crate::alert::AlertEmitter;
use crate::detector::TransitionDetector;
use crate::geofence::GeofenceId;
use crate::location::{DeviceId, FeedUpdate, Location, LocationFeed};
use crate::region::RegionStore;

#[derive(Debug)]
pub(crate) enum ShardMsg {
    /// `reference_ms` is the newest well-formed timestamp in the whole
    /// submitted batch, identical for every shard.
    Tick {
        tick: u64,
        reference_ms: Option<i64>,
        locations: Vec<Location>,
    },
    Disconnect { device: DeviceId },
    PurgeRegion { region: GeofenceId },
    Flush { reply: Sender<()> },
}

/// Counters shared by every shard.
#[derive(Debug)]
pub(crate) struct EngineCounters {
    pub ticks_submitted: AtomicU64,
    pub ticks_dropped: AtomicU64,
    pub records_accepted: AtomicU64,
    pub records_stale: AtomicU64,
    pub records_duplicate: AtomicU64,
    pub records_malformed: AtomicU64,
    pub transitions: AtomicU64,
    pub devices_evicted: AtomicU64,
    pub devices_disconnected: AtomicU64,
    /// Per-shard gauges, indexed by shard.
    pub tracked_devices: Vec<AtomicU64>,
    pub tracked_pairs: Vec<AtomicU64>,
}

impl EngineCounters {
    pub(crate) fn new(shards: usize) -> Self {
        Self {
            ticks_submitted: AtomicU64::new(0),
            ticks_dropped: AtomicU64::new(0),
            records_accepted: AtomicU64::new(0),
            records_stale: AtomicU64::new(0),
            records_duplicate: AtomicU64::new(0),
            records_malformed: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
            devices_evicted: AtomicU64::new(0),
            devices_disconnected: AtomicU64::new(0),
            tracked_devices: (0..shards).map(|_| AtomicU64::new(0)).collect(),
            tracked_pairs: (0..shards).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

pub(crate) struct Shard {
    index: usize,
    feed: LocationFeed,
    detector: TransitionDetector,
    regions: Arc<dyn RegionStore>,
    emitter: Arc<AlertEmitter>,
    stale_after_ms: Option<i64>,
    counters: Arc<EngineCounters>,
}

impl Shard {
    pub(crate) fn new(
        index: usize,
        regions: Arc<dyn RegionStore>,
        emitter: Arc<AlertEmitter>,
        stale_after_ms: Option<u64>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            index,
            feed: LocationFeed::new(),
            detector: TransitionDetector::new(),
            regions,
            emitter,
            stale_after_ms: stale_after_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
            counters,
        }
    }

    /// Starts the worker thread. It exits once every sender is dropped.
    pub(crate) fn spawn(self, rx: Receiver<ShardMsg>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("fencewatch-shard-{}", self.index))
            .spawn(move || self.run(&rx))
    }

    fn run(mut self, rx: &Receiver<ShardMsg>) {
        debug!(shard = self.index, "shard started");
        while let Ok(msg) = rx.recv() {
            self.handle(msg);
        }
        debug!(shard = self.index, devices = self.feed.len(), "shard stopped");
    }

    fn handle(&mut self, msg: ShardMsg) {
        match msg {
            ShardMsg::Tick {
                tick,
                reference_ms,
                locations,
            } => self.on_tick(tick, reference_ms, locations),
            ShardMsg::Disconnect { device } => {
                let known = self.feed.remove(&device).is_some();
                let purged = self.detector.remove_device(&device);
                if known || purged > 0 {
                    self.counters.devices_disconnected.fetch_add(1, Ordering::Relaxed);
                }
                debug!(shard = self.index, device = %device, purged, "device disconnected");
            }
            ShardMsg::PurgeRegion { region } => {
                let purged = self.detector.remove_region(&region);
                trace!(shard = self.index, region = %region, purged, "region state purged");
            }
            ShardMsg::Flush { reply } => {
                let _ = reply.send(());
            }
        }
        self.publish_gauges();
    }

    fn on_tick(&mut self, tick: u64, reference_ms: Option<i64>, locations: Vec<Location>) {
        let counters = &self.counters;
        let mut present: Vec<DeviceId> = Vec::with_capacity(locations.len());

        for location in locations {
            let timestamp = location.timestamp;
            let device = location.id.clone();
            match self.feed.apply(location) {
                FeedUpdate::Accepted => {
                    counters.records_accepted.fetch_add(1, Ordering::Relaxed);
                    present.push(device);
                }
                FeedUpdate::Stale { current } => {
                    counters.records_stale.fetch_add(1, Ordering::Relaxed);
                    trace!(device = %device, timestamp, current, "out-of-order location ignored");
                    present.push(device);
                }
                FeedUpdate::Duplicate => {
                    counters.records_duplicate.fetch_add(1, Ordering::Relaxed);
                    present.push(device);
                }
                FeedUpdate::Malformed(e) => {
                    counters.records_malformed.fetch_add(1, Ordering::Relaxed);
                    warn!(device = %device, error = %e, "malformed location skipped");
                }
            }
        }
        present.sort_unstable();
        present.dedup();

        // Only devices absent from this tick can go stale.
        if let (Some(window), Some(reference)) = (self.stale_after_ms, reference_ms) {
            for device in self.feed.evict_older_than(reference.saturating_sub(window), &present) {
                self.detector.remove_device(&device);
                counters.devices_evicted.fetch_add(1, Ordering::Relaxed);
                debug!(shard = self.index, device = %device, "stale device evicted");
            }
        }

        let snapshot = match self.regions.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(shard = self.index, tick, error = %e, "region snapshot unavailable; tick skipped");
                return;
            }
        };

        // Devices in this tick, at their latest accepted position.
        let feed = &self.feed;
        let report = self
            .detector
            .evaluate_tick(present.iter().filter_map(|id| feed.get(id)), &snapshot);
        for transition in &report.transitions {
            self.emitter
                .emit(&transition.location, &transition.geofence, transition.direction);
        }
        counters
            .transitions
            .fetch_add(report.transitions.len() as u64, Ordering::Relaxed);

        trace!(
            shard = self.index,
            tick,
            devices = present.len(),
            regions = snapshot.len(),
            pairs = report.evaluated_pairs,
            baselined = report.baselined,
            alerts = report.transitions.len(),
            "tick evaluated"
        );
    }

    fn publish_gauges(&self) {
        self.counters.tracked_devices[self.index].store(self.feed.len() as u64, Ordering::Relaxed);
        self.counters.tracked_pairs[self.index].store(self.detector.tracked_pairs() as u64, Ordering::Relaxed);
    }
}
