//! Live geofencing engine.
//!
//! Location batches are partitioned by device onto a fixed set of shard
//! workers, each fed through a bounded queue. A shard folds its slice of the
//! batch into its location feed, evaluates every device it owns against the
//! current region snapshot and emits an alert for each transition.
//!
//! ```text
//! submit(batch) ──► hash(device) ──► shard queue ──► feed ──► detector ──► AlertEmitter
//!                                        ▲
//! add/update/remove_region ──► RegionStore ┘ (purge broadcast)
//! ```

mod shard;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alert::{AlertEmitter, AlertStream, EmitterStats};
use crate::config::{BackpressurePolicy, EngineConfig};
use crate::error::{ExecutionError, FenceError, FenceResult};
use crate::geofence::{Geofence, GeofenceId};
use crate::location::{DeviceId, Location};
use crate::region::{InMemoryRegionStore, RegionStore};

use shard::{EngineCounters, Shard, ShardMsg};

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Ticks accepted by `submit`.
    pub ticks_submitted: u64,
    /// Ticks refused under [`BackpressurePolicy::Reject`].
    pub ticks_dropped: u64,
    /// Records that updated a device position.
    pub records_accepted: u64,
    /// Records older than the device's current one.
    pub records_stale: u64,
    /// Records with the device's current timestamp.
    pub records_duplicate: u64,
    /// Unusable records.
    pub records_malformed: u64,
    /// Alert-worthy transitions detected.
    pub transitions: u64,
    /// Devices evicted for staleness.
    pub devices_evicted: u64,
    /// Devices removed by `disconnect`.
    pub devices_disconnected: u64,
    /// Devices currently tracked.
    pub tracked_devices: u64,
    /// (device, region) pairs currently remembered.
    pub tracked_pairs: u64,
    /// Alert delivery counters.
    pub alerts: EmitterStats,
}

#[derive(Debug)]
struct ShardHandle {
    tx: Sender<ShardMsg>,
    join: Option<JoinHandle<()>>,
}

fn disconnected(shard: usize) -> FenceError {
    FenceError::Execution(ExecutionError::Disconnected {
        path: format!("shard-{shard}"),
    })
}

/// Sharded transition detector with alert dispatch.
pub struct GeofenceEngine {
    config: EngineConfig,
    regions: Arc<dyn RegionStore>,
    emitter: Arc<AlertEmitter>,
    shards: Vec<ShardHandle>,
    counters: Arc<EngineCounters>,
    next_tick: AtomicU64,
}

impl std::fmt::Debug for GeofenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeofenceEngine")
            .field("config", &self.config)
            .field("emitter", &self.emitter)
            .finish_non_exhaustive()
    }
}

impl GeofenceEngine {
    /// Starts the shard workers.
    ///
    /// # Errors
    ///
    /// `Validation` for an invalid config; `Io` if a worker thread cannot be spawned.
    pub fn start(config: EngineConfig, regions: Arc<dyn RegionStore>, emitter: AlertEmitter) -> FenceResult<Self> {
        config.validate()?;

        let emitter = Arc::new(emitter);
        let counters = Arc::new(EngineCounters::new(config.shards));

        let mut shards = Vec::with_capacity(config.shards);
        for index in 0..config.shards {
            let (tx, rx) = bounded::<ShardMsg>(config.queue_capacity);
            let worker = Shard::new(
                index,
                Arc::clone(&regions),
                Arc::clone(&emitter),
                config.stale_after_ms,
                Arc::clone(&counters),
            );
            let join = worker.spawn(rx)?;
            shards.push(ShardHandle { tx, join: Some(join) });
        }

        info!(
            shards = config.shards,
            queue_capacity = config.queue_capacity,
            backpressure = ?config.backpressure,
            "geofence engine started"
        );

        Ok(Self {
            config,
            regions,
            emitter,
            shards,
            counters,
            next_tick: AtomicU64::new(1),
        })
    }

    /// Starts an engine over an empty in-memory store with no sinks.
    ///
    /// # Errors
    ///
    /// As [`start`](Self::start).
    pub fn in_memory(config: EngineConfig) -> FenceResult<Self> {
        let emitter = AlertEmitter::new(config.stream_capacity);
        Self::start(config, Arc::new(InMemoryRegionStore::new()), emitter)
    }

    /// Adds a region; returns its generation.
    ///
    /// # Errors
    ///
    /// `Region` if the store rejects it.
    pub fn add_region(&self, geofence: Geofence) -> FenceResult<u64> {
        let id = geofence.geofence_id.clone();
        let generation = self.regions.add(geofence)?;
        info!(region = %id, generation, "region added");
        Ok(generation)
    }

    /// Replaces a region in place. Devices re-baseline against the new version.
    ///
    /// # Errors
    ///
    /// `Region` if the store rejects it; `Execution` if a shard is gone.
    pub fn update_region(&self, geofence: Geofence) -> FenceResult<u64> {
        let id = geofence.geofence_id.clone();
        let generation = self.regions.update(geofence)?;
        info!(region = %id, generation, "region updated");
        self.broadcast_purge(&id)?;
        Ok(generation)
    }

    /// Removes a region and purges its transition state.
    ///
    /// # Errors
    ///
    /// `Region(NotFound)` for an unknown id; `Execution` if a shard is gone.
    pub fn remove_region(&self, id: &GeofenceId) -> FenceResult<Geofence> {
        let removed = self.regions.remove(id)?;
        info!(region = %id, "region removed");
        self.broadcast_purge(id)?;
        Ok(removed)
    }

    /// Submits one tick of location records; returns the tick number.
    ///
    /// Under [`BackpressurePolicy::Reject`] a full shard queue fails the call
    /// with `QueueFull`; shards that already accepted their slice still
    /// process it.
    ///
    /// # Errors
    ///
    /// `Execution(QueueFull)` under `Reject`; `Execution(Disconnected)` if a shard is gone.
    pub fn submit(&self, batch: Vec<Location>) -> FenceResult<u64> {
        let tick = self.next_tick.fetch_add(1, Ordering::Relaxed);
        let reference_ms = if self.config.stale_after_ms.is_some() {
            batch
                .iter()
                .filter(|l| l.validate().is_ok())
                .map(|l| l.timestamp)
                .max()
        } else {
            None
        };

        let mut slices: Vec<Vec<Location>> = (0..self.shards.len()).map(|_| Vec::new()).collect();
        for location in batch {
            let shard = self.shard_for(&location.id);
            slices[shard].push(location);
        }

        for (index, locations) in slices.into_iter().enumerate() {
            // With staleness on, every shard sees every tick so eviction does
            // not depend on how devices hash.
            if locations.is_empty() && reference_ms.is_none() {
                continue;
            }
            let msg = ShardMsg::Tick {
                tick,
                reference_ms,
                locations,
            };
            let tx = &self.shards[index].tx;
            match self.config.backpressure {
                BackpressurePolicy::Block => tx.send(msg).map_err(|_| disconnected(index))?,
                BackpressurePolicy::Reject => match tx.try_send(msg) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.counters.ticks_dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(tick, shard = index, "shard queue full; tick rejected");
                        return Err(FenceError::Execution(ExecutionError::QueueFull {
                            capacity: self.config.queue_capacity,
                        }));
                    }
                    Err(TrySendError::Disconnected(_)) => return Err(disconnected(index)),
                },
            }
        }

        self.counters.ticks_submitted.fetch_add(1, Ordering::Relaxed);
        debug!(tick, "tick submitted");
        Ok(tick)
    }

    /// Drops a device's position and transition state. It re-baselines if it reports again.
    ///
    /// # Errors
    ///
    /// `Execution(Disconnected)` if the shard is gone.
    pub fn disconnect(&self, device: &DeviceId) -> FenceResult<()> {
        let index = self.shard_for(device);
        self.shards[index]
            .tx
            .send(ShardMsg::Disconnect { device: device.clone() })
            .map_err(|_| disconnected(index))
    }

    /// Opens a live alert stream.
    #[must_use]
    pub fn subscribe(&self) -> AlertStream {
        self.emitter.subscribe()
    }

    /// Blocks until every message submitted before this call is processed.
    ///
    /// # Errors
    ///
    /// `Execution(Disconnected)` if a shard is gone.
    pub fn flush(&self) -> FenceResult<()> {
        for (index, rx) in self.request_flush()? {
            rx.recv().map_err(|_| disconnected(index))?;
        }
        Ok(())
    }

    /// [`flush`](Self::flush) with an overall deadline.
    ///
    /// # Errors
    ///
    /// `Execution(Timeout)` if the shards do not catch up in time.
    pub fn flush_timeout(&self, timeout: Duration) -> FenceResult<()> {
        let deadline = Instant::now() + timeout;
        for (index, rx) in self.request_flush()? {
            let remaining = deadline.saturating_duration_since(Instant::now());
            rx.recv_timeout(remaining).map_err(|err| match err {
                RecvTimeoutError::Timeout => FenceError::Execution(ExecutionError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
                RecvTimeoutError::Disconnected => disconnected(index),
            })?;
        }
        Ok(())
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        EngineStats {
            ticks_submitted: load(&c.ticks_submitted),
            ticks_dropped: load(&c.ticks_dropped),
            records_accepted: load(&c.records_accepted),
            records_stale: load(&c.records_stale),
            records_duplicate: load(&c.records_duplicate),
            records_malformed: load(&c.records_malformed),
            transitions: load(&c.transitions),
            devices_evicted: load(&c.devices_evicted),
            devices_disconnected: load(&c.devices_disconnected),
            tracked_devices: c.tracked_devices.iter().map(load).sum(),
            tracked_pairs: c.tracked_pairs.iter().map(load).sum(),
            alerts: self.emitter.stats(),
        }
    }

    /// The region store.
    #[must_use]
    pub fn regions(&self) -> &Arc<dyn RegionStore> {
        &self.regions
    }

    /// The alert emitter.
    #[must_use]
    pub fn emitter(&self) -> &AlertEmitter {
        &self.emitter
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[allow(clippy::cast_possible_truncation)]
    fn shard_for(&self, device: &DeviceId) -> usize {
        let mut hasher = DefaultHasher::new();
        device.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn broadcast_purge(&self, region: &GeofenceId) -> FenceResult<()> {
        for (index, shard) in self.shards.iter().enumerate() {
            shard
                .tx
                .send(ShardMsg::PurgeRegion { region: region.clone() })
                .map_err(|_| disconnected(index))?;
        }
        Ok(())
    }

    fn request_flush(&self) -> FenceResult<Vec<(usize, Receiver<()>)>> {
        self.shards
            .iter()
            .enumerate()
            .map(|(index, shard)| {
                let (reply, rx) = bounded::<()>(1);
                shard
                    .tx
                    .send(ShardMsg::Flush { reply })
                    .map_err(|_| disconnected(index))?;
                Ok((index, rx))
            })
            .collect()
    }
}

impl Drop for GeofenceEngine {
    fn drop(&mut self) {
        // Workers drain their queues and exit once their sender is gone.
        let shards = std::mem::take(&mut self.shards);
        let mut joins = Vec::with_capacity(shards.len());
        for ShardHandle { tx, join } in shards {
            drop(tx);
            joins.extend(join);
        }
        for join in joins {
            let _ = join.join();
        }
        info!("geofence engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Alert, AlertSink};
    use crate::detector::Direction;
    use crate::error::PublishError;
    use crate::geo::LatLng;
    use crate::geofence::Polarity;

    const CENTER: LatLng = LatLng::new(0.0, 0.0);

    fn at(id: &str, distance_m: f64, ts: i64) -> Location {
        let p = CENTER.destination(90.0, distance_m);
        Location::new(id, p.lat, p.lng, ts)
    }

    fn engine(config: EngineConfig) -> GeofenceEngine {
        let engine = GeofenceEngine::in_memory(config).unwrap();
        engine
            .add_region(Geofence::circle("g1", CENTER, 1_000.0).with_name("Yard"))
            .unwrap();
        engine
    }

    #[test]
    fn test_entry_alert_flows_to_subscriber() {
        let engine = engine(EngineConfig::default());
        let stream = engine.subscribe();

        engine.submit(vec![at("d1", 2_000.0, 1)]).unwrap();
        engine.submit(vec![at("d1", 500.0, 2)]).unwrap();
        engine.flush().unwrap();

        let alerts = stream.drain();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].direction, Direction::Enter);
        assert_eq!(alerts[0].message, "d1 Entered the Yard Geofence");
        assert_eq!(engine.stats().transitions, 1);
    }

    #[test]
    fn test_devices_stay_on_one_shard() {
        let engine = engine(EngineConfig {
            shards: 8,
            ..EngineConfig::default()
        });
        let id = DeviceId::new("sticky");
        let first = engine.shard_for(&id);
        for _ in 0..10 {
            assert_eq!(engine.shard_for(&id), first);
        }
    }

    #[test]
    fn test_disconnect_rebaselines() {
        let engine = engine(EngineConfig::default());
        let stream = engine.subscribe();

        engine.submit(vec![at("d1", 2_000.0, 1)]).unwrap();
        engine.disconnect(&"d1".into()).unwrap();
        engine.submit(vec![at("d1", 500.0, 2)]).unwrap();
        engine.flush().unwrap();

        assert!(stream.drain().is_empty());
        let stats = engine.stats();
        assert_eq!(stats.devices_disconnected, 1);
        assert_eq!(stats.tracked_devices, 1);
    }

    #[test]
    fn test_remove_region_purges_state() {
        let engine = engine(EngineConfig::default());
        engine.submit(vec![at("d1", 2_000.0, 1)]).unwrap();
        engine.flush().unwrap();
        assert_eq!(engine.stats().tracked_pairs, 1);

        engine.remove_region(&"g1".into()).unwrap();
        engine.flush().unwrap();
        assert_eq!(engine.stats().tracked_pairs, 0);
    }

    #[test]
    fn test_stale_devices_are_evicted() {
        let engine = engine(EngineConfig {
            shards: 1,
            stale_after_ms: Some(10_000),
            ..EngineConfig::default()
        });
        engine.submit(vec![at("old", 2_000.0, 1_000), at("new", 2_000.0, 1_000)]).unwrap();
        engine.submit(vec![at("new", 2_000.0, 20_000)]).unwrap();
        engine.flush().unwrap();

        let stats = engine.stats();
        assert_eq!(stats.devices_evicted, 1);
        assert_eq!(stats.tracked_devices, 1);
    }

    #[test]
    fn test_present_device_with_lagging_clock_is_kept() {
        let engine = engine(EngineConfig {
            shards: 1,
            stale_after_ms: Some(10_000),
            ..EngineConfig::default()
        });
        let stream = engine.subscribe();

        engine.submit(vec![at("A", 2_000.0, 1_000), at("B", 2_000.0, 20_000)]).unwrap();
        engine.submit(vec![at("A", 500.0, 2_000), at("B", 2_000.0, 21_000)]).unwrap();
        engine.flush().unwrap();

        let alerts = stream.drain();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].device_id.as_str(), "A");
        assert_eq!(alerts[0].direction, Direction::Enter);
        assert_eq!(engine.stats().devices_evicted, 0);
    }

    struct GateSink {
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl AlertSink for GateSink {
        fn name(&self) -> &str {
            "gate"
        }

        fn publish(&self, _alert: &Alert) -> Result<(), PublishError> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            Ok(())
        }
    }

    #[test]
    fn test_reject_policy_reports_queue_full() {
        let (entered_tx, entered_rx) = bounded(4);
        let (release_tx, release_rx) = bounded(4);
        let emitter = AlertEmitter::new(16).with_sink(GateSink {
            entered: entered_tx,
            release: release_rx,
        });
        let regions = Arc::new(InMemoryRegionStore::with_regions(vec![Geofence::circle("g1", CENTER, 1_000.0)]).unwrap());
        let config = EngineConfig {
            shards: 1,
            queue_capacity: 1,
            backpressure: BackpressurePolicy::Reject,
            ..EngineConfig::default()
        };
        let engine = GeofenceEngine::start(config, regions, emitter).unwrap();

        engine.submit(vec![at("d1", 2_000.0, 1)]).unwrap();
        engine.submit(vec![at("d1", 500.0, 2)]).unwrap();
        // Worker is now parked inside the sink.
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        engine.submit(vec![at("d1", 500.0, 3)]).unwrap();
        let err = engine.submit(vec![at("d1", 500.0, 4)]).unwrap_err();
        assert!(matches!(err, FenceError::Execution(ExecutionError::QueueFull { capacity: 1 })));
        assert!(err.is_retryable());

        release_tx.send(()).unwrap();
        engine.flush_timeout(Duration::from_secs(5)).unwrap();
        let stats = engine.stats();
        assert_eq!(stats.ticks_dropped, 1);
        assert_eq!(stats.ticks_submitted, 3);
    }

    #[test]
    fn test_negative_region_exit() {
        let engine = GeofenceEngine::in_memory(EngineConfig::default()).unwrap();
        engine
            .add_region(
                Geofence::circle("g2", CENTER, 1_000.0)
                    .with_name("Camp")
                    .with_polarity(Polarity::Negative),
            )
            .unwrap();
        let stream = engine.subscribe();

        engine.submit(vec![at("B", 100.0, 1)]).unwrap();
        engine.submit(vec![at("B", 1_500.0, 2)]).unwrap();
        engine.flush().unwrap();

        let alerts = stream.drain();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "B Exited the Camp Geofence");
    }
}
