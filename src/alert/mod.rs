//! Alert construction and delivery.
//!
//! Every alert-worthy transition becomes one [`Alert`], published to each
//! registered [`AlertSink`] and to every live [`AlertStream`]. Delivery is
//! at most once: a failed publish is logged and counted, never retried, and
//! the detector's state is not rolled back.

mod sink;
mod stream;

pub use sink::{AlertSink, ChannelSink, JsonLinesSink};
pub use stream::{AlertStream, SubscriptionId};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::detector::Direction;
use crate::error::PublishError;
use crate::geofence::{AlertType, Geofence, GeofenceId};
use crate::location::{DeviceId, Location};

use stream::Subscribers;

/// One emitted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique id of this alert.
    pub alert_id: Uuid,
    /// Device that crossed the boundary.
    pub device_id: DeviceId,
    /// Hardware tracking tag of the device.
    pub tracking_id: String,
    /// Display name of the device.
    pub device_name: String,
    /// Region crossed.
    pub geofence_id: GeofenceId,
    /// Severity, from the region.
    pub alert_type: AlertType,
    /// Entry or exit.
    pub direction: Direction,
    /// Human readable text, e.g. "Ravi Entered the Depot Geofence".
    pub message: String,
    /// Timestamp of the location record that triggered the alert (ms).
    pub observed_at: i64,
    /// When the alert was emitted.
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Builds the alert for a transition.
    #[must_use]
    pub fn new(location: &Location, geofence: &Geofence, direction: Direction) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            device_id: location.id.clone(),
            tracking_id: location.tracking_id.clone(),
            device_name: location.display_name().to_string(),
            geofence_id: geofence.geofence_id.clone(),
            alert_type: geofence.alert_type,
            direction,
            message: message(location, geofence, direction),
            observed_at: location.timestamp,
            timestamp: Utc::now(),
        }
    }
}

/// Alert text for a transition.
#[must_use]
pub fn message(location: &Location, geofence: &Geofence, direction: Direction) -> String {
    format!(
        "{} {} the {} Geofence",
        location.display_name(),
        direction.verb(),
        geofence.display_name()
    )
}

/// Delivery outcome of one alert.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Sinks that accepted the alert.
    pub delivered: usize,
    /// Failures by sink.
    pub failures: Vec<PublishError>,
    /// Subscriber streams that were full or gone.
    pub dropped: usize,
}

/// Emitter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmitterStats {
    /// Alerts emitted.
    pub emitted: u64,
    /// Sink publishes that failed.
    pub publish_failures: u64,
    /// Subscriber deliveries dropped.
    pub dropped_deliveries: u64,
    /// Live subscriber streams.
    pub subscribers: u64,
}

/// Builds and publishes alerts.
pub struct AlertEmitter {
    sinks: Vec<Box<dyn AlertSink>>,
    subscribers: Arc<Subscribers>,
    stream_capacity: usize,
    emitted: AtomicU64,
    publish_failures: AtomicU64,
    dropped_deliveries: AtomicU64,
}

impl std::fmt::Debug for AlertEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sinks: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("AlertEmitter")
            .field("sinks", &sinks)
            .field("stream_capacity", &self.stream_capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for AlertEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl AlertEmitter {
    /// Emitter with no sinks; subscriber streams buffer `stream_capacity` alerts.
    #[must_use]
    pub fn new(stream_capacity: usize) -> Self {
        Self {
            sinks: Vec::new(),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            stream_capacity: stream_capacity.max(1),
            emitted: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            dropped_deliveries: AtomicU64::new(0),
        }
    }

    /// Adds a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl AlertSink + 'static) -> Self {
        self.add_sink(Box::new(sink));
        self
    }

    /// Adds a sink.
    pub fn add_sink(&mut self, sink: Box<dyn AlertSink>) {
        info!(sink = sink.name(), "alert sink registered");
        self.sinks.push(sink);
    }

    /// Opens a new subscriber stream.
    pub fn subscribe(&self) -> AlertStream {
        let id = SubscriptionId::new();
        let (tx, rx) = bounded::<Alert>(self.stream_capacity);
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.insert(id, tx);
        }
        debug!(subscription = %id, "alert stream opened");
        AlertStream::new(id, rx, Arc::downgrade(&self.subscribers))
    }

    /// Builds the alert for a transition and publishes it.
    ///
    /// Publishing failures are logged and counted; the alert is returned regardless.
    pub fn emit(&self, location: &Location, geofence: &Geofence, direction: Direction) -> Alert {
        let alert = Alert::new(location, geofence, direction);
        self.emitted.fetch_add(1, Ordering::Relaxed);
        info!(
            device = %alert.device_id,
            region = %alert.geofence_id,
            alert_type = alert.alert_type.label(),
            "{}",
            alert.message
        );
        self.publish(&alert);
        alert
    }

    /// Publishes an already built alert to every sink and subscriber.
    pub fn publish(&self, alert: &Alert) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for sink in &self.sinks {
            match sink.publish(alert) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(sink = sink.name(), alert = %alert.alert_id, error = %e, "alert publish failed");
                    self.publish_failures.fetch_add(1, Ordering::Relaxed);
                    report.failures.push(e);
                }
            }
        }

        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|id, tx| match tx.try_send(alert.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    debug!(subscription = %id, "subscriber full; alert dropped");
                    report.dropped += 1;
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    report.dropped += 1;
                    false
                }
            });
        }
        self.dropped_deliveries
            .fetch_add(report.dropped as u64, Ordering::Relaxed);

        report
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> EmitterStats {
        let subscribers = self.subscribers.lock().map_or(0, |s| s.len() as u64);
        EmitterStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            dropped_deliveries: self.dropped_deliveries.load(Ordering::Relaxed),
            subscribers,
        }
    }
}
