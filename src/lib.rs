//! # Fencewatch - Live Geofencing Engine
//!
//! Fencewatch watches a stream of device locations against a set of drawn
//! regions and raises an alert the moment a device crosses a boundary in the
//! direction a region cares about.
//!
//! ## Core Concepts
//!
//! - **Geofence**: a named circle, polygon or rectangle with an alert severity
//!   and a polarity (alert on entry, or alert on exit)
//! - **Location feed**: latest-timestamp-wins table of device positions
//! - **Transition**: a containment change for a (device, region) pair between
//!   consecutive ticks; the first observation of a pair is only a baseline
//! - **Alert**: the emitted record, delivered at most once to sinks and streams
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fencewatch::{EngineConfig, Geofence, GeofenceEngine, LatLng, Location};
//!
//! # fn main() -> fencewatch::FenceResult<()> {
//! let engine = GeofenceEngine::in_memory(EngineConfig::default())?;
//! engine.add_region(Geofence::circle("depot", LatLng::new(16.2, 77.3), 250.0).with_name("Depot"))?;
//! let alerts = engine.subscribe();
//!
//! engine.submit(vec![Location::new("truck-7", 16.21, 77.3, 1_700_000_000_000)])?;
//! engine.submit(vec![Location::new("truck-7", 16.2, 77.3, 1_700_000_005_000)])?;
//! engine.flush()?;
//!
//! for alert in alerts.drain() {
//!     println!("{}", alert.message); // "truck-7 Entered the Depot Geofence"
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod geo;
pub mod geofence;
pub mod geometry;
pub mod location;

// Regions, detection and delivery
pub mod alert;
pub mod detector;
pub mod region;

// Runtime
pub mod config;
pub mod engine;
pub mod marker;

// Re-export primary types at crate root for convenience
pub use alert::{Alert, AlertEmitter, AlertSink, AlertStream, ChannelSink, JsonLinesSink};
pub use config::{BackpressurePolicy, EngineConfig};
pub use detector::{Direction, TickReport, Transition, TransitionDetector};
pub use engine::{EngineStats, GeofenceEngine};
pub use error::{ExecutionError, FenceError, FenceResult, PublishError, RegionError, ValidationError};
pub use geo::{haversine_distance_m, BoundingBox, LatLng};
pub use geofence::{AlertType, Geofence, GeofenceId, Polarity, Shape};
pub use location::{DeviceId, FeedLine, FeedUpdate, Location, LocationFeed, RejectedRecord};
pub use marker::MarkerAnimator;
pub use region::{InMemoryRegionStore, RegionSnapshot, RegionStore};

#[cfg(feature = "persistent")]
pub use region::{PersistentConfig, PersistentRegionStore};
