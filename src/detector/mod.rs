//! Transition detection.
//!
//! The detector compares each device's containment in each region against
//! what it remembered from the previous evaluation and raises a
//! [`Transition`] when the change is the one the region's polarity cares
//! about. A pair seen for the first time only records a baseline, so
//! starting up (or drawing a region on top of a device) never alerts.
//!
//! Remembered state is keyed by the region generation it was computed
//! against. Updating a region in place or re-adding a deleted id bumps the
//! generation, which turns the next evaluation into a fresh baseline.

mod state;
mod transition;

pub use state::{PairState, TransitionStates};
pub use transition::{decide, Decision, Direction, Transition};

use tracing::{debug, trace, warn};

use crate::error::ValidationError;
use crate::geofence::GeofenceId;
use crate::location::{DeviceId, Location};
use crate::region::RegionSnapshot;

/// Outcome of one tick.
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    /// Alert-worthy transitions, in evaluation order.
    pub transitions: Vec<Transition>,
    /// Records skipped because they were unusable.
    pub skipped: Vec<(DeviceId, ValidationError)>,
    /// (device, region) pairs evaluated.
    pub evaluated_pairs: usize,
    /// Pairs that only recorded a baseline.
    pub baselined: usize,
    /// Transitions in the direction the region ignores.
    pub silent: usize,
    /// Pairs whose containment could not be computed.
    pub failed_pairs: usize,
    /// State entries dropped because their region is gone.
    pub purged: usize,
}

/// Stateful (device, region) transition detector.
///
/// Not internally synchronized; the engine gives each shard its own detector.
#[derive(Debug, Default)]
pub struct TransitionDetector {
    states: TransitionStates,
}

impl TransitionDetector {
    /// Detector with no memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates every device against every region in `regions`.
    ///
    /// State for regions absent from the snapshot is dropped first. Unusable
    /// records are reported and skipped; a region whose geometry cannot be
    /// evaluated is skipped for that pair without touching its state.
    pub fn evaluate_tick<'a>(
        &mut self,
        locations: impl IntoIterator<Item = &'a Location>,
        regions: &RegionSnapshot,
    ) -> TickReport {
        let mut report = TickReport {
            purged: self.states.retain_regions(|id| regions.contains(id)),
            ..TickReport::default()
        };

        for location in locations {
            let point = match location.validate() {
                Ok(point) => point,
                Err(e) => {
                    debug!(device = %location.id, error = %e, "skipping unusable location");
                    report.skipped.push((location.id.clone(), e));
                    continue;
                }
            };

            for entry in regions.iter() {
                let geofence = &entry.geofence;
                let inside = match geofence.contains(point) {
                    Ok(inside) => inside,
                    Err(e) => {
                        warn!(region = %geofence.geofence_id, error = %e, "containment failed");
                        report.failed_pairs += 1;
                        continue;
                    }
                };
                report.evaluated_pairs += 1;

                let previous = self
                    .states
                    .get(&location.id, &geofence.geofence_id)
                    .filter(|s| s.generation == entry.generation)
                    .map(|s| s.inside);

                self.states.upsert(
                    &location.id,
                    &geofence.geofence_id,
                    PairState {
                        inside,
                        generation: entry.generation,
                        observed_at: location.timestamp,
                    },
                );

                match decide(geofence.polarity, previous, inside) {
                    Decision::Baseline => report.baselined += 1,
                    Decision::Unchanged => {}
                    Decision::Silent(direction) => {
                        trace!(device = %location.id, region = %geofence.geofence_id, ?direction, "silent transition");
                        report.silent += 1;
                    }
                    Decision::Alert(direction) => {
                        debug!(device = %location.id, region = %geofence.geofence_id, ?direction, "transition");
                        report.transitions.push(Transition {
                            location: location.clone(),
                            geofence: geofence.clone(),
                            direction,
                        });
                    }
                }
            }
        }

        report
    }

    /// Forgets a device (disconnect or eviction).
    pub fn remove_device(&mut self, device: &DeviceId) -> usize {
        self.states.remove_device(device)
    }

    /// Forgets a region.
    pub fn remove_region(&mut self, region: &GeofenceId) -> usize {
        self.states.remove_region(region)
    }

    /// Remembered containment for a pair, if any.
    #[must_use]
    pub fn state(&self, device: &DeviceId, region: &GeofenceId) -> Option<PairState> {
        self.states.get(device, region)
    }

    /// Number of remembered pairs.
    #[must_use]
    pub const fn tracked_pairs(&self) -> usize {
        self.states.len()
    }
}
