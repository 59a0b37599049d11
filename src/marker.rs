//! Smooth marker movement for map views.
//!
//! Each device's marker glides from where it was drawn to its newest
//! position over a fixed duration instead of jumping. A new target that
//! arrives mid-animation starts from the point currently on screen.

use std::collections::HashMap;
use std::time::Duration;

use crate::geo::LatLng;
use crate::location::{DeviceId, Location};

/// Default glide duration, in milliseconds.
pub const DEFAULT_ANIMATION_MS: u64 = 1000;

#[derive(Debug, Clone, Copy)]
struct Segment {
    from: LatLng,
    to: LatLng,
    started_at: i64,
}

/// Per-device marker interpolation.
#[derive(Debug, Clone)]
pub struct MarkerAnimator {
    duration_ms: i64,
    markers: HashMap<DeviceId, Segment>,
}

impl Default for MarkerAnimator {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_ANIMATION_MS))
    }
}

impl MarkerAnimator {
    /// Animator gliding over `duration`. A zero duration jumps.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            duration_ms: i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
            markers: HashMap::new(),
        }
    }

    /// Moves a device's marker towards `target`, starting at `now_ms`.
    ///
    /// The first target for a device is placed directly.
    pub fn set_target(&mut self, device: &DeviceId, target: LatLng, now_ms: i64) {
        let from = self
            .markers
            .get(device)
            .map_or(target, |segment| self.interpolate(segment, now_ms));

        self.markers.insert(
            device.clone(),
            Segment {
                from,
                to: target,
                started_at: now_ms,
            },
        );
    }

    /// Convenience for [`set_target`](Self::set_target) from a location record.
    pub fn track(&mut self, location: &Location, now_ms: i64) {
        self.set_target(&location.id, location.position(), now_ms);
    }

    /// Where the marker is drawn at `now_ms`.
    #[must_use]
    pub fn position_at(&self, device: &DeviceId, now_ms: i64) -> Option<LatLng> {
        self.markers.get(device).map(|s| self.interpolate(s, now_ms))
    }

    /// True while the marker has not reached its target.
    #[must_use]
    pub fn is_animating(&self, device: &DeviceId, now_ms: i64) -> bool {
        self.markers
            .get(device)
            .is_some_and(|s| s.from != s.to && now_ms - s.started_at < self.duration_ms)
    }

    /// Drops a marker. Returns whether it existed.
    pub fn remove(&mut self, device: &DeviceId) -> bool {
        self.markers.remove(device).is_some()
    }

    /// Number of markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// True when no marker is drawn.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    #[allow(clippy::cast_precision_loss)]
    fn interpolate(&self, segment: &Segment, now_ms: i64) -> LatLng {
        if self.duration_ms <= 0 {
            return segment.to;
        }
        let elapsed = (now_ms - segment.started_at).max(0);
        let t = (elapsed as f64 / self.duration_ms as f64).min(1.0);
        LatLng::new(
            segment.from.lat + (segment.to.lat - segment.from.lat) * t,
            segment.from.lng + (segment.to.lng - segment.from.lng) * t,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: LatLng, b: LatLng) -> bool {
        (a.lat - b.lat).abs() < 1e-12 && (a.lng - b.lng).abs() < 1e-12
    }

    #[test]
    fn test_first_target_is_placed_directly() {
        let mut anim = MarkerAnimator::default();
        let dev = DeviceId::new("d1");
        anim.set_target(&dev, LatLng::new(10.0, 20.0), 0);
        assert!(close(anim.position_at(&dev, 0).unwrap(), LatLng::new(10.0, 20.0)));
        assert!(!anim.is_animating(&dev, 0));
    }

    #[test]
    fn test_linear_glide_then_clamp() {
        let mut anim = MarkerAnimator::default();
        let dev = DeviceId::new("d1");
        anim.set_target(&dev, LatLng::new(0.0, 0.0), 0);
        anim.set_target(&dev, LatLng::new(10.0, 20.0), 1_000);

        assert!(close(anim.position_at(&dev, 1_500).unwrap(), LatLng::new(5.0, 10.0)));
        assert!(anim.is_animating(&dev, 1_500));
        assert!(close(anim.position_at(&dev, 2_000).unwrap(), LatLng::new(10.0, 20.0)));
        assert!(close(anim.position_at(&dev, 9_000).unwrap(), LatLng::new(10.0, 20.0)));
        assert!(!anim.is_animating(&dev, 2_000));
    }

    #[test]
    fn test_retarget_starts_from_current_point() {
        let mut anim = MarkerAnimator::default();
        let dev = DeviceId::new("d1");
        anim.set_target(&dev, LatLng::new(0.0, 0.0), 0);
        anim.set_target(&dev, LatLng::new(10.0, 0.0), 0);
        // Halfway there, redirect.
        anim.set_target(&dev, LatLng::new(5.0, 10.0), 500);

        assert!(close(anim.position_at(&dev, 500).unwrap(), LatLng::new(5.0, 0.0)));
        assert!(close(anim.position_at(&dev, 1_000).unwrap(), LatLng::new(5.0, 5.0)));
    }

    #[test]
    fn test_zero_duration_jumps_and_remove() {
        let mut anim = MarkerAnimator::new(Duration::ZERO);
        let loc = Location::new("d1", 1.0, 1.0, 0);
        anim.track(&loc, 0);
        anim.track(&Location::new("d1", 2.0, 2.0, 1), 1);
        assert!(close(anim.position_at(&loc.id, 1).unwrap(), LatLng::new(2.0, 2.0)));

        assert!(anim.remove(&loc.id));
        assert!(!anim.remove(&loc.id));
        assert!(anim.position_at(&loc.id, 2).is_none());
        assert!(anim.is_empty());
    }
}
