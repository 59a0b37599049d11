//! Containment tests.
//!
//! Pure functions deciding whether a point lies inside a region shape.
//! Circles use great-circle distance; polygons and rectangles use even-odd ray
//! casting over (lng, lat) as planar coordinates. Points on a polygon edge or
//! vertex count as inside. Geofences spanning the antimeridian are not
//! supported.

use crate::error::ValidationError;
use crate::geo::{haversine_distance_m, BoundingBox, LatLng};
use crate::geofence::{Geofence, Shape};

/// Tolerance in degrees for the on-edge test (~0.1 mm at the equator).
const EDGE_EPSILON_DEG: f64 = 1e-9;

/// Decides whether `point` is inside `shape`.
///
/// # Errors
///
/// `InvalidCoordinate` if the point is unusable; `InvalidGeometry` if the
/// shape is degenerate (radius not positive/finite, fewer than 3 vertices).
pub fn contains(point: LatLng, shape: &Shape) -> Result<bool, ValidationError> {
    if !point.is_valid() {
        return Err(ValidationError::InvalidCoordinate {
            lat: point.lat,
            lng: point.lng,
        });
    }

    match shape {
        Shape::Circle { center, radius } => {
            if !radius.is_finite() || *radius <= 0.0 {
                return Err(ValidationError::geometry(format!(
                    "circle radius must be positive and finite, got {radius}"
                )));
            }
            Ok(haversine_distance_m(point, *center) <= *radius)
        }
        Shape::Polygon { coordinates } | Shape::Rectangle { coordinates } => {
            if coordinates.len() < 3 {
                return Err(ValidationError::geometry(format!(
                    "{} needs at least 3 vertices, got {}",
                    shape.kind(),
                    coordinates.len()
                )));
            }
            Ok(point_in_ring(point, coordinates))
        }
    }
}

impl Shape {
    /// See [`contains`].
    ///
    /// # Errors
    ///
    /// Same as [`contains`].
    pub fn contains(&self, point: LatLng) -> Result<bool, ValidationError> {
        contains(point, self)
    }
}

impl Geofence {
    /// See [`contains`].
    ///
    /// # Errors
    ///
    /// Same as [`contains`].
    pub fn contains(&self, point: LatLng) -> Result<bool, ValidationError> {
        contains(point, &self.shape)
    }
}

/// Even-odd ray casting with an inclusive boundary.
///
/// The ring is implicitly closed; a repeated closing vertex is harmless.
#[must_use]
pub fn point_in_ring(point: LatLng, ring: &[LatLng]) -> bool {
    let Some(bbox) = BoundingBox::of(ring) else {
        return false;
    };
    // Cheap reject only; a hit still goes through the exact test.
    if !bbox.contains(point) {
        return false;
    }

    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[j];

        if on_segment(point, a, b) {
            return true;
        }

        if (a.lat > point.lat) != (b.lat > point.lat) {
            let crossing_lng = (b.lng - a.lng) * (point.lat - a.lat) / (b.lat - a.lat) + a.lng;
            if point.lng < crossing_lng {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(p: LatLng, a: LatLng, b: LatLng) -> bool {
    let dx = b.lng - a.lng;
    let dy = b.lat - a.lat;
    let len = dx.hypot(dy);
    if len == 0.0 {
        return (p.lng - a.lng).abs() <= EDGE_EPSILON_DEG && (p.lat - a.lat).abs() <= EDGE_EPSILON_DEG;
    }

    // Perpendicular distance from p to the line through a and b.
    let cross = dx * (p.lat - a.lat) - dy * (p.lng - a.lng);
    if cross.abs() / len > EDGE_EPSILON_DEG {
        return false;
    }

    p.lng >= a.lng.min(b.lng) - EDGE_EPSILON_DEG
        && p.lng <= a.lng.max(b.lng) + EDGE_EPSILON_DEG
        && p.lat >= a.lat.min(b.lat) - EDGE_EPSILON_DEG
        && p.lat <= a.lat.max(b.lat) + EDGE_EPSILON_DEG
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ll(lat: f64, lng: f64) -> LatLng {
        LatLng::new(lat, lng)
    }

    fn square() -> Vec<LatLng> {
        vec![ll(0.0, 0.0), ll(0.0, 1.0), ll(1.0, 1.0), ll(1.0, 0.0)]
    }

    /// A "U": the notch between the arms is inside the bounding box but outside the shape.
    fn u_shape() -> Vec<LatLng> {
        vec![
            ll(0.0, 0.0),
            ll(0.0, 3.0),
            ll(3.0, 3.0),
            ll(3.0, 2.0),
            ll(1.0, 2.0),
            ll(1.0, 1.0),
            ll(3.0, 1.0),
            ll(3.0, 0.0),
        ]
    }

    #[test]
    fn test_circle_scenario_distances() {
        let center = ll(0.0, 0.0);
        let shape = Shape::Circle { center, radius: 1_000.0 };

        assert!(!contains(center.destination(90.0, 2_000.0), &shape).unwrap());
        assert!(contains(center.destination(90.0, 500.0), &shape).unwrap());
        assert!(contains(center.destination(0.0, 100.0), &shape).unwrap());
        assert!(!contains(center.destination(180.0, 1_500.0), &shape).unwrap());
        assert!(contains(center, &shape).unwrap());
    }

    #[test]
    fn test_circle_is_translation_consistent() {
        // Same offsets from three different centers give the same answer.
        for center in [ll(0.0, 0.0), ll(16.2487, 77.3660), ll(-33.8688, 151.2093)] {
            let shape = Shape::Circle { center, radius: 750.0 };
            assert!(contains(center.destination(45.0, 749.0), &shape).unwrap());
            assert!(!contains(center.destination(45.0, 751.0), &shape).unwrap());
            assert!(contains(center.destination(200.0, 300.0), &shape).unwrap());
        }
    }

    #[test]
    fn test_square_polygon() {
        let shape = Shape::Polygon { coordinates: square() };
        assert!(contains(ll(0.5, 0.5), &shape).unwrap());
        assert!(!contains(ll(1.5, 0.5), &shape).unwrap());
        assert!(!contains(ll(0.5, -0.1), &shape).unwrap());
    }

    #[test]
    fn test_concave_polygon_excludes_notch() {
        let shape = Shape::Polygon { coordinates: u_shape() };
        // In the bounding box, outside the polygon.
        assert!(!contains(ll(2.0, 1.5), &shape).unwrap());
        // Left arm, right arm and base.
        assert!(contains(ll(2.0, 0.5), &shape).unwrap());
        assert!(contains(ll(2.0, 2.5), &shape).unwrap());
        assert!(contains(ll(0.5, 1.5), &shape).unwrap());
    }

    #[test]
    fn test_boundary_counts_as_inside() {
        let shape = Shape::Rectangle { coordinates: square() };
        assert!(contains(ll(0.0, 0.5), &shape).unwrap());
        assert!(contains(ll(1.0, 1.0), &shape).unwrap());
        assert!(contains(ll(0.25, 1.0), &shape).unwrap());
    }

    #[test]
    fn test_closed_ring_with_repeated_first_vertex() {
        let mut ring = square();
        ring.push(ring[0]);
        assert!(point_in_ring(ll(0.5, 0.5), &ring));
        assert!(!point_in_ring(ll(2.0, 2.0), &ring));
    }

    #[test]
    fn test_rectangle_same_as_polygon() {
        let g = Geofence::rectangle("r", ll(10.0, 20.0), ll(10.01, 20.02));
        assert!(g.contains(ll(10.005, 20.01)).unwrap());
        assert!(!g.contains(ll(10.02, 20.01)).unwrap());
    }

    #[test]
    fn test_degenerate_shapes_fail_instead_of_panicking() {
        let two = Shape::Polygon {
            coordinates: vec![ll(0.0, 0.0), ll(1.0, 1.0)],
        };
        assert!(matches!(
            contains(ll(0.5, 0.5), &two),
            Err(ValidationError::InvalidGeometry { .. })
        ));

        let empty = Shape::Rectangle { coordinates: vec![] };
        assert!(contains(ll(0.0, 0.0), &empty).is_err());

        let flat = Shape::Circle {
            center: ll(0.0, 0.0),
            radius: 0.0,
        };
        assert!(contains(ll(0.0, 0.0), &flat).is_err());
    }

    #[test]
    fn test_invalid_point_rejected() {
        let shape = Shape::Polygon { coordinates: square() };
        assert!(matches!(
            contains(ll(f64::NAN, 0.5), &shape),
            Err(ValidationError::InvalidCoordinate { .. })
        ));
    }
}
