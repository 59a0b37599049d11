//! Geographic primitives.
//!
//! Coordinates are WGS84 degrees. Distances are great-circle (haversine) on a
//! sphere of radius [`EARTH_RADIUS_M`], the same model web map clients use to
//! draw circles, so a radius picked on a map and a distance measured here agree.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Valid latitude range in degrees.
pub const MAX_LAT: f64 = 90.0;

/// Valid longitude range in degrees.
pub const MAX_LNG: f64 = 180.0;

/// A geographic point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl LatLng {
    /// Creates a point without validation.
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Creates a point, rejecting NaN, infinities and out of range values.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidCoordinate` for unusable input.
    pub fn checked(lat: f64, lng: f64) -> Result<Self, ValidationError> {
        let point = Self { lat, lng };
        if point.is_valid() {
            Ok(point)
        } else {
            Err(ValidationError::InvalidCoordinate { lat, lng })
        }
    }

    /// True when both components are finite and within WGS84 bounds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-MAX_LAT..=MAX_LAT).contains(&self.lat)
            && (-MAX_LNG..=MAX_LNG).contains(&self.lng)
    }

    /// Great-circle distance to `other` in meters.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        haversine_distance_m(*self, *other)
    }

    /// Point reached by travelling `distance_m` from `self` along `bearing_deg`
    /// (0 = north, 90 = east) on the sphere.
    #[must_use]
    pub fn destination(&self, bearing_deg: f64, distance_m: f64) -> Self {
        let delta = distance_m / EARTH_RADIUS_M;
        let theta = bearing_deg.to_radians();
        let phi1 = self.lat.to_radians();
        let lambda1 = self.lng.to_radians();

        let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
        let lambda2 = lambda1
            + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

        // Normalize longitude to [-180, 180).
        let lng = (lambda2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;
        Self::new(phi2.to_degrees(), lng)
    }
}

/// Haversine distance between two points in meters.
#[must_use]
pub fn haversine_distance_m(a: LatLng, b: LatLng) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points.
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lng: f64,
    /// Eastern edge.
    pub max_lng: f64,
}

impl BoundingBox {
    /// Bounding box of a vertex list, `None` when empty.
    #[must_use]
    pub fn of(points: &[LatLng]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self {
            min_lat: first.lat,
            max_lat: first.lat,
            min_lng: first.lng,
            max_lng: first.lng,
        };
        for p in &points[1..] {
            bbox.min_lat = bbox.min_lat.min(p.lat);
            bbox.max_lat = bbox.max_lat.max(p.lat);
            bbox.min_lng = bbox.min_lng.min(p.lng);
            bbox.max_lng = bbox.max_lng.max(p.lng);
        }
        Some(bbox)
    }

    /// Inclusive containment.
    #[must_use]
    pub fn contains(&self, point: LatLng) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }
}
