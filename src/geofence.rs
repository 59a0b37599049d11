//! Geofence definitions.
//!
//! A geofence is a named region with a shape, a polarity (alert on entry or
//! on exit) and a severity. Ids are chosen by the caller, typically a UUID
//! minted when the region is drawn, and stay stable for the region's lifetime.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::geo::LatLng;

/// Caller-assigned region identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeofenceId(String);

impl GeofenceId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeofenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GeofenceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for GeofenceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Alert severity attached to a region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Routine notice.
    #[default]
    Informational,
    /// Needs attention.
    Warning,
    /// Needs immediate action.
    Critical,
}

impl AlertType {
    /// Upper-case label used in notification banners.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Informational => "INFORMATIONAL",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Which containment change a region alerts on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Alert when a device enters the region.
    #[default]
    Positive,
    /// Alert when a device leaves the region.
    Negative,
}

/// Region geometry.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Shape {
    /// Disc around `center`; `radius` in meters.
    Circle { center: LatLng, radius: f64 },

    /// Closed ring of vertices, implicitly closed from last to first.
    Polygon { coordinates: Vec<LatLng> },

    /// Polygon drawn with axis-aligned intent. Evaluated exactly like a polygon.
    Rectangle { coordinates: Vec<LatLng> },
}

impl Shape {
    /// Short shape name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Circle { .. } => "circle",
            Self::Polygon { .. } => "polygon",
            Self::Rectangle { .. } => "rectangle",
        }
    }

    /// Checks the shape is evaluable.
    ///
    /// # Errors
    ///
    /// `ValidationError::InvalidGeometry` for non-positive or non-finite radii,
    /// out of range coordinates, or rings with fewer than 3 distinct vertices.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Circle { center, radius } => {
                if !center.is_valid() {
                    return Err(ValidationError::geometry(format!(
                        "circle center ({}, {}) is not a valid coordinate",
                        center.lat, center.lng
                    )));
                }
                if !radius.is_finite() || *radius <= 0.0 {
                    return Err(ValidationError::geometry(format!(
                        "circle radius must be positive and finite, got {radius}"
                    )));
                }
                Ok(())
            }
            Self::Polygon { coordinates } | Self::Rectangle { coordinates } => {
                validate_ring(self.kind(), coordinates)
            }
        }
    }
}

fn validate_ring(kind: &str, coordinates: &[LatLng]) -> Result<(), ValidationError> {
    if let Some(bad) = coordinates.iter().find(|p| !p.is_valid()) {
        return Err(ValidationError::geometry(format!(
            "{kind} vertex ({}, {}) is not a valid coordinate",
            bad.lat, bad.lng
        )));
    }

    let mut distinct: Vec<LatLng> = Vec::with_capacity(coordinates.len());
    for p in coordinates {
        if !distinct.contains(p) {
            distinct.push(*p);
        }
    }
    if distinct.len() < 3 {
        return Err(ValidationError::geometry(format!(
            "{kind} needs at least 3 distinct vertices, got {}",
            distinct.len()
        )));
    }
    Ok(())
}

/// A named region with an alerting policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    /// Stable identifier.
    pub geofence_id: GeofenceId,
    /// Display name used in alert messages.
    #[serde(default)]
    pub name: String,
    /// Severity of alerts raised by this region.
    #[serde(default)]
    pub alert_type: AlertType,
    /// Entry or exit alerting.
    #[serde(default)]
    pub polarity: Polarity,
    /// Geometry.
    #[serde(flatten)]
    pub shape: Shape,
}

impl Geofence {
    /// Region with default policy (positive, informational), as freshly drawn.
    #[must_use]
    pub fn new(geofence_id: GeofenceId, shape: Shape) -> Self {
        Self {
            geofence_id,
            name: String::new(),
            alert_type: AlertType::default(),
            polarity: Polarity::default(),
            shape,
        }
    }

    /// Circular region.
    #[must_use]
    pub fn circle(geofence_id: impl Into<GeofenceId>, center: LatLng, radius_m: f64) -> Self {
        Self::new(
            geofence_id.into(),
            Shape::Circle {
                center,
                radius: radius_m,
            },
        )
    }

    /// Polygonal region.
    #[must_use]
    pub fn polygon(geofence_id: impl Into<GeofenceId>, coordinates: Vec<LatLng>) -> Self {
        Self::new(geofence_id.into(), Shape::Polygon { coordinates })
    }

    /// Rectangle spanning two opposite corners, stored as a 4-vertex ring.
    #[must_use]
    pub fn rectangle(geofence_id: impl Into<GeofenceId>, south_west: LatLng, north_east: LatLng) -> Self {
        let coordinates = vec![
            LatLng::new(south_west.lat, south_west.lng),
            LatLng::new(north_east.lat, south_west.lng),
            LatLng::new(north_east.lat, north_east.lng),
            LatLng::new(south_west.lat, north_east.lng),
        ];
        Self::new(geofence_id.into(), Shape::Rectangle { coordinates })
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_alert_type(mut self, alert_type: AlertType) -> Self {
        self.alert_type = alert_type;
        self
    }

    /// Sets the polarity.
    #[must_use]
    pub fn with_polarity(mut self, polarity: Polarity) -> Self {
        self.polarity = polarity;
        self
    }

    /// Name shown in alert text; falls back to the id for unnamed regions.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            self.geofence_id.as_str()
        } else {
            &self.name
        }
    }

    /// Validates id and geometry.
    ///
    /// # Errors
    ///
    /// `ValidationError::EmptyId` or `ValidationError::InvalidGeometry`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.geofence_id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyId {
                field: "geofence_id".to_string(),
            });
        }
        self.shape.validate()
    }
}
