//! Device locations and the latest-wins location feed.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::geo::LatLng;

/// Identifier of a tracked device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Latest reported position of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Device identifier (one live record per id).
    pub id: DeviceId,
    /// Display name of the tracked person or asset.
    #[serde(default)]
    pub name: String,
    /// Hardware tracking tag.
    #[serde(default, rename = "trackingId", alias = "tracking_id")]
    pub tracking_id: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Report time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Location {
    /// Builds a record; name and tracking tag default to the id.
    #[must_use]
    pub fn new(id: impl Into<DeviceId>, latitude: f64, longitude: f64, timestamp: i64) -> Self {
        let id = id.into();
        Self {
            name: id.as_str().to_string(),
            tracking_id: id.as_str().to_string(),
            id,
            latitude,
            longitude,
            timestamp,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the tracking tag.
    #[must_use]
    pub fn with_tracking_id(mut self, tracking_id: impl Into<String>) -> Self {
        self.tracking_id = tracking_id.into();
        self
    }

    /// Name shown in alert text; the id when no name was reported.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            self.id.as_str()
        } else {
            &self.name
        }
    }

    /// Raw position, unchecked.
    #[must_use]
    pub const fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }

    /// Checks the record is usable by the detector.
    ///
    /// # Errors
    ///
    /// `EmptyId` for a blank id; `InvalidCoordinate` for NaN, infinite or
    /// out of range coordinates.
    pub fn validate(&self) -> Result<LatLng, ValidationError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyId {
                field: "id".to_string(),
            });
        }
        LatLng::checked(self.latitude, self.longitude)
    }

    /// Report time as a UTC instant, if representable.
    #[must_use]
    pub fn reported_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

/// One line of a JSON-lines feed: a single record, or an array forming one
/// tick.
///
/// Array elements are decoded one by one, so a bad record costs only its own
/// device.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeedLine {
    /// Records that decoded.
    pub records: Vec<Location>,
    /// Elements that did not.
    pub rejected: Vec<RejectedRecord>,
}

/// A feed element that could not be decoded into a [`Location`].
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    /// Position in the line's array (0 for a single record).
    pub index: usize,
    /// Device id, when the element carried a readable one.
    pub device: Option<DeviceId>,
    /// Decoder message.
    pub reason: String,
}

impl FeedLine {
    /// Decodes one line.
    ///
    /// # Errors
    ///
    /// Only when the line is not JSON at all.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let elements = match serde_json::from_str::<serde_json::Value>(line)? {
            serde_json::Value::Array(items) => items,
            single => vec![single],
        };

        let mut decoded = Self::default();
        for (index, element) in elements.into_iter().enumerate() {
            let device = element
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map(DeviceId::from);
            match Location::deserialize(element) {
                Ok(location) => decoded.records.push(location),
                Err(e) => decoded.rejected.push(RejectedRecord {
                    index,
                    device,
                    reason: e.to_string(),
                }),
            }
        }
        Ok(decoded)
    }
}

/// Outcome of applying one record to the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    /// First record for the device, or newer than the stored one.
    Accepted,
    /// Older than the stored record; ignored.
    Stale {
        /// Timestamp currently held.
        current: i64,
    },
    /// Same timestamp as the stored record; ignored.
    Duplicate,
    /// Unusable record; ignored.
    Malformed(ValidationError),
}

impl FeedUpdate {
    /// True if the record replaced the device's position.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Latest-wins table of device positions.
///
/// Out-of-order and duplicate deliveries are resolved by timestamp: only a
/// strictly newer record supersedes the stored one.
#[derive(Debug, Default, Clone)]
pub struct LocationFeed {
    latest: HashMap<DeviceId, Location>,
}

impl LocationFeed {
    /// Empty feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one record.
    pub fn apply(&mut self, location: Location) -> FeedUpdate {
        if let Err(e) = location.validate() {
            return FeedUpdate::Malformed(e);
        }

        match self.latest.get(&location.id) {
            Some(current) if location.timestamp < current.timestamp => FeedUpdate::Stale {
                current: current.timestamp,
            },
            Some(current) if location.timestamp == current.timestamp => FeedUpdate::Duplicate,
            _ => {
                self.latest.insert(location.id.clone(), location);
                FeedUpdate::Accepted
            }
        }
    }

    /// Drops a device (disconnect). Returns its last record.
    pub fn remove(&mut self, device: &DeviceId) -> Option<Location> {
        self.latest.remove(device)
    }

    /// Last accepted record for a device.
    #[must_use]
    pub fn get(&self, device: &DeviceId) -> Option<&Location> {
        self.latest.get(device)
    }

    /// Number of live devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    /// True when no device is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// Iterates over live records in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.latest.values()
    }

    /// Removes every device whose latest record is older than `cutoff_ms`,
    /// except those in `present` (sorted).
    pub fn evict_older_than(&mut self, cutoff_ms: i64, present: &[DeviceId]) -> Vec<DeviceId> {
        let stale: Vec<DeviceId> = self
            .latest
            .values()
            .filter(|l| l.timestamp < cutoff_ms && present.binary_search(&l.id).is_err())
            .map(|l| l.id.clone())
            .collect();
        for id in &stale {
            self.latest.remove(id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_timestamp_wins() {
        let mut feed = LocationFeed::new();
        assert!(feed.apply(Location::new("a", 1.0, 1.0, 100)).is_accepted());
        assert!(feed.apply(Location::new("a", 2.0, 2.0, 200)).is_accepted());
        assert_eq!(
            feed.apply(Location::new("a", 3.0, 3.0, 150)),
            FeedUpdate::Stale { current: 200 }
        );
        assert_eq!(feed.apply(Location::new("a", 4.0, 4.0, 200)), FeedUpdate::Duplicate);

        let held = feed.get(&DeviceId::new("a")).unwrap();
        assert_eq!(held.latitude, 2.0);
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let wire: Location =
            serde_json::from_str(r#"{"id":"d1","latitude":0.0,"longitude":0.0,"timestamp":1}"#).unwrap();
        assert_eq!(wire.name, "");
        assert_eq!(wire.display_name(), "d1");

        let named = Location::new("d2", 0.0, 0.0, 1).with_name("Ravi");
        assert_eq!(named.display_name(), "Ravi");
        assert_eq!(Location::new("d3", 0.0, 0.0, 1).display_name(), "d3");
    }

    #[test]
    fn test_feed_line_skips_only_bad_elements() {
        let line = r#"[{"id":"A","latitude":0.0,"longitude":0.0045,"timestamp":2},
                       {"id":"X","latitude":null,"longitude":1.0,"timestamp":2},
                       {"id":"Y","longitude":1.0,"timestamp":2},
                       {"id":"B","latitude":1.0,"longitude":1.0,"timestamp":2}]"#;
        let decoded = FeedLine::parse(line).unwrap();

        let ids: Vec<&str> = decoded.records.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["A", "B"]);
        assert_eq!(decoded.rejected.len(), 2);
        assert_eq!(decoded.rejected[0].index, 1);
        assert_eq!(decoded.rejected[0].device, Some(DeviceId::new("X")));
        assert_eq!(decoded.rejected[1].device, Some(DeviceId::new("Y")));
    }

    #[test]
    fn test_feed_line_single_record_and_garbage() {
        let single = FeedLine::parse(r#"{"id":"A","latitude":1.0,"longitude":2.0,"timestamp":3}"#).unwrap();
        assert_eq!(single.records.len(), 1);
        assert!(single.rejected.is_empty());

        let bad = FeedLine::parse(r#"{"latitude":1.0}"#).unwrap();
        assert!(bad.records.is_empty());
        assert_eq!(bad.rejected[0].device, None);

        assert!(FeedLine::parse("not json").is_err());
    }

    #[test]
    fn test_malformed_records_never_enter() {
        let mut feed = LocationFeed::new();
        assert!(matches!(
            feed.apply(Location::new("a", f64::NAN, 1.0, 1)),
            FeedUpdate::Malformed(ValidationError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            feed.apply(Location::new("", 1.0, 1.0, 1)),
            FeedUpdate::Malformed(ValidationError::EmptyId { .. })
        ));
        assert!(feed.is_empty());
    }

    #[test]
    fn test_evict_older_than() {
        let mut feed = LocationFeed::new();
        feed.apply(Location::new("old", 0.0, 0.0, 1_000));
        feed.apply(Location::new("new", 0.0, 0.0, 9_000));
        feed.apply(Location::new("lagging", 0.0, 0.0, 2_000));
        let evicted = feed.evict_older_than(5_000, &[DeviceId::new("lagging")]);
        assert_eq!(evicted, vec![DeviceId::new("old")]);
        assert!(feed.get(&DeviceId::new("new")).is_some());
        assert!(feed.get(&DeviceId::new("lagging")).is_some());
        assert!(feed.remove(&DeviceId::new("old")).is_none());
    }

    #[test]
    fn test_wire_format_accepts_dashboard_shape() {
        let raw = r#"{"id":"d1","name":"Ravi","trackingId":"T-9","latitude":16.2,"longitude":77.3,"timestamp":1700000000000}"#;
        let loc: Location = serde_json::from_str(raw).unwrap();
        assert_eq!(loc.tracking_id, "T-9");
        assert_eq!(loc.name, "Ravi");
        assert_eq!(
            loc.reported_at().unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }
}
