//! Hydration events.
//!
//! An event is one logged drink. Its id is assigned once at creation and is
//! the merge key between the local store and the backend: every upsert, on
//! either side, is keyed by it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// A logged hydration event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub quality: Quality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_name: Option<String>,
    /// Owning user. `None` until the first sync assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<Uuid>,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, quality: Quality) -> Self {
        Event {
            id: Uuid::new_v4(),
            timestamp,
            quality,
            note: None,
            location: None,
            place_name: None,
            owner_id: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_place(mut self, location: GeoPoint, place_name: Option<String>) -> Self {
        self.location = Some(location);
        self.place_name = place_name;
        self
    }

    pub fn owned_by(mut self, owner_id: Uuid) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    /// True if the event belongs to `user_id`, or to nobody yet.
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.owner_id.is_none_or(|owner| owner == user_id)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.quality, self.timestamp.format("%Y-%m-%d %H:%M"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// How well-hydrated the user felt when logging.
///
/// Serialized as a lowercase string. Unknown strings from the wire or from
/// older local data map to [`Quality::DEFAULT`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quality {
    Poor,
    Fair,
    Good,
    Great,
}

/// Wire name for every quality. Order is the enum order.
const QUALITY_NAMES: [(Quality, &str); 4] = [
    (Quality::Poor, "poor"),
    (Quality::Fair, "fair"),
    (Quality::Good, "good"),
    (Quality::Great, "great"),
];

impl Quality {
    pub const DEFAULT: Quality = Quality::Fair;

    pub fn all() -> impl Iterator<Item = Quality> {
        QUALITY_NAMES.iter().map(|(q, _)| *q)
    }

    pub fn as_str(&self) -> &'static str {
        QUALITY_NAMES
            .iter()
            .find(|(q, _)| q == self)
            .map(|(_, name)| *name)
            .unwrap_or("fair")
    }

    /// Parse a wire name, falling back to [`Quality::DEFAULT`].
    pub fn from_name(name: &str) -> Quality {
        let name = name.trim().to_ascii_lowercase();
        QUALITY_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(q, _)| *q)
            .unwrap_or(Quality::DEFAULT)
    }

    /// Numeric score (1-4) used by trend averages.
    pub fn score(&self) -> f64 {
        match self {
            Quality::Poor => 1.0,
            Quality::Fair => 2.0,
            Quality::Good => 3.0,
            Quality::Great => 4.0,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Quality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Quality {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Quality::from_name(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_test_event() -> Event {
        Event::new(Utc.with_ymd_and_hms(2025, 3, 20, 15, 0, 0).unwrap(), Quality::Good)
    }

    #[test]
    fn test_quality_names_map_both_ways() {
        for quality in Quality::all() {
            assert_eq!(Quality::from_name(quality.as_str()), quality);
        }
        assert_eq!(Quality::from_name(" GREAT "), Quality::Great);
    }

    #[test]
    fn test_unknown_quality_falls_back_to_default() {
        assert_eq!(Quality::from_name("excellent"), Quality::DEFAULT);
        assert_eq!(Quality::from_name(""), Quality::DEFAULT);

        let parsed: Quality = serde_json::from_str("\"sparkling\"").unwrap();
        assert_eq!(parsed, Quality::Fair);
    }

    #[test]
    fn test_event_wire_format_is_camel_case() {
        let event = make_test_event().with_note("after run");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["quality"], "good");
        assert_eq!(json["note"], "after run");
        assert!(json.get("placeName").is_none());
        assert!(json.get("ownerId").is_none());
    }

    #[test]
    fn test_visibility() {
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let unowned = make_test_event();

        assert!(unowned.is_visible_to(user));
        assert!(unowned.clone().owned_by(user).is_visible_to(user));
        assert!(!unowned.owned_by(other).is_visible_to(user));
    }
}
