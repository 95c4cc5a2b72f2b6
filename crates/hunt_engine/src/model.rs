use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::LatLng;

/// Rendered id of a point that has not been saved yet.
pub const PENDING_POINT_ID: &str = "new";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Money in minor units (cents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cents(pub u32);

impl Cents {
    pub fn minor_units(self) -> u32 {
        self.0
    }

    pub fn as_major(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// ISO year and week a generated area belongs to, e.g. `2026-W42`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodTag {
    pub iso_year: i32,
    pub iso_week: u32,
}

impl PeriodTag {
    pub fn of(at: DateTime<Utc>) -> Self {
        let week = at.iso_week();
        Self {
            iso_year: week.year(),
            iso_week: week.week(),
        }
    }
}

impl fmt::Display for PeriodTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.iso_year, self.iso_week)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchArea {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub center: LatLng,
    pub radius_m: f64,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArea {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub center: LatLng,
    pub radius_km: f64,
    pub generation_number: u32,
    pub period_tag: PeriodTag,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl GeneratedArea {
    pub fn radius_m(&self) -> f64 {
        self.radius_km * 1000.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub center: LatLng,
    pub title: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// A point placed on the map but not saved. Promoted to a [`MapPoint`] on save,
/// dropped on cancel without touching any store.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPoint {
    pub center: LatLng,
    pub title: String,
    pub note: String,
}

impl PendingPoint {
    pub fn at(center: LatLng) -> Self {
        Self {
            center,
            title: String::new(),
            note: String::new(),
        }
    }

    pub fn id(&self) -> &'static str {
        PENDING_POINT_ID
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn cents_display_pads_minor_units() {
        assert_eq!(Cents(799).to_string(), "7.99");
        assert_eq!(Cents(2999).to_string(), "29.99");
        assert_eq!(Cents(5).to_string(), "0.05");
        assert_eq!(Cents(1200).as_major(), 12.0);
    }

    #[test]
    fn period_tag_uses_iso_week() {
        let at = Utc.with_ymd_and_hms(2026, 10, 15, 9, 30, 0).unwrap();
        let tag = PeriodTag::of(at);
        assert_eq!(tag.iso_year, 2026);
        assert_eq!(tag.iso_week, 42);
        assert_eq!(tag.to_string(), "2026-W42");

        let new_year = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(PeriodTag::of(new_year).iso_year, 2026);
    }

    #[test]
    fn record_id_parse_round_trips_display() {
        let id = RecordId::generate();
        assert_eq!(RecordId::parse(&id.to_string()), Some(id));
        assert_eq!(RecordId::parse("new"), None);
    }

    #[test]
    fn pending_point_reports_placeholder_id() {
        let pending = PendingPoint::at(LatLng { lat: 1.0, lng: 2.0 });
        assert_eq!(pending.id(), "new");
        assert!(pending.title.is_empty());
    }
}
