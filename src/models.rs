//! Data models for the IGC Logbook service.
//!
//! These structs are shared between the storage layer and the HTTP API
//! via serde serialization. Wire field names follow the public track API
//! (`H_date`, `glider_id`, `track_length`, ...).

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A persisted track summary, one per distinct source URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    #[serde(skip)]
    pub id: u64,
    #[serde(rename = "H_date")]
    pub flight_date: String,
    pub pilot: String,
    pub glider: String,
    pub glider_id: String,
    /// Total distance in kilometres
    #[serde(rename = "track_length")]
    pub total_distance: f64,
    #[serde(rename = "track_src_url")]
    pub source_url: String,
    #[serde(skip)]
    pub inserted_at: String,
}

/// Track data produced by ingestion, before the store assigns `id` and `inserted_at`
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrack {
    pub source_url: String,
    pub pilot: String,
    pub glider: String,
    pub glider_id: String,
    pub flight_date: String,
    pub total_distance: f64,
}

impl NewTrack {
    /// Promote to a stored record with the slot and stamp chosen by the store
    pub fn into_record(self, id: u64, inserted_at: String) -> TrackRecord {
        TrackRecord {
            id,
            flight_date: self.flight_date,
            pilot: self.pilot,
            glider: self.glider,
            glider_id: self.glider_id,
            total_distance: self.total_distance,
            source_url: self.source_url,
            inserted_at,
        }
    }
}

/// Fields that can be projected individually via `GET track/{id}/{field}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackField {
    Pilot,
    Glider,
    GliderId,
    FlightDate,
    TrackLength,
    SourceUrl,
}

impl TrackField {
    /// Resolve a wire field name; unknown names yield `None`
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pilot" => Some(Self::Pilot),
            "glider" => Some(Self::Glider),
            "glider_id" => Some(Self::GliderId),
            "H_date" => Some(Self::FlightDate),
            "track_length" => Some(Self::TrackLength),
            "track_src_url" => Some(Self::SourceUrl),
            _ => None,
        }
    }
}

impl TrackRecord {
    /// Render a single field as plain text. Distance uses 6 decimal places.
    pub fn field_text(&self, field: TrackField) -> String {
        match field {
            TrackField::Pilot => self.pilot.clone(),
            TrackField::Glider => self.glider.clone(),
            TrackField::GliderId => self.glider_id.clone(),
            TrackField::FlightDate => self.flight_date.clone(),
            TrackField::TrackLength => format!("{:.6}", self.total_distance),
            TrackField::SourceUrl => self.source_url.clone(),
        }
    }
}

/// One ticker window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// `inserted_at` of the newest track in the whole store
    #[serde(rename = "t_latest")]
    pub latest_timestamp: String,
    #[serde(rename = "t_start")]
    pub window_start_timestamp: String,
    #[serde(rename = "t_stop")]
    pub window_stop_timestamp: String,
    #[serde(rename = "tracks")]
    pub ids: Vec<u64>,
    /// Wall-clock time spent building the window, in milliseconds
    #[serde(rename = "processing")]
    pub processing_millis: f64,
}

/// Response body of the API root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiInfo {
    pub uptime: String,
    pub info: String,
    pub version: String,
}

/// Canonical string form of an insertion timestamp (RFC 3339, UTC, microseconds)
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Choose the `inserted_at` stamp for the next record.
///
/// Stamps are strictly increasing: if the clock has not moved past the
/// previous stamp, the previous stamp plus one microsecond is used instead.
pub fn next_insert_stamp(previous: Option<&str>, now: DateTime<Utc>) -> String {
    let prev = previous
        .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
        .map(|p| p.with_timezone(&Utc));

    // Truncate to the precision we persist before comparing
    let now = DateTime::parse_from_rfc3339(&format_timestamp(now))
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now);

    match prev {
        Some(prev) if now <= prev => format_timestamp(prev + Duration::microseconds(1)),
        _ => format_timestamp(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> TrackRecord {
        TrackRecord {
            id: 3,
            flight_date: "2016-02-19".to_string(),
            pilot: "Miguel Angel Gordillo".to_string(),
            glider: "RV8".to_string(),
            glider_id: "EC-XLL".to_string(),
            total_distance: 443.2573603705269,
            source_url: "http://skypolaris.org/wp-content/uploads/IGS%20Files/Madrid%20to%20Jerez.igc".to_string(),
            inserted_at: "2026-10-18T10:00:00.000000Z".to_string(),
        }
    }

    #[test]
    fn test_field_projection() {
        let r = record();
        assert_eq!(r.field_text(TrackField::from_name("pilot").unwrap()), "Miguel Angel Gordillo");
        assert_eq!(r.field_text(TrackField::from_name("H_date").unwrap()), "2016-02-19");
        assert_eq!(r.field_text(TrackField::from_name("track_length").unwrap()), "443.257360");
        assert!(TrackField::from_name("altitude").is_none());
        assert!(TrackField::from_name("Pilot").is_none());
    }

    #[test]
    fn test_record_wire_names() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["H_date"], "2016-02-19");
        assert_eq!(json["glider_id"], "EC-XLL");
        assert!(json.get("track_src_url").is_some());
        assert!(json.get("id").is_none());
        assert!(json.get("inserted_at").is_none());
    }

    #[test]
    fn test_next_insert_stamp_is_strictly_increasing() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let first = next_insert_stamp(None, now);
        assert_eq!(first, "2026-10-18T12:00:00.000000Z");

        // Clock did not advance
        let second = next_insert_stamp(Some(&first), now);
        assert_eq!(second, "2026-10-18T12:00:00.000001Z");

        // Clock went backwards
        let earlier = Utc.with_ymd_and_hms(2026, 10, 18, 11, 0, 0).unwrap();
        let third = next_insert_stamp(Some(&second), earlier);
        assert_eq!(third, "2026-10-18T12:00:00.000002Z");

        let later = Utc.with_ymd_and_hms(2026, 10, 18, 13, 0, 0).unwrap();
        assert_eq!(next_insert_stamp(Some(&third), later), "2026-10-18T13:00:00.000000Z");
    }
}
