use serde::{Deserialize, Serialize};

use crate::domain::events::PendingEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimestampMs(pub i64);

pub trait Clock {
    fn now(&self) -> TimestampMs;
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// The (0,0) null-island point produced by broken upstream payloads.
    pub fn is_degenerate(&self) -> bool {
        self.lat == 0.0 && self.lng == 0.0
    }

    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();

        let a =
            (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_M * c
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationSample {
    pub point: GeoPoint,
    pub timestamp: TimestampMs,
    /// Meters per second; negative means the platform reported no speed.
    pub speed: f64,
    pub horizontal_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerTarget {
    pub id: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantTarget {
    pub id: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub session_id: String,
    pub charger_id: String,
    pub merchant_id: String,
    pub started_at: TimestampMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    NearCharger,
    Anchored,
    InTransit,
    SessionActive,
    SessionEnded,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::NearCharger => "nearCharger",
            SessionState::Anchored => "anchored",
            SessionState::InTransit => "inTransit",
            SessionState::SessionActive => "sessionActive",
            SessionState::SessionEnded => "sessionEnded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::SessionEnded)
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "idle" => Ok(SessionState::Idle),
            "nearCharger" => Ok(SessionState::NearCharger),
            "anchored" => Ok(SessionState::Anchored),
            "inTransit" => Ok(SessionState::InTransit),
            "sessionActive" => Ok(SessionState::SessionActive),
            "sessionEnded" => Ok(SessionState::SessionEnded),
            other => Err(format!("unknown session state: {other}")),
        }
    }
}

/// Durable projection of engine state, written atomically on every transition
/// and read exactly once at engine construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub targeted_charger: Option<ChargerTarget>,
    pub merchant_target: Option<MerchantTarget>,
    pub active_session: Option<ActiveSession>,
    pub grace_period_deadline: Option<TimestampMs>,
    pub hard_timeout_deadline: Option<TimestampMs>,
    pub saved_at: TimestampMs,
    pub pending_event: Option<PendingEvent>,
}

#[cfg(test)]
mod tests {
    use super::{GeoPoint, SessionState};

    #[test]
    fn degenerate_point_is_exactly_null_island() {
        assert!(GeoPoint::new(0.0, 0.0).is_degenerate());
        assert!(!GeoPoint::new(0.0, 0.0001).is_degenerate());
        assert!(!GeoPoint::new(48.137, 11.575).is_degenerate());
    }

    #[test]
    fn distance_to_self_is_zero() {
        let p = GeoPoint::new(48.137154, 11.576124);
        assert_eq!(p.distance_meters(&p), 0.0);
    }

    #[test]
    fn distance_matches_known_pair_within_tolerance() {
        // Munich Marienplatz -> Odeonsplatz, roughly 600 m.
        let a = GeoPoint::new(48.137154, 11.576124);
        let b = GeoPoint::new(48.142609, 11.577650);
        let d = a.distance_meters(&b);
        assert!(d > 500.0 && d < 750.0, "unexpected distance {d}");
    }

    #[test]
    fn small_offsets_resolve_to_meters() {
        // ~0.00027 degrees latitude is ~30 m.
        let a = GeoPoint::new(48.0, 11.0);
        let b = GeoPoint::new(48.00027, 11.0);
        let d = a.distance_meters(&b);
        assert!(d > 25.0 && d < 35.0, "unexpected distance {d}");
    }

    #[test]
    fn state_strings_match_bridge_contract() {
        assert_eq!(SessionState::Idle.as_str(), "idle");
        assert_eq!(SessionState::NearCharger.as_str(), "nearCharger");
        assert_eq!(SessionState::InTransit.as_str(), "inTransit");
        assert_eq!(SessionState::SessionEnded.as_str(), "sessionEnded");
        assert!(SessionState::SessionEnded.is_terminal());
        assert!(!SessionState::SessionActive.is_terminal());
    }

    #[test]
    fn state_serializes_as_camel_case() {
        let json = serde_json::to_string(&SessionState::NearCharger).expect("state serializes");
        assert_eq!(json, "\"nearCharger\"");
        let back: SessionState =
            serde_json::from_str("\"sessionActive\"").expect("state deserializes");
        assert_eq!(back, SessionState::SessionActive);
    }
}
