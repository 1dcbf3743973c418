use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::geo::{mps_to_mph, GeoPoint};

/// One location sample: coordinate, timestamp, horizontal accuracy and
/// instantaneous speed.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub horizontal_accuracy_m: f64,
    /// Meters per second; negative means the source had no valid reading.
    pub speed_mps: f64,
}

impl Fix {
    pub fn coordinate(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn speed_mph(&self) -> f64 {
        mps_to_mph(self.speed_mps)
    }

    /// Seconds elapsed between the fix timestamp and `now`. Negative when
    /// the fix is stamped in the future.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_milliseconds() as f64 / 1000.0
    }
}

/// Authorization state reported by the location source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    AuthorizedAlways,
    AuthorizedWhenInUse,
    Denied,
    Restricted,
}

impl AuthorizationStatus {
    pub fn is_authorized(&self) -> bool {
        matches!(
            self,
            AuthorizationStatus::AuthorizedAlways | AuthorizationStatus::AuthorizedWhenInUse
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationStatus::NotDetermined => "notDetermined",
            AuthorizationStatus::AuthorizedAlways => "authorizedAlways",
            AuthorizationStatus::AuthorizedWhenInUse => "authorizedWhenInUse",
            AuthorizationStatus::Denied => "denied",
            AuthorizationStatus::Restricted => "restricted",
        }
    }
}

/// Wire form of a fix in a replay file. GPS payloads mix plain numbers and
/// numeric strings, so every numeric field parses leniently.
#[derive(Debug, Deserialize)]
pub struct RawFix {
    #[serde(alias = "lat", default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(alias = "lon", alias = "lng", default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
    pub timestamp: Option<String>,
    #[serde(alias = "accuracy", default, deserialize_with = "parse_f64_option")]
    pub horizontal_accuracy: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub speed: Option<f64>,
}

impl RawFix {
    /// Converts the wire form into a `Fix`. Returns `None` when a required
    /// field is missing or the timestamp does not parse.
    pub fn into_fix(self) -> Option<Fix> {
        let latitude = self.latitude?;
        let longitude = self.longitude?;
        let timestamp = parse_timestamp(self.timestamp.as_deref().unwrap_or(""))?;

        Some(Fix {
            latitude,
            longitude,
            timestamp,
            horizontal_accuracy_m: self.horizontal_accuracy?,
            speed_mps: self.speed.unwrap_or(-1.0),
        })
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }

    match NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        Ok(t) => Some(t.and_utc()),
        Err(_) => match NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
            Ok(t) => Some(t.and_utc()),
            Err(_) => None,
        },
    }
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}
