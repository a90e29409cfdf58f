use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A single fix from the location provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Milliseconds since the Unix epoch.
    pub captured_at_ms: i64,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, captured_at_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            captured_at_ms,
        }
    }

    pub fn now(latitude: f64, longitude: f64) -> Self {
        Self::new(latitude, longitude, Utc::now().timestamp_millis())
    }

    pub fn payload(&self) -> LocationPayload {
        LocationPayload {
            latitude: self.latitude,
            longitude: self.longitude,
            timestamp: self.captured_at_ms,
        }
    }
}

/// Wire shape written under `reports/{reportId}/locations/{userId}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
}

/// One OS delivery. The provider may hand over several fixes at once.
pub type LocationBatch = Vec<LocationSample>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_wire_field_names() {
        let sample = LocationSample::new(37.0, -122.0, 1000);
        let value = serde_json::to_value(sample.payload()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"latitude": 37.0, "longitude": -122.0, "timestamp": 1000})
        );
    }
}
