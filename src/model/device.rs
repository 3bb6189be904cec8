use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const SERIAL_NUMBER_MAX_LEN: usize = 12;

static SERIAL_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^[A-Za-z0-9]{{1,{SERIAL_NUMBER_MAX_LEN}}}$"))
        .expect("serial number pattern is valid")
});

/// Serial numbers are shared by devices and sensors: 1..=12 ASCII alphanumerics.
pub fn is_valid_serial_number(serial: &str) -> bool {
    SERIAL_NUMBER_RE.is_match(serial)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: u64,
    pub serial_number: String,
    pub model_name: String,
}

/// A device as returned to callers. `sensors` is only populated when the
/// caller asked for sensors to be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    #[serde(flatten)]
    pub device: Device,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensors: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub serial_number: String,
    pub device_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCredential {
    pub device_id: u64,
    pub api_key_hash: String,
    pub derived_id: String,
    pub created_at: DateTime<Utc>,
}

/// Everything the store needs to insert a device row and its credential.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub serial_number: String,
    pub model_name: String,
    pub sensors: Vec<String>,
    pub api_key_hash: String,
    pub derived_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DeviceChanges {
    pub serial_number: String,
    pub model_name: String,
    /// `None` keeps the current sensor set, `Some` replaces it.
    pub sensors: Option<Vec<String>>,
    /// Recomputed credential id when the serial number changes.
    pub derived_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_short_alphanumeric_serials() {
        assert!(is_valid_serial_number("DEADBEEF1234"));
        assert!(is_valid_serial_number("S1"));
    }

    #[test]
    fn rejects_long_empty_or_punctuated_serials() {
        assert!(!is_valid_serial_number(""));
        assert!(!is_valid_serial_number("DEADBEEF12345"));
        assert!(!is_valid_serial_number("DEAD-BEEF"));
        assert!(!is_valid_serial_number("ab cd"));
    }

    #[test]
    fn details_without_sensors_omit_the_field() {
        let details = DeviceDetails {
            device: Device {
                id: 7,
                serial_number: "DEADBEEF1234".into(),
                model_name: "ESP32".into(),
            },
            sensors: None,
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["serialNumber"], "DEADBEEF1234");
        assert_eq!(json["modelName"], "ESP32");
        assert!(json.get("sensors").is_none());
    }
}
