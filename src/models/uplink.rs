//! Models for the NIBE Uplink REST API (v1) payloads.
//!
//! Scope: types only, no client code.
//!
//! Notes
//! - Field names follow the API's camelCase JSON via `rename_all`.
//! - Optional fields default to `None` so partially populated payloads still decode.
//! - Temperatures travel as integer tenths of a degree (`Temperature`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemId(pub i64);

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterId(pub i64);

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThermostatId(pub i64);

// =====================
// Core enums
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Online,
    Pending,
    Offline,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityLevel {
    Admin,
    Manager,
    Viewer,
}

/// System-wide operating override.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    DefaultOperation,
    AwayFromHome,
    Vacation,
}

impl Mode {
    pub fn is_default(self) -> bool {
        matches!(self, Mode::DefaultOperation)
    }
}

/// Body of `GET/PUT /systems/{id}/smarthome/mode`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeEnvelope {
    pub mode: Mode,
}

// =====================
// Paging
// =====================

/// Envelope used by list endpoints (`/systems`, `/notifications`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub items_per_page: Option<u32>,
    #[serde(default)]
    pub num_items: Option<u32>,
    pub objects: Vec<T>,
}

// =====================
// Systems
// =====================

/// Capability set of a system (`GET /systems/{id}/config`).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    #[serde(default)]
    pub has_cooling: bool,
    #[serde(default)]
    pub has_heating: bool,
    #[serde(default)]
    pub has_hot_water: bool,
    #[serde(default)]
    pub has_ventilation: bool,
}

/// One installation registered under the account.
///
/// Equality and hashing only consider `system_id`; the remaining fields are a
/// snapshot that gets refined by later fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct System {
    pub system_id: SystemId,
    pub name: String,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub security_level: Option<SecurityLevel>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub last_activity_date: Option<DateTime<Utc>>,
    pub connection_status: ConnectionStatus,
    #[serde(default)]
    pub has_alarmed: bool,
    /// Filled from the config endpoint, never part of the system payload.
    #[serde(skip)]
    pub capabilities: Option<SystemConfig>,
}

impl PartialEq for System {
    fn eq(&self, other: &Self) -> bool {
        self.system_id == other.system_id
    }
}

impl Eq for System {}

impl Hash for System {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.system_id.hash(state);
    }
}

impl System {
    /// Overwrite the snapshot with a fresher one, keeping data the fresh
    /// payload cannot carry.
    pub fn refresh_from(&mut self, fresh: System) {
        let capabilities = fresh.capabilities.or(self.capabilities);
        *self = System { capabilities, ..fresh };
    }
}

// =====================
// Parameters & categories
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub parameter_id: ParameterId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub designation: Option<String>,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub display_value: String,
    pub raw_value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub category_id: String,
    pub name: String,
    #[serde(default)]
    pub parameters: Option<Vec<Parameter>>,
}

/// One entry of the `PUT /systems/{id}/parameters` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSetResult {
    pub status: String,
    pub parameter: Parameter,
}

// =====================
// Software & alarms
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareVersion {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareUpgrade {
    pub name: String,
    #[serde(default)]
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareInfo {
    pub current: SoftwareVersion,
    #[serde(default)]
    pub upgrade: Option<SoftwareUpgrade>,
}

impl SoftwareInfo {
    pub fn upgrade_available(&self) -> bool {
        self.upgrade.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmInfo {
    pub notification_id: i64,
    #[serde(default)]
    pub created_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub alarm_number: Option<i64>,
    #[serde(default)]
    pub severity: Option<i32>,
    #[serde(default)]
    pub status: Option<i32>,
    pub header: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub equip_name: Option<String>,
}

// =====================
// Smart home
// =====================

/// Fixed-point temperature with one decimal, carried as tenths of a degree.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature(pub i32);

impl Temperature {
    /// `None` for NaN, infinities and values outside the `i32` tenths range.
    pub fn from_celsius(celsius: f64) -> Option<Self> {
        let tenths = (celsius * 10.0).round();
        if !tenths.is_finite() || tenths < f64::from(i32::MIN) || tenths > f64::from(i32::MAX) {
            return None;
        }
        Some(Temperature(tenths as i32))
    }

    pub fn celsius(self) -> f64 {
        f64::from(self.0) / 10.0
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{}", sign, abs / 10, abs % 10)
    }
}

/// Client-side thermostat submitted to `POST /systems/{id}/smarthome/thermostats`.
///
/// The service forgets thermostats that are not re-submitted, so the same
/// value is sent again on every heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thermostat {
    #[serde(rename = "externalId")]
    pub id: ThermostatId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub climate_systems: Option<Vec<u32>>,
    #[serde(default, rename = "actualTemp", skip_serializing_if = "Option::is_none")]
    pub current_temperature: Option<Temperature>,
    #[serde(default, rename = "targetTemp", skip_serializing_if = "Option::is_none")]
    pub target_temperature: Option<Temperature>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_rounds_to_one_decimal() {
        assert_eq!(Temperature::from_celsius(21.46), Some(Temperature(215)));
        assert_eq!(Temperature::from_celsius(-0.25).map(|t| t.to_string()).as_deref(), Some("-0.3"));
        assert_eq!(Temperature::from_celsius(f64::NAN), None);
        assert_eq!(Temperature::from_celsius(f64::INFINITY), None);
        assert_eq!(Temperature::from_celsius(1e12), None);
        assert_eq!(Temperature(205).to_string(), "20.5");
        assert!((Temperature(-12).celsius() + 1.2).abs() < 1e-9);
    }

    #[test]
    fn thermostat_serializes_with_api_field_names() {
        let t = Thermostat {
            id: ThermostatId(7),
            name: "Living room".into(),
            climate_systems: Some(vec![1]),
            current_temperature: Some(Temperature(214)),
            target_temperature: None,
        };
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"externalId": 7, "name": "Living room", "climateSystems": [1], "actualTemp": 214})
        );
    }

    #[test]
    fn system_identity_is_the_id() {
        let a: System = serde_json::from_value(serde_json::json!({
            "systemId": 42, "name": "Home", "connectionStatus": "ONLINE"
        }))
        .unwrap();
        let mut b = a.clone();
        b.name = "Cabin".into();
        b.connection_status = ConnectionStatus::Offline;
        assert_eq!(a, b);
    }

    #[test]
    fn refresh_keeps_capabilities() {
        let mut cached: System = serde_json::from_value(serde_json::json!({
            "systemId": 1, "name": "Old", "connectionStatus": "PENDING"
        }))
        .unwrap();
        cached.capabilities = Some(SystemConfig {
            has_heating: true,
            ..SystemConfig::default()
        });
        let fresh: System = serde_json::from_value(serde_json::json!({
            "systemId": 1, "name": "New", "connectionStatus": "ONLINE", "hasAlarmed": true
        }))
        .unwrap();

        cached.refresh_from(fresh);
        assert_eq!(cached.name, "New");
        assert!(cached.has_alarmed);
        assert_eq!(cached.capabilities.map(|c| c.has_heating), Some(true));
    }
}
