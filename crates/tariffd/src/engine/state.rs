use std::collections::HashMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::sensor::SensorDeviceClass;
use super::sensor::SensorStateClass;

/// Value reported by a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl SensorValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Number(n) => Some(*n),
            SensorValue::Text(s) => s.trim().parse().ok(),
            SensorValue::Bool(_) => None,
        }
    }
}

impl std::fmt::Display for SensorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorValue::Number(n) => write!(f, "{}", n),
            SensorValue::Text(s) => write!(f, "{}", s),
            SensorValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// State of a sensor entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorState {
    /// Human-readable name.
    pub name: String,

    /// Stable identifier within the owning integration.
    pub unique_id: String,

    pub icon: Option<String>,

    pub device_class: Option<SensorDeviceClass>,

    pub state_class: Option<SensorStateClass>,

    /// Current value. `None` until data arrives, or when the source has no value for it.
    pub value: Option<SensorValue>,

    pub unit_of_measurement: Option<String>,

    /// False while the owning integration's last update failed.
    pub available: bool,

    pub last_updated: Option<DateTime<Utc>>,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub sensors: HashMap<String, SensorState>,

    /// Latest diagnostics dump per integration name.
    pub diagnostics: HashMap<String, serde_json::Value>,
}
