//! Sensor entity descriptions shared between integrations and the engine.

use serde::Deserialize;
use serde::Serialize;

/// Device class for sensors, matching Home Assistant's sensor device classes
/// that tariffd integrations produce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SensorDeviceClass {
    Energy,
    Monetary,
    Power,
}

/// State class for sensors, describing how values evolve over time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SensorStateClass {
    Measurement,
    Total,
    TotalIncreasing,
}

/// Static description of a sensor entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDescription {
    /// Key used both as unique id and as the attribute the sensor reads.
    pub key: &'static str,
    pub name: &'static str,
    pub icon: Option<&'static str>,
    pub device_class: Option<SensorDeviceClass>,
    pub state_class: Option<SensorStateClass>,
}

impl SensorDescription {
    pub const fn new(key: &'static str, name: &'static str) -> Self {
        Self {
            key,
            name,
            icon: None,
            device_class: None,
            state_class: None,
        }
    }

    pub const fn icon(mut self, icon: &'static str) -> Self {
        self.icon = Some(icon);
        self
    }

    pub const fn device_class(mut self, device_class: SensorDeviceClass) -> Self {
        self.device_class = Some(device_class);
        self
    }

    pub const fn state_class(mut self, state_class: SensorStateClass) -> Self {
        self.state_class = Some(state_class);
        self
    }
}
