use super::coordinator::TariffAttributes;
use crate::engine::SensorDescription;
use crate::engine::SensorDeviceClass;
use crate::engine::SensorStateClass;
use crate::engine::SensorValue;

const ICON: &str = "mdi:currency-usd";

/// How a sensor turns its attribute into a state value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// The attribute as returned
    Raw,
    /// The attribute coerced to a float
    Number,
}

/// An Elvia sensor: which attribute it reads, and where its unit comes from
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    pub description: SensorDescription,
    pub kind: ValueKind,
    pub unit_key: Option<&'static str>,
}

impl SensorSpec {
    const fn raw(description: SensorDescription) -> Self {
        Self {
            description,
            kind: ValueKind::Raw,
            unit_key: None,
        }
    }

    const fn price(description: SensorDescription, unit_key: &'static str) -> Self {
        Self {
            description,
            kind: ValueKind::Number,
            unit_key: Some(unit_key),
        }
    }

    pub fn entity_id(&self) -> String {
        format!("sensor.elvia_{}", self.description.key)
    }

    /// State value read from the flattened attributes; `None` when absent
    pub fn value(&self, attrs: &TariffAttributes) -> Option<SensorValue> {
        let value = attrs.get(self.description.key)?;
        match self.kind {
            ValueKind::Raw => Some(value.clone()),
            ValueKind::Number => value.as_f64().map(SensorValue::Number),
        }
    }

    pub fn unit(&self, attrs: &TariffAttributes) -> Option<String> {
        self.unit_key
            .and_then(|key| attrs.get(key))
            .map(|unit| unit.to_string())
    }
}

pub static SENSORS: [SensorSpec; 9] = [
    SensorSpec::raw(SensorDescription::new("fixed_price_level", "Fixed pricelevel").icon(ICON)),
    SensorSpec::price(
        SensorDescription::new("fixed_price_total", "Price fixed total")
            .icon(ICON)
            .device_class(SensorDeviceClass::Monetary)
            .state_class(SensorStateClass::Measurement),
        "fixed_price_uom",
    ),
    SensorSpec::price(
        SensorDescription::new("fixed_price_fixed", "Price fixed")
            .icon(ICON)
            .device_class(SensorDeviceClass::Monetary)
            .state_class(SensorStateClass::Measurement),
        "fixed_price_uom",
    ),
    SensorSpec::price(
        SensorDescription::new("fixed_price_taxes", "Price fixed taxes")
            .icon(ICON)
            .device_class(SensorDeviceClass::Monetary)
            .state_class(SensorStateClass::Measurement),
        "fixed_price_uom",
    ),
    SensorSpec::raw(
        SensorDescription::new("variable_price_power", "Variable power")
            .icon(ICON)
            .device_class(SensorDeviceClass::Power),
    ),
    SensorSpec::raw(SensorDescription::new("variable_price_level", "Variable pricelevel").icon(ICON)),
    SensorSpec::price(
        SensorDescription::new("variable_price_total", "Price variable total")
            .icon(ICON)
            .device_class(SensorDeviceClass::Monetary)
            .state_class(SensorStateClass::Measurement),
        "variable_price_uom",
    ),
    SensorSpec::price(
        SensorDescription::new("variable_price_taxes", "Price variable taxes")
            .icon(ICON)
            .device_class(SensorDeviceClass::Monetary)
            .state_class(SensorStateClass::Measurement),
        "variable_price_uom",
    ),
    SensorSpec::price(
        SensorDescription::new("variable_price_energy", "Price variable energy")
            .icon(ICON)
            .device_class(SensorDeviceClass::Energy)
            .state_class(SensorStateClass::Total),
        "variable_price_uom",
    ),
];
