//! Type-safe message system for tariffd
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use chrono::DateTime;
use chrono::Utc;

use super::sensor::SensorDescription;
use super::state::SensorValue;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug, Clone)]
pub enum FromIntegrationMessage {
    /// A sensor entity was announced by an integration
    SensorDiscovered {
        entity_id: String,
        description: SensorDescription,
        integration_name: String,
    },

    /// A sensor's value changed
    SensorStateChanged {
        entity_id: String,
        value: Option<SensorValue>,
        unit_of_measurement: Option<String>,
        updated_at: DateTime<Utc>,
    },

    /// The integration failed to update; all of its sensors become unavailable
    /// until the next `SensorStateChanged`.
    UpdateFailed {
        integration_name: String,
        error: String,
    },

    /// A fresh diagnostics dump for an integration
    DiagnosticsUpdated {
        integration_name: String,
        diagnostics: serde_json::Value,
    },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug, Clone, PartialEq)]
pub enum ToIntegrationMessage {
    /// Fetch fresh data now instead of waiting for the next interval
    Refresh,
}
