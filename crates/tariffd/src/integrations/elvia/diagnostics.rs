//! Troubleshooting dump for the Elvia integration.

use serde_json::json;
use serde_json::Value;

use super::client::ElviaApi;
use super::coordinator::Coordinator;

const REDACTED: &str = "**REDACTED**";

/// Diagnostics for the coordinator's current state, with secrets redacted.
pub fn collect<C: ElviaApi>(coordinator: &Coordinator<C>) -> Value {
    let data = coordinator.data();

    let mut diagnostics = json!({
        "config": {
            "api_key": REDACTED,
            "metering_point_id": REDACTED,
            "update_interval_minutes": coordinator.update_interval().as_secs() / 60,
        },
        "last_update_success": coordinator.last_update_success(),
        "last_error": coordinator.last_error(),
        "last_attempt": coordinator.last_attempt(),
        "fetched_at": data.as_ref().map(|d| d.fetched_at),
        "attributes_as_of": data.as_ref().map(|d| d.as_of),
        "tariff_type": data.as_ref().map(|d| &d.collection.grid_tariff.tariff_type),
        "tariff_price": data.as_ref().map(|d| &d.collection.grid_tariff.tariff_price),
        "metering_points_and_price_levels": data
            .as_ref()
            .and_then(|d| d.collection.metering_points_and_price_levels.clone()),
        "attributes": data.as_ref().map(|d| &d.attributes),
    });

    redact(&mut diagnostics, coordinator.metering_point_id());
    diagnostics
}

/// Replace every string equal to `secret` in `value`
fn redact(value: &mut Value, secret: &str) {
    match value {
        Value::String(s) if s.as_str() == secret => *s = REDACTED.to_string(),
        Value::Array(items) => items.iter_mut().for_each(|v| redact(v, secret)),
        Value::Object(map) => map.values_mut().for_each(|v| redact(v, secret)),
        _ => {}
    }
}
