//! Polls the grid tariff API and flattens the current price period into
//! attributes the sensors read by key.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use tracing::debug;
use tracing::error;

use super::client;
use super::client::ElviaApi;
use super::models::GridTariffCollection;
use super::models::MeteringPointsRequest;
use super::models::PriceLevel;
use crate::config::ElviaConfig;
use crate::engine::SensorValue;

/// Flat view of the current tariff period, keyed by attribute name
pub type TariffAttributes = BTreeMap<String, SensorValue>;

/// Result of one successful refresh
#[derive(Debug, Clone, PartialEq)]
pub struct TariffData {
    pub collection: GridTariffCollection,
    pub attributes: TariffAttributes,
    pub fetched_at: DateTime<Utc>,
    /// Time `attributes` were flattened for; moves on at each period change
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateFailed {
    #[error(transparent)]
    Api(#[from] client::Error),

    #[error("No grid tariff returned for metering point {metering_point_id}")]
    NoTariff { metering_point_id: String },
}

pub struct Coordinator<C: ElviaApi> {
    api: C,
    metering_point_id: String,
    update_interval: Duration,
    data: Option<Arc<TariffData>>,
    last_update_success: bool,
    last_error: Option<String>,
    last_attempt: Option<DateTime<Utc>>,
}

impl<C: ElviaApi> Coordinator<C> {
    pub fn new(api: C, config: &ElviaConfig) -> Self {
        Self {
            api,
            metering_point_id: config.metering_point_id.clone(),
            update_interval: config.update_interval,
            data: None,
            last_update_success: false,
            last_error: None,
            last_attempt: None,
        }
    }

    /// Latest successfully fetched data, retained across failed refreshes
    pub fn data(&self) -> Option<Arc<TariffData>> {
        self.data.clone()
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.last_attempt
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn metering_point_id(&self) -> &str {
        &self.metering_point_id
    }

    /// Fetch today's tariffs and flatten the period covering `now`
    pub async fn refresh(&mut self, now: DateTime<Utc>) -> Result<Arc<TariffData>, UpdateFailed> {
        self.last_attempt = Some(now);

        match self.fetch(now).await {
            Ok(data) => {
                let data = Arc::new(data);
                self.data = Some(data.clone());
                self.last_update_success = true;
                self.last_error = None;
                Ok(data)
            }
            Err(e) => {
                error!("Update error {}", e);
                self.last_update_success = false;
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Next start or end of a price period after `now` in the cached data.
    ///
    /// `None` while the last refresh failed, so a period change never makes
    /// unavailable sensors look fresh.
    pub fn next_period_change(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.last_update_success {
            return None;
        }
        let data = self.data.as_ref()?;
        data.collection
            .grid_tariff
            .tariff_price
            .price_info
            .iter()
            .flat_map(|p| [p.start_time, p.expired_at])
            .map(|at| at.with_timezone(&Utc))
            .filter(|at| *at > now)
            .min()
    }

    /// Flatten the cached collection again for `now` without fetching
    pub fn reproject(&mut self, now: DateTime<Utc>) -> Option<Arc<TariffData>> {
        let current = self.data.as_ref()?;
        let data = Arc::new(TariffData {
            collection: current.collection.clone(),
            attributes: flatten(&current.collection, &self.metering_point_id, now),
            fetched_at: current.fetched_at,
            as_of: now,
        });
        self.data = Some(data.clone());
        Some(data)
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<TariffData, UpdateFailed> {
        let request = MeteringPointsRequest::today(&self.metering_point_id);
        let collections = self.api.metering_point_grid_tariffs(&request).await?;

        let collection = select_collection(collections, &self.metering_point_id).ok_or_else(
            || UpdateFailed::NoTariff {
                metering_point_id: self.metering_point_id.clone(),
            },
        )?;

        let attributes = flatten(&collection, &self.metering_point_id, now);
        debug!(
            "Fetched tariff '{}' with {} attributes",
            collection.grid_tariff.tariff_type.tariff_key,
            attributes.len()
        );

        Ok(TariffData {
            collection,
            attributes,
            fetched_at: now,
            as_of: now,
        })
    }
}

/// The collection listing `metering_point_id`, else the first one
fn select_collection(
    collections: Vec<GridTariffCollection>,
    metering_point_id: &str,
) -> Option<GridTariffCollection> {
    let position = collections
        .iter()
        .position(|c| c.metering_point_ids.iter().any(|id| id == metering_point_id))
        .unwrap_or(0);
    collections.into_iter().nth(position)
}

fn text(value: &str) -> SensorValue {
    SensorValue::Text(value.to_string())
}

/// Flatten `collection` into attributes for the price period covering `now`.
///
/// Tariff attributes are always present; price attributes only when some
/// period covers `now`.
pub fn flatten(
    collection: &GridTariffCollection,
    metering_point_id: &str,
    now: DateTime<Utc>,
) -> TariffAttributes {
    let mut attrs = TariffAttributes::new();
    let tariff = &collection.grid_tariff;

    attrs.insert("tariff_key".into(), text(&tariff.tariff_type.tariff_key));
    attrs.insert("tariff_title".into(), text(&tariff.tariff_type.title));
    attrs.insert("company".into(), text(&tariff.tariff_type.company));

    let now = now.fixed_offset();
    let Some(price_info) = tariff.tariff_price.price_info.iter().find(|p| p.covers(now)) else {
        return attrs;
    };

    attrs.insert("hours_short_name".into(), text(&price_info.hours_short_name));
    attrs.insert("season".into(), text(&price_info.season));
    attrs.insert(
        "public_holiday".into(),
        SensorValue::Bool(price_info.public_holiday),
    );
    attrs.insert(
        "start_time".into(),
        text(&price_info.start_time.to_rfc3339_opts(SecondsFormat::Secs, false)),
    );
    attrs.insert(
        "expired_at".into(),
        text(&price_info.expired_at.to_rfc3339_opts(SecondsFormat::Secs, false)),
    );

    let variable = &price_info.variable_price;
    attrs.insert("variable_price_total".into(), SensorValue::Number(variable.total));
    attrs.insert("variable_price_energy".into(), SensorValue::Number(variable.energy));
    attrs.insert("variable_price_power".into(), SensorValue::Number(variable.power));
    attrs.insert("variable_price_taxes".into(), SensorValue::Number(variable.taxes));
    attrs.insert("variable_price_level".into(), text(&variable.level));
    attrs.insert("variable_price_currency".into(), text(&variable.currency));
    attrs.insert("variable_price_uom".into(), text(&variable.uom));

    let levels: Vec<&PriceLevel> = price_info
        .fixed_prices
        .iter()
        .flat_map(|f| f.price_levels.iter())
        .collect();
    let assigned = collection.current_fixed_price_level(metering_point_id);
    let fixed = assigned
        .and_then(|name| levels.iter().find(|l| l.level == name))
        .or_else(|| levels.first());

    if let Some(fixed) = fixed {
        attrs.insert("fixed_price_level".into(), text(&fixed.level));
        attrs.insert("fixed_price_level_info".into(), text(&fixed.level_info));
        attrs.insert("fixed_price_total".into(), SensorValue::Number(fixed.total));
        attrs.insert("fixed_price_fixed".into(), SensorValue::Number(fixed.fixed));
        attrs.insert("fixed_price_taxes".into(), SensorValue::Number(fixed.taxes));
        attrs.insert("fixed_price_currency".into(), text(&fixed.currency));
        attrs.insert("fixed_price_uom".into(), text(&fixed.uom));
    }

    attrs
}
