//! Response and request shapes of the Elvia grid tariff API.
//!
//! Numbers and booleans are decoded leniently: the API has been seen returning
//! both `1.25` and `"1.25"`, and both `false` and `"false"`.

use chrono::DateTime;
use chrono::FixedOffset;
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;

/// Format of naive timestamps, both in responses and in query parameters
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TariffType {
    pub tariff_key: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub customer_type: String,
    pub title: String,
    /// Minutes covered by each price entry
    #[serde(default, deserialize_with = "lenient::integer")]
    pub resolution: u32,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceLevel {
    pub level: String,
    #[serde(default)]
    pub level_info: String,
    #[serde(deserialize_with = "lenient::number")]
    pub total: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub fixed: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub taxes: f64,
    pub currency: String,
    pub uom: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedPrices {
    #[serde(rename = "priceLevel")]
    pub price_levels: Vec<PriceLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariablePrice {
    #[serde(deserialize_with = "lenient::number")]
    pub total: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub energy: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub power: f64,
    #[serde(deserialize_with = "lenient::number")]
    pub taxes: f64,
    pub level: String,
    pub currency: String,
    pub uom: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceInfo {
    #[serde(deserialize_with = "lenient::timestamp")]
    pub start_time: DateTime<FixedOffset>,
    #[serde(deserialize_with = "lenient::timestamp")]
    pub expired_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub hours_short_name: String,
    #[serde(default)]
    pub season: String,
    #[serde(default, deserialize_with = "lenient::boolean")]
    pub public_holiday: bool,
    #[serde(default)]
    pub fixed_prices: Vec<FixedPrices>,
    pub variable_price: VariablePrice,
}

impl PriceInfo {
    /// Whether `at` falls within `[start_time, expired_at)`
    pub fn covers(&self, at: DateTime<FixedOffset>) -> bool {
        self.start_time <= at && at < self.expired_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TariffPrice {
    pub price_info: Vec<PriceInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridTariff {
    pub tariff_type: TariffType,
    pub tariff_price: TariffPrice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridTariffCollection {
    pub grid_tariff: GridTariff,
    #[serde(default)]
    pub metering_point_ids: Vec<String>,
    /// Per metering point fixed price levels; kept as returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metering_points_and_price_levels: Option<serde_json::Value>,
}

impl GridTariffCollection {
    /// Name of the fixed price level the API assigns to `metering_point_id`, if listed
    pub fn current_fixed_price_level(&self, metering_point_id: &str) -> Option<&str> {
        self.metering_points_and_price_levels
            .as_ref()?
            .as_array()?
            .iter()
            .find(|entry| {
                entry.get("meteringPointId").and_then(|v| v.as_str()) == Some(metering_point_id)
            })
            .and_then(|entry| entry.get("currentFixedPriceLevel"))
            .and_then(|level| {
                level
                    .get("levelId")
                    .or_else(|| level.get("level"))
                    .and_then(|v| v.as_str())
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MeteringPointsGridTariffs {
    pub grid_tariff_collections: Vec<GridTariffCollection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TariffTypes {
    pub tariff_types: Vec<TariffType>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TariffQueryResult {
    pub grid_tariff: GridTariff,
}

/// Predefined periods accepted by the tariff query endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TariffRange {
    Yesterday,
    Today,
    Tomorrow,
}

/// Query for the prices of one tariff
#[derive(Debug, Clone, PartialEq)]
pub struct TariffQuery {
    pub tariff_key: String,
    pub range: Option<TariffRange>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
}

impl TariffQuery {
    pub fn new(tariff_key: impl Into<String>) -> Self {
        Self {
            tariff_key: tariff_key.into(),
            range: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn range(mut self, range: TariffRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Query string parameters in the casing the API expects
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("TariffKey", self.tariff_key.clone())];
        if let Some(range) = self.range {
            pairs.push(("Range", range.to_string()));
        }
        if let Some(start) = self.start_time {
            pairs.push(("StartTime", start.format(DATE_FORMAT).to_string()));
        }
        if let Some(end) = self.end_time {
            pairs.push(("EndTime", end.format(DATE_FORMAT).to_string()));
        }
        pairs
    }
}

/// Body of the metering point grid tariff request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringPointsRequest {
    pub metering_point_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<TariffRange>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "lenient::serialize_naive"
    )]
    pub start_time: Option<NaiveDateTime>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "lenient::serialize_naive"
    )]
    pub end_time: Option<NaiveDateTime>,
}

impl MeteringPointsRequest {
    /// Today's tariffs for a single metering point
    pub fn today(metering_point_id: &str) -> Self {
        Self {
            metering_point_ids: vec![metering_point_id.to_string()],
            range: Some(TariffRange::Today),
            start_time: None,
            end_time: None,
        }
    }
}

mod lenient {
    use chrono::DateTime;
    use chrono::FixedOffset;
    use chrono::Local;
    use chrono::NaiveDateTime;
    use chrono::TimeZone;
    use serde::de::Error;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    use super::DATE_FORMAT;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        String(String),
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match NumberOrString::deserialize(d)? {
            NumberOrString::Number(n) => Ok(n),
            NumberOrString::String(s) => s
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid number '{}'", s))),
        }
    }

    pub fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        let n = number(d)?;
        if n.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(&n) {
            Ok(n as u32)
        } else {
            Err(D::Error::custom(format!("invalid integer '{}'", n)))
        }
    }

    pub fn boolean<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        match BoolOrString::deserialize(d)? {
            BoolOrString::Bool(b) => Ok(b),
            BoolOrString::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            BoolOrString::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            BoolOrString::String(s) => Err(D::Error::custom(format!("invalid boolean '{}'", s))),
        }
    }

    /// RFC 3339, or a naive timestamp in the host's local timezone
    pub fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<FixedOffset>, D::Error> {
        let s = String::deserialize(d)?;
        parse_timestamp(&s).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", s)))
    }

    pub(super) fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt);
        }
        let naive = NaiveDateTime::parse_from_str(s, DATE_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
            .ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.fixed_offset())
    }

    pub fn serialize_naive<S: Serializer>(
        value: &Option<NaiveDateTime>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => s.serialize_str(&dt.format(DATE_FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }
}
