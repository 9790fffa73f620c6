//! Canned Elvia API payloads for tests.

pub const METERING_POINT_ID: &str = "707057500012345678";

/// Two price periods on 2024-01-15 (CET). The day period encodes its numbers
/// and booleans as strings.
pub const METERING_POINTS_RESPONSE: &str = r#"{
  "gridTariffCollections": [
    {
      "gridTariff": {
        "tariffType": {
          "tariffKey": "private_tou_rush",
          "company": "Elvia AS",
          "customerType": "private",
          "title": "Nettleie privat",
          "resolution": 60,
          "description": "Time-of-use grid tariff for households"
        },
        "tariffPrice": {
          "priceInfo": [
            {
              "startTime": "2024-01-15T00:00:00+01:00",
              "expiredAt": "2024-01-15T06:00:00+01:00",
              "hoursShortName": "natt",
              "season": "winter",
              "publicHoliday": false,
              "fixedPrices": [
                {
                  "priceLevel": [
                    {
                      "level": "0-2",
                      "levelInfo": "0-2 kW",
                      "total": 125.0,
                      "fixed": 100.0,
                      "taxes": 25.0,
                      "currency": "NOK",
                      "uom": "kr/month"
                    },
                    {
                      "level": "2-5",
                      "levelInfo": "2-5 kW",
                      "total": 206.25,
                      "fixed": 165.0,
                      "taxes": 41.25,
                      "currency": "NOK",
                      "uom": "kr/month"
                    }
                  ]
                }
              ],
              "variablePrice": {
                "total": 0.364,
                "energy": 0.2,
                "power": 0.0,
                "taxes": 0.164,
                "level": "low",
                "currency": "NOK",
                "uom": "kr/kWh"
              }
            },
            {
              "startTime": "2024-01-15T06:00:00+01:00",
              "expiredAt": "2024-01-15T22:00:00+01:00",
              "hoursShortName": "dag",
              "season": "winter",
              "publicHoliday": "false",
              "fixedPrices": [
                {
                  "priceLevel": [
                    {
                      "level": "0-2",
                      "levelInfo": "0-2 kW",
                      "total": "125.0",
                      "fixed": "100.0",
                      "taxes": "25.0",
                      "currency": "NOK",
                      "uom": "kr/month"
                    },
                    {
                      "level": "2-5",
                      "levelInfo": "2-5 kW",
                      "total": "206.25",
                      "fixed": "165.0",
                      "taxes": "41.25",
                      "currency": "NOK",
                      "uom": "kr/month"
                    }
                  ]
                }
              ],
              "variablePrice": {
                "total": "0.4640",
                "energy": "0.3",
                "power": "0",
                "taxes": "0.164",
                "level": "high",
                "currency": "NOK",
                "uom": "kr/kWh"
              }
            }
          ]
        }
      },
      "meteringPointIds": ["707057500012345678"],
      "meteringPointsAndPriceLevels": [
        {
          "meteringPointId": "707057500012345678",
          "currentFixedPriceLevel": {
            "levelId": "2-5",
            "monthlyTotal": 206.25
          }
        }
      ]
    }
  ]
}"#;

pub const TARIFF_TYPES_RESPONSE: &str = r#"{
  "tariffTypes": [
    {
      "tariffKey": "private_tou_rush",
      "company": "Elvia AS",
      "customerType": "private",
      "title": "Nettleie privat",
      "resolution": "60",
      "description": "Time-of-use grid tariff for households"
    }
  ]
}"#;

/// Parsed form of [`METERING_POINTS_RESPONSE`]
pub fn collections() -> Vec<super::models::GridTariffCollection> {
    serde_json::from_str::<super::models::MeteringPointsGridTariffs>(METERING_POINTS_RESPONSE)
        .unwrap()
        .grid_tariff_collections
}
