//! Serde-deserializable types matching the market API responses, plus the
//! translation into persisted records and candle tuples.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use serde::Deserialize;
use std::collections::HashMap;

use crate::error::TranslateError;
use crate::market::types::Candle;
use crate::store::{CoinDetailsRecord, CoinRecord};

/// Expected field count of one raw kline row.
const CANDLE_FIELDS: usize = 11;

// ============================================================================
// Listings endpoint response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListingsResponse {
  #[serde(default)]
  pub data: Vec<RawCoin>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCoin {
  pub id: i64,
  pub name: String,
  pub symbol: String,
  #[serde(default)]
  pub slug: String,
  #[serde(default)]
  pub cmc_rank: i64,
  #[serde(default)]
  pub num_market_pairs: i64,
  #[serde(default)]
  pub circulating_supply: f64,
  #[serde(default)]
  pub total_supply: f64,
  #[serde(default)]
  pub max_supply: Option<f64>,
  #[serde(default)]
  pub infinite_supply: bool,
  #[serde(default)]
  pub last_updated: String,
  #[serde(default)]
  pub date_added: String,
  #[serde(default)]
  pub tags: Vec<String>,
  /// Quote snapshots keyed by reference currency ("USD", ...).
  #[serde(default)]
  pub quote: HashMap<String, RawQuote>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawQuote {
  #[serde(default)]
  pub price: f64,
  #[serde(default)]
  pub volume_24h: f64,
  #[serde(default)]
  pub volume_change_24h: f64,
  #[serde(default)]
  pub percent_change_24h: f64,
  #[serde(default)]
  pub market_cap: f64,
  #[serde(default)]
  pub fully_diluted_market_cap: f64,
  #[serde(default)]
  pub market_cap_dominance: f64,
  #[serde(default)]
  pub last_updated: String,
}

// ============================================================================
// Error envelope
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiErrorEnvelope {
  pub status: ApiErrorStatus,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorStatus {
  #[serde(default)]
  pub error_code: Option<i64>,
  #[serde(default)]
  pub error_message: Option<String>,
}

// ============================================================================
// Translation
// ============================================================================

impl RawCoin {
  /// Map one listing entry to its persisted shape.
  ///
  /// Quote-derived monetary fields are rounded to 2 decimals here and nowhere
  /// else; supply figures keep full precision. A listing without a quote in
  /// the requested currency stores zeroed quote fields.
  pub fn into_record(self, currency: &str) -> CoinRecord {
    let quote = self.quote.get(currency).cloned().unwrap_or_default();

    CoinRecord {
      id: self.id,
      name: self.name,
      symbol: self.symbol,
      rank: self.cmc_rank,
      price: round2(quote.price),
      percent_change_24h: round2(quote.percent_change_24h),
      market_cap: round2(quote.market_cap),
      details: CoinDetailsRecord {
        slug: self.slug,
        circulating_supply: self.circulating_supply,
        total_supply: self.total_supply,
        max_supply: self.max_supply,
        num_market_pairs: self.num_market_pairs,
        infinite_supply: self.infinite_supply,
        last_updated: self.last_updated,
        date_added: self.date_added,
        tags: self.tags.join(","),
        volume_24h: round2(quote.volume_24h),
        fully_diluted_market_cap: round2(quote.fully_diluted_market_cap),
        market_cap_dominance: round2(quote.market_cap_dominance),
        quote_last_updated: quote.last_updated,
      },
    }
  }
}

/// Translate one raw kline row into a [`Candle`].
///
/// Rows are positional: open-time, open, high, low, close, volume, close-time,
/// quote-asset-volume, trade-count, taker-buy-base-volume,
/// taker-buy-quote-volume, all string-encoded. Anything but exactly 11 fields
/// fails the row; downstream charting needs complete tuples.
pub fn candle_from_raw(raw: &[String]) -> Result<Candle, TranslateError> {
  if raw.len() != CANDLE_FIELDS {
    return Err(TranslateError::CandleShape {
      got: raw.len(),
      want: CANDLE_FIELDS,
    });
  }

  Ok(Candle {
    open_time: parse_f64("open_time", &raw[0])? as i64,
    open: parse_f64("open", &raw[1])?,
    high: parse_f64("high", &raw[2])?,
    low: parse_f64("low", &raw[3])?,
    close: parse_f64("close", &raw[4])?,
    volume: parse_f64("volume", &raw[5])?,
    close_time: parse_f64("close_time", &raw[6])? as i64,
    quote_asset_volume: parse_f64("quote_asset_volume", &raw[7])?,
    number_of_trades: parse_f64("number_of_trades", &raw[8])? as u64,
    taker_buy_base_asset_volume: parse_f64("taker_buy_base_asset_volume", &raw[9])?,
    taker_buy_quote_asset_volume: parse_f64("taker_buy_quote_asset_volume", &raw[10])?,
  })
}

fn parse_f64(field: &'static str, value: &str) -> Result<f64, TranslateError> {
  value.parse().map_err(|_| TranslateError::Number {
    field,
    value: value.to_string(),
  })
}

fn round2(value: f64) -> f64 {
  (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
  use super::*;

  fn raw_coin() -> RawCoin {
    RawCoin {
      id: 1,
      name: "Bitcoin".to_string(),
      symbol: "BTC".to_string(),
      slug: "bitcoin".to_string(),
      cmc_rank: 1,
      num_market_pairs: 500,
      circulating_supply: 19_000_000.123456,
      total_supply: 21_000_000.0,
      max_supply: Some(21_000_000.0),
      infinite_supply: false,
      last_updated: "2024-01-01T00:00:00.000Z".to_string(),
      date_added: "2013-04-28T00:00:00.000Z".to_string(),
      tags: vec!["mineable".to_string(), "pow".to_string()],
      quote: HashMap::from([(
        "USD".to_string(),
        RawQuote {
          price: 10000.456,
          volume_24h: 42_000.009,
          percent_change_24h: 1.234,
          market_cap: 1_234_567.891,
          fully_diluted_market_cap: 2_000_000.0,
          market_cap_dominance: 51.249,
          last_updated: "2024-01-01T00:00:00.000Z".to_string(),
          ..RawQuote::default()
        },
      )]),
    }
  }

  #[test]
  fn record_translation_rounds_quotes_and_joins_tags() {
    let record = raw_coin().into_record("USD");

    assert_eq!(record.price, 10000.46);
    assert_eq!(record.percent_change_24h, 1.23);
    assert_eq!(record.market_cap, 1_234_567.89);
    assert_eq!(record.details.volume_24h, 42_000.01);
    assert_eq!(record.details.market_cap_dominance, 51.25);
    // Supply keeps full precision.
    assert_eq!(record.details.circulating_supply, 19_000_000.123456);
    assert_eq!(record.details.tags, "mineable,pow");
  }

  #[test]
  fn missing_quote_currency_zeroes_quote_fields() {
    let record = raw_coin().into_record("EUR");

    assert_eq!(record.price, 0.0);
    assert_eq!(record.market_cap, 0.0);
    assert_eq!(record.details.quote_last_updated, "");
    assert_eq!(record.name, "Bitcoin");
  }

  #[test]
  fn candle_translation_round_trips() {
    let raw: Vec<String> = [
      "1000", "10.0", "12.0", "9.0", "11.0", "500.0", "2000", "5500.0", "42", "300.0", "3300.0",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let candle = candle_from_raw(&raw).unwrap();
    assert_eq!(candle.open_time, 1000);
    assert_eq!(candle.open, 10.0);
    assert_eq!(candle.high, 12.0);
    assert_eq!(candle.low, 9.0);
    assert_eq!(candle.close, 11.0);
    assert_eq!(candle.volume, 500.0);
    assert_eq!(candle.close_time, 2000);
    assert_eq!(candle.quote_asset_volume, 5500.0);
    assert_eq!(candle.number_of_trades, 42);
    assert_eq!(candle.taker_buy_base_asset_volume, 300.0);
    assert_eq!(candle.taker_buy_quote_asset_volume, 3300.0);
  }

  #[test]
  fn short_candle_row_is_rejected() {
    let raw: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    let err = candle_from_raw(&raw).unwrap_err();
    assert!(matches!(
      err,
      TranslateError::CandleShape { got: 10, want: 11 }
    ));
  }

  #[test]
  fn unparseable_candle_field_is_rejected() {
    let mut raw: Vec<String> = (0..11).map(|i| i.to_string()).collect();
    raw[4] = "not-a-price".to_string();
    let err = candle_from_raw(&raw).unwrap_err();
    assert!(matches!(err, TranslateError::Number { field: "close", .. }));
  }
}
