//! Remote market-data client.
//!
//! Listings and single-symbol lookups go to a CoinMarketCap-shaped API with
//! the key injected per request; candles come from a Binance-shaped kline
//! endpoint that needs no key.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;

use crate::config::Config;
use crate::error::RemoteError;
use crate::market::api_types::{ApiErrorEnvelope, ListingsResponse, RawCoin};

const API_KEY_HEADER: &str = "X-CMC_PRO_API_KEY";

/// The remote operations the repository consumes.
///
/// The repository only ever talks to this trait, so tests can substitute a
/// stub for the network.
#[async_trait]
pub trait MarketApi: Send + Sync {
  /// Latest full listing, one entry per tracked asset.
  async fn fetch_listings(&self) -> Result<Vec<RawCoin>, RemoteError>;

  /// Lookup by symbol; at most one entry in practice.
  async fn fetch_by_symbol(&self, symbol: &str) -> Result<Vec<RawCoin>, RemoteError>;

  /// Raw kline rows for a trading pair, string-encoded fields in fixed
  /// position order.
  async fn fetch_klines(&self, symbol: &str, interval: &str)
    -> Result<Vec<Vec<String>>, RemoteError>;
}

/// HTTP implementation of [`MarketApi`].
pub struct MarketClient {
  http: reqwest::Client,
  api_key: String,
  base_url: String,
  candles_url: String,
  currency: String,
  listing_limit: u32,
  candle_limit: u32,
}

impl MarketClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::api_key()?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      http,
      api_key,
      base_url: config.api.base_url.trim_end_matches('/').to_string(),
      candles_url: config.candles.base_url.clone(),
      currency: config.api.currency.clone(),
      listing_limit: config.api.listing_limit,
      candle_limit: config.candles.limit,
    })
  }

  async fn get_listings(&self, query: &[(&str, String)]) -> Result<Vec<RawCoin>, RemoteError> {
    let url = format!("{}/v1/cryptocurrency/listings/latest", self.base_url);
    let response = self
      .http
      .get(&url)
      .header(API_KEY_HEADER, &self.api_key)
      .query(query)
      .send()
      .await?;

    if !response.status().is_success() {
      return Err(api_error(response).await);
    }

    let body: ListingsResponse = response.json().await?;
    Ok(body.data)
  }
}

#[async_trait]
impl MarketApi for MarketClient {
  async fn fetch_listings(&self) -> Result<Vec<RawCoin>, RemoteError> {
    self
      .get_listings(&[
        ("start", "1".to_string()),
        ("limit", self.listing_limit.to_string()),
        ("convert", self.currency.clone()),
      ])
      .await
  }

  async fn fetch_by_symbol(&self, symbol: &str) -> Result<Vec<RawCoin>, RemoteError> {
    self
      .get_listings(&[
        ("symbol", symbol.to_string()),
        ("convert", self.currency.clone()),
      ])
      .await
  }

  async fn fetch_klines(
    &self,
    symbol: &str,
    interval: &str,
  ) -> Result<Vec<Vec<String>>, RemoteError> {
    let response = self
      .http
      .get(&self.candles_url)
      .query(&[
        ("symbol", symbol.to_string()),
        ("interval", interval.to_string()),
        ("limit", self.candle_limit.to_string()),
      ])
      .send()
      .await?;

    if !response.status().is_success() {
      return Err(api_error(response).await);
    }

    // Kline rows mix strings and numbers on the wire; normalize everything to
    // the string form the translator expects.
    let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
    Ok(
      rows
        .into_iter()
        .map(|row| row.into_iter().map(value_to_string).collect())
        .collect(),
    )
  }
}

/// Classify a non-success response, pulling message and code out of the error
/// envelope when the body carries one.
async fn api_error(response: reqwest::Response) -> RemoteError {
  let status = response.status();
  let body = response.text().await.unwrap_or_default();

  match serde_json::from_str::<ApiErrorEnvelope>(&body) {
    Ok(envelope) => RemoteError::Api {
      message: envelope
        .status
        .error_message
        .unwrap_or_else(|| format!("HTTP {status}")),
      code: envelope.status.error_code,
    },
    Err(_) => RemoteError::Api {
      message: format!("HTTP {status}"),
      code: None,
    },
  }
}

fn value_to_string(value: serde_json::Value) -> String {
  match value {
    serde_json::Value::String(s) => s,
    other => other.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn error_envelope_parses_message_and_code() {
    let body = r#"{"status":{"error_code":1002,"error_message":"API key missing."}}"#;
    let envelope: ApiErrorEnvelope = serde_json::from_str(body).unwrap();
    assert_eq!(envelope.status.error_code, Some(1002));
    assert_eq!(envelope.status.error_message.as_deref(), Some("API key missing."));
  }

  #[test]
  fn kline_values_normalize_to_strings() {
    assert_eq!(value_to_string(serde_json::json!("10.5")), "10.5");
    assert_eq!(value_to_string(serde_json::json!(1000)), "1000");
    assert_eq!(value_to_string(serde_json::json!(42.0)), "42.0");
  }
}
