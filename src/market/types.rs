//! Domain types served to callers of the repository.

use crate::store::CoinRecord;

/// A tracked asset with its latest quoted snapshot.
///
/// List reads leave `details` empty; point reads populate it.
#[derive(Debug, Clone, PartialEq)]
pub struct Coin {
  pub id: i64,
  pub name: String,
  pub symbol: String,
  pub rank: i64,
  pub price: f64,
  pub percent_change_24h: f64,
  pub market_cap: f64,
  pub details: Option<CoinDetails>,
}

/// Full per-coin details.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinDetails {
  pub slug: String,
  pub circulating_supply: f64,
  pub total_supply: f64,
  pub max_supply: Option<f64>,
  pub num_market_pairs: i64,
  pub infinite_supply: bool,
  pub last_updated: String,
  pub date_added: String,
  pub tags: Vec<String>,
  pub volume_24h: f64,
  pub fully_diluted_market_cap: f64,
  pub market_cap_dominance: f64,
  pub quote_last_updated: String,
}

/// One fixed-interval price/volume summary for charting. Request-scoped,
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
  pub open_time: i64,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub volume: f64,
  pub close_time: i64,
  pub quote_asset_volume: f64,
  pub number_of_trades: u64,
  pub taker_buy_base_asset_volume: f64,
  pub taker_buy_quote_asset_volume: f64,
}

impl Coin {
  /// Slim mapping for list views.
  pub fn from_record(record: &CoinRecord) -> Self {
    Self {
      id: record.id,
      name: record.name.clone(),
      symbol: record.symbol.clone(),
      rank: record.rank,
      price: record.price,
      percent_change_24h: record.percent_change_24h,
      market_cap: record.market_cap,
      details: None,
    }
  }

  /// Full mapping for detail views, tags reconstructed to a list.
  pub fn from_record_detailed(record: &CoinRecord) -> Self {
    let d = &record.details;
    Self {
      details: Some(CoinDetails {
        slug: d.slug.clone(),
        circulating_supply: d.circulating_supply,
        total_supply: d.total_supply,
        max_supply: d.max_supply,
        num_market_pairs: d.num_market_pairs,
        infinite_supply: d.infinite_supply,
        last_updated: d.last_updated.clone(),
        date_added: d.date_added.clone(),
        tags: d
          .tags
          .split(',')
          .filter(|t| !t.is_empty())
          .map(str::to_string)
          .collect(),
        volume_24h: d.volume_24h,
        fully_diluted_market_cap: d.fully_diluted_market_cap,
        market_cap_dominance: d.market_cap_dominance,
        quote_last_updated: d.quote_last_updated.clone(),
      }),
      ..Self::from_record(record)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::CoinDetailsRecord;

  fn record() -> CoinRecord {
    CoinRecord {
      id: 1,
      name: "Bitcoin".to_string(),
      symbol: "BTC".to_string(),
      rank: 1,
      price: 10000.0,
      percent_change_24h: 1.5,
      market_cap: 1_000_000.0,
      details: CoinDetailsRecord {
        slug: "bitcoin".to_string(),
        circulating_supply: 19_000_000.0,
        total_supply: 21_000_000.0,
        max_supply: Some(21_000_000.0),
        num_market_pairs: 500,
        infinite_supply: false,
        last_updated: "2024-01-01T00:00:00.000Z".to_string(),
        date_added: "2013-04-28T00:00:00.000Z".to_string(),
        tags: "mineable,pow".to_string(),
        volume_24h: 42_000.0,
        fully_diluted_market_cap: 2_000_000.0,
        market_cap_dominance: 51.2,
        quote_last_updated: "2024-01-01T00:00:00.000Z".to_string(),
      },
    }
  }

  #[test]
  fn slim_mapping_has_no_details() {
    let coin = Coin::from_record(&record());
    assert_eq!(coin.symbol, "BTC");
    assert!(coin.details.is_none());
  }

  #[test]
  fn detailed_mapping_splits_tags() {
    let coin = Coin::from_record_detailed(&record());
    let details = coin.details.expect("details populated");
    assert_eq!(details.tags, vec!["mineable", "pow"]);
    assert_eq!(details.slug, "bitcoin");
  }

  #[test]
  fn empty_tags_map_to_empty_list() {
    let mut rec = record();
    rec.details.tags = String::new();
    let coin = Coin::from_record_detailed(&rec);
    assert!(coin.details.expect("details populated").tags.is_empty());
  }
}
