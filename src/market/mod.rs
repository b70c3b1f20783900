//! Remote market data: API types, client, domain types, and the repository
//! that reconciles them with the local store.

pub mod api_types;
pub mod client;
pub mod repository;
pub mod types;

pub use client::{MarketApi, MarketClient};
pub use repository::{CoinRepository, SyncOutcome};
pub use types::{Candle, Coin};
