//! Read-through repository over the remote client and the local store.
//!
//! The repository is the only seam UI-facing code talks to: list/detail/page
//! reads come straight from the store (never blocking on the network), a
//! search that misses the cache falls back to a single remote lookup, and the
//! periodic sync reconciles the store with the latest remote listing.

use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{RemoteError, RepoError};
use crate::market::api_types::candle_from_raw;
use crate::market::client::MarketApi;
use crate::market::types::{Candle, Coin};
use crate::store::{CoinRecord, CoinStore, LiveQuery};

/// Full listings a coin can miss before its row is pruned as delisted.
const MAX_MISSED_SYNCS: i64 = 3;

/// Outcome of a remote call, classified at the repository boundary. No raw
/// transport error crosses this type.
#[derive(Debug)]
pub enum ApiResponse<T> {
  Success(T),
  Error { message: String, code: Option<i64> },
}

/// Invoke a remote operation and classify its outcome.
pub async fn safe_call<T, F>(call: F) -> ApiResponse<T>
where
  F: Future<Output = Result<T, RemoteError>>,
{
  match call.await {
    Ok(payload) => ApiResponse::Success(payload),
    Err(RemoteError::Api { message, code }) => ApiResponse::Error { message, code },
    Err(e) => ApiResponse::Error {
      message: e.to_string(),
      code: None,
    },
  }
}

/// What one completed sync did.
#[derive(Debug, Clone, Copy)]
pub struct SyncReport {
  /// Listing entries fetched and upserted.
  pub fetched: usize,
  /// Rows pruned as delisted.
  pub pruned: usize,
}

/// Result of a sync request.
#[derive(Debug, Clone, Copy)]
pub enum SyncOutcome {
  Synced(SyncReport),
  /// Another sync already holds the gate; this invocation was coalesced.
  InFlight,
}

/// One page of translated coins.
#[derive(Debug, Clone)]
pub struct CoinPage {
  pub coins: Vec<Coin>,
  pub next_offset: Option<u64>,
}

/// The single seam between remote and local data.
///
/// Stateless apart from the sync gate; clones share the store and client and
/// may be used concurrently.
#[derive(Clone)]
pub struct CoinRepository {
  client: Arc<dyn MarketApi>,
  store: CoinStore,
  currency: String,
  sync_gate: Arc<tokio::sync::Mutex<()>>,
}

impl CoinRepository {
  pub fn new(client: Arc<dyn MarketApi>, store: CoinStore, currency: impl Into<String>) -> Self {
    Self {
      client,
      store,
      currency: currency.into(),
      sync_gate: Arc::new(tokio::sync::Mutex::new(())),
    }
  }

  /// Fetch the full remote listing and reconcile the store with it.
  ///
  /// Overlapping invocations coalesce: whoever holds the gate syncs, everyone
  /// else gets [`SyncOutcome::InFlight`]. A remote failure abandons the sync
  /// and leaves the store at its last-known-good state.
  pub async fn sync(&self) -> Result<SyncOutcome, RepoError> {
    let Ok(_gate) = self.sync_gate.try_lock() else {
      return Ok(SyncOutcome::InFlight);
    };

    let listings = match safe_call(self.client.fetch_listings()).await {
      ApiResponse::Success(data) => data,
      ApiResponse::Error { message, code } => {
        return Err(RemoteError::Api { message, code }.into());
      }
    };

    // Build the whole batch before the first write: a sync cancelled
    // mid-flight must leave the store fully pre- or fully post-sync.
    let records: Vec<CoinRecord> = listings
      .into_iter()
      .map(|raw| raw.into_record(&self.currency))
      .collect();
    let fetched = records.len();

    self.store.advance_generation()?;
    self.store.upsert_all(&records)?;
    let pruned = self.store.prune_stale(MAX_MISSED_SYNCS)?;
    self.store.touch_synced_at()?;

    info!(fetched, pruned, "listing sync complete");
    Ok(SyncOutcome::Synced(SyncReport { fetched, pruned }))
  }

  /// Live ranked listing, slim shape.
  pub fn coins(&self) -> LiveQuery<Vec<Coin>> {
    self
      .store
      .watch_all()
      .map(|records| records.iter().map(Coin::from_record).collect())
  }

  /// Live single coin with full details.
  pub fn coin_by_id(&self, id: i64) -> LiveQuery<Option<Coin>> {
    self
      .store
      .watch_by_id(id)
      .map(|record| record.as_ref().map(Coin::from_record_detailed))
  }

  /// One rank-ordered page of the cached listing.
  pub fn coin_page(&self, offset: u64, limit: u32) -> Result<CoinPage, RepoError> {
    let page = self.store.page(offset, limit)?;
    Ok(CoinPage {
      coins: page.records.iter().map(Coin::from_record).collect(),
      next_offset: page.next_offset,
    })
  }

  /// Search the cache; on an empty local result, fall back to one remote
  /// symbol lookup and cache whatever comes back.
  ///
  /// Best effort by contract: a failed or empty fallback reads as "no
  /// results", never as an error. Store failures still propagate.
  pub async fn search(&self, query: &str) -> Result<Vec<Coin>, RepoError> {
    let local = self.store.search(query)?;
    if !local.is_empty() {
      return Ok(local.iter().map(Coin::from_record).collect());
    }

    match safe_call(self.client.fetch_by_symbol(query)).await {
      ApiResponse::Success(data) => {
        let records: Vec<CoinRecord> = data
          .into_iter()
          .map(|raw| raw.into_record(&self.currency))
          .collect();
        if records.is_empty() {
          return Ok(Vec::new());
        }
        self.store.upsert_all(&records)?;
        Ok(records.iter().map(Coin::from_record).collect())
      }
      ApiResponse::Error { message, code } => {
        warn!(code, "symbol lookup for {query:?} failed: {message}");
        Ok(Vec::new())
      }
    }
  }

  /// Fetch and translate candles for one trading pair. Remote-only, never
  /// cached; any malformed row fails the whole request.
  pub async fn candles(&self, symbol: &str, interval: &str) -> Result<Vec<Candle>, RepoError> {
    let rows = match safe_call(self.client.fetch_klines(symbol, interval)).await {
      ApiResponse::Success(rows) => rows,
      ApiResponse::Error { message, code } => {
        return Err(RemoteError::Api { message, code }.into());
      }
    };

    let candles = rows
      .iter()
      .map(|row| candle_from_raw(row))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(candles)
  }

  /// When the store last completed a sync.
  pub fn last_synced_at(&self) -> Result<Option<chrono::DateTime<chrono::Utc>>, RepoError> {
    Ok(self.store.last_synced_at()?)
  }
}
