//! Local SQLite mirror of the tracked coin set.
//!
//! The store is a disposable cache of remote truth: one `coins` table keyed by
//! the remote-assigned id, with the per-coin details block stored inline in
//! prefixed columns. Writes go through batch upserts; reads are either
//! one-shot queries or [`LiveQuery`] subscriptions that re-emit after every
//! committed write.

mod live;

pub use live::LiveQuery;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::error::StoreError;

/// Hard cap on full-listing reads.
const LISTING_CAP: u32 = 5000;

/// Bumped whenever the persisted layout changes. The store is a mirror, not a
/// system of record, so a version bump drops and recreates everything.
const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS coins (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    symbol TEXT NOT NULL,
    rank INTEGER NOT NULL,
    price REAL NOT NULL,
    percent_change_24h REAL NOT NULL,
    market_cap REAL NOT NULL,
    details_slug TEXT NOT NULL,
    details_circulating_supply REAL NOT NULL,
    details_total_supply REAL NOT NULL,
    details_max_supply REAL,
    details_num_market_pairs INTEGER NOT NULL,
    details_infinite_supply INTEGER NOT NULL,
    details_last_updated TEXT NOT NULL,
    details_date_added TEXT NOT NULL,
    details_tags TEXT NOT NULL,
    details_volume_24h REAL NOT NULL,
    details_fully_diluted_market_cap REAL NOT NULL,
    details_market_cap_dominance REAL NOT NULL,
    details_quote_last_updated TEXT NOT NULL,
    last_seen INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_coins_rank ON coins(rank);

CREATE TABLE IF NOT EXISTS sync_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const COIN_COLUMNS: &str = "id, name, symbol, rank, price, percent_change_24h, market_cap, \
   details_slug, details_circulating_supply, details_total_supply, details_max_supply, \
   details_num_market_pairs, details_infinite_supply, details_last_updated, details_date_added, \
   details_tags, details_volume_24h, details_fully_diluted_market_cap, \
   details_market_cap_dominance, details_quote_last_updated";

/// One persisted coin row. Created on first sync, replaced wholesale on every
/// subsequent sync.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinRecord {
  /// Stable primary key assigned by the remote source, never reused.
  pub id: i64,
  pub name: String,
  pub symbol: String,
  /// Remote-assigned market-cap rank; default sort key, may move between syncs.
  pub rank: i64,
  pub price: f64,
  pub percent_change_24h: f64,
  pub market_cap: f64,
  pub details: CoinDetailsRecord,
}

/// Embedded details block, written and read together with its parent row.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinDetailsRecord {
  pub slug: String,
  pub circulating_supply: f64,
  pub total_supply: f64,
  pub max_supply: Option<f64>,
  pub num_market_pairs: i64,
  pub infinite_supply: bool,
  pub last_updated: String,
  pub date_added: String,
  /// Comma-joined on write, split back to a list when mapped to the domain.
  pub tags: String,
  pub volume_24h: f64,
  pub fully_diluted_market_cap: f64,
  pub market_cap_dominance: f64,
  pub quote_last_updated: String,
}

/// One offset page of records, ranked ascending.
#[derive(Debug, Clone)]
pub struct RecordPage {
  pub records: Vec<CoinRecord>,
  /// Offset of the next page, `None` when this page is the last.
  pub next_offset: Option<u64>,
}

struct StoreInner {
  conn: Mutex<Connection>,
  /// Write counter observed by live queries. Bumped once per committed write.
  changes: watch::Sender<u64>,
}

/// Handle to the coin store. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct CoinStore {
  inner: Arc<StoreInner>,
}

impl CoinStore {
  /// Open or create the store at the given path.
  pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let conn = Connection::open(path)?;
    Self::from_connection(conn)
  }

  /// Open a throwaway in-memory store.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    run_migrations(&conn)?;
    let (changes, _) = watch::channel(0u64);
    Ok(Self {
      inner: Arc::new(StoreInner {
        conn: Mutex::new(conn),
        changes,
      }),
    })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.inner.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }

  fn notify_changed(&self) {
    self.inner.changes.send_modify(|v| *v += 1);
  }

  /// Insert-or-replace the batch by primary key, as one transaction.
  ///
  /// Rows are stamped with the current sync generation. Live subscriptions are
  /// notified once, after commit.
  pub fn upsert_all(&self, records: &[CoinRecord]) -> Result<(), StoreError> {
    if records.is_empty() {
      return Ok(());
    }

    {
      let mut conn = self.conn()?;
      let tx = conn.transaction()?;
      let generation = generation_of(&tx)?;
      {
        let mut stmt = tx.prepare(
          "INSERT OR REPLACE INTO coins (id, name, symbol, rank, price, percent_change_24h, \
           market_cap, details_slug, details_circulating_supply, details_total_supply, \
           details_max_supply, details_num_market_pairs, details_infinite_supply, \
           details_last_updated, details_date_added, details_tags, details_volume_24h, \
           details_fully_diluted_market_cap, details_market_cap_dominance, \
           details_quote_last_updated, last_seen) \
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
           ?18, ?19, ?20, ?21)",
        )?;
        for record in records {
          let d = &record.details;
          stmt.execute(params![
            record.id,
            record.name,
            record.symbol,
            record.rank,
            record.price,
            record.percent_change_24h,
            record.market_cap,
            d.slug,
            d.circulating_supply,
            d.total_supply,
            d.max_supply,
            d.num_market_pairs,
            d.infinite_supply,
            d.last_updated,
            d.date_added,
            d.tags,
            d.volume_24h,
            d.fully_diluted_market_cap,
            d.market_cap_dominance,
            d.quote_last_updated,
            generation,
          ])?;
        }
      }
      tx.commit()?;
    }

    self.notify_changed();
    Ok(())
  }

  /// All records ordered by rank ascending, capped at 5000.
  pub fn get_all(&self) -> Result<Vec<CoinRecord>, StoreError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(&format!(
      "SELECT {COIN_COLUMNS} FROM coins ORDER BY rank LIMIT {LISTING_CAP}"
    ))?;
    let records = stmt
      .query_map([], record_from_row)?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
  }

  /// Point lookup by primary key.
  pub fn get_by_id(&self, id: i64) -> Result<Option<CoinRecord>, StoreError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(&format!("SELECT {COIN_COLUMNS} FROM coins WHERE id = ?1"))?;
    Ok(stmt.query_row(params![id], record_from_row).optional()?)
  }

  /// Case-insensitive substring match on name, symbol, or the decimal form of
  /// the id. An empty query matches everything; `%` and `_` match literally.
  pub fn search(&self, query: &str) -> Result<Vec<CoinRecord>, StoreError> {
    let pattern = format!("%{}%", escape_like(query));
    let conn = self.conn()?;
    let mut stmt = conn.prepare(&format!(
      r"SELECT {COIN_COLUMNS} FROM coins
         WHERE name LIKE ?1 ESCAPE '\'
            OR symbol LIKE ?1 ESCAPE '\'
            OR CAST(id AS TEXT) LIKE ?1 ESCAPE '\'
         ORDER BY rank"
    ))?;
    let records = stmt
      .query_map(params![pattern], record_from_row)?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
  }

  /// One rank-ordered page, reflecting the committed state at issue time.
  pub fn page(&self, offset: u64, limit: u32) -> Result<RecordPage, StoreError> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(&format!(
      "SELECT {COIN_COLUMNS} FROM coins ORDER BY rank LIMIT ?1 OFFSET ?2"
    ))?;
    // One row of lookahead tells us whether another page exists.
    let mut records = stmt
      .query_map(params![limit as i64 + 1, offset as i64], record_from_row)?
      .collect::<Result<Vec<_>, _>>()?;

    let next_offset = if records.len() > limit as usize {
      records.truncate(limit as usize);
      Some(offset + limit as u64)
    } else {
      None
    };

    Ok(RecordPage {
      records,
      next_offset,
    })
  }

  /// Live view of [`get_all`](Self::get_all): emits the current result
  /// immediately, then re-emits after every committed write.
  pub fn watch_all(&self) -> LiveQuery<Vec<CoinRecord>> {
    let store = self.clone();
    LiveQuery::new(
      self.inner.changes.subscribe(),
      Box::new(move || store.get_all()),
    )
  }

  /// Live view of a single row by id.
  pub fn watch_by_id(&self, id: i64) -> LiveQuery<Option<CoinRecord>> {
    let store = self.clone();
    LiveQuery::new(
      self.inner.changes.subscribe(),
      Box::new(move || store.get_by_id(id)),
    )
  }

  /// Bump the sync generation and return the new value. Called once per
  /// full-listing sync, before the batch upsert.
  pub fn advance_generation(&self) -> Result<i64, StoreError> {
    let conn = self.conn()?;
    let generation = generation_of(&conn)? + 1;
    conn.execute(
      "INSERT OR REPLACE INTO sync_meta (key, value) VALUES ('generation', ?1)",
      params![generation.to_string()],
    )?;
    Ok(generation)
  }

  /// Delete rows absent from the last `max_missed` full listings. Returns the
  /// number of pruned rows.
  pub fn prune_stale(&self, max_missed: i64) -> Result<usize, StoreError> {
    let pruned = {
      let conn = self.conn()?;
      let generation = generation_of(&conn)?;
      conn.execute(
        "DELETE FROM coins WHERE ?1 - last_seen >= ?2",
        params![generation, max_missed],
      )?
    };
    if pruned > 0 {
      self.notify_changed();
    }
    Ok(pruned)
  }

  /// Record that a sync just completed.
  pub fn touch_synced_at(&self) -> Result<(), StoreError> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT OR REPLACE INTO sync_meta (key, value) VALUES ('last_synced_at', ?1)",
      params![Utc::now().to_rfc3339()],
    )?;
    Ok(())
  }

  /// When the last sync completed, if one ever has.
  pub fn last_synced_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
    let conn = self.conn()?;
    let raw: Option<String> = conn
      .query_row(
        "SELECT value FROM sync_meta WHERE key = 'last_synced_at'",
        [],
        |row| row.get(0),
      )
      .optional()?;
    Ok(raw.and_then(|s| {
      DateTime::parse_from_rfc3339(&s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
    }))
  }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
  let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
  if version != 0 && version != SCHEMA_VERSION {
    // Destructive migration: the cache is rebuilt from the remote on the next
    // sync, so there is nothing worth carrying across a layout change.
    conn.execute_batch("DROP TABLE IF EXISTS coins; DROP TABLE IF EXISTS sync_meta;")?;
  }
  conn.execute_batch(SCHEMA)?;
  conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
  Ok(())
}

fn generation_of(conn: &Connection) -> Result<i64, StoreError> {
  let raw: Option<String> = conn
    .query_row(
      "SELECT value FROM sync_meta WHERE key = 'generation'",
      [],
      |row| row.get(0),
    )
    .optional()?;
  Ok(raw.and_then(|s| s.parse().ok()).unwrap_or(0))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CoinRecord> {
  Ok(CoinRecord {
    id: row.get(0)?,
    name: row.get(1)?,
    symbol: row.get(2)?,
    rank: row.get(3)?,
    price: row.get(4)?,
    percent_change_24h: row.get(5)?,
    market_cap: row.get(6)?,
    details: CoinDetailsRecord {
      slug: row.get(7)?,
      circulating_supply: row.get(8)?,
      total_supply: row.get(9)?,
      max_supply: row.get(10)?,
      num_market_pairs: row.get(11)?,
      infinite_supply: row.get(12)?,
      last_updated: row.get(13)?,
      date_added: row.get(14)?,
      tags: row.get(15)?,
      volume_24h: row.get(16)?,
      fully_diluted_market_cap: row.get(17)?,
      market_cap_dominance: row.get(18)?,
      quote_last_updated: row.get(19)?,
    },
  })
}

/// Make `%` and `_` in user input match literally.
fn escape_like(query: &str) -> String {
  query
    .replace('\\', r"\\")
    .replace('%', r"\%")
    .replace('_', r"\_")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(id: i64, name: &str, symbol: &str, rank: i64, price: f64) -> CoinRecord {
    CoinRecord {
      id,
      name: name.to_string(),
      symbol: symbol.to_string(),
      rank,
      price,
      percent_change_24h: 1.5,
      market_cap: 1_000_000.0,
      details: CoinDetailsRecord {
        slug: name.to_lowercase(),
        circulating_supply: 21_000_000.0,
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
  fn upsert_is_idempotent() {
    let store = CoinStore::open_in_memory().unwrap();
    let coin = record(1, "Bitcoin", "BTC", 1, 10000.0);

    store.upsert_all(&[coin.clone()]).unwrap();
    store.upsert_all(&[coin.clone()]).unwrap();

    let all = store.get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0], coin);
  }

  #[test]
  fn upsert_replaces_every_field() {
    let store = CoinStore::open_in_memory().unwrap();
    store
      .upsert_all(&[record(1, "Bitcoin", "BTC", 1, 10000.0)])
      .unwrap();

    let mut updated = record(1, "Bitcoin Core", "XBT", 2, 10500.0);
    updated.details.tags = "store-of-value".to_string();
    updated.details.slug = "bitcoin-core".to_string();
    store.upsert_all(&[updated.clone()]).unwrap();

    let got = store.get_by_id(1).unwrap().expect("row present");
    assert_eq!(got, updated);
    assert_eq!(store.get_all().unwrap().len(), 1);
  }

  #[test]
  fn get_all_orders_by_rank() {
    let store = CoinStore::open_in_memory().unwrap();
    store
      .upsert_all(&[
        record(3, "Tether", "USDT", 3, 1.0),
        record(1, "Bitcoin", "BTC", 1, 10000.0),
        record(2, "Ethereum", "ETH", 2, 2000.0),
      ])
      .unwrap();

    let ranks: Vec<i64> = store.get_all().unwrap().iter().map(|c| c.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
  }

  #[test]
  fn search_matches_name_symbol_and_id() {
    let store = CoinStore::open_in_memory().unwrap();
    store
      .upsert_all(&[
        record(1, "Bitcoin", "BTC", 1, 10000.0),
        record(1027, "Ethereum", "ETH", 2, 2000.0),
      ])
      .unwrap();

    assert_eq!(store.search("bit").unwrap()[0].name, "Bitcoin");
    assert_eq!(store.search("ETH").unwrap()[0].name, "Ethereum");
    assert_eq!(store.search("102").unwrap()[0].name, "Ethereum");
    assert!(store.search("dogecoin").unwrap().is_empty());
    assert_eq!(store.search("").unwrap().len(), 2);
  }

  #[test]
  fn search_treats_wildcards_literally() {
    let store = CoinStore::open_in_memory().unwrap();
    store
      .upsert_all(&[
        record(1, "Bitcoin", "BTC", 1, 10000.0),
        record(2, "100%Up", "PCT", 2, 0.5),
      ])
      .unwrap();

    let hits = store.search("%").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "100%Up");
    assert!(store.search("_").unwrap().is_empty());
  }

  #[test]
  fn page_walks_the_ranking() {
    let store = CoinStore::open_in_memory().unwrap();
    let records: Vec<CoinRecord> = (1..=5)
      .map(|i| record(i, &format!("Coin{i}"), &format!("C{i}"), i, i as f64))
      .collect();
    store.upsert_all(&records).unwrap();

    let first = store.page(0, 2).unwrap();
    assert_eq!(
      first.records.iter().map(|r| r.rank).collect::<Vec<_>>(),
      vec![1, 2]
    );
    assert_eq!(first.next_offset, Some(2));

    let second = store.page(2, 2).unwrap();
    assert_eq!(
      second.records.iter().map(|r| r.rank).collect::<Vec<_>>(),
      vec![3, 4]
    );
    assert_eq!(second.next_offset, Some(4));

    let last = store.page(4, 2).unwrap();
    assert_eq!(last.records.len(), 1);
    assert_eq!(last.next_offset, None);
  }

  #[test]
  fn get_by_id_misses_cleanly() {
    let store = CoinStore::open_in_memory().unwrap();
    assert!(store.get_by_id(9999).unwrap().is_none());
  }

  #[test]
  fn prune_removes_rows_missing_for_enough_generations() {
    let store = CoinStore::open_in_memory().unwrap();

    store.advance_generation().unwrap();
    store
      .upsert_all(&[
        record(1, "Bitcoin", "BTC", 1, 10000.0),
        record(2, "Ethereum", "ETH", 2, 2000.0),
      ])
      .unwrap();

    // Three listings in a row without Ethereum.
    for _ in 0..3 {
      store.advance_generation().unwrap();
      store
        .upsert_all(&[record(1, "Bitcoin", "BTC", 1, 10000.0)])
        .unwrap();
      store.prune_stale(3).unwrap();
    }

    assert!(store.get_by_id(2).unwrap().is_none());
    assert!(store.get_by_id(1).unwrap().is_some());
  }

  #[test]
  fn prune_keeps_recently_seen_rows() {
    let store = CoinStore::open_in_memory().unwrap();

    store.advance_generation().unwrap();
    store
      .upsert_all(&[
        record(1, "Bitcoin", "BTC", 1, 10000.0),
        record(2, "Ethereum", "ETH", 2, 2000.0),
      ])
      .unwrap();

    store.advance_generation().unwrap();
    store
      .upsert_all(&[record(1, "Bitcoin", "BTC", 1, 10000.0)])
      .unwrap();
    let pruned = store.prune_stale(3).unwrap();

    assert_eq!(pruned, 0);
    assert!(store.get_by_id(2).unwrap().is_some());
  }

  #[test]
  fn reopening_preserves_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coins.db");

    {
      let store = CoinStore::open(&path).unwrap();
      store
        .upsert_all(&[record(1, "Bitcoin", "BTC", 1, 10000.0)])
        .unwrap();
    }

    let reopened = CoinStore::open(&path).unwrap();
    assert_eq!(reopened.get_all().unwrap().len(), 1);
  }

  #[test]
  fn last_synced_at_round_trips() {
    let store = CoinStore::open_in_memory().unwrap();
    assert!(store.last_synced_at().unwrap().is_none());
    store.touch_synced_at().unwrap();
    assert!(store.last_synced_at().unwrap().is_some());
  }

  #[tokio::test]
  async fn watch_all_emits_current_then_updates() {
    let store = CoinStore::open_in_memory().unwrap();
    let mut live = store.watch_all();

    assert!(live.next().await.unwrap().is_empty());

    store
      .upsert_all(&[record(1, "Bitcoin", "BTC", 1, 10000.0)])
      .unwrap();
    let updated = live.next().await.unwrap();
    assert_eq!(updated.len(), 1);
  }

  #[tokio::test]
  async fn watch_by_id_sees_the_upsert() {
    let store = CoinStore::open_in_memory().unwrap();
    let mut live = store.watch_by_id(1);

    assert!(live.next().await.unwrap().is_none());

    store
      .upsert_all(&[record(1, "Bitcoin", "BTC", 1, 10000.0)])
      .unwrap();
    let coin = live.next().await.unwrap().expect("row upserted");
    assert_eq!(coin.price, 10000.0);
  }
}
