//! Error types for the store, the remote client, and the repository seam.

use thiserror::Error;

/// Failure inside the local SQLite store.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("database error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("store lock poisoned")]
  LockPoisoned,

  #[error("store closed")]
  Closed,
}

/// Failure talking to the remote market API.
#[derive(Debug, Error)]
pub enum RemoteError {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// Non-success response with the message (and numeric code, when the error
  /// envelope carried one) parsed from the body.
  #[error("api error: {message}")]
  Api { message: String, code: Option<i64> },
}

/// A remote payload that cannot be mapped to the domain shape.
#[derive(Debug, Error)]
pub enum TranslateError {
  #[error("candle row has {got} fields, expected {want}")]
  CandleShape { got: usize, want: usize },

  #[error("unparseable numeric field {field}: {value:?}")]
  Number { field: &'static str, value: String },
}

/// Any failure a repository operation can surface to its callers.
#[derive(Debug, Error)]
pub enum RepoError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error(transparent)]
  Translate(#[from] TranslateError),
}
