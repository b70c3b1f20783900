//! Live query subscriptions over the store.
//!
//! A [`LiveQuery`] is a restartable, continuously-updating read: the first
//! poll returns the current query result, every later poll waits for a
//! committed write and then re-runs the query. Dropping the handle simply
//! stops delivery; it has no effect on the store.

use tokio::sync::watch;

use crate::error::StoreError;

type FetchFn<T> = Box<dyn FnMut() -> Result<T, StoreError> + Send>;

/// A continuously-updating query result.
///
/// The store bumps one shared change counter per committed write, so a live
/// query may re-emit an identical result after a write that did not touch its
/// rows. Rapid successive writes coalesce; each poll observes the latest
/// committed state.
pub struct LiveQuery<T> {
  rx: watch::Receiver<u64>,
  fetch: FetchFn<T>,
  primed: bool,
}

impl<T> LiveQuery<T> {
  pub(crate) fn new(rx: watch::Receiver<u64>, fetch: FetchFn<T>) -> Self {
    Self {
      rx,
      fetch,
      primed: false,
    }
  }

  /// The current result without waiting, leaving the subscription untouched.
  pub fn current(&mut self) -> Result<T, StoreError> {
    (self.fetch)()
  }

  /// The next result: immediately on first call, after the next committed
  /// write on every later call. Errs with [`StoreError::Closed`] once the
  /// store has gone away.
  pub async fn next(&mut self) -> Result<T, StoreError> {
    if self.primed {
      self.rx.changed().await.map_err(|_| StoreError::Closed)?;
    }
    self.primed = true;
    (self.fetch)()
  }

  /// Transform every emitted result, keeping the subscription.
  pub fn map<U, F>(self, f: F) -> LiveQuery<U>
  where
    F: Fn(T) -> U + Send + 'static,
    T: 'static,
  {
    let mut fetch = self.fetch;
    LiveQuery {
      rx: self.rx,
      fetch: Box::new(move || (fetch)().map(&f)),
      primed: self.primed,
    }
  }
}
