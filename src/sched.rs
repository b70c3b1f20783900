//! Periodic refresh scheduling.
//!
//! A thin loop around [`CoinRepository::sync`]: tick every interval, log the
//! outcome, never abort. The next tick is the retry mechanism for a failed
//! sync, so the store degrades to stale-but-available when the network is
//! down.

use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::market::repository::{CoinRepository, SyncOutcome};

pub struct RefreshScheduler {
  repo: CoinRepository,
  period: Duration,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
  pub fn new(repo: CoinRepository, period: Duration) -> Self {
    Self {
      repo,
      period,
      task: Mutex::new(None),
    }
  }

  /// Start the periodic sync task.
  ///
  /// Duplicate start requests keep the existing schedule rather than
  /// replacing it. The first tick fires one full period after start; callers
  /// wanting an immediate refresh run `sync()` themselves first.
  pub fn start(&self) {
    let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
    if task.as_ref().is_some_and(|t| !t.is_finished()) {
      return;
    }

    let repo = self.repo.clone();
    let period = self.period;
    *task = Some(tokio::spawn(async move {
      let mut ticker = interval(period);
      ticker.tick().await; // consumes the immediate first tick

      loop {
        ticker.tick().await;
        match repo.sync().await {
          Ok(SyncOutcome::Synced(report)) => {
            info!(
              fetched = report.fetched,
              pruned = report.pruned,
              "scheduled sync complete"
            );
          }
          Ok(SyncOutcome::InFlight) => {
            debug!("scheduled sync skipped, another sync holds the gate");
          }
          Err(e) => {
            warn!("scheduled sync failed: {e}");
          }
        }
      }
    }));
  }

  /// Stop ticking. Safe to call when nothing is running.
  pub fn stop(&self) {
    let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(handle) = task.take() {
      handle.abort();
    }
  }
}

impl Drop for RefreshScheduler {
  fn drop(&mut self) {
    self.stop();
  }
}
