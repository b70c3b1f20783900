mod config;
mod error;
mod market;
mod sched;
mod store;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use market::repository::{CoinRepository, SyncOutcome};
use market::{Coin, MarketClient};
use sched::RefreshScheduler;
use store::CoinStore;

#[derive(Parser, Debug)]
#[command(name = "coinwatch")]
#[command(about = "Tracks cryptocurrency markets in a local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/coinwatch/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Sync now, then keep refreshing on a schedule until interrupted
  Run,
  /// Fetch the latest listings once and update the local cache
  Sync,
  /// Print cached coins ranked by market cap
  List {
    /// Page size per fetch from the cache
    #[arg(short, long, default_value_t = 50)]
    limit: u32,
  },
  /// Print full details for one coin
  Get { id: i64 },
  /// Search the cache, falling back to a remote symbol lookup on a miss
  Search { query: String },
  /// Print recent price candles for a trading pair (e.g. BTCUSDT)
  Candles {
    symbol: String,
    #[arg(short, long, default_value = "1h")]
    interval: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  // The daemon logs to a rolling file; one-shot commands log to stderr. The
  // guard must outlive main or buffered lines are lost.
  let _log_guard = init_tracing(&args.command, &config)?;

  let store = CoinStore::open(config.database_path()?)
    .map_err(|e| eyre!("Failed to open coin store: {}", e))?;
  let client = Arc::new(MarketClient::new(&config)?);
  let repo = CoinRepository::new(client, store, config.api.currency.as_str());

  match args.command {
    Command::Run => run_daemon(repo, &config).await,
    Command::Sync => sync_once(repo).await,
    Command::List { limit } => list_coins(repo, limit),
    Command::Get { id } => get_coin(repo, id),
    Command::Search { query } => search_coins(repo, &query).await,
    Command::Candles { symbol, interval } => print_candles(repo, &symbol, &interval).await,
  }
}

async fn run_daemon(repo: CoinRepository, config: &Config) -> Result<()> {
  // Stale-but-available: a failed initial sync is logged, not fatal, and the
  // scheduler retries on its next tick.
  match repo.sync().await {
    Ok(SyncOutcome::Synced(report)) => {
      info!(fetched = report.fetched, pruned = report.pruned, "initial sync complete");
    }
    Ok(SyncOutcome::InFlight) => {}
    Err(e) => warn!("initial sync failed, serving cached data: {e}"),
  }

  let scheduler = RefreshScheduler::new(repo, config.refresh_interval());
  scheduler.start();
  info!(minutes = config.refresh_minutes, "refresh scheduler running");

  tokio::signal::ctrl_c()
    .await
    .map_err(|e| eyre!("Failed to wait for interrupt: {}", e))?;
  scheduler.stop();
  info!("shutting down");

  Ok(())
}

async fn sync_once(repo: CoinRepository) -> Result<()> {
  match repo.sync().await.map_err(|e| eyre!("Sync failed: {}", e))? {
    SyncOutcome::Synced(report) => {
      println!("synced {} coins ({} pruned)", report.fetched, report.pruned);
    }
    SyncOutcome::InFlight => println!("a sync is already running"),
  }
  Ok(())
}

fn list_coins(repo: CoinRepository, limit: u32) -> Result<()> {
  let mut offset = 0;
  let mut printed = false;

  loop {
    let page = repo
      .coin_page(offset, limit)
      .map_err(|e| eyre!("Failed to read coin list: {}", e))?;
    for coin in &page.coins {
      print_coin_row(coin);
      printed = true;
    }
    match page.next_offset {
      Some(next) => offset = next,
      None => break,
    }
  }

  if !printed {
    println!("cache is empty; run `coinwatch sync` first");
  } else if let Ok(Some(at)) = repo.last_synced_at() {
    println!("last synced {}", at.to_rfc3339());
  }
  Ok(())
}

fn get_coin(repo: CoinRepository, id: i64) -> Result<()> {
  let coin = repo
    .coin_by_id(id)
    .current()
    .map_err(|e| eyre!("Failed to read coin {}: {}", id, e))?;

  let Some(coin) = coin else {
    println!("coin {id} not found in cache; run `coinwatch sync` first");
    return Ok(());
  };

  print_coin_row(&coin);
  if let Some(details) = &coin.details {
    println!("  slug:               {}", details.slug);
    println!("  circulating supply: {}", details.circulating_supply);
    println!("  total supply:       {}", details.total_supply);
    match details.max_supply {
      Some(max) => println!("  max supply:         {max}"),
      None if details.infinite_supply => println!("  max supply:         infinite"),
      None => println!("  max supply:         unknown"),
    }
    println!("  market pairs:       {}", details.num_market_pairs);
    println!("  24h volume:         {}", details.volume_24h);
    println!("  diluted market cap: {}", details.fully_diluted_market_cap);
    println!("  dominance:          {}%", details.market_cap_dominance);
    if !details.tags.is_empty() {
      println!("  tags:               {}", details.tags.join(", "));
    }
    println!("  added:              {}", details.date_added);
    println!("  updated:            {}", details.last_updated);
  }
  Ok(())
}

async fn search_coins(repo: CoinRepository, query: &str) -> Result<()> {
  let results = repo
    .search(query)
    .await
    .map_err(|e| eyre!("Search failed: {}", e))?;

  if results.is_empty() {
    println!("no results for {query:?}");
    return Ok(());
  }
  for coin in &results {
    print_coin_row(coin);
  }
  Ok(())
}

async fn print_candles(repo: CoinRepository, symbol: &str, interval: &str) -> Result<()> {
  let candles = repo
    .candles(symbol, interval)
    .await
    .map_err(|e| eyre!("Failed to fetch candles for {}: {}", symbol, e))?;

  println!("{symbol} {interval}  (open / high / low / close / volume)");
  for candle in &candles {
    println!(
      "{:>14}  {:>12.4} {:>12.4} {:>12.4} {:>12.4}  {:>14.2}",
      candle.open_time, candle.open, candle.high, candle.low, candle.close, candle.volume
    );
  }
  Ok(())
}

fn print_coin_row(coin: &Coin) {
  println!(
    "{:>4}  {:<24} {:<8} {:>14.2}  {:>7.2}%  {:>18.0}",
    coin.rank, coin.name, coin.symbol, coin.price, coin.percent_change_24h, coin.market_cap
  );
}

fn init_tracing(
  command: &Command,
  config: &Config,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  if matches!(command, Command::Run) {
    let log_dir = config
      .database_path()?
      .parent()
      .map(|p| p.join("logs"))
      .ok_or_else(|| eyre!("Could not determine log directory"))?;
    std::fs::create_dir_all(&log_dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

    let appender = tracing_appender::rolling::daily(log_dir, "coinwatch.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(writer)
      .with_ansi(false)
      .init();
    Ok(Some(guard))
  } else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    Ok(None)
  }
}
