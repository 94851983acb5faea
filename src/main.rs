use budget_sync::api::{EntryKind, HttpTransport, TransactionDraft};
use budget_sync::app::{App, StartReport};
use budget_sync::config::Config;
use budget_sync::report;
use budget_sync::session::WriteOutcome;
use budget_sync::sync::SyncOutcome;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "budget-sync")]
#[command(about = "Budget tracker that keeps working offline")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/budget-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Server base URL, overrides the config file
  #[arg(short, long)]
  server: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show transactions, total and balance over time
  List,
  /// Record a deposit
  Add { name: String, amount: i64 },
  /// Record a withdrawal
  Subtract { name: String, amount: i64 },
  /// Push queued transactions now
  Sync,
  /// Show transactions waiting to be synced
  Pending,
  /// Stay running and sync whenever the server becomes reachable
  Watch,
  /// Inspect or rebuild the response cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Show the current generation and stored caches
  Status,
  /// Reinstall the current generation and drop older ones
  Refresh,
}

fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
  // RUST_LOG controls the stderr level, e.g. RUST_LOG=debug
  let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;
  let file_appender = tracing_appender::rolling::daily(log_dir, "budget-sync.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(io::stderr).with_filter(stderr_filter))
    .with(
      fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("info")),
    )
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(server) = args.server {
    config.server.url = server;
  }

  let _guard = init_tracing(&config.log_dir()?)?;
  info!(server = %config.server.url, "budget-sync starting");

  let transport = HttpTransport::new(config.timeout())?;
  let mut app = App::open(config, transport)?;

  match args.command {
    Command::List => {
      let report = app.start().await?;
      print_start(&report);
      print_listing(&app);
    }
    Command::Add { name, amount } => {
      add(&mut app, TransactionDraft::new(name, Some(amount), EntryKind::Deposit)).await?
    }
    Command::Subtract { name, amount } => {
      add(&mut app, TransactionDraft::new(name, Some(amount), EntryKind::Withdrawal)).await?
    }
    Command::Sync => print_sync(&app.sync_now().await?),
    Command::Pending => {
      let entries = app.pending()?;
      if entries.is_empty() {
        println!("Nothing waiting to be synced.");
      } else {
        println!("{}", report::pending_table(&entries));
      }
    }
    Command::Watch => {
      let report = app.start().await?;
      print_start(&report);
      println!("Watching for connectivity changes, Ctrl-C to stop.");
      let events = app.event_handler()?;
      app
        .run(events, |app, outcome| {
          print_sync(outcome);
          if outcome.pushed() > 0 {
            println!("Total: {}", app.controller().total());
          }
        })
        .await?;
    }
    Command::Cache { action } => match action {
      CacheAction::Status => {
        let status = app.cache_status()?;
        println!("Generation: v{}", status.generation.version);
        println!("Static cache: {}", status.generation.static_cache);
        println!("Runtime cache: {}", status.generation.runtime_cache);
        if status.caches.is_empty() {
          println!("Stored caches: none");
        } else {
          println!("Stored caches: {}", status.caches.join(", "));
        }
      }
      CacheAction::Refresh => {
        let pruned = app.refresh_cache().await?;
        println!("Cache generation installed.");
        for name in pruned {
          println!("Removed {}", name);
        }
      }
    },
  }

  Ok(())
}

async fn add(app: &mut App<HttpTransport>, draft: TransactionDraft) -> Result<()> {
  let report = app.start().await?;
  print_start(&report);

  match app.add_transaction(draft).await? {
    WriteOutcome::Saved(tx) => println!("Saved {} ({})", tx.name, tx.value),
    WriteOutcome::Queued { key } => {
      println!("Offline: saved locally as {}, will sync when the server is back", key)
    }
    WriteOutcome::Rejected { errors } => {
      return Err(eyre!("Server rejected the transaction: {}", errors.join("; ")))
    }
    WriteOutcome::Invalid => return Err(eyre!("Missing Information")),
  }
  println!("Total: {}", app.controller().total());
  Ok(())
}

fn print_start(report: &StartReport) {
  if !report.online {
    println!("Server unreachable, working offline.");
  }
  if let Some(outcome) = &report.sync {
    if !matches!(outcome, SyncOutcome::Empty) {
      print_sync(outcome);
    }
  }
  println!("Data source: {}", report.source);
  if report.hydrated > 0 {
    println!("{} transaction(s) waiting to be synced", report.hydrated);
  }
}

fn print_listing(app: &App<HttpTransport>) {
  let transactions = app.controller().transactions();
  println!("{}", report::transactions_table(transactions));
  println!("Total: {}", report::total(transactions));
  let points = report::running_totals(transactions);
  if !points.is_empty() {
    println!("{}", report::chart_table(&points));
  }
}

fn print_sync(outcome: &SyncOutcome) {
  match outcome {
    SyncOutcome::Empty => println!("Nothing to sync."),
    SyncOutcome::Pushed { count } => println!("Synced {} transaction(s).", count),
    SyncOutcome::Failed {
      retained,
      pushed,
      error,
    } => {
      if *pushed > 0 {
        println!("Synced {} transaction(s).", pushed);
      }
      println!("Sync failed ({}), {} transaction(s) kept for later.", error, retained)
    }
    SyncOutcome::Coalesced => println!("Sync already running."),
  }
}
