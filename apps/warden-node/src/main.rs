use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_usage::{
    CommandRefresher, JsonLedgerStore, JsonUserDirectory, LedgerStore, ReconcileReport,
    UsageError, UsageReconciler, UsageSource, WgUsageSource,
};

mod config;

use config::NodeConfig;

type NodeReconciler = UsageReconciler<WgUsageSource<Option<CommandRefresher>>, JsonLedgerStore>;

#[derive(Parser, Debug)]
#[command(author, version, about = "WireGuard usage accounting for one node", long_about = None)]
struct Args {
    /// Usage report written by the WireGuard manager
    #[arg(long, env = "WARDEN_REPORT_PATH")]
    report_path: Option<PathBuf>,

    /// Ledger file holding cumulative usage
    #[arg(long, env = "WARDEN_LEDGER_PATH")]
    ledger_path: Option<PathBuf>,

    /// Command run before each read of the report
    #[arg(long, env = "WARDEN_REFRESH_COMMAND")]
    refresh_command: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge the current report into the ledger once
    Sync {
        /// The counters were reset since the last sync
        #[arg(long)]
        reset: bool,
    },
    /// Keep merging on an interval
    Watch {
        /// Seconds between cycles
        #[arg(long, env = "WARDEN_INTERVAL_SECS")]
        interval: Option<u64>,
        #[arg(long)]
        reset: bool,
    },
    /// Print the bytes recorded for one WireGuard public key
    Usage { identity: String },
    /// Print whether each directory user is provisioned
    Enabled {
        /// JSON array of {uuid, wg_pub}
        #[arg(long)]
        users: PathBuf,
    },
    /// Sync, then print total bytes per directory user
    Totals {
        #[arg(long)]
        users: PathBuf,
        #[arg(long)]
        reset: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden_node=info,warden_usage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = NodeConfig::load()?;
    if let Some(path) = args.report_path {
        config.report_path = path;
    }
    if let Some(path) = args.ledger_path {
        config.ledger_path = path;
    }
    if args.refresh_command.is_some() {
        config.refresh_command = args.refresh_command;
    }

    info!("Report: {}", config.report_path.display());
    info!("Ledger: {}", config.ledger_path.display());

    let reconciler = Arc::new(build_reconciler(&config));

    match args.command {
        Command::Sync { reset } => {
            let report = reconciler.reconcile(reset)?;
            println!(
                "inserted={} updated={} checkpoints={}",
                report.inserted, report.updated, report.checkpoints
            );
        }
        Command::Watch { interval, reset } => {
            let period = Duration::from_secs(interval.unwrap_or(config.interval_secs).max(1));
            let limit = Duration::from_secs(config.cycle_timeout_secs.max(1));
            watch(reconciler, period, limit, reset).await;
        }
        Command::Usage { identity } => {
            println!("{}", reconciler.usage_for(&identity)?);
        }
        Command::Enabled { users } => {
            let directory = JsonUserDirectory::new(users);
            for (uuid, enabled) in reconciler.enabled_users(&directory)? {
                println!("{uuid} {enabled}");
            }
        }
        Command::Totals { users, reset } => {
            let directory = JsonUserDirectory::new(users);
            for (uuid, bytes) in reconciler.all_usage(&directory, reset)? {
                println!("{uuid} {bytes}");
            }
        }
    }

    Ok(())
}

fn build_reconciler(config: &NodeConfig) -> NodeReconciler {
    let refresher = config
        .refresh_command
        .as_deref()
        .and_then(CommandRefresher::from_command_line);
    UsageReconciler::new(
        WgUsageSource::new(&config.report_path, refresher),
        JsonLedgerStore::new(&config.ledger_path),
    )
}

/// Runs cycles until interrupted. A failed cycle never stops the loop.
async fn watch(reconciler: Arc<NodeReconciler>, period: Duration, limit: Duration, reset: bool) {
    info!("Watching usage every {}s", period.as_secs());
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return;
            }
        }

        match run_cycle(reconciler.clone(), reset, limit).await {
            Ok(report) if report.touched() > 0 => {
                info!("Cycle done: {} entries touched", report.touched());
            }
            Ok(_) => {}
            Err(e) => match e.downcast_ref::<UsageError>() {
                Some(UsageError::LedgerCorrupt { .. }) => {
                    error!("Ledger is corrupt, left untouched: {:#}", e);
                }
                _ => warn!("Usage cycle failed: {:#}", e),
            },
        }
    }
}

/// One reconciliation on the blocking pool.
///
/// A cycle that outlives `limit` is waited for, so two cycles never write
/// the ledger at the same time.
async fn run_cycle<S, L>(
    reconciler: Arc<UsageReconciler<S, L>>,
    reset: bool,
    limit: Duration,
) -> anyhow::Result<ReconcileReport>
where
    S: UsageSource + Send + Sync + 'static,
    L: LedgerStore + Send + Sync + 'static,
{
    let mut cycle = tokio::task::spawn_blocking(move || reconciler.reconcile(reset));

    let joined = match tokio::time::timeout(limit, &mut cycle).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!("Usage cycle exceeded {}s, waiting for it to finish", limit.as_secs());
            cycle.await
        }
    };

    Ok(joined.context("usage cycle panicked")??)
}
