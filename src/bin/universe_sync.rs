//! Universe synchronizer CLI.
//!
//! `--daily-sync` waits for the EOD signal and runs the full
//! reconciliation; the task-specific flags run one task without waiting.
//! Exit code 0 on success even when the run exceeded the time window
//! (that is reported in the output, not an error).

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickstock_backend::bus::{MessageBus, NoopBus, RedisBus};
use tickstock_backend::models::Config;
use tickstock_backend::universe::{SqliteCatalog, SyncResult, UniverseCatalog, UniverseSynchronizer};

#[derive(Parser, Debug)]
#[command(
    name = "universe-sync",
    about = "Daily reconciliation of symbol universe memberships"
)]
struct Args {
    /// Wait for the EOD signal, then run the full reconciliation.
    #[arg(long, conflicts_with_all = ["market_cap_update", "ipo_assignment", "test_sync"])]
    daily_sync: bool,

    /// Run the market-cap rerank task only.
    #[arg(long)]
    market_cap_update: bool,

    /// Run the IPO assignment task only.
    #[arg(long)]
    ipo_assignment: bool,

    /// Run all tasks without waiting for EOD.
    #[arg(long)]
    test_sync: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let catalog: Arc<dyn UniverseCatalog> =
        Arc::new(SqliteCatalog::open(Path::new(&config.database_path))?);
    let bus: Arc<dyn MessageBus> = match RedisBus::connect(&config.redis_url).await {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            warn!("redis unavailable ({e:#}), proceeding without notifications");
            Arc::new(NoopBus)
        }
    };
    let synchronizer = UniverseSynchronizer::new(catalog, bus, config.sync_config());

    if args.market_cap_update {
        let changes = synchronizer.market_cap_recalculation()?;
        println!("Market cap update complete: {} changes", changes.len());
        for change in changes.iter().take(10) {
            println!(
                "  {}: {} -> {} ({})",
                change.action.as_str(),
                change.symbol.as_deref().unwrap_or("-"),
                change.universe,
                change.reason
            );
        }
    } else if args.ipo_assignment {
        let changes = synchronizer.ipo_universe_assignment()?;
        println!("IPO assignment complete: {} assignments", changes.len());
        for change in &changes {
            println!(
                "  Added: {} -> {} ({})",
                change.symbol.as_deref().unwrap_or("-"),
                change.universe,
                change.reason
            );
        }
    } else if args.test_sync {
        let result = synchronizer.perform_synchronization().await;
        println!("Test synchronization complete:");
        println!("  Total changes: {}", result.total_changes);
        println!("  Status: {}", result.sync_status);
        print_task_results(&result);
    } else {
        // Default (and --daily-sync): full daily cycle.
        let result = synchronizer.daily_sync().await;
        println!("Daily synchronization complete:");
        println!("  Total changes: {}", result.total_changes);
        if let Some(minutes) = result.total_sync_duration_minutes {
            println!("  Duration: {minutes:.1} minutes");
        }
        if let Some(within) = result.within_time_window {
            println!("  Within window: {within}");
        }
        print_task_results(&result);
    }

    info!("universe-sync finished");
    Ok(())
}

fn print_task_results(result: &SyncResult) {
    for task in &result.task_results {
        println!(
            "  {}: {} ({} changes in {:.1}s)",
            task.name, task.status, task.changes_count, task.duration_seconds
        );
    }
}
