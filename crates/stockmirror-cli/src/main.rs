//! Stockmirror - warehouse API mirror tool

use anyhow::Result;
use clap::{Parser, Subcommand};
use stockmirror_common::logging::{init_logging, LogConfig, LogLevel};
use stockmirror_sync::{EntityKind, SyncConfig, SyncMode, SyncOrchestrator, SyncResult};
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "stockmirror")]
#[command(author, version, about = "Mirror warehouse entities into PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync one entity type
    Sync {
        /// Entity type (products, picklists, warehouses, users, suppliers,
        /// batches, purchase_orders)
        entity: String,

        /// Re-sync everything since the fixed epoch start
        #[arg(long, conflicts_with = "window_days")]
        full: bool,

        /// Only sync records updated in the last N days
        #[arg(long)]
        window_days: Option<u32>,
    },

    /// Sync every configured entity type
    SyncAll {
        /// Re-sync everything since the fixed epoch start
        #[arg(long, conflicts_with = "window_days")]
        full: bool,

        /// Only sync records updated in the last N days
        #[arg(long)]
        window_days: Option<u32>,
    },

    /// Retry a failed or abandoned run by id
    Retry {
        /// Run id, as printed by a previous sync
        run_id: Uuid,
    },

    /// Show per-entity sync status
    Status,

    /// Show the mirrored row count for one entity type
    Count {
        /// Entity type
        entity: String,
    },
}

fn mode_from_flags(full: bool, window_days: Option<u32>) -> SyncMode {
    match (full, window_days) {
        (true, _) => SyncMode::Full,
        (false, Some(days)) => SyncMode::Window { days },
        (false, None) => SyncMode::Incremental,
    }
}

fn print_result(result: &SyncResult) {
    let verdict = if result.success { "ok" } else { "FAILED" };
    println!(
        "{:16} {:>7}  fetched={} saved={} skipped={} failed={}{}",
        result.entity_type,
        verdict,
        result.items_fetched,
        result.items_saved,
        result.items_skipped,
        result.items_failed,
        result
            .error
            .as_deref()
            .map(|e| format!("  error: {}", e))
            .unwrap_or_default()
    );
    if let Some(run_id) = result.run_id {
        println!("{:16} run id: {}", "", run_id);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_level(log_level)
        .with_file_prefix("stockmirror");
    init_logging(&log_config)?;

    let config = SyncConfig::load()?;
    let pool = config.database.connect_pool().await?;

    stockmirror_sync::run_migrations(&pool).await?;

    let orchestrator = SyncOrchestrator::new(pool, &config)?;

    match cli.command {
        Command::Sync {
            entity,
            full,
            window_days,
        } => {
            let kind: EntityKind = entity.parse()?;
            let mode = mode_from_flags(full, window_days);
            info!(entity = %kind, %mode, "Syncing entity");
            let result = orchestrator.sync_one(kind, mode).await;
            print_result(&result);
            if !result.success {
                std::process::exit(1);
            }
        },

        Command::SyncAll { full, window_days } => {
            let mode = mode_from_flags(full, window_days);
            info!(%mode, "Syncing all entities");
            let results = orchestrator.sync_all(mode).await;
            for result in &results {
                print_result(result);
            }
            if results.iter().any(|r| !r.success) {
                std::process::exit(1);
            }
        },

        Command::Retry { run_id } => {
            let result = orchestrator.retry(run_id).await?;
            print_result(&result);
            if !result.success {
                std::process::exit(1);
            }
        },

        Command::Status => {
            let statuses = orchestrator.status().await?;
            for status in statuses {
                let last = status
                    .last_synced_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                let active = status
                    .active_run
                    .map(|run| {
                        format!(
                            "  [run {} {} offset={} items={}]",
                            run.run_id, run.mode, run.current_offset, run.items_processed
                        )
                    })
                    .unwrap_or_default();
                println!(
                    "{:16} last={} last_count={} total={}{}",
                    status.entity_type, last, status.last_count, status.total_count, active
                );
            }
        },

        Command::Count { entity } => {
            let kind: EntityKind = entity.parse()?;
            let count = orchestrator.count(kind).await?;
            println!("{} {}", kind, count);
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_flags() {
        assert_eq!(mode_from_flags(false, None), SyncMode::Incremental);
        assert_eq!(mode_from_flags(true, None), SyncMode::Full);
        assert_eq!(
            mode_from_flags(false, Some(14)),
            SyncMode::Window { days: 14 }
        );
    }

    #[test]
    fn test_cli_parses_sync_command() {
        let cli = Cli::parse_from(["stockmirror", "sync", "products", "--full"]);
        match cli.command {
            Command::Sync { entity, full, .. } => {
                assert_eq!(entity, "products");
                assert!(full);
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_window_days() {
        let cli = Cli::parse_from(["stockmirror", "sync-all", "--window-days", "7"]);
        match cli.command {
            Command::SyncAll { window_days, .. } => assert_eq!(window_days, Some(7)),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
