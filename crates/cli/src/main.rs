//! NoteVault CLI - administrative commands against the database file
//!
//! Backup restore replaces the live file; stop the daemon first.

mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;

use notevault_core::domain::{BackupOptions, BackupType, HealthStatus, RestoreOptions};
use notevault_core::port::{Maintenance, MaintenanceConfig, SystemTimeProvider, UuidProvider};
use notevault_core::NotevaultConfig;
use notevault_infra_sqlite::{
    backup_config_from, generate_key, BackupManager, Database, Pool, SqliteMaintenance,
};
use output::{print_backups, print_json, BackupRow};

#[derive(Parser)]
#[command(name = "notevault")]
#[command(about = "NoteVault storage administration", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file (overrides NOTEVAULT_DB_PATH)
    #[arg(long, global = true)]
    db_path: Option<String>,

    /// Backup directory (overrides NOTEVAULT_BACKUP_DIR)
    #[arg(long, global = true)]
    backup_dir: Option<String>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Backup management
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Round-trip the database and print pool metrics
    Health,

    /// Run optimize, checkpoint and VACUUM (when fragmented)
    Maintenance {
        /// Force VACUUM even if not needed
        #[arg(long)]
        force_vacuum: bool,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Take a manual backup
    Create {
        /// Store uncompressed
        #[arg(long)]
        no_compress: bool,

        /// Encrypt with NOTEVAULT_BACKUP_ENCRYPTION_KEY
        #[arg(long)]
        encrypt: bool,

        /// Operator identity recorded on the backup
        #[arg(long, env = "USER")]
        by: Option<String>,
    },

    /// List backups, newest first
    List,

    /// Recompute and compare a backup's checksum
    Verify { id: String },

    /// Replace the live database with a backup
    Restore {
        id: String,

        /// Validate only; the live database is not touched
        #[arg(long)]
        dry_run: bool,

        /// Skip the pre-restore snapshot of the live database
        #[arg(long)]
        no_safety_backup: bool,

        #[arg(long, env = "USER")]
        by: Option<String>,
    },

    /// Delete backups outside the retention policy
    Cleanup,

    /// Print a fresh base64 key for NOTEVAULT_BACKUP_ENCRYPTION_KEY
    GenerateKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Backup {
        command: BackupCommands::GenerateKey,
    } = cli.command
    {
        println!("{}", generate_key());
        return Ok(());
    }

    let mut config = NotevaultConfig::from_env().context("Invalid configuration")?;
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    if let Some(backup_dir) = &cli.backup_dir {
        config.backup_dir = backup_dir.clone();
    }
    // One-shot process: no warm pool needed
    config.initial_connections = 1;

    let pool = Pool::new(config.pool_config());
    pool.initialize()
        .await
        .context("Failed to open database")?;

    let result = run(&cli, &config, pool.clone()).await;
    pool.close().await;
    result
}

async fn run(cli: &Cli, config: &NotevaultConfig, pool: Arc<Pool>) -> Result<()> {
    match &cli.command {
        Commands::Backup { command } => {
            let backup_config =
                backup_config_from(config).context("Invalid backup configuration")?;
            let manager = BackupManager::open(
                pool,
                backup_config,
                Arc::new(SystemTimeProvider),
                Arc::new(UuidProvider),
            )
            .await?;
            run_backup(cli.json, command, &manager).await
        }

        Commands::Health => {
            let db = Database::new(pool);
            let report = db.health_check().await;

            if cli.json {
                return print_json(&report);
            }

            let status = match report.status {
                HealthStatus::Healthy => "HEALTHY".green(),
                HealthStatus::Degraded => "DEGRADED".yellow(),
                HealthStatus::Unhealthy => "UNHEALTHY".red(),
            };
            println!("{}", "Storage Health".cyan().bold());
            println!();
            println!("  {} {}", "Status:".bold(), status);
            for reason in &report.reasons {
                println!("  {} {}", "•".bold(), reason);
            }
            if let Some(ms) = report.round_trip_ms {
                println!("  {} {:.2} ms", "Round trip:".bold(), ms);
            }
            println!(
                "  {} {}/{} in use, {} idle, {} queued",
                "Pool:".bold(),
                report.pool.active,
                report.pool.max_connections,
                report.pool.idle,
                report.pool.queued
            );
            println!(
                "  {} {} created, {} closed",
                "Connections:".bold(),
                report.metrics.connections_created,
                report.metrics.connections_closed
            );
            Ok(())
        }

        Commands::Maintenance { force_vacuum } => {
            let maintenance = SqliteMaintenance::new(pool);
            let before = maintenance.get_stats().await?;

            if !cli.json {
                println!("{}", "Running maintenance...".cyan().bold());
                println!();
                if *force_vacuum {
                    println!("  {} Force VACUUM enabled", "•".bold());
                }
            }

            let after = maintenance
                .run_full_maintenance(&MaintenanceConfig {
                    force_vacuum: *force_vacuum,
                    ..Default::default()
                })
                .await?;

            if cli.json {
                return print_json(&serde_json::json!({
                    "db_size_before": before.db_size_bytes,
                    "db_size_after": after.db_size_bytes,
                    "fragmentation_before": before.fragmentation_percent,
                    "fragmentation_after": after.fragmentation_percent,
                }));
            }

            println!("  ✓ Maintenance completed");
            println!();
            println!(
                "  {} {:.2} MB → {:.2} MB",
                "DB Size:".bold(),
                before.db_size_mb,
                after.db_size_mb
            );
            println!(
                "  {} {:.1}% → {:.1}%",
                "Free pages:".bold(),
                before.fragmentation_percent,
                after.fragmentation_percent
            );
            Ok(())
        }
    }
}

async fn run_backup(json: bool, command: &BackupCommands, manager: &BackupManager) -> Result<()> {
    match command {
        BackupCommands::Create {
            no_compress,
            encrypt,
            by,
        } => {
            let record = manager
                .create_backup(BackupOptions {
                    backup_type: BackupType::Manual,
                    compress: !no_compress,
                    encrypt: *encrypt,
                    requested_by: by.clone(),
                })
                .await?;

            if json {
                return print_json(&record);
            }
            println!("{}", "✓ Backup created".green().bold());
            println!();
            print_backups(vec![BackupRow::from(&record)]);
        }

        BackupCommands::List => {
            let records = manager.list_backups();
            if json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("{}", "No backups".yellow());
            } else {
                print_backups(records.iter().map(BackupRow::from).collect());
            }
        }

        BackupCommands::Verify { id } => {
            let result = manager.verify_backup(id).await?;
            if json {
                return print_json(&result);
            }
            if result.valid {
                println!("{}", format!("✓ Backup {} verified", id).green().bold());
            } else {
                println!("{}", format!("✗ Backup {} failed verification", id).red().bold());
                println!("  {}", result.details);
            }
        }

        BackupCommands::Restore {
            id,
            dry_run,
            no_safety_backup,
            by,
        } => {
            let result = manager
                .restore_backup(
                    id,
                    RestoreOptions {
                        dry_run: *dry_run,
                        requested_by: by.clone(),
                        safety_backup: !no_safety_backup,
                    },
                )
                .await?;

            if json {
                return print_json(&result);
            }
            if result.dry_run {
                println!("{}", "✓ Dry run passed".green().bold());
            } else {
                println!("{}", format!("✓ Backup {} restored", id).green().bold());
            }
            println!("  {}", result.details);
            if let Some(safety) = &result.safety_backup_id {
                println!("  {} {}", "Safety backup:".bold(), safety);
            }
            println!("  {} {} ms", "Took:".bold(), result.duration_ms);
        }

        BackupCommands::Cleanup => {
            let report = manager.cleanup_old_backups().await?;
            if json {
                return print_json(&report);
            }
            println!(
                "{}",
                format!("✓ Removed {} backup(s)", report.removed.len())
                    .green()
                    .bold()
            );
            println!(
                "  {} {} retained, {:.2} MB freed",
                "•".bold(),
                report.retained,
                report.freed_bytes as f64 / (1024.0 * 1024.0)
            );
        }

        BackupCommands::GenerateKey => println!("{}", generate_key()),
    }

    Ok(())
}
