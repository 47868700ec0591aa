use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

use recoveryrs::config::EngineConfig;
use recoveryrs::database::SqliteStore;
use recoveryrs::facade::{HealthDataFacade, HealthStatus};
use recoveryrs::logging::init_logging;
use recoveryrs::models::{ConnectionRecord, ProviderType};
use recoveryrs::provider::{ConnectionRegistry, SnapshotFileProvider};
use recoveryrs::recovery::RecoveryBand;
use recoveryrs::sync::{SyncPolicy, SyncReport};

/// RecoveryRS - Wearable Recovery Scoring CLI
///
/// Syncs wearable health data into a per-user record and derives a daily
/// recovery score, sleep summary and training recommendation from it.
#[derive(Parser)]
#[command(name = "recoveryrs")]
#[command(author = "RecoveryRS Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Wearable Recovery Scoring CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize a provider for a user
    Connect {
        #[arg(short, long)]
        user: String,

        /// Provider (apple-health, health-connect, fitbit, garmin, oura, whoop)
        #[arg(short, long)]
        provider: ProviderType,

        /// Granted permission scope, repeatable
        #[arg(long = "permission")]
        permissions: Vec<String>,
    },

    /// Revoke a provider for a user
    Disconnect {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        provider: ProviderType,
    },

    /// Show recovery score and sleep summary
    Status {
        #[arg(short, long)]
        user: String,

        /// Provider export (JSON) to sync from when the data is stale
        #[arg(short, long, value_name = "FILE")]
        snapshot: Option<PathBuf>,

        /// Provider the snapshot was exported from
        #[arg(short, long, default_value = "apple-health")]
        provider: ProviderType,

        /// Print the full status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sync immediately, ignoring the staleness window
    Refresh {
        #[arg(short, long)]
        user: String,

        /// Provider export (JSON) to sync from
        #[arg(short, long, value_name = "FILE")]
        snapshot: PathBuf,

        #[arg(short, long, default_value = "apple-health")]
        provider: ProviderType,
    },

    /// Configure application settings
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,

        /// Print the active configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::load_or_default(),
    };

    init_logging(&config.logging.clone().with_verbosity(cli.verbose))?;

    match cli.command {
        Commands::Connect {
            user,
            provider,
            permissions,
        } => {
            let store = open_store(&config)?;
            store
                .upsert_connection(ConnectionRecord::new(&user, provider, permissions))
                .await?;
            println!("{}", format!("✓ Connected {} for {}", provider, user).green());
        }

        Commands::Disconnect { user, provider } => {
            let store = open_store(&config)?;
            let existing = store
                .get_connections(&user)
                .await?
                .into_iter()
                .find(|c| c.provider_type == provider);

            match existing {
                Some(mut connection) => {
                    connection.is_connected = false;
                    store.upsert_connection(connection).await?;
                    println!("{}", format!("✓ Disconnected {} for {}", provider, user).green());
                }
                None => println!("{}", format!("{} is not connected for {}", provider, user).yellow()),
            }
        }

        Commands::Status {
            user,
            snapshot,
            provider,
            json,
        } => {
            let snapshot = snapshot.map(|path| (provider, path));
            let facade = build_facade(&config, snapshot)?;
            let status = facade.get_status(&user).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&user, &status);
            }
        }

        Commands::Refresh {
            user,
            snapshot,
            provider,
        } => {
            let facade = build_facade(&config, Some((provider, snapshot)))?;
            println!("{}", "Syncing provider data...".blue().bold());
            let (status, report) = facade.refresh_with_report(&user).await;

            match report {
                Some(report) => print_report(&report),
                None => println!(
                    "{}",
                    format!("{} is not connected for {}; run `recoveryrs connect` first", provider, user).yellow()
                ),
            }
            print_status(&user, &status);
        }

        Commands::Config { init, show } => {
            let path = cli.config.clone().unwrap_or_else(EngineConfig::default_config_path);

            if init {
                if path.exists() {
                    println!("{}", format!("Config already exists at {}", path.display()).yellow());
                } else {
                    EngineConfig::default().save_to_file(&path)?;
                    println!("{}", format!("✓ Wrote default config to {}", path.display()).green());
                }
            }

            if show || !init {
                println!("{}", format!("# {}", path.display()).dimmed());
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

fn open_store(config: &EngineConfig) -> Result<Arc<SqliteStore>> {
    let path = &config.storage.database_path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
    }

    let store = SqliteStore::new(path).with_context(|| format!("Failed to open database: {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_facade(config: &EngineConfig, snapshot: Option<(ProviderType, PathBuf)>) -> Result<HealthDataFacade> {
    let store = open_store(config)?;
    let mut policy = SyncPolicy::new(store.clone(), store, config.sync.clone());

    if let Some((provider, path)) = snapshot {
        let client = SnapshotFileProvider::from_file(provider, &path)?;
        policy.register_provider(Arc::new(client));
    }

    Ok(HealthDataFacade::new(Arc::new(policy)))
}

#[derive(Tabled)]
struct FactorRow {
    #[tabled(rename = "Factor")]
    factor: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct CategoryRow {
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Status")]
    status: String,
}

fn print_report(report: &SyncReport) {
    let rows: Vec<CategoryRow> = report
        .outcomes
        .iter()
        .map(|o| CategoryRow {
            provider: o.provider.to_string(),
            category: o.category.to_string(),
            samples: o.samples,
            status: o.error.clone().unwrap_or_else(|| "ok".to_string()),
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
    let summary = format!(
        "{} samples synced in {} ms",
        report.total_samples(),
        report.elapsed_ms()
    );
    if report.is_complete() {
        println!("{}", format!("✓ {}", summary).green());
    } else {
        println!("{}", format!("⚠ {} ({} categories failed)", summary, report.failed().count()).yellow());
    }
}

fn print_status(user: &str, status: &HealthStatus) {
    if let Some(error) = &status.error {
        println!("{}", error.red().bold());
    }

    if status.record.is_none() {
        println!("{}", format!("No health data for {}. Connect a device to see recovery data.", user).yellow());
        return;
    }

    match &status.recovery_status {
        Some(recovery) => {
            let band = RecoveryBand::from_score(recovery.score);
            let score = format!("{} ({})", recovery.score, band);
            let score = match band {
                RecoveryBand::Low => score.red(),
                RecoveryBand::Moderate => score.yellow(),
                RecoveryBand::Good => score.green(),
                RecoveryBand::Excellent => score.bright_green(),
            };
            println!("{} {}", "Recovery score:".bold(), score.bold());
            println!("{}", recovery.recommendation);

            let factors = &recovery.contributing_factors;
            let rows = vec![
                FactorRow {
                    factor: "Sleep quality",
                    value: factors.sleep_quality.to_string(),
                },
                FactorRow {
                    factor: "Resting heart rate",
                    value: format!("{:.0} bpm", factors.resting_heart_rate),
                },
                FactorRow {
                    factor: "HRV proxy",
                    value: factors
                        .heart_rate_variability
                        .map(|v| format!("{:.1}", v))
                        .unwrap_or_else(|| "-".to_string()),
                },
                FactorRow {
                    factor: "Activity level",
                    value: format!("{} ({})", factors.recent_activity_level, recovery.activity_source),
                },
            ];
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
        None => println!(
            "{}",
            "Not enough data for a recovery score yet. Sleep or heart-rate data is needed.".yellow()
        ),
    }

    if let Some(summary) = &status.sleep_summary {
        println!(
            "{} {} · {} min total · deep {} · REM {} · light {} · {} awakenings · score {}",
            "Sleep:".bold(),
            summary.date,
            summary.total_sleep_minutes,
            summary.deep_sleep_minutes,
            summary.rem_sleep_minutes,
            summary.light_sleep_minutes,
            summary.awakenings,
            summary.sleep_score
        );
    }
}
