use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meal_config::{ConfigConsumer, ServiceSettings, StatusPolicySetting, UnusedKeyPolicy};
use meal_db::{PgStore, Store};
use meal_delivery::{DeliveryEngine, RetryPolicy, StatusPolicy};
use meal_fanout::FanOut;

#[derive(Parser)]
#[command(name = "meal")]
#[command(about = "Hospital meal delivery operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> site -> local ...)
        #[arg(required = true)]
        paths: Vec<String>,

        /// Also list leaf keys the daemon would ignore
        #[arg(long, default_value_t = false)]
        unused: bool,
    },

    /// Delivery queries
    Deliveries {
        #[command(subcommand)]
        cmd: DeliveriesCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply embedded SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum DeliveriesCmd {
    /// Print deliveries as JSON lines, oldest first.
    List {
        /// pending | preparing | ready | delivering | delivered
        #[arg(long)]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let settings = settings_from_env()?;
            let pool = connect(&settings).await?;
            match cmd {
                DbCmd::Status => {
                    let s = meal_db::status(&pool).await?;
                    println!("db_ok={} has_deliveries_table={}", s.ok, s.has_deliveries_table);
                }
                DbCmd::Migrate => {
                    meal_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths, unused } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = meal_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);

            if unused {
                let report = meal_config::report_unused_keys(
                    ConfigConsumer::Daemon,
                    &loaded.config_json,
                    UnusedKeyPolicy::Warn,
                )?;
                for p in &report.unused_leaf_pointers {
                    println!("unused={p}");
                }
            }
        }

        Commands::Deliveries { cmd } => match cmd {
            DeliveriesCmd::List { status } => {
                let filter = status
                    .as_deref()
                    .map(meal_delivery::parse_status)
                    .transpose()
                    .context("--status")?;

                let settings = settings_from_env()?;
                let store: Arc<dyn Store> = Arc::new(PgStore::new(connect(&settings).await?));
                let engine = engine_for(store, &settings);

                for d in engine.list_deliveries(filter).await? {
                    println!("{}", serde_json::to_string(&d)?);
                }
            }
        },
    }

    Ok(())
}

fn settings_from_env() -> Result<ServiceSettings> {
    let loaded = meal_config::load_from_env().context("load config layers")?;
    let report = meal_config::report_unused_keys(
        ConfigConsumer::Cli,
        &loaded.config_json,
        UnusedKeyPolicy::Warn,
    )?;
    if !report.is_clean() {
        tracing::debug!(unused = ?report.unused_leaf_pointers, "config keys not read by the cli");
    }
    ServiceSettings::from_config_json(&loaded.config_json)
}

async fn connect(settings: &ServiceSettings) -> Result<meal_db::PgPool> {
    let url = meal_config::secrets::resolve_database_url(settings)?;
    meal_db::connect(url.expose()).await
}

/// Read-only engine; events it would publish have no subscribers here.
fn engine_for(store: Arc<dyn Store>, settings: &ServiceSettings) -> DeliveryEngine {
    let policy = match settings.status_policy {
        StatusPolicySetting::Lenient => StatusPolicy::Lenient,
        StatusPolicySetting::Strict => StatusPolicy::Strict,
    };
    DeliveryEngine::new(store, Arc::new(FanOut::new(1)))
        .with_policy(policy)
        .with_retry(RetryPolicy {
            max_attempts: settings.retry_max_attempts,
            backoff: settings.retry_backoff,
        })
}
