//! wikiharvest CLI
//!
//! Local execution entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use wikiharvest::{
    error::Result,
    models::Config,
    pipeline,
    services::MediaWikiClient,
    storage::{LocalStorage, SqliteStore},
};

/// wikiharvest - incremental wiki category crawler
#[derive(Parser, Debug)]
#[command(
    name = "wikiharvest",
    version,
    about = "Incremental crawler for MediaWiki category content"
)]
struct Cli {
    /// Path to storage directory containing config.toml
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl seed (and, when enabled, discovered) categories
    Crawl {
        /// Drop and recreate the page tables before crawling
        #[arg(long)]
        drop: bool,

        /// Delete all stored pages before crawling
        #[arg(long)]
        truncate: bool,
    },

    /// Enumerate categories per site and write discovery artifacts
    Discover,

    /// Validate configuration file
    Validate,

    /// Show storage and database info
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel the token on Ctrl+C; in-flight requests finish first.
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received; stopping after the current request");
            cancel.cancel();
        }
    });
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("wikiharvest starting...");

    let config_path = cli.storage_dir.join("config.toml");
    let mut config = Config::load_or_default(&config_path);
    log::info!("Loaded configuration from {}", cli.storage_dir.display());

    let artifacts = Arc::new(LocalStorage::new(&cli.storage_dir));
    let db_path = config.database.resolve_path(&cli.storage_dir);

    match cli.command {
        Command::Crawl { drop, truncate } => {
            config.database.drop |= drop;
            config.database.truncate |= truncate;
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }

            let store = Arc::new(SqliteStore::open(&db_path)?);
            pipeline::prepare_store(store.as_ref(), &config.database).await?;
            log::info!("Page store at {}", db_path.display());

            let config = Arc::new(config);
            let api = Arc::new(MediaWikiClient::new(&config.crawler)?);
            let cancel = CancellationToken::new();
            spawn_shutdown_listener(cancel.clone());

            let report = pipeline::run_pipeline(config, api, store, artifacts, &cancel).await;
            if report.cancelled {
                log::warn!("Crawl stopped early");
            } else {
                log::info!("Crawl complete!");
            }
        }

        Command::Discover => {
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }

            let config = Arc::new(config);
            let api = Arc::new(MediaWikiClient::new(&config.crawler)?);
            let cancel = CancellationToken::new();
            spawn_shutdown_listener(cancel.clone());

            let outcome = pipeline::run_discovery(config, api, artifacts, &cancel).await;
            log::info!("Discovery complete for {} sites", outcome.sets.len());
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK ({} sites)", config.sites.len());
            for site in &config.sites {
                let seeds = config.seed_categories(site);
                log::info!("    {}: {} seed categories", site.label(), seeds.len());
            }

            log::info!("All validations passed!");
        }

        Command::Info => {
            log::info!("Storage directory: {}", cli.storage_dir.display());

            if db_path.exists() {
                let store = SqliteStore::open(&db_path)?;
                log::info!("Database: {}", db_path.display());
                for site in &config.sites {
                    log::info!(
                        "    {}: {} pages, {} bodies",
                        site.label(),
                        store.page_count(Some(&site.base_url))?,
                        store.body_count(Some(&site.base_url))?
                    );
                }
                log::info!(
                    "    total: {} pages, {} bodies",
                    store.page_count(None)?,
                    store.body_count(None)?
                );
            } else {
                log::info!("No database found yet.");
            }

            let output_dir = &config.discovery.output_dir;
            let documents = artifacts.list_json(output_dir).await?;
            let site_documents = artifacts
                .list_json(&format!("{}/sites", output_dir.trim_end_matches('/')))
                .await?;
            if documents.is_empty() && site_documents.is_empty() {
                log::info!("No discovery artifacts found yet.");
            } else {
                log::info!(
                    "Discovery artifacts: {} aggregate, {} per-site",
                    documents.len(),
                    site_documents.len()
                );
                for key in &documents {
                    log::info!("    {}", key);
                }
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
