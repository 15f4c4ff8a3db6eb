//! Pipeline entry points.
//!
//! - `run_discovery`: enumerate categories per site and write aggregates
//! - `run_crawler`: fetch and persist category members
//! - `run_pipeline`: discovery (when enabled) followed by the crawl

pub mod crawl;
pub mod discover;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{Config, CrawlReport, DatabaseConfig};
use crate::services::ContentApi;
use crate::storage::{ArtifactStorage, PageStore};
use crate::utils::log;

pub use crawl::{Crawler, resolve_categories};
pub use discover::{
    CoverageEntry, DiscoveryEngine, DiscoveryOutcome, DiscoverySummary, aggregate,
};

/// Apply the configured reset and create the schema.
///
/// Fails before touching the database when both drop and truncate are set.
pub async fn prepare_store(store: &dyn PageStore, database: &DatabaseConfig) -> Result<()> {
    let reset = database.reset_mode()?;
    store.init_schema(reset).await?;
    ::log::info!("Page store ready (reset={:?})", reset);
    Ok(())
}

/// Run category discovery and log its summary.
pub async fn run_discovery(
    config: Arc<Config>,
    api: Arc<dyn ContentApi>,
    artifacts: Arc<dyn ArtifactStorage>,
    cancel: &CancellationToken,
) -> DiscoveryOutcome {
    let engine = DiscoveryEngine::new(config, api, artifacts);
    let outcome = engine.run(cancel).await;
    let report = &outcome.report;

    log::summary(
        "Discovery",
        &[
            ("sites", report.sites.len().to_string()),
            ("failed sites", report.failed_sites.len().to_string()),
            ("artifacts written", report.artifacts_written.to_string()),
            ("artifacts unchanged", report.artifacts_unchanged.to_string()),
            ("artifacts failed", report.artifacts_failed.to_string()),
            (
                "duration",
                format!(
                    "{}ms",
                    (report.finished_at - report.started_at).num_milliseconds()
                ),
            ),
        ],
    );
    outcome
}

/// Run the crawl and log its summary.
pub async fn run_crawler(
    config: Arc<Config>,
    api: Arc<dyn ContentApi>,
    store: Arc<dyn PageStore>,
    discovered: &HashMap<String, crate::models::CategorySet>,
    cancel: &CancellationToken,
) -> CrawlReport {
    let crawler = Crawler::new(config, api, store);
    let report = crawler.run(discovered, cancel).await;
    log::summary("Crawl", &report.summary_items());
    report
}

/// Run the full pipeline against a prepared store.
///
/// Discovery problems never stop the crawl; seeds are always crawled.
pub async fn run_pipeline(
    config: Arc<Config>,
    api: Arc<dyn ContentApi>,
    store: Arc<dyn PageStore>,
    artifacts: Arc<dyn ArtifactStorage>,
    cancel: &CancellationToken,
) -> CrawlReport {
    log::header("Crawl pipeline starting");

    let total_steps = if config.discovery.enabled { 2 } else { 1 };
    let mut current_step = 1;

    let mut discovered = HashMap::new();
    if config.discovery.enabled {
        log::step(current_step, total_steps, "Discover - Enumerating categories");
        let outcome = run_discovery(Arc::clone(&config), Arc::clone(&api), artifacts, cancel).await;
        discovered.extend(outcome.sets);
        current_step += 1;
    }

    log::step(current_step, total_steps, "Crawl - Fetching category members");
    let report = run_crawler(config, api, store, &discovered, cancel).await;

    ::log::info!("Pipeline complete");
    report
}
