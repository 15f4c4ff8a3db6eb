// src/pipeline/discover.rs

//! Category discovery across sites.
//!
//! Every site's full category list is enumerated, then combined into
//! cross-site aggregates. Each aggregate is written as a pretty-printed JSON
//! document, and only when its content differs from what is already stored:
//!
//! ```text
//! {output_dir}/sites/{slug}.json      one site's categories
//! {output_dir}/intersection.json      categories present on every site
//! {output_dir}/union.json             categories present on any site
//! {output_dir}/coverage.json          per category: site count and sites
//! {output_dir}/at_least.json          categories on at least `min_sites` sites
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{CategoryName, CategorySet, Config, DiscoveryReport, SiteDiscovery};
use crate::services::{AllCategories, ContentApi, Cursor};
use crate::storage::{ArtifactStorage, WriteOutcome, write_if_changed};
use crate::utils::site_slug;

/// One coverage row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageEntry {
    pub category: CategoryName,
    pub count: usize,
    pub sites: Vec<String>,
}

/// Cross-site aggregates of per-site category sets.
#[derive(Debug, Clone, Default)]
pub struct DiscoverySummary {
    pub sites: Vec<String>,
    pub intersection: CategorySet,
    pub union: CategorySet,
    pub coverage: Vec<CoverageEntry>,
}

impl DiscoverySummary {
    /// Categories that appear on at least `min_sites` sites.
    pub fn at_least(&self, min_sites: usize) -> CategorySet {
        self.coverage
            .iter()
            .filter(|entry| entry.count >= min_sites)
            .map(|entry| entry.category.clone())
            .collect()
    }
}

/// Combine per-site sets, given in processing order.
pub fn aggregate(sets: &[(String, CategorySet)]) -> DiscoverySummary {
    let mut coverage: BTreeMap<CategoryName, Vec<String>> = BTreeMap::new();
    for (site, set) in sets {
        for category in set {
            coverage
                .entry(category.clone())
                .or_default()
                .push(site.clone());
        }
    }

    let mut iter = sets.iter().map(|(_, set)| set);
    let intersection = match iter.next() {
        Some(first) => iter.fold(first.clone(), |acc, set| acc.intersection(set)),
        None => CategorySet::new(),
    };

    DiscoverySummary {
        sites: sets.iter().map(|(site, _)| site.clone()).collect(),
        intersection,
        union: coverage.keys().cloned().collect(),
        coverage: coverage
            .into_iter()
            .map(|(category, sites)| CoverageEntry {
                category,
                count: sites.len(),
                sites,
            })
            .collect(),
    }
}

#[derive(Serialize)]
struct SiteDocument<'a> {
    site: &'a str,
    count: usize,
    categories: Vec<String>,
}

#[derive(Serialize)]
struct SetDocument<'a> {
    sites: &'a [String],
    count: usize,
    categories: Vec<String>,
}

#[derive(Serialize)]
struct AtLeastDocument<'a> {
    min_sites: usize,
    sites: &'a [String],
    count: usize,
    categories: Vec<String>,
}

#[derive(Serialize)]
struct CoverageDocument<'a> {
    sites: &'a [String],
    categories: &'a [CoverageEntry],
}

fn render<T: Serialize>(document: &T) -> Result<String> {
    let mut json = serde_json::to_string_pretty(document)?;
    json.push('\n');
    Ok(json)
}

/// Threshold document; removed when no threshold is configured.
const AT_LEAST_DOCUMENT: &str = "at_least.json";

/// Per-site sets plus the run report.
#[derive(Debug)]
pub struct DiscoveryOutcome {
    /// Successfully enumerated sites, in configuration order.
    pub sets: Vec<(String, CategorySet)>,
    pub report: DiscoveryReport,
}

/// Enumerates categories per site and persists the aggregates.
pub struct DiscoveryEngine {
    config: Arc<Config>,
    api: Arc<dyn ContentApi>,
    artifacts: Arc<dyn ArtifactStorage>,
}

impl DiscoveryEngine {
    pub fn new(
        config: Arc<Config>,
        api: Arc<dyn ContentApi>,
        artifacts: Arc<dyn ArtifactStorage>,
    ) -> Self {
        Self {
            config,
            api,
            artifacts,
        }
    }

    /// Enumerate every category of one site.
    ///
    /// Raw names are normalized; blank names are dropped.
    pub async fn discover_site(&self, site: &str) -> Result<CategorySet> {
        let mut cursor = Cursor::new(AllCategories {
            api: self.api.as_ref(),
            site,
        });
        let mut set = CategorySet::new();
        let delay = self.config.crawler.pagination_delay_ms;

        while let Some(page) = cursor.next_page().await {
            if delay > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            for raw in page? {
                match CategoryName::parse(&raw) {
                    Some(name) => {
                        set.insert(name);
                    }
                    None => log::debug!("Ignoring blank category name site={}", site),
                }
            }
        }

        Ok(set)
    }

    /// Discover all sites, write the artifacts and return the per-site sets.
    ///
    /// A site whose enumeration fails is left out of every aggregate and its
    /// previous per-site document is kept as is. Aggregates are only written
    /// from a run that visited every site, so a cancelled run leaves them
    /// untouched. Artifact I/O failures are logged and counted, never raised.
    pub async fn run(&self, cancel: &CancellationToken) -> DiscoveryOutcome {
        let mut report = DiscoveryReport::new(Utc::now());
        let mut sets = Vec::new();

        for site in &self.config.sites {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            log::info!("Discovering categories site={}", site.label());
            let set = match self.discover_site(&site.base_url).await {
                Ok(set) => set,
                Err(e) => {
                    log::warn!("Discovery failed site={}: {}", site.label(), e);
                    report.failed_sites.push(site.base_url.clone());
                    continue;
                }
            };
            log::info!(
                "Discovered {} categories site={}",
                set.len(),
                site.label()
            );

            let document = SiteDocument {
                site: &site.base_url,
                count: set.len(),
                categories: set.to_names(),
            };
            let key = format!("sites/{}.json", site_slug(&site.base_url));
            self.persist(&key, &document, &mut report).await;

            report.sites.push(SiteDiscovery {
                site: site.base_url.clone(),
                categories: set.len(),
            });
            sets.push((site.base_url.clone(), set));
        }

        if report.cancelled {
            log::warn!("Discovery cancelled; aggregates not written");
        } else if sets.is_empty() {
            log::warn!("No site was discovered; aggregates not written");
        } else {
            self.write_aggregates(&aggregate(&sets), &mut report).await;
        }

        report.finished_at = Utc::now();
        DiscoveryOutcome { sets, report }
    }

    async fn write_aggregates(&self, summary: &DiscoverySummary, report: &mut DiscoveryReport) {
        let intersection = SetDocument {
            sites: &summary.sites,
            count: summary.intersection.len(),
            categories: summary.intersection.to_names(),
        };
        self.persist("intersection.json", &intersection, report).await;

        let union = SetDocument {
            sites: &summary.sites,
            count: summary.union.len(),
            categories: summary.union.to_names(),
        };
        self.persist("union.json", &union, report).await;

        let coverage = CoverageDocument {
            sites: &summary.sites,
            categories: &summary.coverage,
        };
        self.persist("coverage.json", &coverage, report).await;

        match self.config.discovery.min_sites_for_global {
            Some(min_sites) => {
                let set = summary.at_least(min_sites);
                let document = AtLeastDocument {
                    min_sites,
                    sites: &summary.sites,
                    count: set.len(),
                    categories: set.to_names(),
                };
                self.persist(AT_LEAST_DOCUMENT, &document, report).await;
            }
            None => self.retire(AT_LEAST_DOCUMENT, report).await,
        }
    }

    fn key(&self, name: &str) -> String {
        format!(
            "{}/{}",
            self.config.discovery.output_dir.trim_end_matches('/'),
            name
        )
    }

    /// Render and write one document through the diff gate.
    async fn persist<T: Serialize>(&self, name: &str, document: &T, report: &mut DiscoveryReport) {
        let key = self.key(name);
        let written = match render(document) {
            Ok(content) => write_if_changed(self.artifacts.as_ref(), &key, &content).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(WriteOutcome::Written) => report.artifacts_written += 1,
            Ok(WriteOutcome::Unchanged) => report.artifacts_unchanged += 1,
            Err(e) => {
                report.artifacts_failed += 1;
                log::error!("Artifact write failed key={}: {}", key, e);
            }
        }
    }

    /// Remove a document that no longer applies.
    async fn retire(&self, name: &str, report: &mut DiscoveryReport) {
        let key = self.key(name);
        match self.artifacts.remove_text(&key).await {
            Ok(true) => log::info!("Artifact {} removed", key),
            Ok(false) => {}
            Err(e) => {
                report.artifacts_failed += 1;
                log::error!("Artifact removal failed key={}: {}", key, e);
            }
        }
    }
}
