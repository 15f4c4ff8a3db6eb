//! Run summaries for crawl and discovery passes.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters collected over one crawl run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CrawlReport {
    pub sites: usize,
    pub categories: usize,
    pub pages_seen: usize,
    pub fetched: usize,
    pub stored: usize,
    pub skipped_unchanged: usize,
    pub skipped_duplicate: usize,
    pub fetch_failures: usize,
    pub store_failures: usize,
    pub pagination_failures: usize,
    pub cancelled: bool,
}

impl CrawlReport {
    /// Key/value pairs for the summary log.
    pub fn summary_items(&self) -> Vec<(&'static str, String)> {
        vec![
            ("sites", self.sites.to_string()),
            ("categories", self.categories.to_string()),
            ("pages seen", self.pages_seen.to_string()),
            ("fetched", self.fetched.to_string()),
            ("stored", self.stored.to_string()),
            ("skipped (unchanged)", self.skipped_unchanged.to_string()),
            ("skipped (duplicate)", self.skipped_duplicate.to_string()),
            ("fetch failures", self.fetch_failures.to_string()),
            ("store failures", self.store_failures.to_string()),
            ("pagination failures", self.pagination_failures.to_string()),
            ("cancelled", self.cancelled.to_string()),
        ]
    }
}

/// Category count for one site in a discovery run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SiteDiscovery {
    pub site: String,
    pub categories: usize,
}

/// Outcome of one discovery run.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sites: Vec<SiteDiscovery>,
    pub failed_sites: Vec<String>,
    pub artifacts_written: usize,
    pub artifacts_unchanged: usize,
    pub artifacts_failed: usize,
    pub cancelled: bool,
}

impl DiscoveryReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            sites: Vec::new(),
            failed_sites: Vec::new(),
            artifacts_written: 0,
            artifacts_unchanged: 0,
            artifacts_failed: 0,
            cancelled: false,
        }
    }
}
