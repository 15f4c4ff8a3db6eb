// src/pipeline/crawl.rs

//! Crawl orchestration.
//!
//! Sites, categories and members are processed strictly in sequence:
//!
//! ```text
//! Idle -> CrawlingCategory(c) -> FetchingPage(p) -> Persisting(p) -> CrawlingCategory(c) ... -> Idle
//! ```
//!
//! Cancellation is observed before each category and before each member, so
//! a request that is already in flight always completes first. Failures are
//! contained to the page (or pagination step) they occur in.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::models::{
    CategoryName, CategorySet, Config, CrawlReport, MemberRef, SiteConfig,
};
use crate::services::{CategoryMembers, ChangeDetector, ContentApi, Cursor, Decision};
use crate::storage::PageStore;

/// Drives the per-site, per-category traversal.
pub struct Crawler {
    config: Arc<Config>,
    api: Arc<dyn ContentApi>,
    store: Arc<dyn PageStore>,
}

impl Crawler {
    pub fn new(config: Arc<Config>, api: Arc<dyn ContentApi>, store: Arc<dyn PageStore>) -> Self {
        Self { config, api, store }
    }

    /// Crawl every configured site.
    ///
    /// `discovered` holds discovered categories per site base URL; it is
    /// only consulted when discovery is enabled.
    pub async fn run(
        &self,
        discovered: &HashMap<String, CategorySet>,
        cancel: &CancellationToken,
    ) -> CrawlReport {
        let mut report = CrawlReport::default();

        for site in &self.config.sites {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let extra = if self.config.discovery.enabled {
                discovered.get(&site.base_url)
            } else {
                None
            };
            self.crawl_site(site, extra, cancel, &mut report).await;
            report.sites += 1;

            if report.cancelled {
                break;
            }
        }

        if report.cancelled {
            log::warn!("Crawl cancelled");
        }
        report
    }

    /// Crawl one site with its own per-run seen-set.
    async fn crawl_site(
        &self,
        site: &SiteConfig,
        discovered: Option<&CategorySet>,
        cancel: &CancellationToken,
        report: &mut CrawlReport,
    ) {
        let seeds = self.config.seed_categories(site);
        let categories = resolve_categories(&seeds, discovered);

        if categories.is_empty() {
            log::info!("No categories for site={}; nothing to crawl", site.label());
            return;
        }
        log::info!(
            "Crawling site={} categories={}",
            site.label(),
            categories.len()
        );

        let mut seen = HashSet::new();
        for category in &categories {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }
            report.categories += 1;
            self.crawl_category(&site.base_url, category, &mut seen, cancel, report)
                .await;
            if report.cancelled {
                return;
            }
        }
    }

    /// Walk every member page of one category.
    async fn crawl_category(
        &self,
        site: &str,
        category: &CategoryName,
        seen: &mut HashSet<String>,
        cancel: &CancellationToken,
        report: &mut CrawlReport,
    ) {
        log::info!("Crawling category={} site={}", category, site);

        let source = CategoryMembers {
            api: self.api.as_ref(),
            site,
            category,
        };
        let mut cursor = Cursor::new(source);
        let mut exhausted = true;

        while let Some(page) = cursor.next_page().await {
            pause(self.config.crawler.pagination_delay_ms).await;

            let members = match page {
                Ok(members) => members,
                Err(e) => {
                    report.pagination_failures += 1;
                    exhausted = false;
                    log::warn!(
                        "Pagination failed category={} site={} after {} pages: {}",
                        category,
                        site,
                        cursor.pages_fetched(),
                        e
                    );
                    break;
                }
            };

            for member in &members {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    return;
                }
                self.process_member(site, member, seen, report).await;
            }
        }

        if exhausted && self.config.crawler.cleanup_duplicates {
            match self.store.cleanup_duplicates(site).await {
                Ok(0) => {}
                Ok(removed) => log::info!("Removed {} duplicate pages site={}", removed, site),
                Err(e) => log::error!("Duplicate cleanup failed site={}: {}", site, e),
            }
        }
    }

    /// Dedup, change-check, fetch and persist a single member.
    async fn process_member(
        &self,
        site: &str,
        member: &MemberRef,
        seen: &mut HashSet<String>,
        report: &mut CrawlReport,
    ) {
        let Some(key) = member.dedup_key() else {
            log::warn!("Skipping member without id or title site={}", site);
            return;
        };
        if seen.contains(&key) {
            report.skipped_duplicate += 1;
            log::debug!("Already processed this run: {} site={}", member.label(), site);
            return;
        }
        seen.extend(member.dedup_keys());
        report.pages_seen += 1;

        let detector = ChangeDetector::new(self.api.as_ref(), self.store.as_ref());
        let decision = detector.check(site, member).await;
        if decision.queried_remote() {
            pause(self.config.crawler.request_delay_ms).await;
        }
        match decision {
            Decision::Skip { revision } => {
                report.skipped_unchanged += 1;
                log::info!(
                    "Skip unchanged page={} site={} revision={}",
                    member.label(),
                    site,
                    revision
                );
                return;
            }
            Decision::Fetch(reason) => {
                log::debug!("Fetching page={} site={} ({})", member.label(), site, reason);
            }
        }

        let fetched = self.api.fetch_page(site, member).await;
        pause(self.config.crawler.request_delay_ms).await;

        let page = match fetched {
            Ok(page) => page,
            Err(e) => {
                report.fetch_failures += 1;
                log::warn!("Fetch failed page={} site={}: {}", member.label(), site, e);
                return;
            }
        };
        report.fetched += 1;
        seen.extend(page.dedup_keys());

        let (record, body) = page.into_rows(site, self.config.crawler.body_format, Utc::now());
        if let Err(e) = self.store.upsert_page_record(&record).await {
            report.store_failures += 1;
            log::error!(
                "Save failed page={} site={} page_id={}: {}",
                record.title,
                site,
                record.page_id,
                e
            );
            return;
        }
        if let Err(e) = self.store.upsert_page_body(&body).await {
            report.store_failures += 1;
            log::error!(
                "Save body failed page={} site={} page_id={}: {}",
                record.title,
                site,
                record.page_id,
                e
            );
            return;
        }

        report.stored += 1;
        log::info!(
            "Saved page={} site={} page_id={} revision={:?}",
            record.title,
            site,
            record.page_id,
            record.revision_id
        );
    }
}

/// Seeds first, then discovered categories; blanks dropped, case-insensitive
/// duplicates removed keeping the first occurrence.
pub fn resolve_categories(seeds: &[String], discovered: Option<&CategorySet>) -> Vec<CategoryName> {
    let mut seen = HashSet::new();
    seeds
        .iter()
        .filter_map(|raw| CategoryName::parse(raw))
        .chain(discovered.into_iter().flat_map(|set| set.iter().cloned()))
        .filter(|name| seen.insert(name.key().to_string()))
        .collect()
}

async fn pause(millis: u64) {
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BodyFormat, FetchedPage, PageRecord};
    use crate::storage::SqliteStore;
    use crate::testing::{Call, MockApi};

    const SITE: &str = "https://one.example.org/w/api.php";
    const SITE2: &str = "https://two.example.org/w/api.php";

    fn config(categories: &[&str]) -> Config {
        let mut config = Config {
            categories: categories.iter().map(|c| c.to_string()).collect(),
            sites: vec![SiteConfig::new(SITE)],
            ..Config::default()
        };
        config.crawler.request_delay_ms = 0;
        config.crawler.pagination_delay_ms = 0;
        config
    }

    async fn store() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        store.init_schema(Default::default()).await.unwrap();
        Arc::new(store)
    }

    fn crawler(config: Config, api: &Arc<MockApi>, store: &Arc<SqliteStore>) -> Crawler {
        Crawler::new(Arc::new(config), api.clone(), store.clone())
    }

    async fn run(crawler: &Crawler) -> CrawlReport {
        crawler
            .run(&HashMap::new(), &CancellationToken::new())
            .await
    }

    #[test]
    fn test_resolve_categories_dedups_and_filters() {
        let seeds = vec![
            "Physics".to_string(),
            "  ".to_string(),
            "category:physics".to_string(),
            "Category:Chemistry".to_string(),
        ];
        let discovered: CategorySet = ["Biology", "CHEMISTRY", "Astronomy"]
            .into_iter()
            .filter_map(CategoryName::parse)
            .collect();

        let names: Vec<String> = resolve_categories(&seeds, Some(&discovered))
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "Category:Physics",
                "Category:Chemistry",
                "Category:Astronomy",
                "Category:Biology",
            ]
        );
    }

    #[tokio::test]
    async fn test_two_pages_across_continuation() {
        let api = Arc::new(MockApi::new());
        api.add_members(SITE, "Category:X", None, vec![MemberRef::new(1, "One")], Some("t1"));
        api.add_members(SITE, "Category:X", Some("t1"), vec![MemberRef::new(2, "Two")], None);
        api.add_page(SITE, 1, "One", "<p>1</p>", 100);
        api.add_page(SITE, 2, "Two", "<p>2</p>", 200);
        let store = store().await;

        let report = run(&crawler(config(&["Category:X"]), &api, &store)).await;

        assert_eq!(api.member_calls(), 2);
        assert_eq!(api.fetch_calls(), 2);
        assert_eq!(store.page_count(Some(SITE)).unwrap(), 2);
        assert_eq!(store.body_count(Some(SITE)).unwrap(), 2);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.stored, 2);
        assert_eq!(report.categories, 1);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_page_in_two_categories_fetched_once() {
        let api = Arc::new(MockApi::new());
        api.add_members(SITE, "A", None, vec![MemberRef::new(1, "Shared")], None);
        api.add_members(
            SITE,
            "B",
            None,
            vec![MemberRef::new(1, "Shared"), MemberRef::new(2, "Other")],
            None,
        );
        api.add_page(SITE, 1, "Shared", "s", 1);
        api.add_page(SITE, 2, "Other", "o", 1);
        let store = store().await;

        let report = run(&crawler(config(&["A", "B"]), &api, &store)).await;

        assert_eq!(api.fetched_ids(), vec![Some(1), Some(2)]);
        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(report.stored, 2);
    }

    #[tokio::test]
    async fn test_unchanged_page_skipped_without_fetch_or_store() {
        let api = Arc::new(MockApi::new());
        api.add_members(SITE, "A", None, vec![MemberRef::new(1, "Same")], None);
        api.set_revision(SITE, "Same", 7);
        let store = store().await;
        let saved_at = Utc::now();
        store
            .upsert_page_record(&PageRecord {
                site: SITE.to_string(),
                page_id: 1,
                title: "Same".to_string(),
                revision_id: Some(7),
                last_fetched_at: saved_at,
            })
            .await
            .unwrap();

        let report = run(&crawler(config(&["A"]), &api, &store)).await;

        assert_eq!(api.fetch_calls(), 0);
        assert_eq!(report.skipped_unchanged, 1);
        assert_eq!(report.stored, 0);
        let record = store.get_page_record(SITE, 1).unwrap().unwrap();
        assert_eq!(
            record.last_fetched_at.timestamp_micros(),
            saved_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn test_changed_page_is_refetched() {
        let api = Arc::new(MockApi::new());
        api.add_members(SITE, "A", None, vec![MemberRef::new(1, "Moved")], None);
        api.set_revision(SITE, "Moved", 8);
        api.add_page(SITE, 1, "Moved", "new body", 8);
        let store = store().await;
        store
            .upsert_page_record(&PageRecord {
                site: SITE.to_string(),
                page_id: 1,
                title: "Moved".to_string(),
                revision_id: Some(7),
                last_fetched_at: Utc::now(),
            })
            .await
            .unwrap();

        let report = run(&crawler(config(&["A"]), &api, &store)).await;

        assert_eq!(report.fetched, 1);
        assert_eq!(store.get_saved_revision(SITE, 1).await.unwrap(), Some(8));
        let body = store.get_page_body(SITE, 1, BodyFormat::Html).unwrap().unwrap();
        assert_eq!(body.body, "new body");
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_abort_category() {
        let api = Arc::new(MockApi::new());
        api.add_members(
            SITE,
            "A",
            None,
            vec![
                MemberRef::new(1, "One"),
                MemberRef::new(2, "Two"),
                MemberRef::new(3, "Three"),
            ],
            None,
        );
        api.add_page(SITE, 1, "One", "1", 1);
        api.fail_page(SITE, 2);
        api.add_page(SITE, 3, "Three", "3", 1);
        let store = store().await;

        let report = run(&crawler(config(&["A"]), &api, &store)).await;

        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.stored, 2);
        assert!(store.get_page_record(SITE, 1).unwrap().is_some());
        assert!(store.get_page_record(SITE, 2).unwrap().is_none());
        assert!(store.get_page_record(SITE, 3).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pagination_failure_moves_to_next_category() {
        let api = Arc::new(MockApi::new());
        api.add_members(SITE, "A", None, vec![MemberRef::new(1, "One")], Some("t1"));
        // No page scripted for token t1, so the second list call fails.
        api.add_members(SITE, "B", None, vec![MemberRef::new(2, "Two")], None);
        api.add_page(SITE, 1, "One", "1", 1);
        api.add_page(SITE, 2, "Two", "2", 1);
        let store = store().await;

        let report = run(&crawler(config(&["A", "B"]), &api, &store)).await;

        assert_eq!(report.pagination_failures, 1);
        assert_eq!(report.stored, 2);
        assert_eq!(report.categories, 2);
    }

    #[tokio::test]
    async fn test_missing_title_is_synthesized() {
        let api = Arc::new(MockApi::new());
        api.add_members(
            SITE,
            "A",
            None,
            vec![MemberRef {
                page_id: Some(9),
                title: None,
            }],
            None,
        );
        api.add_fetched(
            SITE,
            FetchedPage {
                page_id: 9,
                title: None,
                body: "b".to_string(),
                revision_id: None,
                categories: Vec::new(),
            },
        );
        let store = store().await;

        run(&crawler(config(&["A"]), &api, &store)).await;

        let record = store.get_page_record(SITE, 9).unwrap().unwrap();
        assert_eq!(record.title, "page-9");
        assert_eq!(record.revision_id, None);
    }

    #[tokio::test]
    async fn test_empty_seed_list_is_noop() {
        let api = Arc::new(MockApi::new());
        let store = store().await;

        let report = run(&crawler(config(&[]), &api, &store)).await;

        assert!(api.calls().is_empty());
        assert_eq!(report.sites, 1);
        assert_eq!(report.categories, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_nothing() {
        let api = Arc::new(MockApi::new());
        api.add_members(SITE, "A", None, vec![MemberRef::new(1, "One")], None);
        let store = store().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = crawler(config(&["A"]), &api, &store)
            .run(&HashMap::new(), &cancel)
            .await;

        assert!(report.cancelled);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_discovered_categories_used_only_when_enabled() {
        let api = Arc::new(MockApi::new());
        api.add_members(SITE, "A", None, vec![], None);
        api.add_members(SITE, "Found", None, vec![MemberRef::new(5, "Five")], None);
        api.add_page(SITE, 5, "Five", "5", 1);
        let store = store().await;

        let mut discovered = HashMap::new();
        discovered.insert(
            SITE.to_string(),
            ["Found"].into_iter().filter_map(CategoryName::parse).collect(),
        );

        let disabled = crawler(config(&["A"]), &api, &store)
            .run(&discovered, &CancellationToken::new())
            .await;
        assert_eq!(disabled.categories, 1);

        let mut enabled_config = config(&["A"]);
        enabled_config.discovery.enabled = true;
        let enabled = crawler(enabled_config, &api, &store)
            .run(&discovered, &CancellationToken::new())
            .await;
        assert_eq!(enabled.categories, 2);
        assert_eq!(enabled.stored, 1);
    }

    #[tokio::test]
    async fn test_seen_set_is_per_site() {
        let api = Arc::new(MockApi::new());
        for site in [SITE, SITE2] {
            api.add_members(site, "A", None, vec![MemberRef::new(1, "Same id")], None);
            api.add_page(site, 1, "Same id", "x", 1);
        }
        let store = store().await;
        let mut config = config(&["A"]);
        config.sites.push(SiteConfig::new(SITE2));

        let report = run(&crawler(config, &api, &store)).await;

        assert_eq!(report.stored, 2);
        assert_eq!(report.skipped_duplicate, 0);
        assert_eq!(store.page_count(None).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_requests_are_issued_in_api_order() {
        let api = Arc::new(MockApi::new());
        api.add_members(
            SITE,
            "A",
            None,
            vec![MemberRef::new(2, "Two"), MemberRef::new(1, "One")],
            None,
        );
        api.add_page(SITE, 1, "One", "1", 1);
        api.add_page(SITE, 2, "Two", "2", 1);
        let store = store().await;

        run(&crawler(config(&["A"]), &api, &store)).await;

        let calls = api.calls();
        assert!(matches!(calls[0], Call::Members { .. }));
        assert_eq!(api.fetched_ids(), vec![Some(2), Some(1)]);
    }

    #[tokio::test]
    async fn test_cancel_during_fetch_finishes_current_page_only() {
        let api = Arc::new(MockApi::new());
        api.add_members(
            SITE,
            "A",
            None,
            vec![MemberRef::new(1, "One"), MemberRef::new(2, "Two")],
            None,
        );
        api.add_page(SITE, 1, "One", "1", 1);
        api.add_page(SITE, 2, "Two", "2", 1);
        let cancel = CancellationToken::new();
        api.cancel_on(
            Call::Fetch {
                site: SITE.to_string(),
                page_id: Some(1),
            },
            cancel.clone(),
        );
        let store = store().await;

        let report = crawler(config(&["A"]), &api, &store)
            .run(&HashMap::new(), &cancel)
            .await;

        assert!(report.cancelled);
        assert_eq!(api.fetched_ids(), vec![Some(1)]);
        assert!(store.get_page_record(SITE, 1).unwrap().is_some());
        assert!(store.get_page_record(SITE, 2).unwrap().is_none());
        assert_eq!(report.stored, 1);
    }

    #[tokio::test]
    async fn test_cleanup_after_category_keeps_newest_title() {
        let api = Arc::new(MockApi::new());
        api.add_members(
            SITE,
            "A",
            None,
            vec![MemberRef::new(1, "Dup"), MemberRef::new(2, "dup")],
            None,
        );
        api.add_page(SITE, 1, "Dup", "old", 1);
        api.add_page(SITE, 2, "dup", "new", 1);
        let store = store().await;
        let mut config = config(&["A"]);
        config.crawler.cleanup_duplicates = true;

        let report = run(&crawler(config, &api, &store)).await;

        assert_eq!(report.stored, 2);
        assert_eq!(store.page_count(Some(SITE)).unwrap(), 1);
        assert!(store.get_page_record(SITE, 1).unwrap().is_none());
        assert!(store.get_page_record(SITE, 2).unwrap().is_some());
        assert_eq!(store.body_count(Some(SITE)).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_disabled_keeps_all_rows() {
        let api = Arc::new(MockApi::new());
        api.add_members(
            SITE,
            "A",
            None,
            vec![MemberRef::new(1, "Dup"), MemberRef::new(2, "dup")],
            None,
        );
        api.add_page(SITE, 1, "Dup", "old", 1);
        api.add_page(SITE, 2, "dup", "new", 1);
        let store = store().await;

        run(&crawler(config(&["A"]), &api, &store)).await;

        assert_eq!(store.page_count(Some(SITE)).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_title_only_member_after_id_member_is_duplicate() {
        let api = Arc::new(MockApi::new());
        api.add_members(SITE, "A", None, vec![MemberRef::new(1, "Shared")], None);
        api.add_members(
            SITE,
            "B",
            None,
            vec![MemberRef {
                page_id: None,
                title: Some("shared".to_string()),
            }],
            None,
        );
        api.add_page(SITE, 1, "Shared", "s", 1);
        let store = store().await;

        let report = run(&crawler(config(&["A", "B"]), &api, &store)).await;

        assert_eq!(api.fetch_calls(), 1);
        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(report.stored, 1);
    }

    #[tokio::test]
    async fn test_revision_lookups_are_spaced_by_request_delay() {
        let api = Arc::new(MockApi::new());
        let members: Vec<MemberRef> = (1..=3)
            .map(|id| MemberRef::new(id, format!("Page {id}")))
            .collect();
        api.add_members(SITE, "A", None, members, None);
        let store = store().await;
        for id in 1..=3 {
            api.set_revision(SITE, &format!("Page {id}"), 5);
            store
                .upsert_page_record(&PageRecord {
                    site: SITE.to_string(),
                    page_id: id,
                    title: format!("Page {id}"),
                    revision_id: Some(5),
                    last_fetched_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let mut config = config(&["A"]);
        config.crawler.request_delay_ms = 20;

        let started = std::time::Instant::now();
        let report = run(&crawler(config, &api, &store)).await;

        assert_eq!(report.skipped_unchanged, 3);
        assert_eq!(api.revision_calls(), 3);
        assert_eq!(api.fetch_calls(), 0);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
