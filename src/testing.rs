//! Scripted in-memory content API for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{CategoryName, FetchedPage, MemberRef, PageId, RevisionId};
use crate::services::{ContentApi, ContinuationPage};

/// A call made against [`MockApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Members {
        site: String,
        category: String,
        token: Option<String>,
    },
    AllCategories {
        site: String,
        token: Option<String>,
    },
    Fetch {
        site: String,
        page_id: Option<PageId>,
    },
    Revision {
        site: String,
        title: String,
    },
}

type TokenKey = (String, String, Option<String>);

#[derive(Default)]
struct State {
    members: HashMap<TokenKey, ContinuationPage<MemberRef>>,
    categories: HashMap<(String, Option<String>), ContinuationPage<String>>,
    failing_categories: HashSet<(String, Option<String>)>,
    pages: HashMap<(String, PageId), FetchedPage>,
    failing_pages: HashSet<(String, PageId)>,
    revisions: HashMap<(String, String), RevisionId>,
    failing_revisions: HashSet<(String, String)>,
    calls: Vec<Call>,
    cancel_on: Option<(Call, CancellationToken)>,
}

impl State {
    /// Record a call, firing the cancel hook when it matches.
    fn record(&mut self, call: Call) {
        if let Some((trigger, token)) = &self.cancel_on {
            if *trigger == call {
                token.cancel();
            }
        }
        self.calls.push(call);
    }
}

/// Content API that serves scripted responses and records every call.
#[derive(Default)]
pub struct MockApi {
    state: Mutex<State>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Script one page of category members for `token`.
    pub fn add_members(
        &self,
        site: &str,
        category: &str,
        token: Option<&str>,
        members: Vec<MemberRef>,
        next: Option<&str>,
    ) {
        let key = CategoryName::parse(category).unwrap().key().to_string();
        self.state().members.insert(
            (site.to_string(), key, token.map(str::to_string)),
            ContinuationPage::new(members, next.map(str::to_string)),
        );
    }

    /// Script one page of the all-categories listing for `token`.
    pub fn add_categories(&self, site: &str, token: Option<&str>, names: &[&str], next: Option<&str>) {
        self.state().categories.insert(
            (site.to_string(), token.map(str::to_string)),
            ContinuationPage::new(
                names.iter().map(|n| n.to_string()).collect(),
                next.map(str::to_string),
            ),
        );
    }

    pub fn fail_categories(&self, site: &str, token: Option<&str>) {
        self.state()
            .failing_categories
            .insert((site.to_string(), token.map(str::to_string)));
    }

    /// Script a page fetch result.
    pub fn add_page(&self, site: &str, page_id: PageId, title: &str, body: &str, revision: i64) {
        self.state().pages.insert(
            (site.to_string(), page_id),
            FetchedPage {
                page_id,
                title: Some(title.to_string()),
                body: body.to_string(),
                revision_id: Some(revision),
                categories: Vec::new(),
            },
        );
    }

    pub fn add_fetched(&self, site: &str, page: FetchedPage) {
        self.state().pages.insert((site.to_string(), page.page_id), page);
    }

    pub fn fail_page(&self, site: &str, page_id: PageId) {
        self.state().failing_pages.insert((site.to_string(), page_id));
    }

    pub fn set_revision(&self, site: &str, title: &str, revision: RevisionId) {
        self.state()
            .revisions
            .insert((site.to_string(), title.to_string()), revision);
    }

    pub fn fail_revision(&self, site: &str, title: &str) {
        self.state()
            .failing_revisions
            .insert((site.to_string(), title.to_string()));
    }

    /// Cancel `token` while serving `trigger`, as if the signal arrived mid-request.
    pub fn cancel_on(&self, trigger: Call, token: CancellationToken) {
        self.state().cancel_on = Some((trigger, token));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn member_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Members { .. }))
    }

    pub fn category_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::AllCategories { .. }))
    }

    pub fn fetch_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Fetch { .. }))
    }

    pub fn revision_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Revision { .. }))
    }

    /// Page ids fetched, in call order.
    pub fn fetched_ids(&self) -> Vec<Option<PageId>> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Fetch { page_id, .. } => Some(*page_id),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }
}

#[async_trait]
impl ContentApi for MockApi {
    async fn category_members(
        &self,
        site: &str,
        category: &CategoryName,
        token: Option<&str>,
    ) -> Result<ContinuationPage<MemberRef>> {
        let mut state = self.state();
        state.record(Call::Members {
            site: site.to_string(),
            category: category.as_str().to_string(),
            token: token.map(str::to_string),
        });
        state
            .members
            .get(&(
                site.to_string(),
                category.key().to_string(),
                token.map(str::to_string),
            ))
            .cloned()
            .ok_or_else(|| AppError::api(site, format!("no members scripted for {category}")))
    }

    async fn all_categories(
        &self,
        site: &str,
        token: Option<&str>,
    ) -> Result<ContinuationPage<String>> {
        let mut state = self.state();
        let key = (site.to_string(), token.map(str::to_string));
        state.record(Call::AllCategories {
            site: site.to_string(),
            token: key.1.clone(),
        });
        if state.failing_categories.contains(&key) {
            return Err(AppError::api(site, "HTTP 503 Service Unavailable"));
        }
        Ok(state.categories.get(&key).cloned().unwrap_or_else(|| {
            ContinuationPage::last(Vec::new())
        }))
    }

    async fn fetch_page(&self, site: &str, member: &MemberRef) -> Result<FetchedPage> {
        let mut state = self.state();
        state.record(Call::Fetch {
            site: site.to_string(),
            page_id: member.page_id,
        });
        let page_id = member
            .page_id
            .ok_or_else(|| AppError::api(site, "member has no page id"))?;
        if state.failing_pages.contains(&(site.to_string(), page_id)) {
            return Err(AppError::api(site, "malformed parse response"));
        }
        state
            .pages
            .get(&(site.to_string(), page_id))
            .cloned()
            .ok_or_else(|| AppError::api(site, format!("no page scripted for {page_id}")))
    }

    async fn latest_revision(&self, site: &str, title: &str) -> Result<Option<RevisionId>> {
        let mut state = self.state();
        let key = (site.to_string(), title.to_string());
        state.record(Call::Revision {
            site: site.to_string(),
            title: title.to_string(),
        });
        if state.failing_revisions.contains(&key) {
            return Err(AppError::api(site, "revision lookup failed"));
        }
        Ok(state.revisions.get(&key).copied())
    }
}
