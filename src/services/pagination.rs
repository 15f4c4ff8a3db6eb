//! Continuation-token pagination.
//!
//! A [`Cursor`] walks any [`PageSource`] by feeding each returned token into
//! the next call. All progress lives in the token, so a cursor can be rebuilt
//! from the last token it handed out with [`Cursor::resume`].

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CategoryName, MemberRef};
use crate::services::ContentApi;

/// One page of list results plus the token for the next call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationPage<T> {
    pub items: Vec<T>,
    /// `None` (or empty) when the listing is exhausted
    pub next: Option<String>,
}

impl<T> ContinuationPage<T> {
    pub fn new(items: Vec<T>, next: Option<String>) -> Self {
        Self { items, next }
    }

    /// A final page with no continuation.
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// A paginated list endpoint.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;

    async fn fetch(&self, token: Option<&str>) -> Result<ContinuationPage<Self::Item>>;
}

/// Members of one category on one site.
pub struct CategoryMembers<'a> {
    pub api: &'a dyn ContentApi,
    pub site: &'a str,
    pub category: &'a CategoryName,
}

#[async_trait]
impl PageSource for CategoryMembers<'_> {
    type Item = MemberRef;

    async fn fetch(&self, token: Option<&str>) -> Result<ContinuationPage<MemberRef>> {
        self.api
            .category_members(self.site, self.category, token)
            .await
    }
}

/// Every category name defined on one site.
pub struct AllCategories<'a> {
    pub api: &'a dyn ContentApi,
    pub site: &'a str,
}

#[async_trait]
impl PageSource for AllCategories<'_> {
    type Item = String;

    async fn fetch(&self, token: Option<&str>) -> Result<ContinuationPage<String>> {
        self.api.all_categories(self.site, token).await
    }
}

/// Restartable walk over a [`PageSource`].
pub struct Cursor<S: PageSource> {
    source: S,
    token: Option<String>,
    done: bool,
    pages: usize,
}

impl<S: PageSource> Cursor<S> {
    /// Start from the first page.
    pub fn new(source: S) -> Self {
        Self::resume(source, None)
    }

    /// Continue from a token previously returned by [`Cursor::token`].
    pub fn resume(source: S, token: Option<String>) -> Self {
        Self {
            source,
            token,
            done: false,
            pages: 0,
        }
    }

    /// Fetch the next page.
    ///
    /// Yields `None` once the source has returned no continuation. An empty
    /// page that still carries a token is yielded and the walk goes on. After
    /// an error the cursor is finished, since there is no token to resume from.
    pub async fn next_page(&mut self) -> Option<Result<Vec<S::Item>>> {
        if self.done {
            return None;
        }

        let page = match self.source.fetch(self.token.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        self.pages += 1;

        match page.next.filter(|t| !t.is_empty()) {
            Some(next) if self.token.as_deref() == Some(next.as_str()) => {
                log::warn!("Continuation token '{}' repeated; stopping pagination", next);
                self.token = None;
                self.done = true;
            }
            Some(next) => self.token = Some(next),
            None => {
                self.token = None;
                self.done = true;
            }
        }

        Some(Ok(page.items))
    }

    /// Token the next call will use; `None` before the first call or once finished.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of successful list calls so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }
}
