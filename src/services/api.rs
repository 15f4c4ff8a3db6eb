// src/services/api.rs

//! Content API client.
//!
//! [`ContentApi`] is the seam between the crawl core and the remote wiki.
//! [`MediaWikiClient`] implements it against the MediaWiki Action API and
//! decodes every response into plain records before returning, so the core
//! never touches raw JSON.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{BodyFormat, CategoryName, CrawlerConfig, FetchedPage, MemberRef, RevisionId};
use crate::services::pagination::ContinuationPage;
use crate::utils::http;

/// Operations the crawl core needs from a content API instance.
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// One page of members of `category`.
    async fn category_members(
        &self,
        site: &str,
        category: &CategoryName,
        token: Option<&str>,
    ) -> Result<ContinuationPage<MemberRef>>;

    /// One page of raw category names defined on the site.
    async fn all_categories(&self, site: &str, token: Option<&str>)
    -> Result<ContinuationPage<String>>;

    /// Full page content for a member.
    async fn fetch_page(&self, site: &str, member: &MemberRef) -> Result<FetchedPage>;

    /// Current revision of a page, `None` if the page or revision is missing.
    async fn latest_revision(&self, site: &str, title: &str) -> Result<Option<RevisionId>>;
}

/// MediaWiki Action API client.
pub struct MediaWikiClient {
    client: Client,
    batch_limit: usize,
    body_format: BodyFormat,
    max_retries: usize,
    retry_delay: Duration,
}

impl MediaWikiClient {
    /// Build a client from crawler settings.
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        Ok(Self::with_client(http::create_async_client(config)?, config))
    }

    /// Wrap an existing HTTP client.
    pub fn with_client(client: Client, config: &CrawlerConfig) -> Self {
        Self {
            client,
            batch_limit: config.batch_limit.clamp(1, 500),
            body_format: config.body_format,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// GET `site` with the given query, retrying retryable failures.
    async fn request_json(&self, site: &str, params: &[(&str, String)]) -> Result<Value> {
        let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(params.len() + 2);
        pairs.push(("format", "json"));
        pairs.push(("formatversion", "2"));
        pairs.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

        let mut attempt = 0;
        loop {
            let result = self.client.get(site).query(&pairs).send().await;
            let retryable = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let payload: Value = response.json().await?;
                        return check_api_error(site, payload);
                    }
                    if attempt >= self.max_retries || !is_retryable_status(status) {
                        return Err(AppError::api(site, format!("HTTP {status}")));
                    }
                    format!("HTTP {status}")
                }
                Err(e) => {
                    if attempt >= self.max_retries || !is_retryable_error(&e) {
                        return Err(AppError::Http(e));
                    }
                    e.to_string()
                }
            };

            let backoff = self.backoff(attempt);
            log::debug!(
                "Retrying {} after {} (attempt {}, waiting {:?})",
                site,
                retryable,
                attempt + 1,
                backoff
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt).unwrap_or(8).min(8);
        self.retry_delay.saturating_mul(1u32 << exponent)
    }
}

#[async_trait]
impl ContentApi for MediaWikiClient {
    async fn category_members(
        &self,
        site: &str,
        category: &CategoryName,
        token: Option<&str>,
    ) -> Result<ContinuationPage<MemberRef>> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("list", "categorymembers".to_string()),
            ("cmtitle", category.as_str().to_string()),
            ("cmlimit", self.batch_limit.to_string()),
        ];
        if let Some(token) = token {
            params.push(("cmcontinue", token.to_string()));
        }

        let value = self.request_json(site, &params).await?;
        let parsed: QueryResponse = decode(site, value, "categorymembers")?;
        let query = require_query(site, parsed.query, "categorymembers")?;

        let items = query
            .categorymembers
            .into_iter()
            .map(|m| MemberRef {
                page_id: m.pageid,
                title: m.title,
            })
            .collect();
        let next = parsed.continuation.and_then(|c| c.cmcontinue);
        Ok(ContinuationPage::new(items, next))
    }

    async fn all_categories(
        &self,
        site: &str,
        token: Option<&str>,
    ) -> Result<ContinuationPage<String>> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("list", "allcategories".to_string()),
            ("aclimit", self.batch_limit.to_string()),
        ];
        if let Some(token) = token {
            params.push(("accontinue", token.to_string()));
        }

        let value = self.request_json(site, &params).await?;
        let parsed: QueryResponse = decode(site, value, "allcategories")?;
        let query = require_query(site, parsed.query, "allcategories")?;

        let items = query
            .allcategories
            .into_iter()
            .filter_map(|c| c.category)
            .collect();
        let next = parsed.continuation.and_then(|c| c.accontinue);
        Ok(ContinuationPage::new(items, next))
    }

    async fn fetch_page(&self, site: &str, member: &MemberRef) -> Result<FetchedPage> {
        let prop = match self.body_format {
            BodyFormat::Html => "text|revid|categories",
            BodyFormat::Wikitext => "wikitext|revid|categories",
        };
        let mut params = vec![("action", "parse".to_string()), ("prop", prop.to_string())];
        match (member.page_id, member.title.as_deref()) {
            (Some(id), _) => params.push(("pageid", id.to_string())),
            (None, Some(title)) => params.push(("page", title.to_string())),
            (None, None) => {
                return Err(AppError::api(site, "member has neither page id nor title"));
            }
        }

        let value = self.request_json(site, &params).await?;
        let parsed: ParseResponse = decode(site, value, "parse")?;
        let page = parsed.parse;

        let page_id = page
            .pageid
            .or(member.page_id)
            .ok_or_else(|| AppError::api(site, "parse response is missing `pageid`"))?;
        let body = match self.body_format {
            BodyFormat::Html => page.text,
            BodyFormat::Wikitext => page.wikitext,
        }
        .ok_or_else(|| {
            AppError::api(
                site,
                format!("parse response for page {page_id} has no {} body", self.body_format),
            )
        })?;

        Ok(FetchedPage {
            page_id,
            title: page.title.or_else(|| member.title.clone()),
            body,
            revision_id: page.revid,
            categories: page.categories.into_iter().filter_map(|c| c.category).collect(),
        })
    }

    async fn latest_revision(&self, site: &str, title: &str) -> Result<Option<RevisionId>> {
        let params = vec![
            ("action", "query".to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "ids".to_string()),
            ("titles", title.to_string()),
        ];

        let value = self.request_json(site, &params).await?;
        let parsed: QueryResponse = decode(site, value, "revisions")?;
        let query = require_query(site, parsed.query, "revisions")?;
        let Some(page) = query.pages.into_iter().next() else {
            return Ok(None);
        };
        if page.missing {
            return Ok(None);
        }
        Ok(page.revisions.into_iter().next().and_then(|r| r.revid))
    }
}

fn check_api_error(site: &str, payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        return Err(AppError::api(site, format!("[{code}] {info}")));
    }
    Ok(payload)
}

fn decode<T: DeserializeOwned>(site: &str, value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| AppError::api(site, format!("malformed {what} response: {e}")))
}

/// A query response without a `query` object is malformed, not empty.
fn require_query(site: &str, query: Option<QueryBody>, what: &str) -> Result<QueryBody> {
    query.ok_or_else(|| AppError::api(site, format!("{what} response has no `query` object")))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

// --- Wire shapes ---

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(rename = "continue")]
    continuation: Option<Continuation>,
    query: Option<QueryBody>,
}

#[derive(Debug, Deserialize)]
struct Continuation {
    cmcontinue: Option<String>,
    accontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    #[serde(default)]
    categorymembers: Vec<WireMember>,
    #[serde(default)]
    allcategories: Vec<WireCategory>,
    #[serde(default)]
    pages: Vec<WirePage>,
}

#[derive(Debug, Deserialize)]
struct WireMember {
    pageid: Option<i64>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCategory {
    #[serde(alias = "*")]
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePage {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    revisions: Vec<WireRevision>,
}

#[derive(Debug, Deserialize)]
struct WireRevision {
    revid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    parse: WireParse,
}

#[derive(Debug, Deserialize)]
struct WireParse {
    title: Option<String>,
    pageid: Option<i64>,
    revid: Option<i64>,
    text: Option<String>,
    wikitext: Option<String>,
    #[serde(default)]
    categories: Vec<WireCategory>,
}
