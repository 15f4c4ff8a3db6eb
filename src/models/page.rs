//! Page data structures shared by the crawler and the page store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Page identifier assigned by the content API.
pub type PageId = i64;

/// Revision identifier stamped by the content API on a page version.
pub type RevisionId = i64;

/// Stored representation of a page body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// Rendered HTML
    #[default]
    Html,
    /// Raw wiki markup
    Wikitext,
}

impl BodyFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyFormat::Html => "html",
            BodyFormat::Wikitext => "wikitext",
        }
    }
}

impl fmt::Display for BodyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page metadata row, keyed by `(site, page_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub site: String,
    pub page_id: PageId,
    pub title: String,
    /// Change-detection marker
    pub revision_id: Option<RevisionId>,
    pub last_fetched_at: DateTime<Utc>,
}

/// Page body row, keyed by `(site, page_id, format)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageBody {
    pub site: String,
    pub page_id: PageId,
    pub format: BodyFormat,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// A category member as returned by a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub page_id: Option<PageId>,
    pub title: Option<String>,
}

impl MemberRef {
    pub fn new(page_id: PageId, title: impl Into<String>) -> Self {
        Self {
            page_id: Some(page_id),
            title: Some(title.into()),
        }
    }

    /// Lookup key for the per-run seen-set: the id when known, else the lowercased title.
    pub fn dedup_key(&self) -> Option<String> {
        match (self.page_id, self.title.as_deref()) {
            (Some(id), _) => Some(format!("id:{id}")),
            (None, Some(title)) if !title.trim().is_empty() => {
                Some(format!("title:{}", title.trim().to_lowercase()))
            }
            _ => None,
        }
    }

    /// Every key this member is known by: `id:<id>` and `title:<lowercased>`
    /// when present. All of them go into the seen-set once it is processed.
    pub fn dedup_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(2);
        if let Some(id) = self.page_id {
            keys.push(format!("id:{id}"));
        }
        if let Some(title) = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            keys.push(format!("title:{}", title.to_lowercase()));
        }
        keys
    }

    /// Human-readable label for log lines.
    pub fn label(&self) -> String {
        match (self.page_id, self.title.as_deref()) {
            (_, Some(title)) => title.to_string(),
            (Some(id), None) => synthesized_title(id),
            (None, None) => "<unnamed>".to_string(),
        }
    }
}

/// A fully fetched page, already decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub page_id: PageId,
    pub title: Option<String>,
    pub body: String,
    pub revision_id: Option<RevisionId>,
    pub categories: Vec<String>,
}

impl FetchedPage {
    /// Seen-set keys for the page as the API resolved it.
    pub fn dedup_keys(&self) -> Vec<String> {
        MemberRef {
            page_id: Some(self.page_id),
            title: self.title.clone(),
        }
        .dedup_keys()
    }

    /// Title used for storage; never empty.
    pub fn storage_title(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => synthesized_title(self.page_id),
        }
    }

    /// Build the metadata and body rows for this page.
    pub fn into_rows(
        self,
        site: &str,
        format: BodyFormat,
        fetched_at: DateTime<Utc>,
    ) -> (PageRecord, PageBody) {
        let record = PageRecord {
            site: site.to_string(),
            page_id: self.page_id,
            title: self.storage_title(),
            revision_id: self.revision_id,
            last_fetched_at: fetched_at,
        };
        let body = PageBody {
            site: site.to_string(),
            page_id: self.page_id,
            format,
            body: self.body,
            fetched_at,
        };
        (record, body)
    }
}

fn synthesized_title(page_id: PageId) -> String {
    format!("page-{page_id}")
}
