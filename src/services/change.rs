//! Change detection for already-stored pages.
//!
//! A page is skipped only when a stored revision exists, the remote revision
//! is known, and the two are exactly equal. Every other case fetches.

use std::fmt;

use crate::models::{MemberRef, PageRecord, RevisionId};
use crate::services::ContentApi;
use crate::storage::PageStore;

/// Skip only on an exact match of a known local and a known remote revision.
pub fn should_skip(saved: Option<RevisionId>, remote: Option<RevisionId>) -> bool {
    matches!((saved, remote), (Some(saved), Some(remote)) if saved == remote)
}

/// [`should_skip`] against a stored record.
pub fn should_skip_record(local: Option<&PageRecord>, remote: Option<RevisionId>) -> bool {
    should_skip(local.and_then(|r| r.revision_id), remote)
}

/// Outcome of a change check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Stored revision is current
    Skip { revision: RevisionId },
    /// Page must be fetched
    Fetch(FetchReason),
}

impl Decision {
    /// Whether reaching this decision cost a remote revision request.
    pub fn queried_remote(&self) -> bool {
        matches!(
            self,
            Decision::Skip { .. }
                | Decision::Fetch(FetchReason::RemoteUnknown | FetchReason::Changed { .. })
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    /// Member carries no page id, so there is no store key to look up
    Unkeyed,
    /// Nothing stored, or stored without a revision
    NoSavedRevision,
    /// Member carries no title to look the remote revision up by
    Untitled,
    /// Remote revision lookup failed or returned none
    RemoteUnknown,
    /// Stored and remote revisions differ
    Changed {
        saved: RevisionId,
        remote: RevisionId,
    },
}

impl fmt::Display for FetchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchReason::Unkeyed => f.write_str("no page id"),
            FetchReason::NoSavedRevision => f.write_str("no saved revision"),
            FetchReason::Untitled => f.write_str("no title for revision lookup"),
            FetchReason::RemoteUnknown => f.write_str("remote revision unknown"),
            FetchReason::Changed { saved, remote } => {
                write!(f, "revision changed {saved} -> {remote}")
            }
        }
    }
}

/// Looks up the stored and remote revisions for a member and decides.
pub struct ChangeDetector<'a> {
    api: &'a dyn ContentApi,
    store: &'a dyn PageStore,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(api: &'a dyn ContentApi, store: &'a dyn PageStore) -> Self {
        Self { api, store }
    }

    /// Decide whether `member` needs fetching.
    ///
    /// Lookup failures are logged and resolve to a fetch; they never error.
    /// The remote revision is only requested when something is stored.
    pub async fn check(&self, site: &str, member: &MemberRef) -> Decision {
        let Some(page_id) = member.page_id else {
            return Decision::Fetch(FetchReason::Unkeyed);
        };

        let saved = match self.store.get_saved_revision(site, page_id).await {
            Ok(saved) => saved,
            Err(e) => {
                log::warn!(
                    "Saved revision lookup failed site={} page_id={}: {}",
                    site,
                    page_id,
                    e
                );
                None
            }
        };
        let Some(saved) = saved else {
            return Decision::Fetch(FetchReason::NoSavedRevision);
        };

        let Some(title) = member.title.as_deref() else {
            return Decision::Fetch(FetchReason::Untitled);
        };
        let remote = match self.api.latest_revision(site, title).await {
            Ok(remote) => remote,
            Err(e) => {
                log::warn!(
                    "Revision lookup failed site={} title={:?}: {}",
                    site,
                    title,
                    e
                );
                None
            }
        };

        match remote {
            Some(remote) if should_skip(Some(saved), Some(remote)) => {
                Decision::Skip { revision: remote }
            }
            Some(remote) => Decision::Fetch(FetchReason::Changed { saved, remote }),
            None => Decision::Fetch(FetchReason::RemoteUnknown),
        }
    }
}
