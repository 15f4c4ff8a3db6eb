//! Service layer for the harvester.
//!
//! This module contains the building blocks the pipelines drive:
//! - Content API access (`ContentApi`, `MediaWikiClient`)
//! - Continuation-token pagination (`Cursor`)
//! - Skip-unchanged decisions (`ChangeDetector`)

pub mod api;
pub mod change;
pub mod pagination;

pub use api::{ContentApi, MediaWikiClient};
pub use change::{ChangeDetector, Decision, FetchReason, should_skip, should_skip_record};
pub use pagination::{AllCategories, CategoryMembers, ContinuationPage, Cursor, PageSource};
