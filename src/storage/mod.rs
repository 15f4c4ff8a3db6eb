//! Storage abstractions.
//!
//! Two kinds of persistence live here:
//! - Page store: keyed upserts of page metadata and bodies (`PageStore`,
//!   backed by SQLite in `SqliteStore`)
//! - Artifact storage: whole-document writes of discovery summaries
//!   (`ArtifactStorage`, backed by the filesystem in `LocalStorage`)
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── config.toml            # Harvester configuration
//! ├── wikiharvest.sqlite     # Page store
//! └── discovery/             # Discovery artifacts
//!     ├── sites/
//!     │   └── <site-slug>.json
//!     ├── intersection.json
//!     ├── union.json
//!     ├── coverage.json
//!     └── at_least.json
//! ```

pub mod local;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{PageBody, PageId, PageRecord, ResetMode, RevisionId};

// Re-export for convenience
pub use local::LocalStorage;
pub use sqlite::SqliteStore;

/// Idempotent page persistence.
///
/// Each upsert is a single atomic statement. A body may only be written
/// once its page record exists.
#[async_trait]
pub trait PageStore: Send + Sync {
    /// Create tables, applying the reset mode first.
    async fn init_schema(&self, reset: ResetMode) -> Result<()>;

    /// Insert or update by `(site, page_id)`; the key is never rewritten.
    async fn upsert_page_record(&self, record: &PageRecord) -> Result<()>;

    /// Insert or update by `(site, page_id, format)`.
    async fn upsert_page_body(&self, body: &PageBody) -> Result<()>;

    /// Stored revision for a page, `None` if absent or unversioned.
    async fn get_saved_revision(&self, site: &str, page_id: PageId) -> Result<Option<RevisionId>>;

    /// Remove same-title rows beyond the most recently fetched one.
    ///
    /// Returns the number of page rows removed.
    async fn cleanup_duplicates(&self, site: &str) -> Result<usize>;
}

/// Whole-document text storage for derived artifacts.
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Read a document, `None` if it does not exist.
    async fn read_text(&self, key: &str) -> Result<Option<String>>;

    /// Replace a document in one step; readers never see a partial write.
    async fn write_text(&self, key: &str, content: &str) -> Result<()>;

    /// Delete a document; returns false if it did not exist.
    async fn remove_text(&self, key: &str) -> Result<bool>;
}

/// Result of a change-gated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

/// Write `content` only if it differs from what is stored under `key`.
pub async fn write_if_changed(
    storage: &dyn ArtifactStorage,
    key: &str,
    content: &str,
) -> Result<WriteOutcome> {
    if storage.read_text(key).await?.as_deref() == Some(content) {
        log::debug!("Artifact {} unchanged", key);
        return Ok(WriteOutcome::Unchanged);
    }
    storage.write_text(key, content).await?;
    log::info!("Artifact {} written ({} bytes)", key, content.len());
    Ok(WriteOutcome::Written)
}
