//! SQLite page store.
//!
//! ## Schema
//!
//! ```text
//! pages        (site, page_id) PK, title, revision_id, last_fetched_at
//! page_bodies  (site, page_id, format) PK, body, fetched_at
//!              FK (site, page_id) -> pages ON DELETE CASCADE
//! ```
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text so they sort
//! lexicographically.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{AppError, Result};
use crate::models::{BodyFormat, PageBody, PageId, PageRecord, ResetMode, RevisionId};
use crate::storage::PageStore;

const CREATE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pages (
        site            TEXT NOT NULL,
        page_id         INTEGER NOT NULL,
        title           TEXT NOT NULL,
        revision_id     INTEGER,
        last_fetched_at TEXT NOT NULL,
        PRIMARY KEY (site, page_id)
    );
    CREATE INDEX IF NOT EXISTS idx_pages_site_title ON pages(site, title COLLATE NOCASE);

    CREATE TABLE IF NOT EXISTS page_bodies (
        site       TEXT NOT NULL,
        page_id    INTEGER NOT NULL,
        format     TEXT NOT NULL DEFAULT 'html',
        body       TEXT NOT NULL,
        fetched_at TEXT NOT NULL,
        PRIMARY KEY (site, page_id, format),
        FOREIGN KEY (site, page_id) REFERENCES pages(site, page_id) ON DELETE CASCADE
    );
";

const DROP_SCHEMA: &str = "
    DROP TABLE IF EXISTS page_bodies;
    DROP TABLE IF EXISTS pages;
";

const TRUNCATE_SCHEMA: &str = "
    DELETE FROM page_bodies;
    DELETE FROM pages;
";

/// SQLite-backed [`PageStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::crawl("page store", "connection lock poisoned"))
    }

    /// Point lookup of a page record.
    pub fn get_page_record(&self, site: &str, page_id: PageId) -> Result<Option<PageRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT title, revision_id, last_fetched_at FROM pages
                 WHERE site = ?1 AND page_id = ?2",
                params![site, page_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(title, revision_id, fetched)| {
            Ok(PageRecord {
                site: site.to_string(),
                page_id,
                title,
                revision_id,
                last_fetched_at: parse_timestamp(&fetched)?,
            })
        })
        .transpose()
    }

    /// Point lookup of a page body.
    pub fn get_page_body(
        &self,
        site: &str,
        page_id: PageId,
        format: BodyFormat,
    ) -> Result<Option<PageBody>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT body, fetched_at FROM page_bodies
                 WHERE site = ?1 AND page_id = ?2 AND format = ?3",
                params![site, page_id, format.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(body, fetched)| {
            Ok(PageBody {
                site: site.to_string(),
                page_id,
                format,
                body,
                fetched_at: parse_timestamp(&fetched)?,
            })
        })
        .transpose()
    }

    /// Number of page rows, optionally for one site.
    pub fn page_count(&self, site: Option<&str>) -> Result<usize> {
        self.count("pages", site)
    }

    /// Number of body rows, optionally for one site.
    pub fn body_count(&self, site: Option<&str>) -> Result<usize> {
        self.count("page_bodies", site)
    }

    fn count(&self, table: &str, site: Option<&str>) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = match site {
            Some(site) => conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE site = ?1"),
                params![site],
                |row| row.get(0),
            )?,
            None => conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?,
        };
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl PageStore for SqliteStore {
    async fn init_schema(&self, reset: ResetMode) -> Result<()> {
        let conn = self.conn()?;
        match reset {
            ResetMode::None => conn.execute_batch(CREATE_SCHEMA)?,
            ResetMode::Drop => {
                log::warn!("Dropping page store tables");
                conn.execute_batch(DROP_SCHEMA)?;
                conn.execute_batch(CREATE_SCHEMA)?;
            }
            ResetMode::Truncate => {
                log::warn!("Truncating page store tables");
                conn.execute_batch(CREATE_SCHEMA)?;
                conn.execute_batch(TRUNCATE_SCHEMA)?;
            }
        }
        Ok(())
    }

    async fn upsert_page_record(&self, record: &PageRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pages (site, page_id, title, revision_id, last_fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(site, page_id) DO UPDATE SET
                title = excluded.title,
                revision_id = excluded.revision_id,
                last_fetched_at = excluded.last_fetched_at",
            params![
                record.site,
                record.page_id,
                record.title,
                record.revision_id,
                format_timestamp(&record.last_fetched_at),
            ],
        )?;
        Ok(())
    }

    async fn upsert_page_body(&self, body: &PageBody) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO page_bodies (site, page_id, format, body, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(site, page_id, format) DO UPDATE SET
                body = excluded.body,
                fetched_at = excluded.fetched_at",
            params![
                body.site,
                body.page_id,
                body.format.as_str(),
                body.body,
                format_timestamp(&body.fetched_at),
            ],
        )?;
        Ok(())
    }

    async fn get_saved_revision(&self, site: &str, page_id: PageId) -> Result<Option<RevisionId>> {
        let conn = self.conn()?;
        let revision: Option<Option<i64>> = conn
            .query_row(
                "SELECT revision_id FROM pages WHERE site = ?1 AND page_id = ?2",
                params![site, page_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(revision.flatten())
    }

    async fn cleanup_duplicates(&self, site: &str) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM pages
             WHERE site = ?1
               AND EXISTS (
                   SELECT 1 FROM pages AS newer
                   WHERE newer.site = pages.site
                     AND newer.title = pages.title COLLATE NOCASE
                     AND newer.page_id <> pages.page_id
                     AND (newer.last_fetched_at > pages.last_fetched_at
                          OR (newer.last_fetched_at = pages.last_fetched_at
                              AND newer.page_id > pages.page_id))
               )",
            params![site],
        )?;
        Ok(removed)
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::validation(format!("invalid stored timestamp '{raw}': {e}")))
}
