// src/models/mod.rs

//! Domain models for the harvester.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod category;
mod config;
mod page;
mod report;

// Re-export all public types
pub use category::{CATEGORY_PREFIX, CategoryName, CategorySet};
pub use config::{
    Config, CrawlerConfig, DatabaseConfig, DiscoveryConfig, ResetMode, SiteConfig,
};
pub use page::{BodyFormat, FetchedPage, MemberRef, PageBody, PageId, PageRecord, RevisionId};
pub use report::{CrawlReport, DiscoveryReport, SiteDiscovery};
