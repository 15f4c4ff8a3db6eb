// src/lib.rs

//! wikiharvest: incremental crawler for MediaWiki-style content APIs.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
