//! Resilient CSV ingestion for a league dashboard.
//!
//! Published spreadsheet exports are fetched over HTTP, parsed into uniform
//! records and cached with a freshness window. Loads never fail: a broken
//! source degrades to the last cached copy or to built-in seed data.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod generate;
pub mod process;
pub mod schema;
pub mod seed;
