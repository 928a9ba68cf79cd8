//! uniscrape - a proxy-rotating crawler for admissions and fee data
//!
//! This library provides the core functionality for uniscrape, including:
//! - Proxy pool with verification, round-robin rotation and eviction
//! - Fetch engine with session identity rotation and human pacing
//! - Relevance-ranked page discovery
//! - Oracle-backed record extraction and per-site result aggregation

pub mod aggregate;
pub mod config;
pub mod core;
pub mod discovery;
pub mod error;
pub mod extraction;
pub mod logging;
pub mod proxy;
pub mod scraper;

// Re-export main types for convenience
pub use crate::aggregate::{SiteScrapeResult, SiteStatus};
pub use crate::config::{AppConfig, SiteSeed};
pub use crate::core::{BatchSummary, UniScraper};
pub use crate::error::{CrawlError, FetchError, OracleError};
