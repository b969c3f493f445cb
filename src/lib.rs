//! Larder - disk-resident artifact cache
//!
//! Fetch-once storage for downloaded or derived artifacts, keyed by a
//! structured key and shared safely between threads and processes on one
//! host.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod journal;
pub mod ui;

pub use cache::{CacheKey, CacheManager, CacheSettings, Constraints};
pub use error::{LarderError, LarderResult};
