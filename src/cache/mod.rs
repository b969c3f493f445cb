//! Disk-resident artifact cache
//!
//! Artifacts are stored under a single root directory, keyed by a
//! fingerprint of a structured key, and shared safely between threads and
//! processes.
//!
//! # Components
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `key` | Key model, fingerprints and labels |
//! | `entry` | Sidecar records and content sniffing |
//! | `store` | On-disk layout, atomic write, read, delete, listing |
//! | `freshness` | Version, TTL and predicate validity rules |
//! | `lock` | Per-fingerprint locks across tasks and processes |
//! | `manager` | Get-or-fetch, invalidate, prune, clean |
//!
//! # Guarantees
//!
//! - A reader sees a complete old entry or a complete new one, never a mix
//! - At most one fetch per fingerprint is in flight at a time
//! - A lock left by a crashed process is reclaimed after its grace period

pub mod entry;
pub mod freshness;
pub mod key;
pub mod lock;
pub mod manager;
pub mod store;

pub use entry::{format_bytes, ContentKind, Entry, EntryMetadata};
pub use freshness::{evaluate, is_valid, Constraints, Verdict};
pub use key::{describe, fingerprint, CacheKey, Fingerprint};
pub use lock::{LockCoordinator, LockGuard};
pub use manager::{Artifact, CacheManager, CacheSettings, CleanReport, Outcome, PruneReport, PruneRule};
pub use store::{Orphan, Store, StoreStats};

use crate::error::{LarderError, LarderResult};

/// Run filesystem work on the blocking pool
///
/// Once spawned the work runs to completion even if the awaiting future is
/// dropped, so multi-step updates are never cut short halfway.
pub(crate) async fn run_blocking<T, F>(work: F) -> LarderResult<T>
where
    F: FnOnce() -> LarderResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LarderError::io("running filesystem task", std::io::Error::other(e)))?
}
