//! Cache manager
//!
//! Composes the key codec, store, freshness policy and lock coordinator
//! into get-or-fetch, invalidate and prune operations.
//!
//! Reads are lock-free. Every mutation of an entry happens while holding
//! that entry's lock, so per fingerprint writes are totally ordered, while
//! different fingerprints proceed in parallel.

use crate::cache::entry::{format_bytes, Entry, EntryMetadata};
use crate::cache::freshness::{self, Constraints, Verdict};
use crate::cache::key::{describe, fingerprint, CacheKey, Fingerprint};
use crate::cache::lock::LockCoordinator;
use crate::cache::run_blocking;
use crate::cache::store::{Store, StoreStats};
use crate::error::{BoxError, LarderError, LarderResult};
use crate::journal::Journal;
use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Directory holding lock markers, relative to the root
const LOCKS_DIR: &str = "locks";

/// Attempts to read an entry that is being replaced concurrently
const LOOKUP_ATTEMPTS: usize = 3;

/// Default wait for a busy entry before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// Default age after which an unrefreshed lock marker is reclaimed
pub const DEFAULT_STALE_LOCK_GRACE: Duration = Duration::from_secs(600);

/// Runtime configuration of a cache manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Directory holding entries, locks and the journal
    pub root_directory: PathBuf,
    /// Freshness window recorded on writes without an explicit ttl
    pub default_ttl: Option<Duration>,
    /// Maximum wait for a busy entry (None = wait forever)
    pub lock_timeout: Option<Duration>,
    /// Heartbeat age after which a lock is considered abandoned
    pub stale_lock_grace: Duration,
    /// Record mutations in the journal
    pub journal: bool,
}

impl CacheSettings {
    /// Settings with defaults for everything but the root
    pub fn new(root_directory: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root_directory.into(),
            default_ttl: None,
            lock_timeout: Some(DEFAULT_LOCK_TIMEOUT),
            stale_lock_grace: DEFAULT_STALE_LOCK_GRACE,
            journal: true,
        }
    }
}

/// How an artifact was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Served from a valid entry
    Hit,
    /// No usable entry; fetched and stored
    Fetched,
    /// Replaced a stale entry
    Refreshed,
}

impl Outcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "hit"),
            Self::Fetched => write!(f, "fetched"),
            Self::Refreshed => write!(f, "refreshed"),
        }
    }
}

/// A validated artifact
#[derive(Debug, Clone)]
pub struct Artifact {
    pub fingerprint: Fingerprint,
    pub metadata: EntryMetadata,
    pub bytes: Vec<u8>,
    pub outcome: Outcome,
}

/// Eviction rule for [`CacheManager::prune`]
#[derive(Clone)]
pub enum PruneRule {
    /// Entries created longer ago than this
    MaxAge(Duration),
    /// Oldest entries until the total size fits
    MaxTotalBytes(u64),
    /// Entries the predicate selects
    Matching(Arc<dyn Fn(&EntryMetadata) -> bool + Send + Sync>),
}

impl PruneRule {
    pub fn matching<F>(predicate: F) -> Self
    where
        F: Fn(&EntryMetadata) -> bool + Send + Sync + 'static,
    {
        Self::Matching(Arc::new(predicate))
    }
}

impl fmt::Debug for PruneRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxAge(age) => f.debug_tuple("MaxAge").field(age).finish(),
            Self::MaxTotalBytes(bytes) => f.debug_tuple("MaxTotalBytes").field(bytes).finish(),
            Self::Matching(_) => f.write_str("Matching(<fn>)"),
        }
    }
}

/// Result of a prune pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: usize,
    pub bytes_reclaimed: u64,
    /// Entries skipped because another caller held their lock
    pub skipped_locked: usize,
}

/// Result of an orphan cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: usize,
    pub skipped_locked: usize,
}

enum Lookup {
    Missing,
    Stale(Verdict),
    Valid(EntryMetadata, Vec<u8>),
}

/// Disk-resident cache with single-flight population
#[derive(Clone)]
pub struct CacheManager {
    settings: CacheSettings,
    store: Store,
    locks: LockCoordinator,
    journal: Journal,
}

impl CacheManager {
    pub fn new(settings: CacheSettings) -> Self {
        let root = &settings.root_directory;
        let journal = Journal::new(root, settings.journal);
        let store = Store::new(root);
        let locks = LockCoordinator::new(
            root.join(LOCKS_DIR),
            settings.lock_timeout,
            settings.stale_lock_grace,
            journal.clone(),
        );

        Self {
            settings,
            store,
            locks,
            journal,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn root(&self) -> &Path {
        &self.settings.root_directory
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Return a valid artifact for `key`, fetching it on a miss
    ///
    /// `fetch` runs at most once, and only while holding the key's lock.
    /// Its failure is returned as `FetchFailed` and leaves the cache as it
    /// was. Dropping the returned future at any point releases the lock
    /// and leaves no partial entry.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &CacheKey,
        constraints: &Constraints,
        fetch: F,
    ) -> LarderResult<Artifact>
    where
        F: FnOnce(CacheKey) -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
        E: Into<BoxError>,
    {
        let fp = fingerprint(key)?;
        let label = describe(key);

        // A corrupt entry is only dealt with under the lock
        match self.lookup(&fp, constraints).await {
            Ok(Lookup::Valid(metadata, bytes)) => {
                debug!("Cache hit: {} ({})", label, fp.short());
                return Ok(hit(fp, metadata, bytes));
            }
            Ok(_) | Err(LarderError::CorruptEntry { .. }) => {}
            Err(e) => return Err(e),
        }

        let guard = self.locks.acquire(&fp).await?;

        // Another holder may have populated the entry while we waited
        let outcome = match self.lookup(&fp, constraints).await {
            Ok(Lookup::Valid(metadata, bytes)) => {
                debug!("Cache hit after wait: {} ({})", label, fp.short());
                return Ok(hit(fp, metadata, bytes));
            }
            Ok(Lookup::Stale(verdict)) => {
                info!("Refreshing {}: {}", label, verdict);
                Outcome::Refreshed
            }
            Ok(Lookup::Missing) => {
                info!("Cache miss: {}", label);
                Outcome::Fetched
            }
            Err(LarderError::CorruptEntry { reason, .. }) => {
                warn!("Discarding corrupt entry {}: {}", label, reason);
                self.store.delete(&fp).await?;
                self.journal
                    .record(
                        "entry.corrupt",
                        &serde_json::json!({
                            "fingerprint": fp.as_str(),
                            "label": label,
                            "reason": reason,
                        }),
                    )
                    .await;
                Outcome::Fetched
            }
            Err(e) => return Err(e),
        };

        let bytes = fetch(key.clone()).await.map_err(|e| {
            let err = LarderError::fetch_failed(&label, e);
            warn!("{}", err);
            err
        })?;

        if guard.is_lost() {
            warn!("Lock on {} was taken over during the fetch", label);
        }

        let metadata = EntryMetadata::for_artifact(&fp, &label, &bytes)
            .with_ttl(constraints.ttl_override().or(self.settings.default_ttl))
            .with_version_tag(constraints.version_tag().map(str::to_string));
        // The write owns the guard, so the lock outlives a dropped caller
        // until the entry is committed or abandoned
        let write = {
            let store = self.store.clone();
            let fp = fp.clone();
            tokio::spawn(async move {
                let _guard = guard;
                let stored = store.write_atomic(&fp, &bytes, metadata).await;
                stored.map(|metadata| (metadata, bytes))
            })
        };
        let (metadata, bytes) = write
            .await
            .map_err(|e| LarderError::io("writing entry", std::io::Error::other(e)))??;

        info!(
            "Stored {} ({}, {})",
            label,
            format_bytes(metadata.size_bytes),
            metadata.content_kind
        );
        self.journal
            .record(
                "entry.stored",
                &serde_json::json!({
                    "fingerprint": fp.as_str(),
                    "label": label,
                    "size_bytes": metadata.size_bytes,
                    "version_tag": metadata.version_tag,
                    "outcome": outcome.to_string(),
                }),
            )
            .await;

        Ok(Artifact {
            fingerprint: fp,
            metadata,
            bytes,
            outcome,
        })
    }

    /// Return a valid artifact without ever fetching
    pub async fn peek(&self, key: &CacheKey, constraints: &Constraints) -> LarderResult<Artifact> {
        let fp = fingerprint(key)?;
        match self.lookup(&fp, constraints).await? {
            Lookup::Valid(metadata, bytes) => Ok(hit(fp, metadata, bytes)),
            Lookup::Stale(verdict) => {
                debug!("Entry {} is {}", fp.short(), verdict);
                Err(LarderError::NotFound(describe(key)))
            }
            Lookup::Missing => Err(LarderError::NotFound(describe(key))),
        }
    }

    /// Delete the entry for `key`; returns whether one existed
    pub async fn invalidate(&self, key: &CacheKey) -> LarderResult<bool> {
        let fp = fingerprint(key)?;
        let _guard = self.locks.acquire(&fp).await?;

        let removed = self.store.delete(&fp).await?;
        if removed {
            let label = describe(key);
            info!("Invalidated {}", label);
            self.journal
                .record(
                    "entry.invalidated",
                    &serde_json::json!({ "fingerprint": fp.as_str(), "label": label }),
                )
                .await;
        }
        Ok(removed)
    }

    /// Live entries, newest first
    pub fn entries(&self) -> LarderResult<Vec<Entry>> {
        self.store.entries()
    }

    pub fn stats(&self) -> LarderResult<StoreStats> {
        self.store.stats()
    }

    /// Entries a prune pass with `rule` would remove
    pub async fn prune_candidates(
        &self,
        rule: &PruneRule,
    ) -> LarderResult<Vec<(Fingerprint, EntryMetadata)>> {
        let store = self.store.clone();
        let mut live = run_blocking(move || {
            let mut live = Vec::new();
            for item in store.list_all()? {
                match item {
                    Ok(entry) => live.push(entry),
                    Err(e) => debug!("Skipping entry during prune: {}", e),
                }
            }
            Ok(live)
        })
        .await?;

        let now = Utc::now();
        let candidates = match rule {
            PruneRule::MaxAge(max_age) => live
                .into_iter()
                .filter(|(_, metadata)| metadata.is_older_than(*max_age, now))
                .collect(),
            PruneRule::Matching(predicate) => live
                .into_iter()
                .filter(|(_, metadata)| predicate(metadata))
                .collect(),
            PruneRule::MaxTotalBytes(limit) => {
                live.sort_by(|(_, a), (_, b)| a.created_at.cmp(&b.created_at));
                let mut total: u64 = live.iter().map(|(_, m)| m.size_bytes).sum();
                let mut evict = Vec::new();
                for entry in live {
                    if total <= *limit {
                        break;
                    }
                    total = total.saturating_sub(entry.1.size_bytes);
                    evict.push(entry);
                }
                evict
            }
        };
        Ok(candidates)
    }

    /// Remove entries selected by `rule`
    ///
    /// Each entry is locked only for its own deletion. Entries whose lock is
    /// held elsewhere are skipped, never waited for.
    pub async fn prune(&self, rule: &PruneRule) -> LarderResult<PruneReport> {
        let mut report = PruneReport::default();

        for (fp, planned) in self.prune_candidates(rule).await? {
            let Some(_guard) = self.locks.try_acquire(&fp).await? else {
                debug!("Skipping busy entry {}", fp.short());
                report.skipped_locked += 1;
                continue;
            };

            // Replaced since the candidates were collected
            match self.store.read_metadata(&fp).await {
                Ok(Some(current)) if current.artifact == planned.artifact => {}
                _ => continue,
            }

            if self.store.delete(&fp).await? {
                report.removed += 1;
                report.bytes_reclaimed += planned.size_bytes;
                debug!("Pruned {} ({})", planned.label, format_bytes(planned.size_bytes));
                self.journal
                    .record(
                        "entry.pruned",
                        &serde_json::json!({
                            "fingerprint": fp.as_str(),
                            "label": planned.label,
                            "size_bytes": planned.size_bytes,
                        }),
                    )
                    .await;
            }
        }

        if report.removed > 0 {
            info!(
                "Pruned {} entries, reclaimed {}",
                report.removed,
                format_bytes(report.bytes_reclaimed)
            );
        }
        Ok(report)
    }

    /// Remove leftovers of interrupted writes and partial deletes
    pub async fn clean(&self) -> LarderResult<CleanReport> {
        let mut report = CleanReport::default();

        let store = self.store.clone();
        for orphan in run_blocking(move || store.orphans()).await? {
            let Some(_guard) = self.locks.try_acquire(orphan.fingerprint()).await? else {
                report.skipped_locked += 1;
                continue;
            };
            if self.store.remove_orphan(&orphan).await? {
                debug!("Removed orphan {:?}", orphan);
                report.removed += 1;
            }
        }

        if report.removed > 0 {
            info!("Removed {} orphaned files", report.removed);
        }
        Ok(report)
    }

    async fn lookup(&self, fp: &Fingerprint, constraints: &Constraints) -> LarderResult<Lookup> {
        for _ in 0..LOOKUP_ATTEMPTS {
            let Some(metadata) = self.store.read_metadata(fp).await? else {
                return Ok(Lookup::Missing);
            };

            let verdict = freshness::evaluate(&metadata, Utc::now(), constraints);
            if !verdict.is_valid() {
                return Ok(Lookup::Stale(verdict));
            }

            match self.store.read_artifact_of(&metadata).await {
                Ok(bytes) => return Ok(Lookup::Valid(metadata, bytes)),
                // Replaced between reading the sidecar and the artifact
                Err(LarderError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(LarderError::corrupt(fp.as_str(), "artifact missing"))
    }
}

fn hit(fingerprint: Fingerprint, metadata: EntryMetadata, bytes: Vec<u8>) -> Artifact {
    Artifact {
        fingerprint,
        metadata,
        bytes,
        outcome: Outcome::Hit,
    }
}
