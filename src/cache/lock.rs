//! Per-fingerprint locking across tasks and processes
//!
//! Two layers guard each fingerprint:
//!
//! - In-process: an async mutex per fingerprint. Tasks asking for a key
//!   that is already being populated queue behind the holder and, once
//!   they get in, find the entry already stored.
//! - Cross-process: a marker file `locks/<fp>.lock` created with
//!   `create_new`. Its modification time is a heartbeat, refreshed by a
//!   background task while the lock is held. A marker whose heartbeat is
//!   older than the grace period belongs to a crashed holder and is
//!   reclaimed.
//!
//! This is a single-host, best-effort protocol over a shared filesystem,
//! not a consensus protocol.

use crate::cache::key::Fingerprint;
use crate::error::{LarderError, LarderResult};
use crate::journal::Journal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tokio::fs;
use tokio::sync::{oneshot, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Delay between attempts to create a marker held by another process
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Lower bound on the heartbeat interval
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Contents of a lock marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Unique id of the holding guard
    pub holder: Uuid,
    /// Process that created the marker
    pub pid: u32,
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
}

type SlotMap = Arc<Mutex<HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>>>;

/// Reference to a per-fingerprint mutex; removes it from the map when the
/// last user goes away
struct Slot {
    fingerprint: Fingerprint,
    mutex: Arc<tokio::sync::Mutex<()>>,
    map: SlotMap,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this slot are the only references left
        if Arc::strong_count(&self.mutex) == 2 {
            map.remove(&self.fingerprint);
        }
    }
}

/// A marker file this process created
struct Marker {
    path: PathBuf,
    holder: Uuid,
    written: bool,
}

impl Drop for Marker {
    fn drop(&mut self) {
        // Never remove a marker that was reclaimed and re-created by someone else
        let ours = !self.written
            || read_record_sync(&self.path).is_some_and(|record| record.holder == self.holder);
        if ours {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to release lock {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

/// Held lock on one fingerprint; released on drop
pub struct LockGuard {
    fingerprint: Fingerprint,
    heartbeat: JoinHandle<()>,
    lost: Arc<AtomicBool>,
    // Field order matters: the marker goes first, then the local mutex,
    // then the slot (which may prune the map).
    _marker: Marker,
    _local: OwnedMutexGuard<()>,
    _slot: Slot,
}

impl LockGuard {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Whether another holder has taken over the marker since it was created
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Relaxed)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.heartbeat.abort();
        debug!("Released lock on {}", self.fingerprint.short());
    }
}

/// Serializes access to fingerprints
#[derive(Clone)]
pub struct LockCoordinator {
    locks_dir: PathBuf,
    timeout: Option<Duration>,
    stale_grace: Duration,
    slots: SlotMap,
    journal: Journal,
}

impl LockCoordinator {
    /// Create a coordinator keeping markers in `locks_dir`
    ///
    /// `timeout` bounds how long `acquire` waits (None = forever);
    /// `stale_grace` is how old a marker's heartbeat may get before the
    /// marker is considered abandoned.
    pub fn new(
        locks_dir: impl Into<PathBuf>,
        timeout: Option<Duration>,
        stale_grace: Duration,
        journal: Journal,
    ) -> Self {
        Self {
            locks_dir: locks_dir.into(),
            timeout,
            stale_grace,
            slots: Arc::new(Mutex::new(HashMap::new())),
            journal,
        }
    }

    pub fn marker_path(&self, fp: &Fingerprint) -> PathBuf {
        self.locks_dir.join(format!("{}.lock", fp))
    }

    /// Acquire the lock, waiting up to the configured timeout
    pub async fn acquire(&self, fp: &Fingerprint) -> LarderResult<LockGuard> {
        let started = Instant::now();
        let deadline = self.timeout.map(|t| tokio::time::Instant::now() + t);

        let slot = self.slot(fp);
        let local = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, slot.mutex.clone().lock_owned())
                .await
                .map_err(|_| timeout_error(fp, started))?,
            None => slot.mutex.clone().lock_owned().await,
        };

        loop {
            if let Some(marker) = self.try_create_marker(fp).await? {
                return Ok(self.guard(fp, marker, local, slot));
            }

            let delay = match deadline {
                Some(deadline) => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        debug!("Lock on {} still held elsewhere, giving up", fp.short());
                        return Err(timeout_error(fp, started));
                    }
                    LOCK_RETRY_DELAY.min(deadline - now)
                }
                None => LOCK_RETRY_DELAY,
            };
            tokio::time::sleep(delay).await;
        }
    }

    /// Acquire the lock only if it is free right now
    pub async fn try_acquire(&self, fp: &Fingerprint) -> LarderResult<Option<LockGuard>> {
        let slot = self.slot(fp);
        let Ok(local) = slot.mutex.clone().try_lock_owned() else {
            return Ok(None);
        };

        match self.try_create_marker(fp).await? {
            Some(marker) => Ok(Some(self.guard(fp, marker, local, slot))),
            None => {
                // Release the local mutex before the slot so the slot can be pruned
                drop(local);
                Ok(None)
            }
        }
    }

    /// Current holder of a fingerprint's marker, if any
    pub async fn holder(&self, fp: &Fingerprint) -> Option<LockRecord> {
        read_record(&self.marker_path(fp)).await
    }

    fn slot(&self, fp: &Fingerprint) -> Slot {
        let mut map = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mutex = map.entry(fp.clone()).or_default().clone();
        Slot {
            fingerprint: fp.clone(),
            mutex,
            map: self.slots.clone(),
        }
    }

    fn guard(
        &self,
        fp: &Fingerprint,
        marker: Marker,
        local: OwnedMutexGuard<()>,
        slot: Slot,
    ) -> LockGuard {
        let interval = (self.stale_grace / 4).max(MIN_HEARTBEAT);
        let lost = Arc::new(AtomicBool::new(false));
        let heartbeat = spawn_heartbeat(
            marker.path.clone(),
            marker.holder,
            interval,
            lost.clone(),
        );
        debug!("Acquired lock on {}", fp.short());

        LockGuard {
            fingerprint: fp.clone(),
            heartbeat,
            lost,
            _marker: marker,
            _local: local,
            _slot: slot,
        }
    }

    /// Create the marker file, reclaiming an abandoned one first
    ///
    /// The filesystem work runs on the blocking pool and hands the marker
    /// back over a channel. If this future is dropped meanwhile, the marker
    /// comes back to the blocking task and is removed with it.
    async fn try_create_marker(&self, fp: &Fingerprint) -> LarderResult<Option<Marker>> {
        let locks_dir = self.locks_dir.clone();
        let path = self.marker_path(fp);
        let grace = self.stale_grace;

        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let _ = tx.send(create_marker(&locks_dir, &path, grace));
        });
        let attempt = rx.await.map_err(|_| {
            LarderError::io(
                format!("creating lock for {}", fp.short()),
                std::io::Error::other("lock task panicked"),
            )
        })??;

        if let Some(reclaimed) = &attempt.reclaimed {
            warn!(
                "Reclaimed stale lock on {} (heartbeat {}s old)",
                fp.short(),
                reclaimed.age.as_secs()
            );
            self.journal
                .record(
                    "lock.reclaimed",
                    &serde_json::json!({
                        "fingerprint": fp.as_str(),
                        "heartbeat_age_secs": reclaimed.age.as_secs(),
                        "previous_pid": reclaimed.previous.as_ref().map(|r| r.pid),
                    }),
                )
                .await;
        }
        Ok(attempt.marker)
    }
}

/// Result of one attempt at creating a marker
struct Attempt {
    marker: Option<Marker>,
    reclaimed: Option<Reclaimed>,
}

/// An abandoned marker that was removed
struct Reclaimed {
    age: Duration,
    previous: Option<LockRecord>,
}

enum Reclaim {
    /// The marker belongs to a live holder
    Held,
    /// The marker is gone; creation may be retried
    Vacant(Option<Reclaimed>),
}

fn create_marker(locks_dir: &Path, path: &Path, grace: Duration) -> LarderResult<Attempt> {
    std::fs::create_dir_all(locks_dir).map_err(|e| {
        LarderError::io(
            format!("creating locks directory {}", locks_dir.display()),
            e,
        )
    })?;

    let mut reclaimed = None;
    // A second pass only happens right after a marker went away
    for _ in 0..2 {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                let mut marker = Marker {
                    path: path.to_path_buf(),
                    holder: Uuid::new_v4(),
                    written: false,
                };
                let record = LockRecord {
                    holder: marker.holder,
                    pid: std::process::id(),
                    acquired_at: Utc::now(),
                };
                let content = serde_json::to_vec(&record)?;
                file.write_all(&content)
                    .map_err(|e| LarderError::io(format!("writing lock {}", path.display()), e))?;
                marker.written = true;
                return Ok(Attempt {
                    marker: Some(marker),
                    reclaimed,
                });
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => match reclaim_if_stale(path, grace)? {
                Reclaim::Held => break,
                Reclaim::Vacant(removed) => reclaimed = reclaimed.or(removed),
            },
            Err(e) => {
                return Err(LarderError::io(
                    format!("creating lock {}", path.display()),
                    e,
                ))
            }
        }
    }
    Ok(Attempt {
        marker: None,
        reclaimed,
    })
}

/// How long ago a marker's heartbeat was, if it is past the grace period
fn stale_age(path: &Path, grace: Duration) -> LarderResult<Option<Duration>> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LarderError::io(format!("inspecting lock {}", path.display()), e)),
    };

    let age = metadata
        .modified()
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .unwrap_or_default();
    Ok((age > grace).then_some(age))
}

/// Remove a marker whose heartbeat is past the grace period
fn reclaim_if_stale(path: &Path, grace: Duration) -> LarderResult<Reclaim> {
    if stale_age(path, grace)?.is_none() {
        // Released since the failed create counts as vacant; fresh does not
        return Ok(match path.try_exists() {
            Ok(false) => Reclaim::Vacant(None),
            _ => Reclaim::Held,
        });
    }

    let mut tomb = path.as_os_str().to_owned();
    tomb.push(format!(".stale-{}", Uuid::new_v4().simple()));
    let tomb = PathBuf::from(tomb);

    match std::fs::rename(path, &tomb) {
        Ok(()) => {}
        // Another process reclaimed it first
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Reclaim::Vacant(None)),
        Err(e) => return Err(LarderError::io(format!("reclaiming lock {}", path.display()), e)),
    }

    // The marker may have been replaced by a live holder between the
    // check and the rename; put it back if so.
    let Some(age) = stale_age(&tomb, grace)? else {
        put_back(&tomb, path);
        return Ok(Reclaim::Held);
    };

    let previous = read_record_sync(&tomb);
    if let Err(e) = std::fs::remove_file(&tomb) {
        warn!("Failed to remove reclaimed lock {}: {}", tomb.display(), e);
    }
    Ok(Reclaim::Vacant(Some(Reclaimed { age, previous })))
}

/// Restore a live marker moved aside by mistake; returns whether it was restored
///
/// If another marker appeared at `path` meanwhile, the moved one is kept so
/// its holder's record is not lost.
fn put_back(tomb: &Path, path: &Path) -> bool {
    match std::fs::hard_link(tomb, path) {
        Ok(()) => {
            if let Err(e) = std::fs::remove_file(tomb) {
                warn!("Failed to remove {}: {}", tomb.display(), e);
            }
            true
        }
        Err(e) => {
            warn!(
                "Could not restore live lock {} (kept as {}): {}",
                path.display(),
                tomb.display(),
                e
            );
            false
        }
    }
}

fn timeout_error(fp: &Fingerprint, started: Instant) -> LarderError {
    LarderError::LockTimeout {
        fingerprint: fp.to_string(),
        waited_ms: started.elapsed().as_millis(),
    }
}

/// One heartbeat attempt
enum Beat {
    Refreshed,
    /// Marker briefly absent or unreadable, e.g. mid-reclaim check elsewhere
    Missing,
    /// Marker now names another holder
    TakenOver,
}

fn touch_marker(path: &Path, holder: Uuid) -> std::io::Result<Beat> {
    let Some(record) = read_record_sync(path) else {
        return Ok(Beat::Missing);
    };
    if record.holder != holder {
        return Ok(Beat::TakenOver);
    }
    match std::fs::OpenOptions::new().write(true).open(path) {
        Ok(file) => file.set_modified(SystemTime::now()).map(|()| Beat::Refreshed),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Beat::Missing),
        Err(e) => Err(e),
    }
}

/// Refresh the marker's modification time until aborted or taken over
///
/// Failed refreshes are retried on the next tick.
fn spawn_heartbeat(
    path: PathBuf,
    holder: Uuid,
    interval: Duration,
    lost: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut failing = false;
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let target = path.clone();
            let beat = tokio::task::spawn_blocking(move || touch_marker(&target, holder)).await;

            match beat {
                Ok(Ok(Beat::Refreshed)) => {
                    if failing {
                        debug!("Lock heartbeat on {} recovered", path.display());
                    }
                    failing = false;
                }
                Ok(Ok(Beat::TakenOver)) => {
                    warn!("Lock {} was taken over by another holder", path.display());
                    lost.store(true, Ordering::Relaxed);
                    break;
                }
                Ok(Ok(Beat::Missing)) => {
                    if !failing {
                        debug!("Lock {} missing, retrying heartbeat", path.display());
                    }
                    failing = true;
                }
                Ok(Err(e)) => {
                    if !failing {
                        warn!("Lock heartbeat on {} failed, retrying: {}", path.display(), e);
                    }
                    failing = true;
                }
                Err(_) => break,
            }
        }
    })
}

async fn read_record(path: &Path) -> Option<LockRecord> {
    let content = fs::read(path).await.ok()?;
    serde_json::from_slice(&content).ok()
}

fn read_record_sync(path: &Path) -> Option<LockRecord> {
    let content = std::fs::read(path).ok()?;
    serde_json::from_slice(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::{fingerprint, CacheKey};
    use tempfile::TempDir;

    fn coordinator(dir: &TempDir, timeout: Option<Duration>, grace: Duration) -> LockCoordinator {
        LockCoordinator::new(dir.path().join("locks"), timeout, grace, Journal::disabled())
    }

    fn fp(name: &str) -> Fingerprint {
        fingerprint(&CacheKey::from(name)).unwrap()
    }

    fn write_foreign_marker(path: &Path, age: Duration) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let record = LockRecord {
            holder: Uuid::new_v4(),
            pid: 999_999,
            acquired_at: Utc::now(),
        };
        std::fs::write(path, serde_json::to_vec(&record).unwrap()).unwrap();
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let locks = coordinator(&dir, Some(Duration::from_secs(1)), Duration::from_secs(60));
        let fp = fp("dataset-A");

        let guard = locks.acquire(&fp).await.unwrap();
        assert_eq!(guard.fingerprint(), &fp);
        assert!(locks.marker_path(&fp).exists());
        assert_eq!(locks.holder(&fp).await.unwrap().pid, std::process::id());

        drop(guard);
        assert!(!locks.marker_path(&fp).exists());
        assert!(locks.slots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn try_acquire_when_held() {
        let dir = TempDir::new().unwrap();
        let locks = coordinator(&dir, None, Duration::from_secs(60));
        let fp = fp("dataset-A");

        let guard = locks.try_acquire(&fp).await.unwrap();
        assert!(guard.is_some());
        assert!(locks.try_acquire(&fp).await.unwrap().is_none());

        drop(guard);
        assert!(locks.try_acquire(&fp).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn different_fingerprints_do_not_block() {
        let dir = TempDir::new().unwrap();
        let locks = coordinator(&dir, Some(Duration::from_millis(100)), Duration::from_secs(60));

        let _a = locks.acquire(&fp("a")).await.unwrap();
        let _b = locks.acquire(&fp("b")).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiter_gets_lock_after_release() {
        let dir = TempDir::new().unwrap();
        let locks = coordinator(&dir, Some(Duration::from_secs(5)), Duration::from_secs(60));
        let fp = fp("dataset-A");

        let guard = locks.acquire(&fp).await.unwrap();
        let waiter = {
            let locks = locks.clone();
            let fp = fp.clone();
            tokio::spawn(async move { locks.acquire(&fp).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());
        drop(guard);

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn other_process_times_out() {
        let dir = TempDir::new().unwrap();
        let fp = fp("dataset-A");
        let first = coordinator(&dir, None, Duration::from_secs(60));
        // A separate coordinator shares only the filesystem, like another process
        let second = coordinator(&dir, Some(Duration::from_millis(150)), Duration::from_secs(60));

        let _held = first.acquire(&fp).await.unwrap();
        let err = second.acquire(&fp).await.err().unwrap();

        assert!(matches!(err, LarderError::LockTimeout { waited_ms, .. } if waited_ms >= 150));
    }

    #[tokio::test]
    async fn stale_marker_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let locks = coordinator(&dir, Some(Duration::from_secs(1)), Duration::from_secs(2));
        let fp = fp("dataset-A");
        write_foreign_marker(&locks.marker_path(&fp), Duration::from_secs(3600));

        let guard = locks.acquire(&fp).await.unwrap();
        let holder = locks.holder(&fp).await.unwrap();
        assert_eq!(holder.pid, std::process::id());
        drop(guard);

        // No tomb files left behind
        let leftovers = std::fs::read_dir(dir.path().join("locks")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn fresh_foreign_marker_is_respected() {
        let dir = TempDir::new().unwrap();
        let locks = coordinator(&dir, Some(Duration::from_millis(150)), Duration::from_secs(60));
        let fp = fp("dataset-A");
        write_foreign_marker(&locks.marker_path(&fp), Duration::ZERO);

        assert!(matches!(
            locks.acquire(&fp).await,
            Err(LarderError::LockTimeout { .. })
        ));
        // Still there, untouched
        assert_eq!(locks.holder(&fp).await.unwrap().pid, 999_999);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn heartbeat_keeps_live_lock_fresh() {
        let dir = TempDir::new().unwrap();
        let grace = Duration::from_millis(400);
        let holder = coordinator(&dir, None, grace);
        let contender = coordinator(&dir, Some(Duration::from_millis(1200)), grace);
        let fp = fp("dataset-A");

        let _held = holder.acquire(&fp).await.unwrap();

        assert!(matches!(
            contender.acquire(&fp).await,
            Err(LarderError::LockTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_holder_releases() {
        let dir = TempDir::new().unwrap();
        let locks = coordinator(&dir, Some(Duration::from_secs(1)), Duration::from_secs(60));
        let fp = fp("dataset-A");

        let (acquired_tx, acquired_rx) = tokio::sync::oneshot::channel();
        let task = {
            let locks = locks.clone();
            let fp = fp.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&fp).await.unwrap();
                let _ = acquired_tx.send(());
                std::future::pending::<()>().await;
            })
        };

        acquired_rx.await.unwrap();
        assert!(locks.marker_path(&fp).exists());

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!locks.marker_path(&fp).exists());
        assert!(locks.try_acquire(&fp).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn release_keeps_foreign_marker() {
        let dir = TempDir::new().unwrap();
        let locks = coordinator(&dir, None, Duration::from_secs(60));
        let fp = fp("dataset-A");

        let guard = locks.acquire(&fp).await.unwrap();
        // Simulate our marker having been reclaimed and re-created by another holder
        write_foreign_marker(&locks.marker_path(&fp), Duration::ZERO);
        drop(guard);

        assert_eq!(locks.holder(&fp).await.unwrap().pid, 999_999);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_acquire_leaves_no_marker() {
        let dir = TempDir::new().unwrap();
        let locks = coordinator(&dir, Some(Duration::from_secs(2)), Duration::from_secs(60));
        let fp = fp("dataset-A");

        // Abandon acquisitions at different points, including mid-creation
        for i in 0..300u64 {
            let attempt = locks.acquire(&fp);
            let _ = tokio::time::timeout(Duration::from_micros((i * 7) % 60), attempt).await;

            let guard = locks
                .acquire(&fp)
                .await
                .unwrap_or_else(|e| panic!("iteration {}: {}", i, e));
            drop(guard);
        }

        // Creations still in flight when their acquirer went away clean up too
        let deadline = Instant::now() + Duration::from_secs(2);
        while locks.marker_path(&fp).exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!locks.marker_path(&fp).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn heartbeat_survives_brief_marker_absence() {
        let dir = TempDir::new().unwrap();
        let grace = Duration::from_millis(600);
        let holder = coordinator(&dir, None, grace);
        let contender = coordinator(&dir, Some(Duration::from_millis(1500)), grace);
        let fp = fp("dataset-A");

        let held = holder.acquire(&fp).await.unwrap();

        // Another process moving the marker aside to inspect it
        let path = holder.marker_path(&fp);
        let aside = dir.path().join("aside.lock");
        std::fs::rename(&path, &aside).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        std::fs::rename(&aside, &path).unwrap();

        assert!(matches!(
            contender.acquire(&fp).await,
            Err(LarderError::LockTimeout { .. })
        ));
        assert!(!held.is_lost());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn takeover_is_reported_to_holder() {
        let dir = TempDir::new().unwrap();
        let locks = coordinator(&dir, None, Duration::from_millis(100));
        let fp = fp("dataset-A");

        let guard = locks.acquire(&fp).await.unwrap();
        assert!(!guard.is_lost());
        write_foreign_marker(&locks.marker_path(&fp), Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(guard.is_lost());
        drop(guard);
        assert_eq!(locks.holder(&fp).await.unwrap().pid, 999_999);
    }

    #[test]
    fn live_marker_is_kept_when_slot_was_retaken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locks").join("a.lock");
        let tomb = dir.path().join("locks").join("a.lock.stale-1");
        write_foreign_marker(&tomb, Duration::ZERO);
        write_foreign_marker(&path, Duration::ZERO);
        let newcomer = read_record_sync(&path).unwrap();

        assert!(!put_back(&tomb, &path));
        assert!(tomb.exists());
        assert_eq!(read_record_sync(&path).unwrap(), newcomer);

        std::fs::remove_file(&path).unwrap();
        assert!(put_back(&tomb, &path));
        assert!(!tomb.exists());
        assert!(path.exists());
    }
}
