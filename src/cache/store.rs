//! On-disk entry storage
//!
//! Layout under the cache root:
//!
//! ```text
//! entries/<fp>.meta.json        sidecar record (the commit point)
//! entries/<fp>.<gen>.data       artifact named by the sidecar
//! entries/.tmp-<fp>-<uuid>      in-flight temporaries
//! ```
//!
//! A write stages the artifact under a fresh generation name, then renames
//! the new sidecar over the old one. Readers always go through the sidecar,
//! so they see either the old pair or the new pair. The superseded artifact
//! is removed after the commit.

use crate::cache::entry::{checksum, Entry, EntryMetadata, METADATA_FORMAT};
use crate::cache::key::Fingerprint;
use crate::cache::run_blocking;
use crate::error::{LarderError, LarderResult};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory holding entries, relative to the root
const ENTRIES_DIR: &str = "entries";
const META_SUFFIX: &str = ".meta.json";
const DATA_SUFFIX: &str = ".data";
const TMP_PREFIX: &str = ".tmp-";

/// Attempts to read an artifact that is being replaced concurrently
const READ_ATTEMPTS: usize = 3;

/// Removes the file on drop unless disarmed
struct StagedFile {
    path: PathBuf,
    armed: bool,
}

impl StagedFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Leftover from an interrupted write or a partial delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Orphan {
    /// Temporary file from an unfinished write
    Temp { fingerprint: Fingerprint, path: PathBuf },
    /// Artifact no sidecar points to
    Unreferenced { fingerprint: Fingerprint, path: PathBuf },
    /// Sidecar whose artifact is missing
    Dangling { fingerprint: Fingerprint },
    /// Sidecar that cannot be parsed
    Unreadable { fingerprint: Fingerprint },
}

impl Orphan {
    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            Self::Temp { fingerprint, .. }
            | Self::Unreferenced { fingerprint, .. }
            | Self::Dangling { fingerprint }
            | Self::Unreadable { fingerprint } => fingerprint,
        }
    }
}

/// Aggregate size of the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: usize,
    pub total_bytes: u64,
}

/// Filesystem-backed entry store
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    entries_dir: PathBuf,
}

impl Store {
    /// Create a store rooted at `root` (nothing is touched until first use)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let entries_dir = root.join(ENTRIES_DIR);
        Self { root, entries_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries_dir(&self) -> &Path {
        &self.entries_dir
    }

    /// Ensure the entries directory exists
    pub async fn ensure_dirs(&self) -> LarderResult<()> {
        fs::create_dir_all(&self.entries_dir).await.map_err(|e| {
            LarderError::io(
                format!("creating entries directory {}", self.entries_dir.display()),
                e,
            )
        })
    }

    fn metadata_path(&self, fp: &Fingerprint) -> PathBuf {
        self.entries_dir.join(format!("{}{}", fp, META_SUFFIX))
    }

    fn temp_path(&self, fp: &Fingerprint) -> PathBuf {
        self.entries_dir
            .join(format!("{}{}-{}", TMP_PREFIX, fp, Uuid::new_v4().simple()))
    }

    /// Path of the artifact a sidecar names
    pub fn artifact_path(&self, metadata: &EntryMetadata) -> PathBuf {
        self.entries_dir.join(&metadata.artifact)
    }

    /// Whether a committed entry exists
    pub async fn exists(&self, fp: &Fingerprint) -> bool {
        fs::try_exists(self.metadata_path(fp)).await.unwrap_or(false)
    }

    /// Read the sidecar of an entry
    ///
    /// Returns `Ok(None)` when absent and `CorruptEntry` when the record
    /// cannot be trusted.
    pub async fn read_metadata(&self, fp: &Fingerprint) -> LarderResult<Option<EntryMetadata>> {
        let path = self.metadata_path(fp);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LarderError::io(
                    format!("reading metadata {}", path.display()),
                    e,
                ))
            }
        };

        let metadata: EntryMetadata = serde_json::from_slice(&content)
            .map_err(|e| LarderError::corrupt(fp.as_str(), format!("unreadable metadata: {}", e)))?;
        validate_metadata(fp, &metadata)?;
        Ok(Some(metadata))
    }

    /// Read the artifact of an entry, verifying it against its sidecar
    pub async fn read_artifact(&self, fp: &Fingerprint) -> LarderResult<Vec<u8>> {
        for _ in 0..READ_ATTEMPTS {
            let metadata = self
                .read_metadata(fp)
                .await?
                .ok_or_else(|| LarderError::NotFound(fp.to_string()))?;

            match self.read_artifact_of(&metadata).await {
                // Replaced between reading the sidecar and the artifact
                Err(LarderError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(LarderError::corrupt(fp.as_str(), "artifact missing"))
    }

    /// Read the artifact a specific sidecar names
    ///
    /// Fails with `NotFound` if that artifact no longer exists.
    pub async fn read_artifact_of(&self, metadata: &EntryMetadata) -> LarderResult<Vec<u8>> {
        let path = self.artifact_path(metadata);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(LarderError::NotFound(path.display().to_string()))
            }
            Err(e) => {
                return Err(LarderError::io(
                    format!("reading artifact {}", path.display()),
                    e,
                ))
            }
        };

        if bytes.len() as u64 != metadata.size_bytes {
            return Err(LarderError::corrupt(
                &metadata.fingerprint,
                format!(
                    "size mismatch: expected {} bytes, found {}",
                    metadata.size_bytes,
                    bytes.len()
                ),
            ));
        }
        if checksum(&bytes) != metadata.checksum {
            return Err(LarderError::corrupt(&metadata.fingerprint, "checksum mismatch"));
        }
        Ok(bytes)
    }

    /// Write an artifact and its sidecar as a unit
    ///
    /// Size, checksum and artifact name in `metadata` are filled in from the
    /// bytes. On failure the previous entry (if any) is left untouched. The
    /// stage-and-commit sequence runs on the blocking pool; dropping the
    /// returned future never interrupts it between staging and commit.
    pub async fn write_atomic(
        &self,
        fp: &Fingerprint,
        bytes: &[u8],
        metadata: EntryMetadata,
    ) -> LarderResult<EntryMetadata> {
        let store = self.clone();
        let fp = fp.clone();
        let bytes = bytes.to_vec();
        run_blocking(move || store.write_blocking(&fp, &bytes, metadata)).await
    }

    fn write_blocking(
        &self,
        fp: &Fingerprint,
        bytes: &[u8],
        mut metadata: EntryMetadata,
    ) -> LarderResult<EntryMetadata> {
        std::fs::create_dir_all(&self.entries_dir).map_err(|e| {
            LarderError::io(
                format!("creating entries directory {}", self.entries_dir.display()),
                e,
            )
        })?;

        let needed = bytes.len() as u64;
        let available = self.free_space()?;
        if needed > available {
            return Err(LarderError::InsufficientSpace { needed, available });
        }

        let metadata_path = self.metadata_path(fp);
        let previous = match read_metadata_file(&metadata_path, fp) {
            Ok(previous) => Some(previous),
            Err(LarderError::NotFound(_)) => None,
            // Its artifact cannot be identified; `clean` reports it as unreferenced
            Err(LarderError::CorruptEntry { reason, .. }) => {
                warn!("Replacing unreadable entry {}: {}", fp.short(), reason);
                None
            }
            Err(e) => return Err(e),
        };

        metadata.format = METADATA_FORMAT;
        metadata.fingerprint = fp.to_string();
        metadata.size_bytes = needed;
        metadata.checksum = checksum(bytes);
        metadata.artifact = format!("{}.{}{}", fp, Uuid::new_v4().simple(), DATA_SUFFIX);

        // Stage the artifact under its generation name
        let mut data_tmp = StagedFile::new(self.temp_path(fp));
        write_synced(&data_tmp.path, bytes)?;
        let artifact_path = self.artifact_path(&metadata);
        rename(&data_tmp.path, &artifact_path)?;
        data_tmp.disarm();
        let mut staged = StagedFile::new(artifact_path);

        // Commit by replacing the sidecar
        let record = serde_json::to_vec_pretty(&metadata)?;
        let mut meta_tmp = StagedFile::new(self.temp_path(fp));
        write_synced(&meta_tmp.path, &record)?;
        rename(&meta_tmp.path, &metadata_path)?;
        meta_tmp.disarm();
        staged.disarm();

        if let Some(previous) = previous {
            if previous.artifact != metadata.artifact {
                remove_if_exists(&self.artifact_path(&previous))?;
            }
        }

        debug!(
            "Stored {} ({} bytes) as {}",
            fp.short(),
            needed,
            metadata.artifact
        );
        Ok(metadata)
    }

    /// Remove an entry; returns whether anything was removed
    pub async fn delete(&self, fp: &Fingerprint) -> LarderResult<bool> {
        let store = self.clone();
        let fp = fp.clone();
        run_blocking(move || store.delete_blocking(&fp)).await
    }

    fn delete_blocking(&self, fp: &Fingerprint) -> LarderResult<bool> {
        let metadata_path = self.metadata_path(fp);
        let metadata = match read_metadata_file(&metadata_path, fp) {
            Ok(metadata) => Some(metadata),
            Err(LarderError::NotFound(_) | LarderError::CorruptEntry { .. }) => None,
            Err(e) => return Err(e),
        };

        // Sidecar first, so readers stop seeing the entry before the data goes
        let mut removed = remove_if_exists(&metadata_path)?;

        match metadata {
            Some(metadata) => {
                removed |= remove_if_exists(&self.artifact_path(&metadata))?;
            }
            None => {
                for path in self.artifacts_of(fp)? {
                    removed |= remove_if_exists(&path)?;
                }
            }
        }

        if removed {
            debug!("Deleted entry {}", fp.short());
        }
        Ok(removed)
    }

    /// Iterate over committed entries
    ///
    /// Each call starts a fresh pass over the directory. Entries with an
    /// unreadable sidecar are yielded as `CorruptEntry` errors. The scan is
    /// synchronous; async callers run it through the blocking pool.
    pub fn list_all(&self) -> LarderResult<EntryIter> {
        let dir = match std::fs::read_dir(&self.entries_dir) {
            Ok(dir) => Some(dir),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                return Err(LarderError::io(
                    format!("reading entries directory {}", self.entries_dir.display()),
                    e,
                ))
            }
        };
        Ok(EntryIter { dir })
    }

    /// Committed entries as caller-facing records
    pub fn entries(&self) -> LarderResult<Vec<Entry>> {
        let mut entries = Vec::new();
        for item in self.list_all()? {
            match item {
                Ok((fp, metadata)) => {
                    let location = self.artifact_path(&metadata);
                    entries.push(Entry::from_metadata(fp, &metadata, location));
                }
                Err(e) => warn!("Skipping entry: {}", e),
            }
        }
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    /// Count and total size of committed entries
    pub fn stats(&self) -> LarderResult<StoreStats> {
        let mut stats = StoreStats::default();
        for (_, metadata) in self.list_all()?.flatten() {
            stats.entries += 1;
            stats.total_bytes += metadata.size_bytes;
        }
        Ok(stats)
    }

    /// Free space available to unprivileged writers under the root
    pub fn free_space(&self) -> LarderResult<u64> {
        fs4::available_space(&self.root).map_err(|e| {
            LarderError::io(format!("querying free space of {}", self.root.display()), e)
        })
    }

    /// Whether `size` bytes fit in the remaining space
    pub fn fits(&self, size: u64) -> LarderResult<bool> {
        Ok(size <= self.free_space()?)
    }

    /// Find leftovers of interrupted writes and partial deletes
    ///
    /// Synchronous directory scan, like [`Store::list_all`].
    pub fn orphans(&self) -> LarderResult<Vec<Orphan>> {
        let dir = match std::fs::read_dir(&self.entries_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(LarderError::io("reading entries directory", e)),
        };

        let mut orphans = vec![];
        for dirent in dir {
            let dirent = dirent.map_err(|e| LarderError::io("reading entries directory", e))?;
            let path = dirent.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            match classify(name) {
                Some(FileRole::Temp(fp)) => orphans.push(Orphan::Temp {
                    fingerprint: fp,
                    path,
                }),
                Some(FileRole::Artifact(fp)) => {
                    let referenced = self
                        .read_metadata_sync(&fp)
                        .is_some_and(|m| m.artifact == name);
                    if !referenced {
                        orphans.push(Orphan::Unreferenced {
                            fingerprint: fp,
                            path,
                        });
                    }
                }
                Some(FileRole::Metadata(fp)) => match self.read_metadata_sync(&fp) {
                    Some(metadata) => {
                        if !self.artifact_path(&metadata).exists() {
                            orphans.push(Orphan::Dangling { fingerprint: fp });
                        }
                    }
                    None => orphans.push(Orphan::Unreadable { fingerprint: fp }),
                },
                None => {}
            }
        }
        Ok(orphans)
    }

    /// Remove an orphan after re-checking it still is one
    ///
    /// The caller must hold the lock for the orphan's fingerprint.
    pub async fn remove_orphan(&self, orphan: &Orphan) -> LarderResult<bool> {
        match orphan {
            Orphan::Temp { path, .. } => remove_file(path).await,
            Orphan::Unreferenced { fingerprint, path } => {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                let referenced = matches!(
                    self.read_metadata(fingerprint).await,
                    Ok(Some(ref m)) if m.artifact == name
                );
                if referenced {
                    return Ok(false);
                }
                remove_file(path).await
            }
            Orphan::Dangling { fingerprint } => match self.read_metadata(fingerprint).await {
                Ok(Some(metadata)) if !self.artifact_path(&metadata).exists() => {
                    self.delete(fingerprint).await
                }
                _ => Ok(false),
            },
            Orphan::Unreadable { fingerprint } => match self.read_metadata(fingerprint).await {
                Err(LarderError::CorruptEntry { .. }) => self.delete(fingerprint).await,
                _ => Ok(false),
            },
        }
    }

    fn read_metadata_sync(&self, fp: &Fingerprint) -> Option<EntryMetadata> {
        read_metadata_file(&self.metadata_path(fp), fp).ok()
    }

    /// Every artifact file belonging to a fingerprint
    fn artifacts_of(&self, fp: &Fingerprint) -> LarderResult<Vec<PathBuf>> {
        let dir = match std::fs::read_dir(&self.entries_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(LarderError::io("reading entries directory", e)),
        };

        Ok(dir
            .filter_map(Result::ok)
            .map(|d| d.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(classify)
                    .is_some_and(|role| role == FileRole::Artifact(fp.clone()))
            })
            .collect())
    }
}

/// Lazy, single-pass iterator over committed entries
pub struct EntryIter {
    dir: Option<std::fs::ReadDir>,
}

impl Iterator for EntryIter {
    type Item = LarderResult<(Fingerprint, EntryMetadata)>;

    fn next(&mut self) -> Option<Self::Item> {
        let dir = self.dir.as_mut()?;
        loop {
            let dirent = match dir.next()? {
                Ok(dirent) => dirent,
                Err(e) => return Some(Err(LarderError::io("reading entries directory", e))),
            };
            let path = dirent.path();
            let Some(FileRole::Metadata(fp)) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(classify)
            else {
                continue;
            };

            match read_metadata_file(&path, &fp) {
                Ok(metadata) => return Some(Ok((fp, metadata))),
                // Deleted since the directory was listed
                Err(LarderError::NotFound(_)) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FileRole {
    Metadata(Fingerprint),
    Artifact(Fingerprint),
    Temp(Fingerprint),
}

/// Work out what a file in the entries directory is, by name
fn classify(name: &str) -> Option<FileRole> {
    if let Some(rest) = name.strip_prefix(TMP_PREFIX) {
        let fp = rest.get(..Fingerprint::LEN).and_then(Fingerprint::parse)?;
        return Some(FileRole::Temp(fp));
    }
    if let Some(stem) = name.strip_suffix(META_SUFFIX) {
        return Fingerprint::parse(stem).map(FileRole::Metadata);
    }
    let (stem, _) = name.split_once('.')?;
    let fp = Fingerprint::parse(stem)?;
    is_artifact_name(&fp, name).then_some(FileRole::Artifact(fp))
}

/// `<fp>.<hex generation>.data`
fn is_artifact_name(fp: &Fingerprint, name: &str) -> bool {
    name.strip_prefix(fp.as_str())
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(DATA_SUFFIX))
        .is_some_and(|gen| !gen.is_empty() && gen.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn validate_metadata(fp: &Fingerprint, metadata: &EntryMetadata) -> LarderResult<()> {
    if metadata.format > METADATA_FORMAT {
        return Err(LarderError::corrupt(
            fp.as_str(),
            format!("unsupported metadata format {}", metadata.format),
        ));
    }
    if metadata.fingerprint != fp.as_str() {
        return Err(LarderError::corrupt(fp.as_str(), "fingerprint mismatch"));
    }
    // Artifacts never live outside the entries directory
    if !is_artifact_name(fp, &metadata.artifact) {
        return Err(LarderError::corrupt(
            fp.as_str(),
            format!("invalid artifact name `{}`", metadata.artifact),
        ));
    }
    Ok(())
}

fn read_metadata_file(path: &Path, fp: &Fingerprint) -> LarderResult<EntryMetadata> {
    let content = std::fs::read(path).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            LarderError::NotFound(fp.to_string())
        } else {
            LarderError::io(format!("reading metadata {}", path.display()), e)
        }
    })?;
    let metadata: EntryMetadata = serde_json::from_slice(&content)
        .map_err(|e| LarderError::corrupt(fp.as_str(), format!("unreadable metadata: {}", e)))?;
    validate_metadata(fp, &metadata)?;
    Ok(metadata)
}

fn write_synced(path: &Path, bytes: &[u8]) -> LarderResult<()> {
    let context = || format!("writing {}", path.display());
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| LarderError::io(context(), e))?;
    file.write_all(bytes)
        .map_err(|e| LarderError::io(context(), e))?;
    file.sync_all().map_err(|e| LarderError::io(context(), e))?;
    Ok(())
}

fn rename(from: &Path, to: &Path) -> LarderResult<()> {
    std::fs::rename(from, to).map_err(|e| {
        LarderError::io(
            format!("renaming {} to {}", from.display(), to.display()),
            e,
        )
    })
}

fn remove_if_exists(path: &Path) -> LarderResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(LarderError::io(format!("removing {}", path.display()), e)),
    }
}

async fn remove_file(path: &Path) -> LarderResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(LarderError::io(format!("removing {}", path.display()), e)),
    }
}
