//! Entry records
//!
//! Every entry is an artifact file plus a JSON sidecar describing it. The
//! sidecar is small, so freshness can be decided without reading the
//! artifact.

use crate::cache::key::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Current sidecar record format
pub const METADATA_FORMAT: u32 = 1;

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Checksum of artifact bytes, as recorded in the sidecar
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Kind of artifact content, sniffed from its leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Gzip stream (also .tar.gz)
    Gzip,
    /// Bzip2 stream
    Bzip2,
    /// XZ stream
    Xz,
    /// Zip archive
    Zip,
    /// Anything else
    Plain,
}

impl ContentKind {
    /// Detect the content kind from magic bytes
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if bytes.starts_with(b"BZh") {
            Self::Bzip2
        } else if bytes.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Self::Xz
        } else if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
            Self::Zip
        } else {
            Self::Plain
        }
    }

    /// Whether the content needs decompression before use
    pub fn is_compressed(&self) -> bool {
        !matches!(self, Self::Plain)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
            Self::Zip => "zip",
            Self::Plain => "plain",
        };
        write!(f, "{}", name)
    }
}

/// Sidecar record persisted next to each artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Record format version
    pub format: u32,

    /// Fingerprint of the key this entry belongs to
    pub fingerprint: String,

    /// Human-readable key description
    pub label: String,

    /// When the artifact was stored
    pub created_at: DateTime<Utc>,

    /// Freshness window in seconds (None = no age limit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,

    /// Caller-defined version of the artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_tag: Option<String>,

    /// Sniffed content kind
    pub content_kind: ContentKind,

    /// Artifact size in bytes
    pub size_bytes: u64,

    /// `sha256:<hex>` of the artifact bytes
    pub checksum: String,

    /// File name of the artifact, relative to the entries directory
    pub artifact: String,
}

impl EntryMetadata {
    /// Build the record for freshly fetched bytes
    pub fn for_artifact(fingerprint: &Fingerprint, label: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            format: METADATA_FORMAT,
            fingerprint: fingerprint.to_string(),
            label: label.into(),
            created_at: Utc::now(),
            ttl_secs: None,
            version_tag: None,
            content_kind: ContentKind::sniff(bytes),
            size_bytes: bytes.len() as u64,
            checksum: checksum(bytes),
            artifact: String::new(),
        }
    }

    /// Set the freshness window
    pub fn with_ttl(mut self, ttl: Option<std::time::Duration>) -> Self {
        self.ttl_secs = ttl.map(|d| d.as_secs());
        self
    }

    /// Set the version tag
    pub fn with_version_tag(mut self, tag: Option<String>) -> Self {
        self.version_tag = tag;
        self
    }

    /// Freshness window as a chrono duration
    pub fn ttl(&self) -> Option<chrono::Duration> {
        self.ttl_secs.map(|secs| {
            i64::try_from(secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(chrono::Duration::MAX)
        })
    }

    /// Age of the entry at `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Check if this entry was created more than `max_age` before `now`
    pub fn is_older_than(&self, max_age: std::time::Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(max_age) {
            Ok(max_age) => self.age(now) > max_age,
            Err(_) => false,
        }
    }
}

/// A live entry as seen by callers
#[derive(Debug, Clone)]
pub struct Entry {
    pub fingerprint: Fingerprint,
    pub artifact_location: PathBuf,
    pub created_at: DateTime<Utc>,
    pub ttl: Option<std::time::Duration>,
    pub version_tag: Option<String>,
    pub size_bytes: u64,
    pub content_kind: ContentKind,
    pub label: String,
}

impl Entry {
    /// Assemble from a sidecar record and the artifact's resolved path
    pub fn from_metadata(
        fingerprint: Fingerprint,
        metadata: &EntryMetadata,
        artifact_location: PathBuf,
    ) -> Self {
        Self {
            fingerprint,
            artifact_location,
            created_at: metadata.created_at,
            ttl: metadata.ttl_secs.map(std::time::Duration::from_secs),
            version_tag: metadata.version_tag.clone(),
            size_bytes: metadata.size_bytes,
            content_kind: metadata.content_kind,
            label: metadata.label.clone(),
        }
    }
}
