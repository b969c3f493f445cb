//! Freshness policy
//!
//! Rules are evaluated in order and the first one that applies decides:
//!
//! | Rule | Applies when | Verdict |
//! |------|--------------|---------|
//! | Version | a version tag is required and differs | stale |
//! | TTL | the entry has a ttl and `now - created_at > ttl` | stale |
//! | Predicate | the caller supplied one | its result |
//! | Default | always | valid |
//!
//! The TTL boundary is inclusive: an entry exactly `ttl` old is still valid.

use crate::cache::entry::EntryMetadata;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Caller-supplied validity check (e.g. "remote ETag unchanged")
pub type ValidityPredicate = Arc<dyn Fn(&EntryMetadata) -> bool + Send + Sync>;

/// Requirements a cached entry must meet to be served
#[derive(Clone, Default)]
pub struct Constraints {
    version_tag: Option<String>,
    ttl: Option<Duration>,
    predicate: Option<ValidityPredicate>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require this exact version tag; also recorded on fresh writes
    pub fn version(mut self, tag: impl Into<String>) -> Self {
        self.version_tag = Some(tag.into());
        self
    }

    /// Freshness window recorded on fresh writes (overrides the default ttl)
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Add a custom validity check
    pub fn valid_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&EntryMetadata) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn version_tag(&self) -> Option<&str> {
        self.version_tag.as_deref()
    }

    pub fn ttl_override(&self) -> Option<Duration> {
        self.ttl
    }
}

impl fmt::Debug for Constraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraints")
            .field("version_tag", &self.version_tag)
            .field("ttl", &self.ttl)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Outcome of evaluating an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    /// Required version differs from the stored one
    VersionMismatch {
        required: String,
        stored: Option<String>,
    },
    /// Entry is older than its ttl
    Expired,
    /// Caller predicate returned false
    Rejected,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::VersionMismatch { required, stored } => write!(
                f,
                "version mismatch (required {}, stored {})",
                required,
                stored.as_deref().unwrap_or("none")
            ),
            Self::Expired => write!(f, "expired"),
            Self::Rejected => write!(f, "rejected by predicate"),
        }
    }
}

/// Evaluate an entry against the constraints at `now`
pub fn evaluate(metadata: &EntryMetadata, now: DateTime<Utc>, constraints: &Constraints) -> Verdict {
    if let Some(required) = &constraints.version_tag {
        if metadata.version_tag.as_deref() != Some(required.as_str()) {
            return Verdict::VersionMismatch {
                required: required.clone(),
                stored: metadata.version_tag.clone(),
            };
        }
    }

    if let Some(ttl) = metadata.ttl() {
        if metadata.age(now) > ttl {
            return Verdict::Expired;
        }
    }

    if let Some(predicate) = &constraints.predicate {
        return if predicate(metadata) {
            Verdict::Valid
        } else {
            Verdict::Rejected
        };
    }

    Verdict::Valid
}

/// Whether an entry may be served
pub fn is_valid(metadata: &EntryMetadata, now: DateTime<Utc>, constraints: &Constraints) -> bool {
    evaluate(metadata, now, constraints).is_valid()
}
