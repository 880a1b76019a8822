use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reelhub_core::ContentRecord;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{file_stem, write_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheOrigin {
    /// Records from a successful live acquisition.
    Live,
    /// Records produced by the synthetic generator after every attempt failed.
    Synthetic,
}

/// Last acquisition snapshot for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub source: String,
    pub records: Vec<ContentRecord>,
    pub captured_at: DateTime<Utc>,
    pub ttl_secs: u64,
    pub origin: CacheOrigin,
}

impl CacheEntry {
    pub fn new(
        source: impl Into<String>,
        records: Vec<ContentRecord>,
        captured_at: DateTime<Utc>,
        ttl_secs: u64,
        origin: CacheOrigin,
    ) -> Self {
        Self {
            source: source.into(),
            records,
            captured_at,
            ttl_secs,
            origin,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let secs = i64::try_from(self.ttl_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        let ttl = ChronoDuration::seconds(secs);
        now.signed_duration_since(self.captured_at) < ttl
    }

    /// Whether the entry may replace network I/O outright.
    pub fn is_usable(&self, now: DateTime<Utc>, min_items: usize) -> bool {
        self.origin == CacheOrigin::Live && self.is_fresh(now) && self.len() >= min_items
    }

    /// Whether the entry is real data worth serving after live acquisition failed, fresh or not.
    pub fn is_last_resort(&self) -> bool {
        self.origin == CacheOrigin::Live && !self.is_empty()
    }
}

/// One JSON file per source under `root`.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, source: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(source)))
    }

    pub async fn load(&self, source: &str) -> anyhow::Result<Option<CacheEntry>> {
        let path = self.path_for(source);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading cache {}", path.display()))
            }
        };
        let entry = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing cache {}", path.display()))?;
        Ok(Some(entry))
    }

    pub async fn save(&self, entry: &CacheEntry) -> anyhow::Result<()> {
        let path = self.path_for(&entry.source);
        let bytes = serde_json::to_vec(entry)
            .with_context(|| format!("serializing cache for {}", entry.source))?;
        write_atomic(&path, &bytes).await
    }
}
