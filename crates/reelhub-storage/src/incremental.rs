//! Append-only record collections with a persisted id index.
//!
//! A collection is one JSON document laid out one item per line:
//!
//! ```text
//! {"category":"dramas","timestamp":"...","count":2,"stats":{...},"items":[
//! {"id":"a",...}
//! ,{"id":"b",...}
//! ]}
//! ```
//!
//! Appending rewrites the header line, copies the existing item lines verbatim and
//! writes the new records in chunks, so peak memory is bounded by one line plus one
//! chunk no matter how large the collection grows.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use reelhub_core::{CollectionStats, ContentRecord};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, info, warn};

use crate::{file_stem, temp_sibling, write_atomic};

/// Records serialized per write call during an append.
pub const CHUNK_SIZE: usize = 100;

const ITEMS_OPEN: &str = ",\"items\":[";
const FOOTER: &str = "]}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CollectionHeader {
    category: String,
    timestamp: DateTime<Utc>,
    count: usize,
    stats: CollectionStats,
}

impl CollectionHeader {
    fn empty(label: &str) -> Self {
        Self {
            category: label.to_string(),
            timestamp: Utc::now(),
            count: 0,
            stats: CollectionStats::default(),
        }
    }

    fn to_line(&self) -> anyhow::Result<String> {
        let json = serde_json::to_string(self).context("serializing collection header")?;
        let Some(body) = json.strip_suffix('}') else {
            bail!("collection header did not serialize to an object");
        };
        Ok(format!("{body}{ITEMS_OPEN}"))
    }

    fn parse_line(line: &str) -> anyhow::Result<Self> {
        let Some(body) = line.trim_end().strip_suffix(ITEMS_OPEN) else {
            bail!("collection header line is missing the items array");
        };
        serde_json::from_str(&format!("{body}}}")).context("parsing collection header")
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexFile {
    name: String,
    updated_at: DateTime<Utc>,
    ids: Vec<String>,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

fn item_json(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed == FOOTER {
        return None;
    }
    Some(trimmed.strip_prefix(',').unwrap_or(trimmed))
}

/// Single writer for one on-disk collection (a category, or the global `all` collection).
#[derive(Debug)]
pub struct IncrementalStore {
    name: String,
    collection_path: PathBuf,
    index_path: PathBuf,
    header: CollectionHeader,
    known_ids: HashSet<String>,
}

impl IncrementalStore {
    /// Open (or lazily create) `<root>/<name>.json` and its `<name>.index.json`.
    ///
    /// When the collection holds more records than the index knows about, the previous
    /// run crashed between its data write and its index write; the index is rebuilt
    /// from the collection before anything else happens.
    pub async fn open(root: impl AsRef<Path>, name: &str) -> anyhow::Result<Self> {
        let root = root.as_ref();
        let stem = file_stem(name);
        let collection_path = root.join(format!("{stem}.json"));
        let index_path = root.join(format!("{stem}.index.json"));

        let known_ids = match fs::read(&index_path).await {
            Ok(bytes) => {
                let index: IndexFile = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing index {}", index_path.display()))?;
                index.ids.into_iter().collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading index {}", index_path.display()))
            }
        };

        let header = match read_header(&collection_path).await? {
            Some(header) => header,
            None => CollectionHeader::empty(name),
        };

        let mut store = Self {
            name: name.to_string(),
            collection_path,
            index_path,
            header,
            known_ids,
        };

        if store.header.count > store.known_ids.len() {
            warn!(
                collection = %store.name,
                records = store.header.count,
                indexed = store.known_ids.len(),
                "index behind collection; reconciling"
            );
            store.reconcile().await?;
        }
        Ok(store)
    }

    /// Scan the collection line by line and union every id found into the index.
    pub async fn reconcile(&mut self) -> anyhow::Result<usize> {
        let before = self.known_ids.len();
        if fs::try_exists(&self.collection_path)
            .await
            .with_context(|| format!("checking {}", self.collection_path.display()))?
        {
            let file = fs::File::open(&self.collection_path)
                .await
                .with_context(|| format!("opening {}", self.collection_path.display()))?;
            let mut lines = BufReader::new(file).lines();
            let mut first = true;
            while let Some(line) = lines
                .next_line()
                .await
                .with_context(|| format!("reading {}", self.collection_path.display()))?
            {
                if std::mem::take(&mut first) {
                    continue;
                }
                let Some(json) = item_json(&line) else {
                    continue;
                };
                let item: IdOnly = serde_json::from_str(json).with_context(|| {
                    format!("parsing item id in {}", self.collection_path.display())
                })?;
                self.known_ids.insert(item.id);
            }
        }
        let recovered = self.known_ids.len() - before;
        self.persist_index().await?;
        info!(collection = %self.name, recovered, "index reconciled");
        Ok(recovered)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection_path(&self) -> &Path {
        &self.collection_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn contains(&self, id: &str) -> bool {
        self.known_ids.contains(id)
    }

    /// Number of records physically in the collection.
    pub fn len(&self) -> usize {
        self.header.count
    }

    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    pub fn stats(&self) -> CollectionStats {
        self.header.stats
    }

    /// Append the records whose ids are not yet known. Returns how many were written.
    pub async fn append(&mut self, records: &[ContentRecord]) -> anyhow::Result<usize> {
        let mut batch_ids: HashSet<&str> = HashSet::new();
        let fresh: Vec<&ContentRecord> = records
            .iter()
            .filter(|r| {
                !r.id.is_empty() && !self.known_ids.contains(&r.id) && batch_ids.insert(&r.id)
            })
            .collect();
        if fresh.is_empty() {
            debug!(collection = %self.name, offered = records.len(), "nothing new to append");
            return Ok(0);
        }

        let mut header = self.header.clone();
        header.category = self.name.clone();
        header.timestamp = Utc::now();
        header.count += fresh.len();
        header
            .stats
            .merge(&CollectionStats::from_records(fresh.iter().copied()));

        let temp_path = temp_sibling(&self.collection_path);
        if let Err(err) = self.write_pass(&temp_path, &header, &fresh).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err);
        }
        if let Err(err) = fs::rename(&temp_path, &self.collection_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming {} -> {}",
                    temp_path.display(),
                    self.collection_path.display()
                )
            });
        }

        self.header = header;
        let added = fresh.len();
        self.known_ids
            .extend(fresh.into_iter().map(|r| r.id.clone()));
        self.persist_index().await?;

        info!(collection = %self.name, added, total = self.header.count, "appended records");
        Ok(added)
    }

    /// Persist the id index. `append` already calls this as its final step.
    pub async fn flush(&self) -> anyhow::Result<()> {
        self.persist_index().await
    }

    /// Load every item of the collection. Intended for consumers and tooling, not the write path.
    pub async fn read_items(&self) -> anyhow::Result<Vec<ContentRecord>> {
        let mut items = Vec::with_capacity(self.header.count);
        if !fs::try_exists(&self.collection_path)
            .await
            .with_context(|| format!("checking {}", self.collection_path.display()))?
        {
            return Ok(items);
        }
        let file = fs::File::open(&self.collection_path)
            .await
            .with_context(|| format!("opening {}", self.collection_path.display()))?;
        let mut lines = BufReader::new(file).lines();
        let mut first = true;
        while let Some(line) = lines.next_line().await? {
            if std::mem::take(&mut first) {
                continue;
            }
            if let Some(json) = item_json(&line) {
                items.push(serde_json::from_str(json).with_context(|| {
                    format!("parsing item in {}", self.collection_path.display())
                })?);
            }
        }
        Ok(items)
    }

    async fn write_pass(
        &self,
        temp_path: &Path,
        header: &CollectionHeader,
        fresh: &[&ContentRecord],
    ) -> anyhow::Result<()> {
        if let Some(parent) = self.collection_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = fs::File::create(temp_path)
            .await
            .with_context(|| format!("creating {}", temp_path.display()))?;
        let mut out = BufWriter::new(file);
        out.write_all(header.to_line()?.as_bytes()).await?;
        out.write_all(b"\n").await?;

        let mut written = 0usize;
        if fs::try_exists(&self.collection_path).await? {
            let existing = fs::File::open(&self.collection_path)
                .await
                .with_context(|| format!("opening {}", self.collection_path.display()))?;
            let mut lines = BufReader::new(existing).lines();
            let mut first = true;
            while let Some(line) = lines.next_line().await? {
                if std::mem::take(&mut first) {
                    continue;
                }
                let trimmed = line.trim();
                if trimmed == FOOTER {
                    break;
                }
                if trimmed.is_empty() {
                    continue;
                }
                out.write_all(trimmed.as_bytes()).await?;
                out.write_all(b"\n").await?;
                written += 1;
            }
        }

        for chunk in fresh.chunks(CHUNK_SIZE) {
            let mut buf = String::new();
            for record in chunk {
                if written > 0 {
                    buf.push(',');
                }
                buf.push_str(
                    &serde_json::to_string(record)
                        .with_context(|| format!("serializing record {}", record.id))?,
                );
                buf.push('\n');
                written += 1;
            }
            out.write_all(buf.as_bytes()).await?;
        }

        out.write_all(FOOTER.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
        out.get_ref().sync_all().await?;
        Ok(())
    }

    async fn persist_index(&self) -> anyhow::Result<()> {
        let mut ids: Vec<String> = self.known_ids.iter().cloned().collect();
        ids.sort_unstable();
        let index = IndexFile {
            name: self.name.clone(),
            updated_at: Utc::now(),
            ids,
        };
        let bytes = serde_json::to_vec(&index).context("serializing id index")?;
        write_atomic(&self.index_path, &bytes)
            .await
            .with_context(|| format!("persisting index for {}", self.name))
    }
}

async fn read_header(path: &Path) -> anyhow::Result<Option<CollectionHeader>> {
    let file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("opening {}", path.display())),
    };
    let mut lines = BufReader::new(file).lines();
    match lines
        .next_line()
        .await
        .with_context(|| format!("reading {}", path.display()))?
    {
        Some(line) => CollectionHeader::parse_line(&line)
            .with_context(|| format!("reading header of {}", path.display()))
            .map(Some),
        None => Ok(None),
    }
}
