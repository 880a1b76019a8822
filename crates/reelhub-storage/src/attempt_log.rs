use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::file_stem;

/// Audit line written for every acquisition attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub attempt: u32,
    pub endpoint: String,
    pub success: bool,
    pub item_count: usize,
    pub real_count: usize,
    pub fallback_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only JSON-lines log, one file per source per day.
#[derive(Debug, Clone)]
pub struct AttemptLog {
    root: PathBuf,
}

impl AttemptLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, source: &str, at: DateTime<Utc>) -> PathBuf {
        self.root
            .join(file_stem(source))
            .join(format!("{}.jsonl", at.format("%Y-%m-%d")))
    }

    pub async fn append(&self, record: &AttemptRecord) -> anyhow::Result<()> {
        let path = self.path_for(&record.source, record.timestamp);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(record).context("serializing attempt record")?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening attempt log {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("appending attempt log {}", path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing attempt log {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn attempts_append_to_daily_file() {
        let dir = tempdir().expect("tempdir");
        let log = AttemptLog::new(dir.path());
        let at = DateTime::parse_from_rfc3339("2026-05-02T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        for attempt in 1..=2 {
            log.append(&AttemptRecord {
                timestamp: at,
                source: "anime-hub".into(),
                attempt,
                endpoint: "https://a.test".into(),
                success: attempt == 2,
                item_count: if attempt == 2 { 12 } else { 0 },
                real_count: if attempt == 2 { 12 } else { 0 },
                fallback_count: 0,
                error: (attempt == 1).then(|| "timeout".to_string()),
            })
            .await
            .expect("append");
        }

        let path = log.path_for("anime-hub", at);
        assert!(path.ends_with("anime-hub/2026-05-02.jsonl"));
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<AttemptRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(!lines[0].success);
        assert_eq!(lines[1].item_count, 12);
    }
}
