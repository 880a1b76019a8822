//! Durable file stores + HTTP fetch utilities for ReelHub.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{info_span, Instrument};
use uuid::Uuid;

mod attempt_log;
mod cache;
mod incremental;

pub use attempt_log::{AttemptLog, AttemptRecord};
pub use cache::{CacheEntry, CacheOrigin, CacheStore};
pub use incremental::{IncrementalStore, CHUNK_SIZE};

pub const CRATE_NAME: &str = "reelhub-storage";

/// Maps a source or category name onto a safe file stem.
pub fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "unnamed".to_string()
    } else {
        stem
    }
}

/// Write bytes via a sibling temp file and an atomic rename, so readers never see a partial file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = temp_sibling(path);
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| format!("writing temp file {}", temp_path.display()));
    }

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4()))
}

/// Exponential backoff with a 1.5x growth factor, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub const GROWTH: f64 = 1.5;

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = Self::GROWTH.powi(exponent);
        let delay = self.base_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub probe_timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            user_agent: None,
            global_concurrency: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("outbound connection limiter closed")]
    LimiterClosed,
}

/// Result of a lightweight endpoint health check. Only `Healthy` is 2xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Healthy,
    Unhealthy { status: u16 },
    Unreachable(String),
}

impl ProbeStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeStatus;
}

/// Shared HTTP client. Each call is a single attempt; retry policy belongs to the caller.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    probe_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            probe_timeout: config.probe_timeout,
        })
    }

    pub async fn fetch_text(&self, source: &str, url: &str) -> Result<FetchedResponse, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;

        let span = info_span!("http_fetch", source, url);
        async {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }
            let body = resp.text().await?;
            Ok::<_, FetchError>(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl HealthProbe for HttpFetcher {
    async fn probe(&self, url: &str) -> ProbeStatus {
        let Ok(_permit) = self.global_limit.acquire().await else {
            return ProbeStatus::Unreachable("outbound connection limiter closed".into());
        };
        match self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => ProbeStatus::Healthy,
            Ok(resp) => ProbeStatus::Unhealthy {
                status: resp.status().as_u16(),
            },
            Err(err) => ProbeStatus::Unreachable(err.to_string()),
        }
    }
}
