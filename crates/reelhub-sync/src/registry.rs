use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reelhub_core::{AdapterKind, SourceDefinition};
use reelhub_storage::{file_stem, BackoffPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Run-wide policy knobs, read from the `pipeline:` block of `sources.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Per-source floor; sources may override it with their own `min_items`.
    pub min_items: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Sources acquired concurrently per batch.
    pub parallelism: usize,
    pub cache_ttl_secs: u64,
    pub shuffle_seed: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_items: 200,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            parallelism: 3,
            cache_ttl_secs: 6 * 60 * 60,
            shuffle_seed: None,
        }
    }
}

impl PipelineSettings {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("duplicate source name `{0}`")]
    DuplicateSource(String),
    #[error("source `{source_name}`: {reason}")]
    InvalidSource { source_name: String, reason: String },
    #[error("pipeline settings: {0}")]
    InvalidSettings(String),
    #[error("{kind} names `{first}` and `{second}` map to the same file stem `{stem}`")]
    StemCollision {
        kind: &'static str,
        first: String,
        second: String,
        stem: String,
    },
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    pipeline: PipelineSettings,
    #[serde(default)]
    sources: Vec<SourceDefinition>,
}

/// Validated, immutable catalog of sources for one run.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    settings: PipelineSettings,
    sources: Vec<SourceDefinition>,
}

impl SourceRegistry {
    pub fn new(
        settings: PipelineSettings,
        sources: Vec<SourceDefinition>,
    ) -> Result<Self, RegistryError> {
        validate_settings(&settings)?;
        let mut seen = HashSet::new();
        let mut source_stems = HashMap::new();
        let mut category_stems = HashMap::new();
        for source in &sources {
            validate_source(source)?;
            if !seen.insert(source.name.as_str()) {
                return Err(RegistryError::DuplicateSource(source.name.clone()));
            }
            claim_stem(&mut source_stems, "source", &source.name)?;
            claim_stem(&mut category_stems, "category", &source.category)?;
        }
        Ok(Self { settings, sources })
    }

    pub fn from_yaml_str(text: &str, origin: &Path) -> Result<Self, RegistryError> {
        let file: RegistryFile = serde_yaml::from_str(text).map_err(|source| RegistryError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        Self::new(file.pipeline, file.sources)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml_str(&text, path)
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn sources(&self) -> &[SourceDefinition] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<&SourceDefinition> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceDefinition> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Categories fed by at least one enabled source.
    pub fn categories(&self) -> BTreeSet<String> {
        self.enabled().map(|s| s.category.clone()).collect()
    }

    pub fn min_items_for(&self, source: &SourceDefinition) -> usize {
        source.min_items.unwrap_or(self.settings.min_items)
    }
}

fn invalid(source: &SourceDefinition, reason: impl Into<String>) -> RegistryError {
    RegistryError::InvalidSource {
        source_name: source.name.clone(),
        reason: reason.into(),
    }
}

/// Cache, log, snapshot, and collection files are keyed by `file_stem`, so two distinct
/// names must never share one.
fn claim_stem<'a>(
    stems: &mut HashMap<String, &'a str>,
    kind: &'static str,
    name: &'a str,
) -> Result<(), RegistryError> {
    let stem = file_stem(name);
    match stems.get(&stem) {
        Some(first) if *first != name => Err(RegistryError::StemCollision {
            kind,
            first: (*first).to_string(),
            second: name.to_string(),
            stem,
        }),
        Some(_) => Ok(()),
        None => {
            stems.insert(stem, name);
            Ok(())
        }
    }
}

fn validate_settings(settings: &PipelineSettings) -> Result<(), RegistryError> {
    if settings.min_items == 0 {
        return Err(RegistryError::InvalidSettings("min_items must be at least 1".into()));
    }
    if settings.max_retries == 0 {
        return Err(RegistryError::InvalidSettings("max_retries must be at least 1".into()));
    }
    if settings.parallelism == 0 {
        return Err(RegistryError::InvalidSettings("parallelism must be at least 1".into()));
    }
    Ok(())
}

fn validate_source(source: &SourceDefinition) -> Result<(), RegistryError> {
    if source.name.trim().is_empty() {
        return Err(invalid(source, "name is empty"));
    }
    if source.category.trim().is_empty() {
        return Err(invalid(source, "category is empty"));
    }
    if source.endpoints.is_empty() || source.endpoints.iter().any(|e| e.trim().is_empty()) {
        return Err(invalid(source, "needs at least one non-empty endpoint"));
    }
    if source.min_items == Some(0) {
        return Err(invalid(source, "min_items must be at least 1"));
    }
    if source.pagination.max_pages == 0 {
        return Err(invalid(source, "pagination.max_pages must be at least 1"));
    }
    if source.pagination.max_pages > 1 && !source.pagination.template_is_addressable() {
        return Err(invalid(
            source,
            "pagination.template needs {page}, or {offset} with page_size, when max_pages > 1",
        ));
    }
    if source.adapter == AdapterKind::StaticHtml
        && !source
            .selectors
            .as_ref()
            .is_some_and(|s| !s.item.trim().is_empty())
    {
        return Err(invalid(source, "static_html sources need selectors.item"));
    }
    Ok(())
}
