//! Core domain model for the ReelHub acquisition pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "reelhub-core";

/// Provenance class of a canonical record. Reporting depends on it, so it is always serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QualityTier {
    Real,
    CacheFallback,
    Synthetic,
}

impl QualityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::CacheFallback => "cacheFallback",
            Self::Synthetic => "synthetic",
        }
    }
}

/// How a source adapter acquires pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    StaticHtml,
    JsonApi,
    Fixture,
}

/// CSS selectors used by the static HTML adapter. `item` scopes every other selector.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectorSet {
    pub item: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub poster: Option<String>,
    #[serde(default)]
    pub backdrop: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub genres: Option<String>,
    /// Attribute on the item element holding the source-native id.
    #[serde(default)]
    pub id_attr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationPolicy {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Url template for pages after the first, with `{base}` and either a `{page}` (1-based)
    /// or an `{offset}` (item offset, `(page - 1) * page_size`) placeholder.
    #[serde(default)]
    pub template: Option<String>,
    /// Items per upstream page; required by `{offset}` templates.
    #[serde(default)]
    pub page_size: Option<u32>,
}

fn default_max_pages() -> u32 {
    1
}

impl Default for PaginationPolicy {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            template: None,
            page_size: None,
        }
    }
}

impl PaginationPolicy {
    pub fn page_url(&self, base: &str, page: u32) -> String {
        match (&self.template, page) {
            (Some(template), p) if p > 1 => {
                let offset = (p - 1).saturating_mul(self.page_size.unwrap_or(0));
                template
                    .replace("{base}", base.trim_end_matches('/'))
                    .replace("{page}", &p.to_string())
                    .replace("{offset}", &offset.to_string())
            }
            _ => base.to_string(),
        }
    }

    /// Whether the template can address pages after the first.
    pub fn template_is_addressable(&self) -> bool {
        self.template.as_deref().is_some_and(|t| {
            t.contains("{page}") || (t.contains("{offset}") && self.page_size.unwrap_or(0) > 0)
        })
    }
}

/// Immutable per-run configuration for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub name: String,
    pub category: String,
    pub adapter: AdapterKind,
    /// Primary endpoint first, failovers after it.
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub min_items: Option<usize>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub pagination: PaginationPolicy,
    #[serde(default)]
    pub selectors: Option<SelectorSet>,
    /// JSON pointer to the item array for `json_api` sources; the document root when absent.
    #[serde(default)]
    pub items_pointer: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl SourceDefinition {
    pub fn primary_endpoint(&self) -> Option<&str> {
        self.endpoints.first().map(String::as_str)
    }
}

/// Whatever an adapter managed to extract. Nothing here is guaranteed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    #[serde(alias = "id")]
    pub native_id: Option<String>,
    pub title: Option<String>,
    #[serde(alias = "originalTitle")]
    pub original_title: Option<String>,
    pub url: Option<String>,
    #[serde(alias = "posterUrl")]
    pub poster: Option<String>,
    #[serde(alias = "backdropUrl")]
    pub backdrop: Option<String>,
    pub year: Option<String>,
    pub rating: Option<String>,
    pub genres: Vec<String>,
    /// Set when the upstream itself marks the record as mock data.
    #[serde(alias = "isMock")]
    pub placeholder: bool,
}

/// Canonical record shape shared by the cache, aggregates and the incremental store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub original_title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub poster_url: String,
    #[serde(default)]
    pub backdrop_url: String,
    pub year: Option<i32>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub genres: Vec<String>,
    pub source_name: String,
    pub category: String,
    pub quality_tier: QualityTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentRecord {
    pub fn is_synthetic(&self) -> bool {
        self.quality_tier == QualityTier::Synthetic
    }

    pub fn with_tier(mut self, tier: QualityTier) -> Self {
        self.quality_tier = tier;
        self
    }
}

/// Tier counts as written into every collection and snapshot (`stats` key).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub total: usize,
    pub real: usize,
    pub fallback: usize,
    pub mock: usize,
    pub real_percentage: f64,
}

impl CollectionStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ContentRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.record(record.quality_tier);
        }
        stats.recompute_percentage();
        stats
    }

    pub fn record(&mut self, tier: QualityTier) {
        self.total += 1;
        match tier {
            QualityTier::Real => self.real += 1,
            QualityTier::CacheFallback => self.fallback += 1,
            QualityTier::Synthetic => self.mock += 1,
        }
    }

    pub fn merge(&mut self, other: &CollectionStats) {
        self.total += other.total;
        self.real += other.real;
        self.fallback += other.fallback;
        self.mock += other.mock;
        self.recompute_percentage();
    }

    pub fn recompute_percentage(&mut self) {
        self.real_percentage = if self.total == 0 {
            0.0
        } else {
            (self.real as f64 / self.total as f64 * 1000.0).round() / 10.0
        };
    }
}

/// Per-run, per-category snapshot. Rebuilt wholesale each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryAggregate {
    pub category: String,
    pub items: Vec<ContentRecord>,
    pub stats: CollectionStats,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, tier: QualityTier) -> ContentRecord {
        let now = Utc::now();
        ContentRecord {
            id: id.to_string(),
            title: id.to_string(),
            original_title: String::new(),
            url: String::new(),
            poster_url: String::new(),
            backdrop_url: String::new(),
            year: None,
            rating: 0.0,
            genres: Vec::new(),
            source_name: "test".into(),
            category: "movies".into(),
            quality_tier: tier,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn quality_tier_serializes_camel_case() {
        let json = serde_json::to_string(&QualityTier::CacheFallback).unwrap();
        assert_eq!(json, "\"cacheFallback\"");
        assert_eq!(QualityTier::CacheFallback.as_str(), "cacheFallback");
    }

    #[test]
    fn content_record_always_carries_tier_and_null_year() {
        let value = serde_json::to_value(record("a", QualityTier::Real)).unwrap();
        assert_eq!(value["qualityTier"], "real");
        assert!(value["year"].is_null());
        assert!(value.get("sourceName").is_some());
    }

    #[test]
    fn stats_count_tiers_and_percentage() {
        let records = vec![
            record("a", QualityTier::Real),
            record("b", QualityTier::Real),
            record("c", QualityTier::CacheFallback),
            record("d", QualityTier::Synthetic),
        ];
        let stats = CollectionStats::from_records(&records);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.real, 2);
        assert_eq!(stats.fallback, 1);
        assert_eq!(stats.mock, 1);
        assert_eq!(stats.real_percentage, 50.0);
    }

    #[test]
    fn empty_stats_have_zero_percentage() {
        let stats = CollectionStats::from_records(&Vec::<ContentRecord>::new());
        assert_eq!(stats.real_percentage, 0.0);
    }

    #[test]
    fn page_url_uses_template_after_first_page() {
        let policy = PaginationPolicy {
            max_pages: 3,
            template: Some("{base}/page/{page}".into()),
            page_size: None,
        };
        assert_eq!(policy.page_url("https://x.test/list/", 1), "https://x.test/list/");
        assert_eq!(policy.page_url("https://x.test/list/", 2), "https://x.test/list/page/2");
    }

    #[test]
    fn offset_templates_step_by_page_size() {
        let policy = PaginationPolicy {
            max_pages: 10,
            template: Some("{base}?start={offset}".into()),
            page_size: Some(25),
        };
        assert!(policy.template_is_addressable());
        assert_eq!(policy.page_url("https://x.test/top250", 1), "https://x.test/top250");
        assert_eq!(policy.page_url("https://x.test/top250", 2), "https://x.test/top250?start=25");
        assert_eq!(policy.page_url("https://x.test/top250", 4), "https://x.test/top250?start=75");

        let unsized_offset = PaginationPolicy {
            page_size: None,
            ..policy
        };
        assert!(!unsized_offset.template_is_addressable());
    }

    #[test]
    fn raw_record_accepts_upstream_aliases() {
        let raw: RawRecord = serde_json::from_str(
            r#"{"id":"42","title":"T","posterUrl":"/p.jpg","isMock":true}"#,
        )
        .unwrap();
        assert_eq!(raw.native_id.as_deref(), Some("42"));
        assert_eq!(raw.poster.as_deref(), Some("/p.jpg"));
        assert!(raw.placeholder);
    }
}
