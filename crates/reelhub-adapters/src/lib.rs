//! Source adapter contracts + the static HTML, JSON API and fixture adapters.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reelhub_core::{AdapterKind, RawRecord, SelectorSet, SourceDefinition};
use reelhub_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "reelhub-adapters";

/// One page request inside a source's bounded pagination loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    pub run_id: Uuid,
    pub endpoint: String,
    pub page: u32,
    pub url: String,
}

impl PageContext {
    pub fn new(run_id: Uuid, source: &SourceDefinition, endpoint: &str, page: u32) -> Self {
        Self {
            run_id,
            endpoint: endpoint.to_string(),
            page,
            url: source.pagination.page_url(endpoint, page),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("invalid source configuration: {0}")]
    Config(String),
    #[error("reading fixture {path}: {source}")]
    Fixture {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    /// Fetch and extract one page. An empty vector means the page parsed but held no items.
    async fn fetch(
        &self,
        http: &HttpFetcher,
        source: &SourceDefinition,
        ctx: &PageContext,
    ) -> Result<Vec<RawRecord>, AdapterError>;
}

pub fn adapter_for_kind(kind: AdapterKind) -> Arc<dyn SourceAdapter> {
    match kind {
        AdapterKind::StaticHtml => Arc::new(StaticHtmlAdapter),
        AdapterKind::JsonApi => Arc::new(JsonApiAdapter),
        AdapterKind::Fixture => Arc::new(FixtureAdapter),
    }
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Config(format!("selector `{css}`: {e}")))
}

/// Split `"img.poster@data-src"` into the css part and an explicit attribute.
fn split_spec(spec: &str) -> (&str, Option<&str>) {
    match spec.rsplit_once('@') {
        Some((css, attr)) if !attr.is_empty() => (css.trim(), Some(attr.trim())),
        _ => (spec.trim(), None),
    }
}

fn element_value(el: ElementRef<'_>, attr: Option<&str>, default_attrs: &[&str]) -> Option<String> {
    if let Some(attr) = attr {
        return el.value().attr(attr).and_then(|s| text_or_none(s.to_string()));
    }
    if !default_attrs.is_empty() {
        return default_attrs
            .iter()
            .find_map(|a| el.value().attr(a))
            .and_then(|s| text_or_none(s.to_string()));
    }
    text_or_none(el.text().collect::<String>())
}

fn select_first(
    scope: ElementRef<'_>,
    spec: &str,
    default_attrs: &[&str],
) -> Result<Option<String>, AdapterError> {
    let (css, attr) = split_spec(spec);
    if css.is_empty() {
        return Ok(element_value(scope, attr, default_attrs));
    }
    let sel = parse_selector(css)?;
    Ok(scope
        .select(&sel)
        .find_map(|el| element_value(el, attr, default_attrs)))
}

fn select_all_texts(scope: ElementRef<'_>, spec: &str) -> Result<Vec<String>, AdapterError> {
    let (css, attr) = split_spec(spec);
    let sel = parse_selector(css)?;
    Ok(scope
        .select(&sel)
        .filter_map(|el| element_value(el, attr, &[]))
        .collect())
}

fn optional_first(
    scope: ElementRef<'_>,
    spec: Option<&String>,
    default_attrs: &[&str],
) -> Result<Option<String>, AdapterError> {
    match spec {
        Some(spec) => select_first(scope, spec, default_attrs),
        None => Ok(None),
    }
}

/// Extracts listing items from server-rendered HTML with the source's CSS selectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticHtmlAdapter;

impl StaticHtmlAdapter {
    pub fn parse_listing(selectors: &SelectorSet, html: &str) -> Result<Vec<RawRecord>, AdapterError> {
        let document = Html::parse_document(html);
        let item_sel = parse_selector(&selectors.item)?;

        let mut out = Vec::new();
        for item in document.select(&item_sel) {
            let title = match &selectors.title {
                Some(spec) => select_first(item, spec, &[])?,
                None => select_first(item, "a@title", &[])?,
            };
            let url = match &selectors.link {
                Some(spec) => select_first(item, spec, &["href"])?,
                None => select_first(item, "a", &["href"])?,
            };
            let native_id = selectors
                .id_attr
                .as_deref()
                .and_then(|attr| item.value().attr(attr))
                .and_then(|s| text_or_none(s.to_string()));
            let genres = match &selectors.genres {
                Some(spec) => select_all_texts(item, spec)?,
                None => Vec::new(),
            };

            out.push(RawRecord {
                native_id,
                title,
                original_title: optional_first(item, selectors.original_title.as_ref(), &[])?,
                url,
                poster: optional_first(item, selectors.poster.as_ref(), &["data-src", "src"])?,
                backdrop: optional_first(item, selectors.backdrop.as_ref(), &["data-src", "src"])?,
                year: optional_first(item, selectors.year.as_ref(), &[])?,
                rating: optional_first(item, selectors.rating.as_ref(), &[])?,
                genres,
                placeholder: false,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for StaticHtmlAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::StaticHtml
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        source: &SourceDefinition,
        ctx: &PageContext,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let selectors = source
            .selectors
            .as_ref()
            .ok_or_else(|| AdapterError::Config(format!("{} has no selectors", source.name)))?;
        let page = http.fetch_text(&source.name, &ctx.url).await?;
        Self::parse_listing(selectors, &page.body)
    }
}

fn json_string(value: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        JsonValue::String(s) => text_or_none(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn json_string_vec(value: &JsonValue, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .find_map(|key| match value.get(*key)? {
            JsonValue::Array(arr) => Some(
                arr.iter()
                    .filter_map(|v| v.as_str().and_then(|s| text_or_none(s.to_string())))
                    .collect(),
            ),
            JsonValue::String(s) => Some(
                s.split(['/', ',', '|'])
                    .filter_map(|g| text_or_none(g.to_string()))
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default()
}

fn raw_from_json(value: &JsonValue) -> Option<RawRecord> {
    if !value.is_object() {
        return None;
    }
    Some(RawRecord {
        native_id: json_string(value, &["id", "native_id", "nativeId", "vod_id"]),
        title: json_string(value, &["title", "name", "vod_name"]),
        original_title: json_string(value, &["original_title", "originalTitle", "original_name"]),
        url: json_string(value, &["url", "link", "href"]),
        poster: json_string(value, &["poster", "posterUrl", "poster_path", "cover", "vod_pic"]),
        backdrop: json_string(value, &["backdrop", "backdropUrl", "backdrop_path"]),
        year: json_string(value, &["year", "release_date", "first_air_date", "vod_year"]),
        rating: json_string(value, &["rating", "vote_average", "score", "vod_score"]),
        genres: json_string_vec(value, &["genres", "genre", "tags", "type_name"]),
        placeholder: value
            .get("isMock")
            .or_else(|| value.get("placeholder"))
            .and_then(JsonValue::as_bool)
            .unwrap_or(false),
    })
}

/// Decode a JSON body into raw records. The value at `pointer` (or the root) must be an array.
pub fn parse_json_records(body: &str, pointer: Option<&str>) -> Result<Vec<RawRecord>, AdapterError> {
    let value: JsonValue = serde_json::from_str(body)
        .map_err(|e| AdapterError::Malformed(format!("invalid json: {e}")))?;
    let items = match pointer {
        Some(p) if !p.is_empty() => value
            .pointer(p)
            .ok_or_else(|| AdapterError::Malformed(format!("pointer {p} not found")))?,
        _ => &value,
    };
    let arr = items
        .as_array()
        .ok_or_else(|| AdapterError::Malformed("expected a sequence of items".into()))?;
    Ok(arr.iter().filter_map(raw_from_json).collect())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonApiAdapter;

#[async_trait]
impl SourceAdapter for JsonApiAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::JsonApi
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        source: &SourceDefinition,
        ctx: &PageContext,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let page = http.fetch_text(&source.name, &ctx.url).await?;
        parse_json_records(&page.body, source.items_pointer.as_deref())
    }
}

/// Reads captured JSON responses from disk; endpoints are file paths or `file://` urls.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureAdapter;

impl FixtureAdapter {
    pub fn fixture_path(url: &str) -> PathBuf {
        PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Fixture
    }

    async fn fetch(
        &self,
        _http: &HttpFetcher,
        source: &SourceDefinition,
        ctx: &PageContext,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        let path = Self::fixture_path(&ctx.url);
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            // Missing later pages simply end pagination.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && ctx.page > 1 => {
                return Ok(Vec::new())
            }
            Err(err) => return Err(AdapterError::Fixture { path, source: err }),
        };
        parse_json_records(&body, source.items_pointer.as_deref())
    }
}
