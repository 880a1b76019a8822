use chrono::{DateTime, Utc};
use reelhub_core::{ContentRecord, QualityTier, RawRecord, SourceDefinition};
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// Maps adapter output for one source onto canonical records.
#[derive(Debug, Clone)]
pub struct Normalizer {
    source_name: String,
    category: String,
    base: Option<Url>,
}

impl Normalizer {
    pub fn for_source(source: &SourceDefinition) -> Self {
        let base = source
            .primary_endpoint()
            .and_then(|endpoint| Url::parse(endpoint).ok())
            .filter(|url| matches!(url.scheme(), "http" | "https"));
        Self {
            source_name: source.name.clone(),
            category: source.category.clone(),
            base,
        }
    }

    pub fn normalize_all(&self, raws: Vec<RawRecord>, now: DateTime<Utc>) -> Vec<ContentRecord> {
        raws.into_iter()
            .filter_map(|raw| self.normalize(raw, now))
            .collect()
    }

    /// `None` when the record has neither a resolvable identity nor a title.
    pub fn normalize(&self, raw: RawRecord, now: DateTime<Utc>) -> Option<ContentRecord> {
        let url = raw
            .url
            .as_deref()
            .map(|u| resolve_url(self.base.as_ref(), u))
            .unwrap_or_default();
        let title = raw.title.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let original_title = raw
            .original_title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let native = raw
            .native_id
            .as_deref()
            .map(sanitize_id)
            .filter(|id| !id.is_empty())
            .or_else(|| trailing_segment(&url).filter(|id| !id.is_empty()));

        let id = match (native, title.or(original_title)) {
            (Some(native), _) => format!("{}_{}", self.source_name, native),
            (None, Some(_)) => synthetic_identity(&self.source_name, now),
            (None, None) => {
                debug!(source = %self.source_name, "dropping raw record without identity or title");
                return None;
            }
        };

        let title = title
            .or(original_title)
            .map(ToString::to_string)
            .unwrap_or_else(|| id.clone());

        Some(ContentRecord {
            title,
            original_title: original_title.map(ToString::to_string).unwrap_or_default(),
            url,
            poster_url: raw
                .poster
                .as_deref()
                .map(|u| resolve_url(self.base.as_ref(), u))
                .unwrap_or_default(),
            backdrop_url: raw
                .backdrop
                .as_deref()
                .map(|u| resolve_url(self.base.as_ref(), u))
                .unwrap_or_default(),
            year: raw.year.as_deref().and_then(parse_year),
            rating: raw.rating.as_deref().map(parse_rating).unwrap_or(0.0),
            genres: raw.genres,
            source_name: self.source_name.clone(),
            category: self.category.clone(),
            quality_tier: if raw.placeholder {
                QualityTier::Synthetic
            } else {
                QualityTier::Real
            },
            created_at: now,
            updated_at: now,
            id,
        })
    }
}

/// Keep ASCII alphanumerics, `-` and `_`; everything else becomes `_`.
pub fn sanitize_id(input: &str) -> String {
    input
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

fn synthetic_identity(source_name: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", source_name, now.timestamp_millis(), &suffix[..8])
}

/// Path stems that name a page template rather than an item.
const GENERIC_STEMS: &[&str] = &[
    "detail", "details", "index", "item", "page", "play", "show", "video", "view", "watch",
];

/// Extensions of dynamic pages whose identity lives in the query string.
const SCRIPT_EXTENSIONS: &[&str] = &["asp", "aspx", "cgi", "jsp", "php"];

/// Last non-empty path segment without its final extension, sanitized. The query is folded
/// in when the segment alone does not identify the item (`detail.php?id=1` -> `detail_id_1`).
fn trailing_segment(url: &str) -> Option<String> {
    let url = url.split('#').next().unwrap_or_default();
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let path = path
        .split_once("://")
        .map(|(_, rest)| rest.split_once('/').map(|(_, p)| p).unwrap_or_default())
        .unwrap_or(path);
    let segment = path.rsplit('/').find(|s| !s.is_empty())?;
    let (stem, extension) = match segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (segment, ""),
    };
    let stem = sanitize_id(stem);

    let generic = GENERIC_STEMS.contains(&stem.to_ascii_lowercase().as_str())
        || SCRIPT_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str());
    let query = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let query = sanitize_id(&query);
    if generic && !query.is_empty() {
        return Some(format!("{stem}_{query}"));
    }
    Some(stem)
}

/// Resolve protocol-relative and root-relative urls against `base`; absolute urls pass through.
pub fn resolve_url(base: Option<&Url>, raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if let Some(rest) = raw.strip_prefix("//") {
        let scheme = base.map(Url::scheme).unwrap_or("https");
        return format!("{scheme}://{rest}");
    }
    if Url::parse(raw).is_ok() {
        return raw.to_string();
    }
    match base.and_then(|b| b.join(raw).ok()) {
        Some(joined) => joined.to_string(),
        None => raw.to_string(),
    }
}

/// First 4-digit run that looks like a release year.
pub fn parse_year(text: &str) -> Option<i32> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() == 4)
        .filter_map(|run| run.parse::<i32>().ok())
        .find(|year| (1870..=2100).contains(year))
}

/// Ratings on a 0-10 scale. Percentages and 100-point scores are scaled down.
pub fn parse_rating(text: &str) -> f64 {
    let mut number = String::new();
    for ch in text.trim().chars() {
        if ch.is_ascii_digit() || (ch == '.' && !number.contains('.') && !number.is_empty()) {
            number.push(ch);
        } else if !number.is_empty() {
            break;
        }
    }
    let Ok(mut value) = number.trim_end_matches('.').parse::<f64>() else {
        return 0.0;
    };
    if text.contains('%') || (value > 10.0 && value <= 100.0) {
        value /= 10.0;
    }
    if !value.is_finite() {
        return 0.0;
    }
    (value.clamp(0.0, 10.0) * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelhub_core::{AdapterKind, PaginationPolicy};

    fn source(endpoint: &str) -> SourceDefinition {
        SourceDefinition {
            name: "dramahub".into(),
            category: "dramas".into(),
            adapter: AdapterKind::StaticHtml,
            endpoints: vec![endpoint.to_string()],
            min_items: None,
            enabled: true,
            pagination: PaginationPolicy::default(),
            selectors: None,
            items_pointer: None,
        }
    }

    fn raw() -> RawRecord {
        RawRecord {
            title: Some("Sample".into()),
            ..Default::default()
        }
    }

    #[test]
    fn native_id_wins_and_is_sanitized() {
        let n = Normalizer::for_source(&source("https://drama.test/list"));
        let record = n
            .normalize(
                RawRecord {
                    native_id: Some(" tt/42 ".into()),
                    url: Some("/detail/99.html".into()),
                    ..raw()
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(record.id, "dramahub_tt_42");
        assert_eq!(record.url, "https://drama.test/detail/99.html");
        assert_eq!(record.quality_tier, QualityTier::Real);
        assert_eq!(record.category, "dramas");
    }

    #[test]
    fn url_segment_is_second_choice_for_identity() {
        let n = Normalizer::for_source(&source("https://drama.test/list"));
        let record = n
            .normalize(
                RawRecord {
                    url: Some("https://cdn.test/show/abc-123.html?ref=top".into()),
                    ..raw()
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(record.id, "dramahub_abc-123");
        assert_eq!(record.url, "https://cdn.test/show/abc-123.html?ref=top");
    }

    #[test]
    fn dynamic_page_urls_keep_distinct_identities() {
        let mut vod = source("https://vod.test/list");
        vod.name = "vod".into();
        let n = Normalizer::for_source(&vod);
        let ids: Vec<String> = [
            "https://vod.test/detail.php?id=1",
            "https://vod.test/detail.php?id=2",
            "https://vod.test/show.101.html",
            "https://vod.test/show.202.html",
            "/play/index.html?vid=77&ep=3#comments",
        ]
        .into_iter()
        .map(|url| {
            n.normalize(
                RawRecord {
                    url: Some(url.into()),
                    ..raw()
                },
                Utc::now(),
            )
            .unwrap()
            .id
        })
        .collect();
        assert_eq!(
            ids,
            vec![
                "vod_detail_id_1",
                "vod_detail_id_2",
                "vod_show_101",
                "vod_show_202",
                "vod_index_vid_77_ep_3",
            ]
        );
    }

    #[test]
    fn title_only_records_get_unique_generated_ids() {
        let n = Normalizer::for_source(&source("https://drama.test/list"));
        let now = Utc::now();
        let a = n.normalize(raw(), now).unwrap();
        let b = n.normalize(raw(), now).unwrap();
        assert!(a.id.starts_with("dramahub_"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn records_without_identity_or_title_are_rejected() {
        let n = Normalizer::for_source(&source("https://drama.test/list"));
        let rejected = RawRecord {
            poster: Some("/p.jpg".into()),
            ..Default::default()
        };
        assert!(n.normalize(rejected, Utc::now()).is_none());

        let id_only = n
            .normalize(
                RawRecord {
                    native_id: Some("7".into()),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(id_only.title, "dramahub_7");
    }

    #[test]
    fn missing_year_and_rating_default_to_unknown_and_zero() {
        let n = Normalizer::for_source(&source("https://drama.test/list"));
        let record = n.normalize(raw(), Utc::now()).unwrap();
        assert_eq!(record.year, None);
        assert_eq!(record.rating, 0.0);
    }

    #[test]
    fn placeholder_records_are_synthetic() {
        let n = Normalizer::for_source(&source("https://drama.test/list"));
        let record = n
            .normalize(
                RawRecord {
                    placeholder: true,
                    ..raw()
                },
                Utc::now(),
            )
            .unwrap();
        assert!(record.is_synthetic());
    }

    #[test]
    fn urls_resolve_against_source_base() {
        let base = Url::parse("https://drama.test/list/page").unwrap();
        assert_eq!(resolve_url(Some(&base), "//img.test/a.jpg"), "https://img.test/a.jpg");
        assert_eq!(resolve_url(Some(&base), "/a.jpg"), "https://drama.test/a.jpg");
        assert_eq!(resolve_url(Some(&base), "http://x.test/a.jpg"), "http://x.test/a.jpg");
        assert_eq!(resolve_url(None, "/a.jpg"), "/a.jpg");
        assert_eq!(resolve_url(None, "//img.test/a.jpg"), "https://img.test/a.jpg");
        assert_eq!(resolve_url(Some(&base), "  "), "");
    }

    #[test]
    fn year_parsing_finds_plausible_years() {
        assert_eq!(parse_year("2021-05-01"), Some(2021));
        assert_eq!(parse_year("(1999)"), Some(1999));
        assert_eq!(parse_year("1200 episodes, 2008"), Some(2008));
        assert_eq!(parse_year("unknown"), None);
        assert_eq!(parse_year("20210501"), None);
    }

    #[test]
    fn rating_parsing_scales_and_clamps() {
        assert_eq!(parse_rating("8.5"), 8.5);
        assert_eq!(parse_rating("8.5/10"), 8.5);
        assert_eq!(parse_rating("85%"), 8.5);
        assert_eq!(parse_rating("Score: 72"), 7.2);
        assert_eq!(parse_rating("950"), 10.0);
        assert_eq!(parse_rating("n/a"), 0.0);
        assert_eq!(parse_rating("9."), 9.0);
    }
}
