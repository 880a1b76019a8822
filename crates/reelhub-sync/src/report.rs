//! Run summaries for operators: `run_summary.json` plus a markdown brief per run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reelhub_core::{CollectionStats, QualityTier};
use reelhub_storage::write_atomic;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::orchestrator::{Served, SourceOutcome};

pub const SUMMARY_FILE: &str = "run_summary.json";
pub const REPORT_FILE: &str = "report.md";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub source: String,
    pub category: String,
    pub served: Served,
    pub tier: QualityTier,
    pub item_count: usize,
    pub real_count: usize,
    pub attempts: u32,
    pub failed_attempts: u32,
    pub endpoint: Option<String>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl From<&SourceOutcome> for SourceReport {
    fn from(outcome: &SourceOutcome) -> Self {
        Self {
            source: outcome.source.clone(),
            category: outcome.category.clone(),
            served: outcome.served,
            tier: outcome.tier,
            item_count: outcome.item_count,
            real_count: outcome.real_count(),
            attempts: outcome.attempts,
            failed_attempts: outcome.failed_attempts,
            endpoint: outcome.endpoint.clone(),
            duration_ms: outcome.duration_ms,
            error: outcome.error.clone(),
        }
    }
}

/// What one incremental collection looked like after this run's append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionReport {
    pub name: String,
    /// Tier counts of this run's aggregate (snapshot), not of the stored collection.
    pub stats: CollectionStats,
    pub added: usize,
    pub stored_total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub sources: Vec<SourceReport>,
    pub served: BTreeMap<String, usize>,
    pub categories: Vec<CollectionReport>,
    pub global: CollectionReport,
    /// Tier counts across every category aggregate of the run.
    pub totals: CollectionStats,
}

impl RunSummary {
    /// Reduce per-source outcomes and per-collection results into one summary.
    pub fn reduce(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        outcomes: &[SourceOutcome],
        categories: Vec<CollectionReport>,
        global: CollectionReport,
    ) -> Self {
        let finished_at = Utc::now();
        let sources: Vec<SourceReport> = outcomes.iter().map(SourceReport::from).collect();
        let served = sources.iter().fold(BTreeMap::new(), |mut acc, s| {
            *acc.entry(served_label(s.served).to_string()).or_insert(0) += 1;
            acc
        });
        let totals = categories
            .iter()
            .fold(CollectionStats::default(), |mut acc, c| {
                acc.merge(&c.stats);
                acc
            });
        Self {
            run_id,
            started_at,
            finished_at,
            duration_ms: u64::try_from((finished_at - started_at).num_milliseconds()).unwrap_or(0),
            sources,
            served,
            categories,
            global,
            totals,
        }
    }

    pub fn degraded_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| {
            !matches!(
                s.served,
                Served::Cache | Served::Live | Served::CacheSizeFallback
            )
        })
    }

    pub fn render_markdown(&self) -> String {
        let mut lines = vec![
            "# ReelHub Run Report".to_string(),
            String::new(),
            format!("- Run ID: `{}`", self.run_id),
            format!("- Started: {}", self.started_at),
            format!("- Finished: {}", self.finished_at),
            format!("- Duration: {} ms", self.duration_ms),
            format!("- Sources: {}", self.sources.len()),
            format!(
                "- Items: {} (real {}, fallback {}, synthetic {}), real {:.1}%",
                self.totals.total,
                self.totals.real,
                self.totals.fallback,
                self.totals.mock,
                self.totals.real_percentage
            ),
            format!(
                "- Global collection: +{} new, {} stored",
                self.global.added, self.global.stored_total
            ),
            String::new(),
            "## Sources".to_string(),
        ];
        for s in &self.sources {
            lines.push(format!(
                "- {} ({}): {} via {}, {} items ({} real), attempts {} ({} failed){}",
                s.source,
                s.category,
                s.tier.as_str(),
                served_label(s.served),
                s.item_count,
                s.real_count,
                s.attempts,
                s.failed_attempts,
                s.error
                    .as_deref()
                    .map(|e| format!(", last error: {e}"))
                    .unwrap_or_default()
            ));
        }

        lines.push(String::new());
        lines.push("## Categories".to_string());
        for c in &self.categories {
            lines.push(format!(
                "- {}: {} items, real {:.1}%, +{} new, {} stored",
                c.name, c.stats.total, c.stats.real_percentage, c.added, c.stored_total
            ));
        }

        let degraded: Vec<_> = self.degraded_sources().map(|s| s.source.as_str()).collect();
        if !degraded.is_empty() {
            lines.push(String::new());
            lines.push("## Degraded".to_string());
            lines.push(format!("- {}", degraded.join(", ")));
        }
        lines.push(String::new());
        lines.join("\n")
    }

    pub fn run_dir(&self, reports_root: &Path) -> PathBuf {
        reports_root.join(self.run_id.to_string())
    }

    /// Write `run_summary.json` and `report.md` under `<reports_root>/<run_id>/`.
    pub async fn write(&self, reports_root: &Path) -> Result<PathBuf> {
        let dir = self.run_dir(reports_root);
        let json = serde_json::to_vec_pretty(self).context("serializing run summary")?;
        write_atomic(&dir.join(SUMMARY_FILE), &json)
            .await
            .with_context(|| format!("writing {SUMMARY_FILE} for run {}", self.run_id))?;
        write_atomic(&dir.join(REPORT_FILE), self.render_markdown().as_bytes())
            .await
            .with_context(|| format!("writing {REPORT_FILE} for run {}", self.run_id))?;
        Ok(dir)
    }
}

pub fn served_label(served: Served) -> &'static str {
    match served {
        Served::Cache => "cache",
        Served::Live => "live",
        Served::CacheSizeFallback => "cache-size-fallback",
        Served::StaleCache => "stale-cache",
        Served::SyntheticCache => "synthetic-cache",
        Served::Synthetic => "synthetic",
        Served::Aborted => "aborted",
    }
}

/// Markdown digest of the most recent `runs` run summaries under `reports_root`.
pub fn report_recent_markdown(runs: usize, reports_root: &Path) -> Result<String> {
    let mut summaries = Vec::new();
    let entries: Vec<std::fs::DirEntry> = match std::fs::read_dir(reports_root) {
        Ok(entries) => entries.filter_map(|e| e.ok()).collect(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => {
            return Err(err).with_context(|| format!("reading {}", reports_root.display()))
        }
    };
    for entry in entries {
        if !entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
            continue;
        }
        let path = entry.path().join(SUMMARY_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping run without summary");
                continue;
            }
        };
        let summary: RunSummary = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        summaries.push((entry.path(), summary));
    }
    summaries.sort_by(|a, b| b.1.started_at.cmp(&a.1.started_at));

    let mut lines = vec!["# ReelHub Recent Runs".to_string(), String::new()];
    if summaries.is_empty() {
        lines.push("No runs recorded yet.".to_string());
        lines.push(String::new());
    }
    for (dir, summary) in summaries.into_iter().take(runs.max(1)) {
        lines.push(format!("## Run `{}`", summary.run_id));
        lines.push(format!("- started: {}", summary.started_at));
        lines.push(format!(
            "- items: {}, real {:.1}%",
            summary.totals.total, summary.totals.real_percentage
        ));
        lines.push(format!(
            "- sources: {} ({} degraded)",
            summary.sources.len(),
            summary.degraded_sources().count()
        ));
        lines.push(format!(
            "- global: +{} new, {} stored",
            summary.global.added, summary.global.stored_total
        ));
        let report_path = dir.join(REPORT_FILE);
        if report_path.exists() {
            lines.push(format!("- report: `{}`", report_path.display()));
        }
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn outcome(source: &str, served: Served, tier: QualityTier, items: usize) -> SourceOutcome {
        SourceOutcome {
            source: source.to_string(),
            category: "movies".to_string(),
            served,
            tier,
            records: Vec::new(),
            item_count: items,
            attempts: 3,
            failed_attempts: if served == Served::Live { 0 } else { 3 },
            endpoint: Some("https://a.test".into()),
            started_at: Utc::now(),
            duration_ms: 12,
            error: None,
        }
    }

    fn collection(name: &str, real: usize, mock: usize) -> CollectionReport {
        let mut stats = CollectionStats {
            total: real + mock,
            real,
            fallback: 0,
            mock,
            real_percentage: 0.0,
        };
        stats.recompute_percentage();
        CollectionReport {
            name: name.to_string(),
            stats,
            added: real + mock,
            stored_total: real + mock,
        }
    }

    fn summary() -> RunSummary {
        let outcomes = vec![
            outcome("good", Served::Live, QualityTier::Real, 10),
            outcome("bad", Served::Synthetic, QualityTier::Synthetic, 20),
        ];
        RunSummary::reduce(
            Uuid::new_v4(),
            Utc::now(),
            &outcomes,
            vec![collection("movies", 10, 30), collection("anime", 0, 40)],
            collection("all", 10, 70),
        )
    }

    #[test]
    fn reduce_totals_categories_and_counts_served_rungs() {
        let s = summary();
        assert_eq!(s.totals.total, 80);
        assert_eq!(s.totals.real, 10);
        assert_eq!(s.totals.real_percentage, 12.5);
        assert_eq!(s.served.get("live"), Some(&1));
        assert_eq!(s.served.get("synthetic"), Some(&1));
        let degraded: Vec<_> = s.degraded_sources().map(|d| d.source.as_str()).collect();
        assert_eq!(degraded, vec!["bad"]);
    }

    #[test]
    fn markdown_surfaces_quality_and_degradation() {
        let md = summary().render_markdown();
        assert!(md.starts_with("# ReelHub Run Report"));
        assert!(md.contains("real 12.5%"));
        assert!(md.contains("- bad (movies): synthetic via synthetic"));
        assert!(md.contains("## Degraded"));
    }

    #[tokio::test]
    async fn written_runs_feed_the_recent_digest() {
        let dir = tempdir().expect("tempdir");
        let first = summary();
        first.write(dir.path()).await.unwrap();
        let second = summary();
        let run_dir = second.write(dir.path()).await.unwrap();
        assert!(run_dir.join(SUMMARY_FILE).exists());
        assert!(run_dir.join(REPORT_FILE).exists());

        let digest = report_recent_markdown(1, dir.path()).unwrap();
        assert!(digest.contains(&second.run_id.to_string()));
        assert!(!digest.contains(&first.run_id.to_string()));

        let both = report_recent_markdown(5, dir.path()).unwrap();
        assert_eq!(both.matches("## Run `").count(), 2);
    }

    #[test]
    fn digest_is_empty_before_the_first_run() {
        let dir = tempdir().expect("tempdir");
        let digest = report_recent_markdown(5, &dir.path().join("reports")).unwrap();
        assert!(digest.starts_with("# ReelHub Recent Runs"));
        assert!(digest.contains("No runs recorded yet."));
        assert_eq!(digest.matches("## Run `").count(), 0);
    }
}
