use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use reelhub_core::{CategoryAggregate, CollectionStats, ContentRecord};
use reelhub_storage::{file_stem, write_atomic};
use tracing::{debug, info};

use crate::normalize::sanitize_id;
use crate::synthetic::SyntheticGenerator;

/// Builds one deduplicated, backfilled and shuffled aggregate per category.
///
/// Runs only after every source of the run has reported, so source completion order never
/// affects which duplicate survives beyond "first record in the input wins".
pub struct Aggregator {
    min_items: usize,
    generator: SyntheticGenerator,
    rng: StdRng,
}

impl Aggregator {
    pub fn new(min_items: usize, shuffle_seed: Option<u64>) -> Self {
        let rng = match shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            min_items,
            generator: SyntheticGenerator,
            rng,
        }
    }

    /// Item floor every category is backfilled up to.
    pub fn floor(&self) -> usize {
        self.min_items.saturating_mul(2)
    }

    pub fn aggregate(
        &mut self,
        categories: &BTreeSet<String>,
        records: Vec<ContentRecord>,
        now: DateTime<Utc>,
    ) -> Vec<CategoryAggregate> {
        let mut grouped: BTreeMap<String, (Vec<ContentRecord>, HashSet<String>)> = categories
            .iter()
            .map(|c| (c.clone(), Default::default()))
            .collect();

        let mut duplicates = 0usize;
        for record in records {
            let (items, seen) = grouped.entry(record.category.clone()).or_default();
            if seen.insert(record.id.clone()) {
                items.push(record);
            } else {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            debug!(duplicates, "dropped duplicate ids during aggregation");
        }

        let floor = self.floor();
        grouped
            .into_iter()
            .map(|(category, (mut items, mut seen))| {
                let backfilled = self.backfill(&category, &mut items, &mut seen, floor, now);
                items.shuffle(&mut self.rng);
                let stats = CollectionStats::from_records(&items);
                info!(
                    category = %category,
                    total = stats.total,
                    real = stats.real,
                    backfilled,
                    real_percentage = stats.real_percentage,
                    "category aggregated"
                );
                CategoryAggregate {
                    category,
                    items,
                    stats,
                    generated_at: now,
                }
            })
            .collect()
    }

    fn backfill(
        &mut self,
        category: &str,
        items: &mut Vec<ContentRecord>,
        seen: &mut HashSet<String>,
        floor: usize,
        now: DateTime<Utc>,
    ) -> usize {
        let prefix = format!("{}_backfill", sanitize_id(category));
        let source_name = format!("{category}-backfill");
        let mut added = 0;
        let mut index = 0;
        while items.len() < floor {
            let record =
                self.generator
                    .record(&prefix, &source_name, category, index, now, &mut self.rng);
            index += 1;
            if seen.insert(record.id.clone()) {
                items.push(record);
                added += 1;
            }
        }
        added
    }
}

pub fn snapshot_path(dir: &Path, category: &str) -> PathBuf {
    dir.join(format!("{}.json", file_stem(category)))
}

/// Full replace of the category's snapshot file.
pub async fn write_snapshot(dir: &Path, aggregate: &CategoryAggregate) -> anyhow::Result<PathBuf> {
    let path = snapshot_path(dir, &aggregate.category);
    let bytes = serde_json::to_vec_pretty(aggregate)
        .with_context(|| format!("serializing snapshot for category {}", aggregate.category))?;
    write_atomic(&path, &bytes)
        .await
        .with_context(|| format!("writing snapshot {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelhub_core::QualityTier;
    use tempfile::tempdir;

    fn real(id: &str, category: &str, source: &str) -> ContentRecord {
        let now = Utc::now();
        ContentRecord {
            id: id.to_string(),
            title: format!("Title {id}"),
            original_title: String::new(),
            url: String::new(),
            poster_url: String::new(),
            backdrop_url: String::new(),
            year: Some(2020),
            rating: 8.0,
            genres: vec![],
            source_name: source.to_string(),
            category: category.to_string(),
            quality_tier: QualityTier::Real,
            created_at: now,
            updated_at: now,
        }
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn sparse_category_is_backfilled_to_twice_the_threshold() {
        let mut records: Vec<_> = (0..25).map(|i| real(&format!("a_{i}"), "dramas", "a")).collect();
        records.extend((0..15).map(|i| real(&format!("b_{i}"), "dramas", "b")));

        let mut aggregator = Aggregator::new(200, Some(7));
        let out = aggregator.aggregate(&set(&["dramas"]), records, Utc::now());

        assert_eq!(out.len(), 1);
        let dramas = &out[0];
        assert!(dramas.items.len() >= 400);
        assert_eq!(dramas.stats.real, 40);
        assert_eq!(dramas.stats.total, dramas.items.len());
        assert_eq!(dramas.stats.mock, dramas.items.len() - 40);
        assert_eq!(dramas.stats.real_percentage, 10.0);
    }

    #[test]
    fn ids_are_unique_and_first_seen_wins() {
        let mut first = real("x_1", "movies", "x");
        first.title = "first".into();
        let mut second = real("x_1", "movies", "y");
        second.title = "second".into();
        let records = vec![first, second, real("x_2", "movies", "x")];

        let mut aggregator = Aggregator::new(1, None);
        let out = aggregator.aggregate(&set(&["movies"]), records, Utc::now());
        let movies = &out[0];
        let ids: HashSet<_> = movies.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), movies.items.len());
        assert_eq!(movies.items.len(), 2);
        let kept = movies.items.iter().find(|r| r.id == "x_1").unwrap();
        assert_eq!(kept.title, "first");
    }

    #[test]
    fn empty_categories_still_get_an_aggregate() {
        let mut aggregator = Aggregator::new(5, Some(1));
        let out = aggregator.aggregate(&set(&["anime", "variety"]), Vec::new(), Utc::now());
        assert_eq!(out.len(), 2);
        for aggregate in &out {
            assert_eq!(aggregate.items.len(), 10);
            assert_eq!(aggregate.stats.real_percentage, 0.0);
            assert!(aggregate.items.iter().all(ContentRecord::is_synthetic));
        }
    }

    #[test]
    fn backfill_skips_ids_already_present() {
        let mut clash = real("dramas_backfill_synthetic_0", "dramas", "a");
        clash.title = "kept".into();
        let mut aggregator = Aggregator::new(2, Some(3));
        let out = aggregator.aggregate(&set(&["dramas"]), vec![clash], Utc::now());
        let items = &out[0].items;
        assert_eq!(items.len(), 4);
        let ids: HashSet<_> = items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn shuffle_is_a_permutation_and_seed_reproducible() {
        let records: Vec<_> = (0..50).map(|i| real(&format!("m_{i}"), "movies", "m")).collect();
        let input_ids: BTreeSet<_> = records.iter().map(|r| r.id.clone()).collect();
        let now = Utc::now();

        let a = Aggregator::new(10, Some(42)).aggregate(&set(&["movies"]), records.clone(), now);
        let b = Aggregator::new(10, Some(42)).aggregate(&set(&["movies"]), records, now);

        let output_ids: BTreeSet<_> = a[0].items.iter().map(|r| r.id.clone()).collect();
        assert_eq!(output_ids, input_ids);
        assert_eq!(a[0].items.len(), 50);

        let order_a: Vec<_> = a[0].items.iter().map(|r| r.id.as_str()).collect();
        let order_b: Vec<_> = b[0].items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order_a, order_b);
        let sorted: Vec<_> = (0..50).map(|i| format!("m_{i}")).collect();
        assert_ne!(order_a, sorted.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn snapshot_is_replaced_wholesale() {
        let dir = tempdir().expect("tempdir");
        let mut aggregator = Aggregator::new(1, Some(9));
        let now = Utc::now();

        let batch = |ids: &[&str]| -> Vec<ContentRecord> {
            ids.iter().map(|id| real(id, "anime", "a")).collect()
        };

        let first = aggregator.aggregate(&set(&["anime"]), batch(&["a_1", "a_2", "a_3"]), now);
        let path = write_snapshot(dir.path(), &first[0]).await.unwrap();
        let second = aggregator.aggregate(&set(&["anime"]), batch(&["a_9", "a_8"]), now);
        write_snapshot(dir.path(), &second[0]).await.unwrap();

        let stored: CategoryAggregate =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored.items.len(), 2);
        assert!(stored.items.iter().all(|r| r.id == "a_9" || r.id == "a_8"));
        assert_eq!(path, snapshot_path(dir.path(), "anime"));
    }
}
