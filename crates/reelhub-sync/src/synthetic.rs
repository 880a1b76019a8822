use chrono::{DateTime, Datelike, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use reelhub_core::{ContentRecord, QualityTier};

struct Vocabulary {
    adjectives: &'static [&'static str],
    nouns: &'static [&'static str],
    genres: &'static [&'static str],
    earliest_year: i32,
}

static MOVIES: Vocabulary = Vocabulary {
    adjectives: &["Silent", "Crimson", "Last", "Hidden", "Burning", "Midnight", "Broken", "Golden"],
    nouns: &["Horizon", "Witness", "Harbor", "Empire", "Echo", "Frontier", "Promise", "Signal"],
    genres: &["Action", "Drama", "Thriller", "Comedy", "Sci-Fi", "Romance", "Crime"],
    earliest_year: 1980,
};

static DRAMAS: Vocabulary = Vocabulary {
    adjectives: &["Endless", "Secret", "Falling", "Distant", "Fated", "Bright", "Quiet", "Lost"],
    nouns: &["Season", "Palace", "Letters", "Family", "Hospital", "Court", "Spring", "Vows"],
    genres: &["Drama", "Romance", "Family", "Historical", "Medical", "Legal", "Mystery"],
    earliest_year: 2000,
};

static ANIME: Vocabulary = Vocabulary {
    adjectives: &["Astral", "Shining", "Iron", "Wandering", "Phantom", "Azure", "Tiny", "Blade"],
    nouns: &["Academy", "Knight", "Spirit", "Guild", "Dragon", "Voyage", "Familiar", "Festival"],
    genres: &["Action", "Fantasy", "Slice of Life", "Mecha", "Adventure", "Isekai", "Sports"],
    earliest_year: 1995,
};

static VARIETY: Vocabulary = Vocabulary {
    adjectives: &["Weekend", "Ultimate", "Happy", "Running", "Late Night", "Golden", "Super", "Hidden"],
    nouns: &["Challenge", "Camp", "Kitchen", "Stage", "Trip", "Show", "Talk", "Quest"],
    genres: &["Reality", "Talk Show", "Music", "Game Show", "Travel", "Cooking"],
    earliest_year: 2010,
};

static DOCUMENTARY: Vocabulary = Vocabulary {
    adjectives: &["Wild", "Frozen", "Ancient", "Deep", "Living", "Untold", "Vanishing", "Urban"],
    nouns: &["Planet", "Oceans", "Cities", "Kingdoms", "Rivers", "Machines", "Voices", "Forests"],
    genres: &["Nature", "History", "Science", "Society", "Biography", "Travel"],
    earliest_year: 1990,
};

static GENERAL: Vocabulary = Vocabulary {
    adjectives: &["New", "Great", "Hidden", "Bright", "Final", "Grand", "Open", "True"],
    nouns: &["Story", "Journey", "Chapter", "World", "Light", "Road", "Dream", "Game"],
    genres: &["Drama", "Comedy", "Adventure", "Family", "Mystery"],
    earliest_year: 1990,
};

fn vocabulary_for(category: &str) -> &'static Vocabulary {
    let category = category.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| category.contains(n));
    if has(&["anime", "animation", "cartoon"]) {
        &ANIME
    } else if has(&["drama", "series", "tv"]) {
        &DRAMAS
    } else if has(&["variety", "show", "reality"]) {
        &VARIETY
    } else if has(&["doc"]) {
        &DOCUMENTARY
    } else if has(&["movie", "film", "cinema"]) {
        &MOVIES
    } else {
        &GENERAL
    }
}

/// Placeholder records with category-appropriate vocabulary and realistic rating/year ranges.
///
/// Ids are `"{prefix}_synthetic_{index}"`, so the same prefix and index always produce the
/// same id and repeated runs do not pile up new placeholder identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticGenerator;

impl SyntheticGenerator {
    pub fn synthetic_id(prefix: &str, index: usize) -> String {
        format!("{prefix}_synthetic_{index}")
    }

    pub fn record<R: Rng + ?Sized>(
        &self,
        prefix: &str,
        source_name: &str,
        category: &str,
        index: usize,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> ContentRecord {
        let vocab = vocabulary_for(category);
        let adjective = vocab.adjectives.choose(rng).copied().unwrap_or("Untitled");
        let noun = vocab.nouns.choose(rng).copied().unwrap_or("Feature");
        let genre_count = rng.gen_range(1..=2);
        let genres = vocab
            .genres
            .choose_multiple(rng, genre_count)
            .map(|g| g.to_string())
            .collect();
        let latest_year = now.year().max(vocab.earliest_year);
        let rating = f64::from(rng.gen_range(50..=95u8)) / 10.0;

        ContentRecord {
            id: Self::synthetic_id(prefix, index),
            title: format!("{adjective} {noun} {}", index + 1),
            original_title: String::new(),
            url: String::new(),
            poster_url: String::new(),
            backdrop_url: String::new(),
            year: Some(rng.gen_range(vocab.earliest_year..=latest_year)),
            rating,
            genres,
            source_name: source_name.to_string(),
            category: category.to_string(),
            quality_tier: QualityTier::Synthetic,
            created_at: now,
            updated_at: now,
        }
    }

    /// Exactly `count` records for a source, indices `0..count`.
    pub fn generate(&self, source_name: &str, category: &str, count: usize) -> Vec<ContentRecord> {
        let now = Utc::now();
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|i| self.record(source_name, source_name, category, i, now, &mut rng))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generates_exact_count_with_unique_stable_ids() {
        let records = SyntheticGenerator.generate("anime-api", "anime", 25);
        assert_eq!(records.len(), 25);
        let ids: HashSet<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), 25);
        assert_eq!(records[0].id, "anime-api_synthetic_0");
        assert!(records.iter().all(|r| r.is_synthetic() && r.category == "anime"));
    }

    #[test]
    fn values_stay_within_realistic_bounds() {
        let now = Utc::now();
        for record in SyntheticGenerator.generate("docs", "documentary", 200) {
            assert!((5.0..=9.5).contains(&record.rating));
            let year = record.year.unwrap();
            assert!((1990..=now.year()).contains(&year));
            assert!(!record.genres.is_empty());
            assert!(!record.title.is_empty());
        }
    }

    #[test]
    fn vocabulary_follows_category_names() {
        assert!(std::ptr::eq(vocabulary_for("Anime"), &ANIME));
        assert!(std::ptr::eq(vocabulary_for("korean-dramas"), &DRAMAS));
        assert!(std::ptr::eq(vocabulary_for("movies"), &MOVIES));
        assert!(std::ptr::eq(vocabulary_for("misc"), &GENERAL));
    }
}
