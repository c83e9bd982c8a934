use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use fxhash::FxHashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::error::CfResult;
use crate::rating::Rating;

/// Records read from a ratings file, plus how many lines were rejected.
#[derive(Clone, Debug, Default)]
pub struct ParsedRatings {
    pub ratings: Vec<Rating>,
    pub rejected: usize,
}

/// Read MovieLens `u.data`-style records: `user \t item \t rating \t timestamp`,
/// one per line. Blank lines are ignored; malformed or out-of-range records
/// are logged and counted, and reading carries on.
pub fn read_ratings<R: BufRead>(reader: R) -> CfResult<ParsedRatings> {
    let mut parsed = ParsedRatings::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match Rating::parse_tsv(&line, idx + 1) {
            Ok(rating) => parsed.ratings.push(rating),
            Err(e) => {
                warn!("skipping record: {e}");
                parsed.rejected += 1;
            }
        }
    }
    Ok(parsed)
}

pub fn load_ratings_file<P: AsRef<Path>>(path: P) -> CfResult<ParsedRatings> {
    let start = Instant::now();
    let path = path.as_ref();
    let file = File::open(path)?;
    let parsed = read_ratings(BufReader::new(file))?;
    info!(
        path = %path.display(),
        ratings = parsed.ratings.len(),
        rejected = parsed.rejected,
        "read ratings file in {:.4?}",
        start.elapsed()
    );
    Ok(parsed)
}

/// Drop ratings from users with fewer than `min_per_user` ratings and items
/// with fewer than `min_per_item`. Counts are taken once on the input, so a
/// survivor may fall below a threshold after the other side is filtered.
pub fn filter_min_ratings(ratings: &[Rating], min_per_user: usize, min_per_item: usize) -> Vec<Rating> {
    let mut user_counts: FxHashMap<u32, usize> = FxHashMap::default();
    let mut item_counts: FxHashMap<u32, usize> = FxHashMap::default();
    for r in ratings {
        *user_counts.entry(r.user_id).or_default() += 1;
        *item_counts.entry(r.item_id).or_default() += 1;
    }

    let filtered: Vec<Rating> = ratings
        .iter()
        .filter(|r| user_counts[&r.user_id] >= min_per_user && item_counts[&r.item_id] >= min_per_item)
        .copied()
        .collect();
    info!(
        before = ratings.len(),
        after = filtered.len(),
        min_per_user,
        min_per_item,
        "filtered sparse users and items"
    );
    filtered
}

/// Shuffle with a seeded RNG and split off `test_ratio` of the ratings as a
/// held-out set. Returns `(train, test)`; the same seed always yields the
/// same split.
pub fn train_test_split(ratings: &[Rating], test_ratio: f64, seed: u64) -> (Vec<Rating>, Vec<Rating>) {
    let mut shuffled = ratings.to_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let ratio = test_ratio.clamp(0.0, 1.0);
    let n_test = (shuffled.len() as f64 * ratio).round() as usize;
    let test = shuffled.split_off(shuffled.len() - n_test);
    (shuffled, test)
}
