use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use fxhash::FxHashSet;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::Centering;
use crate::error::{CfError, CfResult};
use crate::rating::Mode;
use crate::sparse::co_rated;
use crate::store::{RatingObserver, RatingStore};
use crate::utils::{create_thread_pool, encode_pair, Neighbor};

#[derive(Clone, Copy, Debug)]
struct CachedSim {
    sim: f32,
    reset: u64,
    // generations of the (smaller, larger) ids at compute time
    gens: (u64, u64),
}

#[derive(Debug)]
struct CachedNeighbors {
    epoch: u64,
    neighbors: Arc<Vec<Neighbor>>,
}

/// Cosine similarities between users or between items, restricted to the
/// co-rated dimensions, with memoized pairs and neighbor lists.
///
/// Cache validity is tracked with counters instead of in-place edits:
/// every entity has a generation bumped whenever one of its ratings changes,
/// and each mode has an epoch bumped on any change at all. Pair entries
/// remember the generations of their two entities (plus a reset counter for
/// wholesale changes), neighbor lists remember the epoch. A stale entry is
/// simply treated as missing and replaced whole.
#[derive(Debug)]
pub struct SimilarityEngine {
    centering: Centering,
    min_common: usize,
    // all per-mode arrays are indexed by `Mode::index`
    generations: [DashMap<u32, u64>; 2],
    epochs: [AtomicU64; 2],
    // bumped only by `clear`, when generations no longer describe the store
    resets: AtomicU64,
    pair_cache: [DashMap<u64, CachedSim>; 2],
    neighbor_cache: [DashMap<u32, CachedNeighbors>; 2],
}

pub(crate) fn compute_cosine(prod: f64, sum_squ1: f64, sum_squ2: f64) -> f32 {
    if prod == 0.0 || sum_squ1 == 0.0 || sum_squ2 == 0.0 {
        0.0
    } else {
        let norm = sum_squ1.sqrt() * sum_squ2.sqrt();
        (prod / norm).clamp(-1.0, 1.0) as f32
    }
}

/// Sort neighbors by similarity descending, lower id first on ties.
pub(crate) fn sort_neighbors(neighbors: &mut [Neighbor]) {
    neighbors.sort_unstable_by(|a, b| {
        b.sim
            .partial_cmp(&a.sim)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new(Centering::default(), 1)
    }
}

impl SimilarityEngine {
    pub fn new(centering: Centering, min_common: usize) -> Self {
        Self {
            centering,
            min_common: min_common.max(1),
            generations: Default::default(),
            epochs: Default::default(),
            resets: AtomicU64::new(0),
            pair_cache: Default::default(),
            neighbor_cache: Default::default(),
        }
    }

    #[inline]
    fn generation(&self, mode: Mode, id: u32) -> u64 {
        self.generations[mode.index()]
            .get(&id)
            .map_or(0, |g| *g.value())
    }

    #[inline]
    fn epoch(&self, mode: Mode) -> u64 {
        self.epochs[mode.index()].load(AtomicOrdering::Acquire)
    }

    fn bump(&self, mode: Mode, id: u32) {
        *self.generations[mode.index()].entry(id).or_insert(0) += 1;
    }

    /// Similarity between two users or two items.
    ///
    /// Uses the adjusted cosine when centering is `Mean`:
    ///
    /// sim(a, b) = Σ (r_a,i − μ_a)(r_b,i − μ_b) / (‖r_a − μ_a‖ · ‖r_b − μ_b‖)
    ///
    /// where i runs over the co-rated set only and μ is each entity's mean over
    /// all of its ratings. An empty overlap, fewer than `min_common` co-rated
    /// dimensions or a zero norm all yield 0.
    pub fn similarity(&self, store: &RatingStore, a: u32, b: u32, mode: Mode) -> f32 {
        if let Some(sim) = self.cached_similarity(a, b, mode) {
            return sim;
        }

        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let reset = self.resets.load(AtomicOrdering::Acquire);
        let gens = (self.generation(mode, lo), self.generation(mode, hi));
        // canonical order keeps the result bit-identical for (a, b) and (b, a)
        let sim = self.compute_similarity(store, lo, hi, mode);
        self.pair_cache[mode.index()].insert(encode_pair(lo, hi), CachedSim { sim, reset, gens });
        sim
    }

    /// Memoized similarity of a pair, if neither entity changed since it was
    /// computed.
    fn cached_similarity(&self, a: u32, b: u32, mode: Mode) -> Option<f32> {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let entry = self.pair_cache[mode.index()].get(&encode_pair(lo, hi))?;
        let fresh = entry.reset == self.resets.load(AtomicOrdering::Acquire)
            && entry.gens == (self.generation(mode, lo), self.generation(mode, hi));
        fresh.then_some(entry.sim)
    }

    fn compute_similarity(&self, store: &RatingStore, a: u32, b: u32, mode: Mode) -> f32 {
        let (Some(row_a), Some(row_b)) = (store.row(mode, a), store.row(mode, b)) else {
            return 0.0;
        };
        let (mean_a, mean_b) = match self.centering {
            Centering::Mean => match (store.mean_rating(mode, a), store.mean_rating(mode, b)) {
                (Ok(ma), Ok(mb)) => (ma as f64, mb as f64),
                _ => return 0.0,
            },
            Centering::None => (0.0, 0.0),
        };

        let mut prod = 0.0f64;
        let mut sum_sq_a = 0.0f64;
        let mut sum_sq_b = 0.0f64;
        let mut count = 0usize;
        for (_, va, vb) in co_rated(row_a, row_b) {
            let da = va as f64 - mean_a;
            let db = vb as f64 - mean_b;
            prod += da * db;
            sum_sq_a += da * da;
            sum_sq_b += db * db;
            count += 1;
        }

        if count < self.min_common {
            return 0.0;
        }
        compute_cosine(prod, sum_sq_a, sum_sq_b)
    }

    /// Entities of the same mode sharing at least one co-rated dimension
    /// with `entity`, excluding itself.
    fn candidates(store: &RatingStore, entity: u32, mode: Mode) -> Vec<u32> {
        let Some(row) = store.row(mode, entity) else {
            return Vec::new();
        };
        let mut seen: FxHashSet<u32> = FxHashSet::default();
        for dim in row.cols() {
            if let Some(column) = store.row(mode.other(), dim) {
                seen.extend(column.cols().filter(|&other| other != entity));
            }
        }
        let mut candidates: Vec<u32> = seen.into_iter().collect();
        candidates.sort_unstable();
        candidates
    }

    fn compute_neighbors(&self, store: &RatingStore, entity: u32, mode: Mode) -> Vec<Neighbor> {
        let mut neighbors: Vec<Neighbor> = Self::candidates(store, entity, mode)
            .into_par_iter()
            .filter_map(|other| {
                let sim = self.similarity(store, entity, other, mode);
                (sim > 0.0).then_some(Neighbor { id: other, sim })
            })
            .collect();
        sort_neighbors(&mut neighbors);
        neighbors
    }

    /// Every positively similar entity, best first. Cached per entity until
    /// the next mutation of the store.
    pub fn ranked_neighbors(
        &self,
        store: &RatingStore,
        entity: u32,
        mode: Mode,
    ) -> Arc<Vec<Neighbor>> {
        let epoch = self.epoch(mode);
        let cache = &self.neighbor_cache[mode.index()];
        if let Some(entry) = cache.get(&entity) {
            if entry.epoch == epoch {
                return Arc::clone(&entry.neighbors);
            }
        }

        let neighbors = Arc::new(self.compute_neighbors(store, entity, mode));
        cache.insert(
            entity,
            CachedNeighbors {
                epoch,
                neighbors: Arc::clone(&neighbors),
            },
        );
        neighbors
    }

    /// Top-k entities by similarity, ties broken by lower id. Excludes the
    /// entity itself and anything with similarity <= 0.
    pub fn neighbors(
        &self,
        store: &RatingStore,
        entity: u32,
        mode: Mode,
        k: usize,
    ) -> Vec<Neighbor> {
        let ranked = self.ranked_neighbors(store, entity, mode);
        ranked.iter().take(k).copied().collect()
    }

    /// Build the neighbor list of every entity of `mode` on a dedicated pool.
    ///
    /// `progress` receives `(done, total)` after each entity. The job stops with
    /// `CfError::Cancelled` once `cancel` is set; nothing is published unless
    /// the whole batch completes.
    ///
    /// # Returns
    /// Number of neighbor lists published.
    pub fn precompute<F>(
        &self,
        store: &RatingStore,
        mode: Mode,
        num_threads: usize,
        progress: F,
        cancel: &AtomicBool,
    ) -> CfResult<usize>
    where
        F: Fn(usize, usize) + Sync,
    {
        let start = Instant::now();
        let pool = create_thread_pool(num_threads)?;
        let epoch = self.epoch(mode);
        let ids = store.entity_ids(mode);
        let total = ids.len();
        let done = AtomicUsize::new(0);

        let computed: Vec<(u32, Vec<Neighbor>)> = pool.install(|| {
            ids.par_iter()
                .map(|&id| {
                    if cancel.load(AtomicOrdering::Relaxed) {
                        return Err(CfError::Cancelled);
                    }
                    let neighbors = self.compute_neighbors(store, id, mode);
                    let n = done.fetch_add(1, AtomicOrdering::Relaxed) + 1;
                    progress(n, total);
                    Ok((id, neighbors))
                })
                .collect::<CfResult<Vec<_>>>()
        })?;

        let cache = &self.neighbor_cache[mode.index()];
        for (id, neighbors) in computed {
            cache.insert(
                id,
                CachedNeighbors {
                    epoch,
                    neighbors: Arc::new(neighbors),
                },
            );
        }

        info!(
            %mode,
            lists = total,
            pairs = self.cached_pairs(mode),
            "precomputed neighbors in {:.4?}",
            start.elapsed()
        );
        Ok(total)
    }

    /// Number of memoized pair similarities for `mode`.
    pub fn cached_pairs(&self, mode: Mode) -> usize {
        self.pair_cache[mode.index()].len()
    }

    pub fn clear(&self) {
        self.resets.fetch_add(1, AtomicOrdering::AcqRel);
        for mode in [Mode::User, Mode::Item] {
            self.epochs[mode.index()].fetch_add(1, AtomicOrdering::AcqRel);
            self.pair_cache[mode.index()].clear();
            self.neighbor_cache[mode.index()].clear();
        }
    }
}

impl RatingObserver for SimilarityEngine {
    fn on_rating_changed(&self, user_id: u32, item_id: u32) {
        self.bump(Mode::User, user_id);
        self.bump(Mode::Item, item_id);
        // any neighbor list may contain one of the two entities
        for epoch in &self.epochs {
            epoch.fetch_add(1, AtomicOrdering::AcqRel);
        }
        debug!(user_id, item_id, "invalidated similarities");
    }

    fn on_reset(&self) {
        self.clear();
        debug!("reset similarity caches");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::Rating;
    use crate::store::store_from;

    fn scenario_store() -> RatingStore {
        store_from(&[(1, 10, 5.0), (2, 10, 5.0), (1, 20, 1.0), (2, 20, 1.0), (3, 10, 5.0)])
    }

    #[test]
    fn test_adjusted_cosine() {
        let store = scenario_store();
        let engine = SimilarityEngine::default();
        assert!((engine.similarity(&store, 1, 2, Mode::User) - 1.0).abs() < 1e-6);
        // user 3 has no deviation from its own mean
        assert_eq!(engine.similarity(&store, 1, 3, Mode::User), 0.0);
        // items: every rating equals the item mean
        assert_eq!(engine.similarity(&store, 10, 20, Mode::Item), 0.0);
    }

    #[test]
    fn test_raw_cosine() {
        let store = scenario_store();
        let engine = SimilarityEngine::new(Centering::None, 1);
        assert!((engine.similarity(&store, 1, 3, Mode::User) - 1.0).abs() < 1e-6);
        // (5*1 + 5*1) / (sqrt(50) * sqrt(2)) = 1
        assert!((engine.similarity(&store, 10, 20, Mode::Item) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let store = store_from(&[
            (1, 1, 4.0),
            (1, 2, 2.0),
            (1, 3, 5.0),
            (2, 1, 3.0),
            (2, 2, 1.0),
            (2, 3, 4.0),
            (3, 1, 1.0),
            (3, 3, 2.0),
            (4, 2, 5.0),
            (4, 3, 3.0),
        ]);
        let engine = SimilarityEngine::default();
        for mode in [Mode::User, Mode::Item] {
            let ids = store.entity_ids(mode);
            for &a in &ids {
                for &b in &ids {
                    let ab = engine.similarity(&store, a, b, mode);
                    let fresh = SimilarityEngine::default();
                    let ba = fresh.similarity(&store, b, a, mode);
                    assert_eq!(ab.to_bits(), ba.to_bits(), "{mode} {a} {b}");
                    assert!((-1.0..=1.0).contains(&ab));
                }
            }
        }
    }

    #[test]
    fn test_no_overlap_is_zero() {
        let store = store_from(&[(1, 1, 4.0), (2, 2, 3.0)]);
        let engine = SimilarityEngine::default();
        assert_eq!(engine.similarity(&store, 1, 2, Mode::User), 0.0);
        assert_eq!(engine.similarity(&store, 1, 99, Mode::User), 0.0);
        assert!(engine.neighbors(&store, 1, Mode::User, 5).is_empty());
    }

    #[test]
    fn test_min_common() {
        let store = scenario_store();
        let engine = SimilarityEngine::new(Centering::Mean, 3);
        assert_eq!(engine.similarity(&store, 1, 2, Mode::User), 0.0);
    }

    #[test]
    fn test_neighbors_order_and_exclusions() {
        // user 1 deviations: +1, -1, 0 around mean 3
        let store = store_from(&[
            (1, 1, 4.0),
            (1, 2, 2.0),
            (1, 3, 3.0),
            // same pattern as user 1 -> sim 1
            (3, 1, 5.0),
            (3, 2, 3.0),
            (3, 3, 4.0),
            (2, 1, 5.0),
            (2, 2, 1.0),
            (2, 3, 3.0),
            // opposite pattern -> sim -1
            (4, 1, 2.0),
            (4, 2, 4.0),
            (4, 3, 3.0),
        ]);
        let engine = SimilarityEngine::default();
        let nbs = engine.neighbors(&store, 1, Mode::User, 10);
        let ids: Vec<u32> = nbs.iter().map(|n| n.id).collect();
        // 2 and 3 tie at 1.0, lower id first; 4 is negative and dropped
        assert_eq!(ids, vec![2, 3]);
        assert!(nbs.iter().all(|n| n.sim > 0.0 && n.id != 1));

        let top1 = engine.neighbors(&store, 1, Mode::User, 1);
        assert_eq!(top1.len(), 1);
        assert_eq!(top1[0].id, 2);
        assert!(engine.neighbors(&store, 1, Mode::User, 0).is_empty());
    }

    #[test]
    fn test_invalidation_on_upsert() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Arc::new(SimilarityEngine::default());
        let mut store = scenario_store();
        store.subscribe(engine.clone());

        assert!((engine.similarity(&store, 1, 2, Mode::User) - 1.0).abs() < 1e-6);
        assert_eq!(engine.neighbors(&store, 1, Mode::User, 5).len(), 1);

        // user 2 now rates everything 5: no deviation left
        store.upsert(Rating::new(2, 20, 5.0, None)?)?;
        assert_eq!(engine.similarity(&store, 2, 1, Mode::User), 0.0);
        assert!(engine.neighbors(&store, 1, Mode::User, 5).is_empty());
        Ok(())
    }

    #[test]
    fn test_pair_cache_survives_unrelated_upsert() -> Result<(), Box<dyn std::error::Error>> {
        let engine = Arc::new(SimilarityEngine::default());
        let mut store = scenario_store();
        store.subscribe(engine.clone());

        let sim = engine.similarity(&store, 1, 2, Mode::User);
        assert_eq!(engine.cached_similarity(2, 1, Mode::User), Some(sim));

        // neither user 1 nor user 2
        store.upsert(Rating::new(9, 99, 4.0, None)?)?;
        assert_eq!(engine.cached_similarity(1, 2, Mode::User), Some(sim));

        store.upsert(Rating::new(2, 99, 4.0, None)?)?;
        assert_eq!(engine.cached_similarity(1, 2, Mode::User), None);

        engine.similarity(&store, 1, 2, Mode::User);
        assert!(engine.cached_similarity(1, 2, Mode::User).is_some());
        store.load_ratings(vec![Rating::new(5, 10, 3.0, None)?]);
        assert_eq!(engine.cached_similarity(1, 2, Mode::User), None);
        Ok(())
    }

    #[test]
    fn test_precompute_and_cancel() -> Result<(), Box<dyn std::error::Error>> {
        let store = scenario_store();
        let engine = SimilarityEngine::default();
        let calls = AtomicUsize::new(0);
        let cancel = AtomicBool::new(false);

        let n = engine.precompute(
            &store,
            Mode::User,
            2,
            |done, total| {
                assert!(done <= total);
                calls.fetch_add(1, AtomicOrdering::SeqCst);
            },
            &cancel,
        )?;
        assert_eq!(n, 3);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
        assert!(engine.cached_pairs(Mode::User) > 0);

        cancel.store(true, AtomicOrdering::SeqCst);
        let result = engine.precompute(&store, Mode::Item, 1, |_, _| {}, &cancel);
        assert!(matches!(result, Err(CfError::Cancelled)));
        Ok(())
    }
}
