use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::config::EngineConfig;
use crate::dataset::load_ratings_file;
use crate::error::CfResult;
use crate::evaluation::{EvalReport, Evaluator, ModelComparison};
use crate::inference::{Prediction, Predictor};
use crate::ranking::{Recommendation, RecommendationRanker};
use crate::rating::{Mode, Rating};
use crate::serialization::{load_into, save_store};
use crate::similarities::SimilarityEngine;
use crate::store::{DatasetStats, LoadReport, RatingStore};
use crate::utils::Neighbor;

/// Entry point for callers: one rating store behind a readers-writer lock,
/// with the similarity engine subscribed to its mutations.
///
/// Reads (similarity, predict, recommend, evaluate) share the lock and may
/// run concurrently; `upsert` and the loaders take it exclusively.
pub struct Engine {
    config: EngineConfig,
    store: RwLock<RatingStore>,
    sims: Arc<SimilarityEngine>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let sims = Arc::new(SimilarityEngine::new(config.centering, config.min_common));
        let mut store = RatingStore::new();
        store.subscribe(sims.clone());
        Self {
            config,
            store: RwLock::new(store),
            sims,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared access to the underlying store.
    pub fn read(&self) -> RwLockReadGuard<'_, RatingStore> {
        self.store.read()
    }

    pub fn upsert(&self, rating: Rating) -> CfResult<Option<f32>> {
        self.store.write().upsert(rating)
    }

    pub fn load_ratings<I>(&self, ratings: I) -> LoadReport
    where
        I: IntoIterator<Item = Rating>,
    {
        self.store.write().load_ratings(ratings)
    }

    /// Read a tab-separated ratings file and load it. Unparsable lines count
    /// as rejected alongside out-of-range records.
    pub fn load_ratings_file<P: AsRef<Path>>(&self, path: P) -> CfResult<LoadReport> {
        let parsed = load_ratings_file(path)?;
        let mut report = self.load_ratings(parsed.ratings);
        report.rejected += parsed.rejected;
        Ok(report)
    }

    pub fn get(&self, user_id: u32, item_id: u32) -> Option<f32> {
        self.store.read().get(user_id, item_id)
    }

    pub fn mean_rating(&self, mode: Mode, id: u32) -> CfResult<f32> {
        self.store.read().mean_rating(mode, id)
    }

    pub fn stats(&self) -> DatasetStats {
        self.store.read().stats()
    }

    pub fn similarity(&self, a: u32, b: u32, mode: Mode) -> f32 {
        let store = self.store.read();
        self.sims.similarity(&store, a, b, mode)
    }

    pub fn neighbors(&self, entity: u32, mode: Mode, k: usize) -> Vec<Neighbor> {
        let store = self.store.read();
        self.sims.neighbors(&store, entity, mode, k)
    }

    pub fn predict(&self, user_id: u32, item_id: u32, mode: Mode, k: usize) -> CfResult<Prediction> {
        let store = self.store.read();
        Predictor::new(&store, &self.sims).predict(user_id, item_id, mode, k)
    }

    pub fn predict_or_fallback(
        &self,
        user_id: u32,
        item_id: u32,
        mode: Mode,
        k: usize,
    ) -> CfResult<Prediction> {
        let store = self.store.read();
        Predictor::new(&store, &self.sims).predict_or_fallback(user_id, item_id, mode, k)
    }

    pub fn recommend(
        &self,
        user_id: u32,
        mode: Mode,
        k: usize,
        top_n: usize,
    ) -> CfResult<Vec<Recommendation>> {
        let store = self.store.read();
        RecommendationRanker::new(Predictor::new(&store, &self.sims)).recommend(user_id, mode, k, top_n)
    }

    /// [`Engine::recommend`] with `k` and `top_n` taken from the config.
    pub fn recommend_default(&self, user_id: u32, mode: Mode) -> CfResult<Vec<Recommendation>> {
        self.recommend(user_id, mode, self.config.k, self.config.top_n)
    }

    pub fn evaluate(&self, held_out: &[Rating], mode: Mode, k: usize) -> CfResult<EvalReport> {
        let store = self.store.read();
        Evaluator::new(Predictor::new(&store, &self.sims)).evaluate(held_out, mode, k)
    }

    pub fn compare(&self, held_out: &[Rating], k: usize) -> CfResult<ModelComparison> {
        let store = self.store.read();
        Evaluator::new(Predictor::new(&store, &self.sims)).compare(held_out, k)
    }

    /// Warm every neighbor list of `mode`, see [`SimilarityEngine::precompute`].
    pub fn precompute<F>(&self, mode: Mode, progress: F, cancel: &AtomicBool) -> CfResult<usize>
    where
        F: Fn(usize, usize) + Sync,
    {
        let store = self.store.read();
        self.sims
            .precompute(&store, mode, self.config.num_threads, progress, cancel)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P, model_name: &str) -> CfResult<PathBuf> {
        save_store(&self.store.read(), path, model_name)
    }

    /// Replace the current ratings with a saved snapshot.
    pub fn load<P: AsRef<Path>>(&self, path: P, model_name: &str) -> CfResult<()> {
        load_into(&mut self.store.write(), path, model_name)
    }
}
