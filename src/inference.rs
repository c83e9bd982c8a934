use serde::Serialize;

use crate::error::{CfError, CfResult};
use crate::rating::Mode;
use crate::similarities::SimilarityEngine;
use crate::store::RatingStore;
use crate::utils::clamp_rating;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub user_id: u32,
    pub item_id: u32,
    pub mode: Mode,
    pub rating: f32,
    /// Σ|sim| / k, in `[0, 1]`
    pub confidence: f32,
    /// Neighbor ids (users or items, depending on `mode`) that contributed.
    pub basis: Vec<u32>,
    /// Set when the value is a baseline mean rather than a neighborhood estimate.
    pub fallback: bool,
}

/// Mean-centered neighborhood prediction on top of a store and its
/// similarity engine. Cheap to construct; holds borrows only.
#[derive(Clone, Copy)]
pub struct Predictor<'a> {
    store: &'a RatingStore,
    sims: &'a SimilarityEngine,
}

impl<'a> Predictor<'a> {
    pub fn new(store: &'a RatingStore, sims: &'a SimilarityEngine) -> Self {
        Self { store, sims }
    }

    pub fn store(&self) -> &'a RatingStore {
        self.store
    }

    pub fn similarities(&self) -> &'a SimilarityEngine {
        self.sims
    }

    /// Predict the rating `user_id` would give `item_id`.
    ///
    /// In user mode the neighbors are the users most similar to `user_id`
    /// that rated `item_id`; in item mode they are the items most similar to
    /// `item_id` that `user_id` rated. Since the ranked neighbor list is sorted
    /// by similarity descending, it is scanned in order and the first `k`
    /// neighbors with a rating on the other side are kept.
    ///
    /// prediction = μ_target + Σ sim·(r_n − μ_n) / Σ |sim|, clamped to `[1, 5]`
    ///
    /// # Errors
    /// `CfError::NoPrediction` if no neighbor carries evidence.
    pub fn predict(
        &self,
        user_id: u32,
        item_id: u32,
        mode: Mode,
        k: usize,
    ) -> CfResult<Prediction> {
        let no_prediction = || CfError::NoPrediction { user_id, item_id };
        if k == 0 {
            return Err(no_prediction());
        }

        let (target, other) = match mode {
            Mode::User => (user_id, item_id),
            Mode::Item => (item_id, user_id),
        };
        let ranked = self.sims.ranked_neighbors(self.store, target, mode);

        let mut weighted_sum = 0.0f64;
        let mut sum_sims = 0.0f64;
        let mut basis = Vec::with_capacity(k.min(ranked.len()));
        for nb in ranked.iter() {
            let label = match mode {
                Mode::User => self.store.get(nb.id, other),
                Mode::Item => self.store.get(other, nb.id),
            };
            let Some(label) = label else {
                continue;
            };
            let nb_mean = self.store.mean_rating(mode, nb.id)?;
            weighted_sum += nb.sim as f64 * (label as f64 - nb_mean as f64);
            sum_sims += (nb.sim as f64).abs();
            basis.push(nb.id);
            if basis.len() == k {
                break;
            }
        }

        if basis.is_empty() || sum_sims == 0.0 {
            return Err(no_prediction());
        }

        let target_mean = self.store.mean_rating(mode, target)? as f64;
        let rating = clamp_rating((target_mean + weighted_sum / sum_sims) as f32);
        let confidence = (sum_sims / k as f64).min(1.0) as f32;

        Ok(Prediction {
            user_id,
            item_id,
            mode,
            rating,
            confidence,
            basis,
            fallback: false,
        })
    }

    /// Like [`Predictor::predict`], but on missing evidence returns a
    /// baseline: the mean of the other side first (item mean in user mode,
    /// user mean in item mode), then the target's own mean, then the global
    /// mean.
    ///
    /// # Errors
    /// `CfError::NoData` only if the store is empty.
    pub fn predict_or_fallback(
        &self,
        user_id: u32,
        item_id: u32,
        mode: Mode,
        k: usize,
    ) -> CfResult<Prediction> {
        match self.predict(user_id, item_id, mode, k) {
            Err(e) if e.is_insufficient_data() => {}
            other => return other,
        }

        let (first, second) = match mode {
            Mode::User => (self.store.item_mean(item_id), self.store.user_mean(user_id)),
            Mode::Item => (self.store.user_mean(user_id), self.store.item_mean(item_id)),
        };
        let baseline = first
            .or(second)
            .or_else(|_| self.store.global_mean())?;

        Ok(Prediction {
            user_id,
            item_id,
            mode,
            rating: clamp_rating(baseline),
            confidence: 0.0,
            basis: Vec::new(),
            fallback: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Centering;
    use crate::rating::Rating;
    use crate::store::store_from;

    fn scenario_store() -> RatingStore {
        store_from(&[(1, 10, 5.0), (2, 10, 5.0), (1, 20, 1.0), (2, 20, 1.0), (3, 10, 5.0)])
    }

    #[test]
    fn test_scenario_raw_cosine() -> Result<(), Box<dyn std::error::Error>> {
        let store = scenario_store();
        let sims = SimilarityEngine::new(Centering::None, 1);
        let predictor = Predictor::new(&store, &sims);

        let pred = predictor.predict(3, 20, Mode::User, 2)?;
        assert_eq!(pred.basis, vec![1, 2]);
        // 5 + (1·(1 − 3) + 1·(1 − 3)) / 2 = 3
        assert!((pred.rating - 3.0).abs() < 1e-6);
        assert!(pred.rating <= store.user_mean(3)?);
        assert!((pred.confidence - 1.0).abs() < 1e-6);
        assert!(!pred.fallback);
        Ok(())
    }

    #[test]
    fn test_scenario_adjusted_cosine() {
        // user 3 has a single rating, so it has no deviation to correlate on
        let store = scenario_store();
        let sims = SimilarityEngine::default();
        let predictor = Predictor::new(&store, &sims);
        assert!((sims.similarity(&store, 1, 2, Mode::User) - 1.0).abs() < 1e-6);
        assert!(matches!(
            predictor.predict(3, 20, Mode::User, 2),
            Err(CfError::NoPrediction { user_id: 3, item_id: 20 })
        ));
    }

    #[test]
    fn test_user_based_prediction() -> Result<(), Box<dyn std::error::Error>> {
        // user 1: 4, 2 around mean 3; user 2 shares the pattern and rated item 3
        let store = store_from(&[
            (1, 1, 4.0),
            (1, 2, 2.0),
            (2, 1, 5.0),
            (2, 2, 3.0),
            (2, 3, 5.0),
        ]);
        let sims = SimilarityEngine::default();
        let predictor = Predictor::new(&store, &sims);
        let pred = predictor.predict(1, 3, Mode::User, 5)?;
        // μ_2 = 13/3, so 3 + (5 − 13/3) = 3.6667
        assert!((pred.rating - (3.0 + 5.0 - 13.0 / 3.0)).abs() < 1e-5);
        assert_eq!(pred.basis, vec![2]);
        let sim = sims.similarity(&store, 1, 2, Mode::User);
        assert!((pred.confidence - sim / 5.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_item_based_prediction() -> Result<(), Box<dyn std::error::Error>> {
        // items 1 and 2 move together across users 1 and 2
        let store = store_from(&[
            (1, 1, 5.0),
            (1, 2, 4.0),
            (2, 1, 1.0),
            (2, 2, 2.0),
            (3, 1, 5.0),
        ]);
        let sims = SimilarityEngine::default();
        let predictor = Predictor::new(&store, &sims);
        assert!(sims.similarity(&store, 1, 2, Mode::Item) > 0.0);

        let pred = predictor.predict(3, 2, Mode::Item, 3)?;
        assert_eq!(pred.basis, vec![1]);
        // μ_item2 = 3, μ_item1 = 11/3, r_3,1 = 5
        assert!((pred.rating - (3.0 + 5.0 - 11.0 / 3.0)).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_prediction_is_clamped() -> Result<(), Box<dyn std::error::Error>> {
        let store = store_from(&[
            (1, 1, 5.0),
            (1, 2, 4.0),
            (2, 1, 5.0),
            (2, 2, 1.0),
            (2, 3, 5.0),
        ]);
        let sims = SimilarityEngine::default();
        let pred = Predictor::new(&store, &sims).predict(1, 3, Mode::User, 1)?;
        assert_eq!(pred.rating, 5.0);
        Ok(())
    }

    #[test]
    fn test_deterministic_and_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let sims = std::sync::Arc::new(SimilarityEngine::default());
        let mut store = store_from(&[
            (1, 1, 4.0),
            (1, 2, 2.0),
            (1, 4, 3.0),
            (2, 1, 5.0),
            (2, 2, 3.0),
            (2, 3, 5.0),
            (3, 1, 3.0),
            (3, 2, 1.0),
            (3, 3, 2.0),
            (3, 4, 4.0),
        ]);
        store.subscribe(sims.clone());

        let first = Predictor::new(&store, &sims).predict(1, 3, Mode::User, 2)?;
        let second = Predictor::new(&store, &sims).predict(1, 3, Mode::User, 2)?;
        assert_eq!(first.rating.to_bits(), second.rating.to_bits());
        assert_eq!(first, second);

        store.upsert(Rating::new(2, 3, 5.0, None)?)?;
        let third = Predictor::new(&store, &sims).predict(1, 3, Mode::User, 2)?;
        assert_eq!(first, third);
        Ok(())
    }

    #[test]
    fn test_fallback() -> Result<(), Box<dyn std::error::Error>> {
        let store = scenario_store();
        let sims = SimilarityEngine::default();
        let predictor = Predictor::new(&store, &sims);

        let pred = predictor.predict_or_fallback(3, 20, Mode::User, 2)?;
        assert!(pred.fallback);
        assert_eq!(pred.rating, 1.0);
        assert_eq!(pred.confidence, 0.0);

        // unknown item in user mode: falls back to the user's mean
        let pred = predictor.predict_or_fallback(1, 99, Mode::User, 2)?;
        assert_eq!(pred.rating, 3.0);

        // unknown user and item: global mean
        let pred = predictor.predict_or_fallback(42, 99, Mode::Item, 2)?;
        assert!((pred.rating - 17.0 / 5.0).abs() < 1e-6);

        let empty = RatingStore::new();
        let predictor = Predictor::new(&empty, &sims);
        assert!(matches!(
            predictor.predict_or_fallback(1, 1, Mode::User, 2),
            Err(CfError::NoData { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_zero_k() {
        let store = scenario_store();
        let sims = SimilarityEngine::default();
        assert!(Predictor::new(&store, &sims)
            .predict(1, 20, Mode::User, 0)
            .is_err());
    }
}
