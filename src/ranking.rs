use std::cmp::Ordering;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::error::{CfError, CfResult};
use crate::inference::{Prediction, Predictor};
use crate::rating::Mode;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Recommendation {
    pub user_id: u32,
    pub item_id: u32,
    pub predicted_rating: f32,
    pub confidence: f32,
    pub basis: Vec<u32>,
}

impl From<Prediction> for Recommendation {
    fn from(pred: Prediction) -> Self {
        Self {
            user_id: pred.user_id,
            item_id: pred.item_id,
            predicted_rating: pred.rating,
            confidence: pred.confidence,
            basis: pred.basis,
        }
    }
}

/// Rating descending, then confidence descending, then item id ascending.
fn compare_recs(a: &Recommendation, b: &Recommendation) -> Ordering {
    b.predicted_rating
        .partial_cmp(&a.predicted_rating)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.item_id.cmp(&b.item_id))
}

/// Select the top `n` recommendations in order.
///
/// Uses `select_nth_unstable_by` (quickselect) to partition out the best
/// `n` in O(len), then sorts only those in O(n log n).
pub(crate) fn select_top_n(mut recs: Vec<Recommendation>, n: usize) -> Vec<Recommendation> {
    if n == 0 {
        return Vec::new();
    }
    if recs.len() > n {
        recs.select_nth_unstable_by(n - 1, compare_recs);
        recs.truncate(n);
    }
    recs.sort_unstable_by(compare_recs);
    recs
}

pub struct RecommendationRanker<'a> {
    predictor: Predictor<'a>,
}

impl<'a> RecommendationRanker<'a> {
    pub fn new(predictor: Predictor<'a>) -> Self {
        Self { predictor }
    }

    /// Score every item `user_id` has not rated and return the best `top_n`.
    ///
    /// Items without enough neighbor evidence are left out, so the list may
    /// be shorter than `top_n` or empty.
    pub fn recommend(
        &self,
        user_id: u32,
        mode: Mode,
        k: usize,
        top_n: usize,
    ) -> CfResult<Vec<Recommendation>> {
        let store = self.predictor.store();
        let candidates: Vec<u32> = store
            .entity_ids(Mode::Item)
            .into_iter()
            .filter(|&i| store.get(user_id, i).is_none())
            .collect();
        if mode == Mode::User {
            // every prediction below reads the same neighbor list
            self.predictor
                .similarities()
                .ranked_neighbors(store, user_id, Mode::User);
        }

        let scored: Vec<Option<Recommendation>> = candidates
            .par_iter()
            .map(
                |&item_id| match self.predictor.predict(user_id, item_id, mode, k) {
                    Ok(pred) => Ok(Some(Recommendation::from(pred))),
                    Err(CfError::NoPrediction { .. }) => Ok(None),
                    Err(e) => Err(e),
                },
            )
            .collect::<CfResult<_>>()?;

        let recs: Vec<Recommendation> = scored.into_iter().flatten().collect();
        debug!(
            user_id,
            %mode,
            candidates = candidates.len(),
            predicted = recs.len(),
            "ranked recommendations"
        );
        Ok(select_top_n(recs, top_n))
    }
}
