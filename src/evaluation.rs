use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::error::{CfError, CfResult};
use crate::inference::Predictor;
use crate::rating::{Mode, Rating};

/// Accuracy of one model over a held-out set.
///
/// `rmse` and `mae` cover only the predicted pairs; they are 0 when nothing
/// could be predicted, so read them together with `coverage`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EvalReport {
    pub mode: Mode,
    pub k: usize,
    pub rmse: f64,
    pub mae: f64,
    pub predicted: usize,
    pub skipped: usize,
    /// predicted / (predicted + skipped)
    pub coverage: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ModelComparison {
    pub user: EvalReport,
    pub item: EvalReport,
}

impl ModelComparison {
    /// Mode with the lower RMSE among those that predicted anything.
    pub fn best_by_rmse(&self) -> Option<Mode> {
        match (self.user.predicted > 0, self.item.predicted > 0) {
            (false, false) => None,
            (true, false) => Some(Mode::User),
            (false, true) => Some(Mode::Item),
            (true, true) if self.item.rmse < self.user.rmse => Some(Mode::Item),
            (true, true) => Some(Mode::User),
        }
    }
}

pub struct Evaluator<'a> {
    predictor: Predictor<'a>,
}

impl<'a> Evaluator<'a> {
    pub fn new(predictor: Predictor<'a>) -> Self {
        Self { predictor }
    }

    /// Score `held_out` ratings against the predictor. The held-out ratings
    /// are expected to be absent from the store the predictor reads.
    pub fn evaluate(&self, held_out: &[Rating], mode: Mode, k: usize) -> CfResult<EvalReport> {
        let start = Instant::now();
        // per-pair errors, in input order so the sums below do not depend
        // on thread scheduling
        let errors: Vec<Option<f64>> = held_out
            .par_iter()
            .map(|r| match self.predictor.predict(r.user_id, r.item_id, mode, k) {
                Ok(pred) => Ok(Some(pred.rating as f64 - r.value as f64)),
                Err(CfError::NoPrediction { .. }) => Ok(None),
                Err(e) => Err(e),
            })
            .collect::<CfResult<_>>()?;

        let mut sum_sq = 0.0f64;
        let mut sum_abs = 0.0f64;
        let mut predicted = 0usize;
        for err in errors.iter().flatten() {
            sum_sq += err * err;
            sum_abs += err.abs();
            predicted += 1;
        }
        let skipped = held_out.len() - predicted;

        let (rmse, mae) = if predicted == 0 {
            (0.0, 0.0)
        } else {
            let n = predicted as f64;
            ((sum_sq / n).sqrt(), sum_abs / n)
        };
        let coverage = if held_out.is_empty() {
            0.0
        } else {
            predicted as f64 / held_out.len() as f64
        };

        let report = EvalReport {
            mode,
            k,
            rmse,
            mae,
            predicted,
            skipped,
            coverage,
        };
        info!(
            %mode,
            k,
            rmse,
            mae,
            predicted,
            skipped,
            "evaluated in {:.4?}",
            start.elapsed()
        );
        Ok(report)
    }

    /// Evaluate user-based and item-based filtering on the same held-out set.
    pub fn compare(&self, held_out: &[Rating], k: usize) -> CfResult<ModelComparison> {
        Ok(ModelComparison {
            user: self.evaluate(held_out, Mode::User, k)?,
            item: self.evaluate(held_out, Mode::Item, k)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Centering;
    use crate::similarities::SimilarityEngine;
    use crate::store::{store_from, RatingStore};

    fn held(u: i64, i: i64, v: f32) -> Rating {
        Rating::new(u, i, v, None).unwrap()
    }

    #[test]
    fn test_evaluate_metrics() -> Result<(), Box<dyn std::error::Error>> {
        let store = store_from(&[(1, 10, 5.0), (2, 10, 5.0), (1, 20, 1.0), (2, 20, 1.0), (3, 10, 5.0)]);
        let sims = SimilarityEngine::new(Centering::None, 1);
        let evaluator = Evaluator::new(Predictor::new(&store, &sims));

        // (3, 20) predicts 3.0; (9, 20) has no neighbors
        let held_out = vec![held(3, 20, 2.0), held(9, 20, 4.0)];
        let report = evaluator.evaluate(&held_out, Mode::User, 2)?;
        assert_eq!(report.predicted, 1);
        assert_eq!(report.skipped, 1);
        assert!((report.rmse - 1.0).abs() < 1e-6);
        assert!((report.mae - 1.0).abs() < 1e-6);
        assert!((report.coverage - 0.5).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_rmse_and_mae_differ() -> Result<(), Box<dyn std::error::Error>> {
        let store = store_from(&[(1, 10, 5.0), (2, 10, 5.0), (1, 20, 1.0), (2, 20, 1.0), (3, 10, 5.0)]);
        let sims = SimilarityEngine::new(Centering::None, 1);
        let evaluator = Evaluator::new(Predictor::new(&store, &sims));

        // both held-out pairs predict 3.0: errors 2 and 0
        let held_out = vec![held(3, 20, 1.0), held(3, 20, 3.0)];
        let report = evaluator.evaluate(&held_out, Mode::User, 2)?;
        assert!((report.rmse - 2f64.sqrt()).abs() < 1e-6);
        assert!((report.mae - 1.0).abs() < 1e-6);
        assert_eq!(report.coverage, 1.0);
        Ok(())
    }

    #[test]
    fn test_evaluate_nothing_predictable() -> Result<(), Box<dyn std::error::Error>> {
        let store = RatingStore::new();
        let sims = SimilarityEngine::default();
        let evaluator = Evaluator::new(Predictor::new(&store, &sims));

        let report = evaluator.evaluate(&[held(1, 1, 3.0)], Mode::Item, 30)?;
        assert_eq!((report.predicted, report.skipped), (0, 1));
        assert_eq!((report.rmse, report.mae, report.coverage), (0.0, 0.0, 0.0));

        let empty = evaluator.evaluate(&[], Mode::User, 30)?;
        assert_eq!(empty.coverage, 0.0);
        Ok(())
    }

    #[test]
    fn test_compare() -> Result<(), Box<dyn std::error::Error>> {
        let store = store_from(&[(1, 10, 5.0), (2, 10, 5.0), (1, 20, 1.0), (2, 20, 1.0), (3, 10, 5.0)]);
        let sims = SimilarityEngine::new(Centering::None, 1);
        let evaluator = Evaluator::new(Predictor::new(&store, &sims));
        let comparison = evaluator.compare(&[held(3, 20, 3.0)], 2)?;
        assert_eq!(comparison.user.mode, Mode::User);
        assert_eq!(comparison.item.mode, Mode::Item);
        assert_eq!(comparison.user.predicted, 1);
        assert!(comparison.best_by_rmse().is_some());
        Ok(())
    }
}
