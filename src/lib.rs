//! Memory-based collaborative filtering for explicit movie ratings.
//!
//! Ratings live in a [`RatingStore`]; a [`SimilarityEngine`] derives user-user
//! or item-item cosine similarities from it on demand; [`Predictor`],
//! [`RecommendationRanker`] and [`Evaluator`] build on top. [`Engine`] wires
//! them together behind a readers-writer lock.

mod config;
mod dataset;
mod engine;
mod error;
mod evaluation;
mod inference;
mod ranking;
mod rating;
mod serialization;
mod similarities;
mod sparse;
mod store;
mod utils;

pub use config::{Centering, EngineConfig};
pub use dataset::{filter_min_ratings, load_ratings_file, read_ratings, train_test_split, ParsedRatings};
pub use engine::Engine;
pub use error::{CfError, CfResult};
pub use evaluation::{EvalReport, Evaluator, ModelComparison};
pub use inference::{Prediction, Predictor};
pub use ranking::{Recommendation, RecommendationRanker};
pub use rating::{Mode, Rating};
pub use serialization::{load_into, load_store, save_store};
pub use similarities::SimilarityEngine;
pub use sparse::{RowIter, SparseMatrix, SparseRow};
pub use store::{DatasetStats, LoadReport, Profile, RatingObserver, RatingStore};
pub use utils::{Neighbor, DEFAULT_K, DEFAULT_TOP_N, MAX_RATING, MIN_RATING};
