use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use fxhash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CfError, CfResult};
use crate::rating::{Mode, Rating};
use crate::sparse::{RowIter, SparseMatrix, SparseRow};

/// Receives notifications about store mutations so that derived caches
/// can drop what they computed from the old state.
pub trait RatingObserver: Send + Sync {
    /// A single `(user, item)` cell was inserted or changed.
    fn on_rating_changed(&self, user_id: u32, item_id: u32);

    /// The store changed wholesale (bulk load, clear).
    fn on_reset(&self);
}

/// Derived per-entity summary. Either a user (rated item ids) or an item
/// (rater user ids), depending on `mode`.
#[derive(Clone, Debug, PartialEq)]
pub struct Profile {
    pub mode: Mode,
    pub id: u32,
    pub mean: f32,
    pub rated: Vec<u32>,
}

impl Profile {
    #[inline]
    pub fn count(&self) -> usize {
        self.rated.len()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub accepted: usize,
    pub replaced: usize,
    pub rejected: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DatasetStats {
    pub n_users: usize,
    pub n_items: usize,
    pub n_ratings: usize,
    /// Fraction of the user x item matrix without a rating.
    pub sparsity: f64,
    pub global_mean: Option<f32>,
}

/// Single source of truth for raw ratings. Holds the matrix twice,
/// row-major by user and row-major by item, so both directions of
/// lookup are a hash probe plus a binary search.
#[derive(Default)]
pub struct RatingStore {
    by_user: SparseMatrix,
    by_item: SparseMatrix,
    timestamps: FxHashMap<(u32, u32), i64>,
    // indexed by `Mode::index`
    profiles: [DashMap<u32, Arc<Profile>>; 2],
    observers: Vec<Arc<dyn RatingObserver>>,
}

impl RatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn RatingObserver>) {
        self.observers.push(observer);
    }

    /// Insert or overwrite a rating. Returns the previous value of the cell.
    pub fn upsert(&mut self, rating: Rating) -> CfResult<Option<f32>> {
        rating.validate()?;
        let Rating {
            user_id,
            item_id,
            value,
            timestamp,
        } = rating;

        let prev = self.write_cell(user_id, item_id, value, timestamp);
        if prev != Some(value) {
            self.invalidate_profiles(user_id, item_id);
            for observer in &self.observers {
                observer.on_rating_changed(user_id, item_id);
            }
        }
        Ok(prev)
    }

    /// Bulk ingestion. Invalid records are rejected and skipped; caches are
    /// invalidated once for the whole batch.
    pub fn load_ratings<I>(&mut self, ratings: I) -> LoadReport
    where
        I: IntoIterator<Item = Rating>,
    {
        let start = Instant::now();
        let mut report = LoadReport::default();
        for rating in ratings {
            if let Err(e) = rating.validate() {
                warn!("rejected rating: {e}");
                report.rejected += 1;
                continue;
            }
            let Rating {
                user_id,
                item_id,
                value,
                timestamp,
            } = rating;
            if self.write_cell(user_id, item_id, value, timestamp).is_some() {
                report.replaced += 1;
            }
            report.accepted += 1;
        }

        self.reset_caches();
        info!(
            accepted = report.accepted,
            replaced = report.replaced,
            rejected = report.rejected,
            "loaded ratings in {:.4?}",
            start.elapsed()
        );
        report
    }

    pub fn clear(&mut self) {
        self.by_user.clear();
        self.by_item.clear();
        self.timestamps.clear();
        self.reset_caches();
    }

    fn write_cell(
        &mut self,
        user_id: u32,
        item_id: u32,
        value: f32,
        timestamp: Option<i64>,
    ) -> Option<f32> {
        let prev = self.by_user.upsert(user_id, item_id, value);
        self.by_item.upsert(item_id, user_id, value);
        let key = (user_id, item_id);
        match timestamp {
            Some(ts) => {
                self.timestamps.insert(key, ts);
            }
            None => {
                self.timestamps.remove(&key);
            }
        }
        prev
    }

    fn invalidate_profiles(&self, user_id: u32, item_id: u32) {
        self.profiles[Mode::User.index()].remove(&user_id);
        self.profiles[Mode::Item.index()].remove(&item_id);
    }

    fn reset_caches(&self) {
        for cache in &self.profiles {
            cache.clear();
        }
        for observer in &self.observers {
            observer.on_reset();
        }
    }

    pub fn get(&self, user_id: u32, item_id: u32) -> Option<f32> {
        self.by_user.get(user_id, item_id)
    }

    pub fn ratings_by_user(&self, user_id: u32) -> RowIter<'_> {
        self.by_user.row(user_id).map_or_else(RowIter::empty, SparseRow::iter)
    }

    pub fn ratings_by_item(&self, item_id: u32) -> RowIter<'_> {
        self.by_item.row(item_id).map_or_else(RowIter::empty, SparseRow::iter)
    }

    pub(crate) fn row(&self, mode: Mode, id: u32) -> Option<&SparseRow> {
        match mode {
            Mode::User => self.by_user.row(id),
            Mode::Item => self.by_item.row(id),
        }
    }

    /// All entities of `mode` with at least one rating, ascending.
    pub fn entity_ids(&self, mode: Mode) -> Vec<u32> {
        match mode {
            Mode::User => self.by_user.row_ids(),
            Mode::Item => self.by_item.row_ids(),
        }
    }

    pub fn contains(&self, mode: Mode, id: u32) -> bool {
        self.row(mode, id).is_some()
    }

    /// Cached profile of a user or item; rebuilt from the matrix on a miss.
    pub fn profile(&self, mode: Mode, id: u32) -> CfResult<Arc<Profile>> {
        let cache = &self.profiles[mode.index()];
        if let Some(profile) = cache.get(&id) {
            return Ok(Arc::clone(profile.value()));
        }

        let row = self.row(mode, id).ok_or(CfError::NoData { mode, id })?;
        let mean = row.mean().ok_or(CfError::NoData { mode, id })?;
        let profile = Arc::new(Profile {
            mode,
            id,
            mean,
            rated: row.cols().collect(),
        });
        debug!(%mode, id, mean, "rebuilt profile");
        cache.insert(id, Arc::clone(&profile));
        Ok(profile)
    }

    /// Arithmetic mean of an entity's ratings.
    pub fn mean_rating(&self, mode: Mode, id: u32) -> CfResult<f32> {
        self.profile(mode, id).map(|p| p.mean)
    }

    pub fn user_mean(&self, user_id: u32) -> CfResult<f32> {
        self.mean_rating(Mode::User, user_id)
    }

    pub fn item_mean(&self, item_id: u32) -> CfResult<f32> {
        self.mean_rating(Mode::Item, item_id)
    }

    /// Mean over every stored rating; `NoData` (reported against user 0)
    /// on an empty store.
    pub fn global_mean(&self) -> CfResult<f32> {
        let n = self.by_user.nnz();
        if n == 0 {
            return Err(CfError::NoData {
                mode: Mode::User,
                id: 0,
            });
        }
        let sum: f64 = self
            .by_user
            .row_ids()
            .into_iter()
            .flat_map(|u| self.ratings_by_user(u))
            .map(|(_, v)| v as f64)
            .sum();
        Ok((sum / n as f64) as f32)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.by_user.nnz()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_users(&self) -> usize {
        self.by_user.row_ids().len()
    }

    pub fn n_items(&self) -> usize {
        self.by_item.row_ids().len()
    }

    pub fn stats(&self) -> DatasetStats {
        let n_users = self.n_users();
        let n_items = self.n_items();
        let n_ratings = self.len();
        let cells = n_users as f64 * n_items as f64;
        let sparsity = if cells == 0.0 {
            1.0
        } else {
            1.0 - n_ratings as f64 / cells
        };
        DatasetStats {
            n_users,
            n_items,
            n_ratings,
            sparsity,
            global_mean: self.global_mean().ok(),
        }
    }

    /// Every stored rating ordered by `(user_id, item_id)`.
    pub fn ratings(&self) -> impl Iterator<Item = Rating> + '_ {
        self.by_user.row_ids().into_iter().flat_map(move |u| {
            self.ratings_by_user(u).map(move |(i, value)| Rating {
                user_id: u,
                item_id: i,
                value,
                timestamp: self.timestamps.get(&(u, i)).copied(),
            })
        })
    }
}

#[cfg(test)]
pub(crate) fn store_from(ratings: &[(i64, i64, f32)]) -> RatingStore {
    let mut store = RatingStore::new();
    store.load_ratings(
        ratings
            .iter()
            .map(|&(u, i, v)| Rating::new(u, i, v, None).expect("valid test rating")),
    );
    store
}
