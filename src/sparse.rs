use std::cmp::Ordering;

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

/// One row of a sparse matrix, kept sorted by column id so that two rows
/// can be intersected with a single merge pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseRow {
    entries: Vec<(u32, f32)>,
}

impl SparseRow {
    /// Insert or overwrite a column, returning the previous value.
    pub fn upsert(&mut self, col: u32, value: f32) -> Option<f32> {
        match self.entries.binary_search_by_key(&col, |&(c, _)| c) {
            Ok(pos) => Some(std::mem::replace(&mut self.entries[pos].1, value)),
            Err(pos) => {
                self.entries.insert(pos, (col, value));
                None
            }
        }
    }

    #[inline]
    pub fn get(&self, col: u32) -> Option<f32> {
        self.entries
            .binary_search_by_key(&col, |&(c, _)| c)
            .ok()
            .map(|pos| self.entries[pos].1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> RowIter<'_> {
        RowIter {
            inner: self.entries.iter(),
        }
    }

    pub fn cols(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|&(c, _)| c)
    }

    pub fn mean(&self) -> Option<f32> {
        if self.entries.is_empty() {
            return None;
        }
        let sum: f64 = self.entries.iter().map(|&(_, v)| v as f64).sum();
        Some((sum / self.entries.len() as f64) as f32)
    }
}

/// Finite, restartable iterator over `(col, value)` pairs of a row.
/// Cloning it yields a fresh pass from the current position.
#[derive(Clone, Debug)]
pub struct RowIter<'a> {
    inner: std::slice::Iter<'a, (u32, f32)>,
}

impl RowIter<'_> {
    pub(crate) fn empty() -> Self {
        let entries: &'static [(u32, f32)] = &[];
        RowIter {
            inner: entries.iter(),
        }
    }
}

impl Iterator for RowIter<'_> {
    type Item = (u32, f32);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().copied()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RowIter<'_> {}

/// Walk two sorted rows in lockstep and yield `(col, a_value, b_value)`
/// for every column present in both.
pub(crate) fn co_rated<'a>(
    a: &'a SparseRow,
    b: &'a SparseRow,
) -> impl Iterator<Item = (u32, f32, f32)> + 'a {
    let (xs, ys) = (&a.entries, &b.entries);
    let mut i = 0;
    let mut j = 0;
    std::iter::from_fn(move || {
        while i < xs.len() && j < ys.len() {
            let (c1, v1) = xs[i];
            let (c2, v2) = ys[j];
            match c1.cmp(&c2) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                    return Some((c1, v1, v2));
                }
            }
        }
        None
    })
}

/// Row-major sparse matrix keyed by external ids, analogy of
/// `scipy.sparse.dok_matrix` with sorted rows.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SparseMatrix {
    rows: FxHashMap<u32, SparseRow>,
    nnz: usize,
}

impl SparseMatrix {
    pub fn upsert(&mut self, row: u32, col: u32, value: f32) -> Option<f32> {
        let prev = self.rows.entry(row).or_default().upsert(col, value);
        if prev.is_none() {
            self.nnz += 1;
        }
        prev
    }

    #[inline]
    pub fn get(&self, row: u32, col: u32) -> Option<f32> {
        self.rows.get(&row).and_then(|r| r.get(col))
    }

    #[inline]
    pub fn row(&self, row: u32) -> Option<&SparseRow> {
        self.rows.get(&row).filter(|r| !r.is_empty())
    }

    /// Ids of all non-empty rows, ascending.
    pub fn row_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .rows
            .iter()
            .filter(|(_, r)| !r.is_empty())
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.nnz
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.nnz = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_upsert_keeps_order() {
        let mut row = SparseRow::default();
        assert_eq!(row.upsert(5, 2.0), None);
        assert_eq!(row.upsert(1, 4.0), None);
        assert_eq!(row.upsert(3, 3.0), None);
        assert_eq!(row.upsert(5, 1.0), Some(2.0));
        assert_eq!(row.iter().collect::<Vec<_>>(), vec![(1, 4.0), (3, 3.0), (5, 1.0)]);
        assert_eq!(row.get(3), Some(3.0));
        assert_eq!(row.get(2), None);
        assert!((row.mean().unwrap() - 8.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_row_iter_is_restartable() {
        let mut row = SparseRow::default();
        row.upsert(2, 1.0);
        row.upsert(4, 5.0);
        let iter = row.iter();
        assert_eq!(iter.len(), 2);
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        assert_eq!(first, second);
        assert_eq!(RowIter::empty().count(), 0);
    }

    #[test]
    fn test_co_rated() {
        // row a: [0, 1, 0, 3, 4, 0, 6]
        // row b: [0, 0, 2, 3, 0, 5, 6]
        let mut a = SparseRow::default();
        let mut b = SparseRow::default();
        for (c, v) in [(1, 1.0), (3, 3.0), (4, 4.0), (6, 6.0)] {
            a.upsert(c, v);
        }
        for (c, v) in [(2, 2.0), (3, 3.5), (5, 5.0), (6, 1.0)] {
            b.upsert(c, v);
        }
        let common: Vec<_> = co_rated(&a, &b).collect();
        assert_eq!(common, vec![(3, 3.0, 3.5), (6, 6.0, 1.0)]);
        assert_eq!(co_rated(&a, &SparseRow::default()).count(), 0);
    }

    #[test]
    fn test_matrix_nnz_and_rows() {
        let mut m = SparseMatrix::default();
        m.upsert(2, 10, 5.0);
        m.upsert(1, 10, 4.0);
        m.upsert(1, 20, 1.0);
        assert_eq!(m.upsert(1, 20, 2.0), Some(1.0));
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.row_ids(), vec![1, 2]);
        assert_eq!(m.get(1, 20), Some(2.0));
        assert!(m.row(7).is_none());
        m.clear();
        assert_eq!(m.nnz(), 0);
        assert_eq!(m.n_rows(), 0);
    }
}
