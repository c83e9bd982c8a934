use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{CfError, CfResult};

pub const MIN_RATING: f32 = 1.0;
pub const MAX_RATING: f32 = 5.0;
pub const DEFAULT_K: usize = 30;
pub const DEFAULT_TOP_N: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: u32,
    pub sim: f32,
}

/// Encodes an unordered pair into a single u64 key.
/// The smaller id is stored in the upper 32 bits, the larger in the lower 32 bits.
#[inline]
pub(crate) fn encode_pair(x1: u32, x2: u32) -> u64 {
    let (lo, hi) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
    ((lo as u64) << 32) | (hi as u64)
}

#[inline]
pub(crate) fn clamp_rating(value: f32) -> f32 {
    value.clamp(MIN_RATING, MAX_RATING)
}

/// `0` lets rayon pick the number of threads.
pub(crate) fn create_thread_pool(num_threads: usize) -> CfResult<ThreadPool> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| CfError::ThreadPool(e.to_string()))?;

    Ok(pool)
}
