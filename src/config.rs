use serde::{Deserialize, Serialize};

use crate::error::{CfError, CfResult};
use crate::utils::{DEFAULT_K, DEFAULT_TOP_N};

/// How rating vectors are normalized before the cosine is taken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Centering {
    /// Adjusted cosine: subtract each entity's own mean first.
    #[default]
    Mean,
    /// Plain cosine over the co-rated dimensions.
    None,
}

/// Engine configuration, loaded from `MOVIE_CF_*` environment variables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of neighbors used per prediction
    #[serde(default = "default_k")]
    pub k: usize,

    /// Length of a recommendation list
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    #[serde(default)]
    pub centering: Centering,

    /// Minimum number of co-rated dimensions for a non-zero similarity
    #[serde(default = "default_min_common")]
    pub min_common: usize,

    /// Threads for batch jobs, 0 lets rayon decide
    #[serde(default)]
    pub num_threads: usize,
}

fn default_k() -> usize {
    DEFAULT_K
}

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

fn default_min_common() -> usize {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            top_n: default_top_n(),
            centering: Centering::default(),
            min_common: default_min_common(),
            num_threads: 0,
        }
    }
}

impl EngineConfig {
    pub const ENV_PREFIX: &'static str = "MOVIE_CF_";

    /// Load configuration from environment variables (and `.env`, if present)
    pub fn from_env() -> CfResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Same as [`EngineConfig::from_env`] over an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> CfResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(Self::ENV_PREFIX)
            .from_iter(vars)
            .map_err(|e| CfError::Config(e.to_string()))
    }
}
