use crate::rating::Mode;

/// Errors raised by the recommendation engine.
///
/// None of them is fatal: `NoPrediction` and `NoData` mean "insufficient data"
/// and callers are expected to fall back or skip.
#[derive(thiserror::Error, Debug)]
pub enum CfError {
    #[error("invalid rating ({user_id}, {item_id}, {value}): {reason}")]
    InvalidValue {
        user_id: i64,
        item_id: i64,
        value: f32,
        reason: &'static str,
    },

    #[error("no ratings for {mode} {id}")]
    NoData { mode: Mode, id: u32 },

    #[error("not enough neighbor evidence to predict user {user_id} on item {item_id}")]
    NoPrediction { user_id: u32, item_id: u32 },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("batch job cancelled")]
    Cancelled,

    #[error("failed to create thread pool: {0}")]
    ThreadPool(String),
}

impl CfError {
    /// `true` for the errors that only signal missing evidence.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, CfError::NoData { .. } | CfError::NoPrediction { .. })
    }
}

pub type CfResult<T> = Result<T, CfError>;
