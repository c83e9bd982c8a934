use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CfError, CfResult};
use crate::utils::{MAX_RATING, MIN_RATING};

/// Which side of the rating matrix similarities are computed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    User,
    Item,
}

impl Mode {
    pub fn other(self) -> Mode {
        match self {
            Mode::User => Mode::Item,
            Mode::Item => Mode::User,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Mode::User => 0,
            Mode::Item => 1,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::User => f.write_str("user"),
            Mode::Item => f.write_str("item"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "user-based" | "user_cf" => Ok(Mode::User),
            "item" | "item-based" | "item_cf" => Ok(Mode::Item),
            other => Err(format!("unknown mode \"{other}\", expected `user` or `item`")),
        }
    }
}

/// A single observed rating. Ids start at 1, values lie in `[1, 5]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: u32,
    pub item_id: u32,
    pub value: f32,
    pub timestamp: Option<i64>,
}

impl Rating {
    /// Validate raw fields and build a rating.
    pub fn new(user_id: i64, item_id: i64, value: f32, timestamp: Option<i64>) -> CfResult<Self> {
        let invalid = |reason| CfError::InvalidValue {
            user_id,
            item_id,
            value,
            reason,
        };
        if user_id <= 0 || user_id > u32::MAX as i64 {
            return Err(invalid("user id must be a positive 32-bit integer"));
        }
        if item_id <= 0 || item_id > u32::MAX as i64 {
            return Err(invalid("item id must be a positive 32-bit integer"));
        }
        if !(MIN_RATING..=MAX_RATING).contains(&value) {
            return Err(invalid("rating value must lie in [1, 5]"));
        }
        Ok(Self {
            user_id: user_id as u32,
            item_id: item_id as u32,
            value,
            timestamp,
        })
    }

    /// Re-check a rating built through its public fields.
    pub fn validate(&self) -> CfResult<()> {
        Rating::new(
            self.user_id as i64,
            self.item_id as i64,
            self.value,
            self.timestamp,
        )
        .map(|_| ())
    }

    /// Parse one `user \t item \t rating [\t timestamp]` record.
    pub fn parse_tsv(line: &str, line_no: usize) -> CfResult<Self> {
        let parse_err = |message: String| CfError::Parse {
            line: line_no,
            message,
        };
        let mut fields = line.split('\t').map(str::trim);
        let mut next_field = |name: &str| {
            fields
                .next()
                .filter(|f| !f.is_empty())
                .ok_or_else(|| parse_err(format!("missing `{name}` field")))
        };

        let user_id: i64 = next_field("user_id")?
            .parse()
            .map_err(|e| parse_err(format!("bad user_id: {e}")))?;
        let item_id: i64 = next_field("item_id")?
            .parse()
            .map_err(|e| parse_err(format!("bad item_id: {e}")))?;
        let value: f32 = next_field("rating")?
            .parse()
            .map_err(|e| parse_err(format!("bad rating: {e}")))?;
        let timestamp = match fields.next().filter(|f| !f.is_empty()) {
            Some(ts) => Some(
                ts.parse::<i64>()
                    .map_err(|e| parse_err(format!("bad timestamp: {e}")))?,
            ),
            None => None,
        };

        Rating::new(user_id, item_id, value, timestamp)
    }
}
