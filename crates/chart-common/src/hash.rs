//! Identity of a stored chart record.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ChartError, ChartResult};

const MAX_HASH_LEN: usize = 128;

/// Validated chart hash.
///
/// Restricted to `[A-Za-z0-9_-]` so it can be embedded in a cache key and in a
/// glob pattern without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChartHash(String);

impl ChartHash {
    pub fn parse(value: impl Into<String>) -> ChartResult<Self> {
        let value = value.into();
        if value.is_empty() || value.len() > MAX_HASH_LEN {
            return Err(ChartError::invalid(
                "hash",
                format!("must be 1-{} characters", MAX_HASH_LEN),
            ));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ChartError::invalid(
                "hash",
                format!("'{}' contains characters outside [A-Za-z0-9_-]", value),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChartHash {
    type Error = ChartError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ChartHash::parse(value)
    }
}

impl From<ChartHash> for String {
    fn from(hash: ChartHash) -> Self {
        hash.0
    }
}

impl fmt::Display for ChartHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
