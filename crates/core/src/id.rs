//! Store-assigned record identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier assigned by a persistence backend on first save.
///
/// The relational backend hands out sequence numbers, the key-value backend
/// hands out UUID strings. Callers treat both as opaque; the JSON form is a
/// bare number or a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Numeric(i64),
    Text(String),
}

impl RecordId {
    /// Create a fresh text identifier (UUIDv7, time-ordered).
    pub fn new_text() -> Self {
        Self::Text(Uuid::now_v7().to_string())
    }

    pub fn as_numeric(&self) -> Option<i64> {
        match self {
            Self::Numeric(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl core::fmt::Display for RecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Numeric(n) => core::fmt::Display::fmt(n, f),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self::Numeric(value)
    }
}

impl From<Uuid> for RecordId {
    fn from(value: Uuid) -> Self {
        Self::Text(value.to_string())
    }
}

/// Parses a path segment: all-digit input is numeric, anything else is text.
impl FromStr for RecordId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DomainError::invalid_id("RecordId: empty"));
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            let n = s
                .parse::<i64>()
                .map_err(|e| DomainError::invalid_id(format!("RecordId: {e}")))?;
            return Ok(Self::Numeric(n));
        }
        Ok(Self::Text(s.to_string()))
    }
}
