//! Bearer tokens handed out by the registration flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DomainError, DomainResult, RecordId};

/// An issued token.
///
/// `owner_id` points at a persisted entity; nothing here checks that it does.
/// `value` is expected to be unique among live tokens, which is left to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: RecordId,
    #[serde(rename = "token")]
    pub value: String,
    pub owner_id: RecordId,
    pub created_at: DateTime<Utc>,
}

/// Issue request; the store assigns `id` and the caller supplies the issue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewToken {
    #[serde(rename = "token")]
    pub value: String,
    pub owner_id: RecordId,
}

impl NewToken {
    /// A value must be presentable as a single non-blank path segment.
    pub fn validate(&self) -> DomainResult<()> {
        if self.value.trim().is_empty() {
            return Err(DomainError::validation("token value must not be blank"));
        }
        if self.value.contains('/') {
            return Err(DomainError::validation("token value must not contain '/'"));
        }
        Ok(())
    }

    pub fn into_token(self, id: RecordId, created_at: DateTime<Utc>) -> Token {
        Token {
            id,
            value: self.value,
            owner_id: self.owner_id,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_token(value: &str) -> NewToken {
        NewToken {
            value: value.to_string(),
            owner_id: RecordId::Numeric(1),
        }
    }

    #[test]
    fn blank_and_slashed_values_are_rejected() {
        assert!(new_token("abc-123").validate().is_ok());
        assert!(matches!(new_token("  ").validate(), Err(DomainError::Validation(_))));
        assert!(matches!(new_token("a/b").validate(), Err(DomainError::Validation(_))));
    }
}
