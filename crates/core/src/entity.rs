//! Investor / client records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RecordId;

/// Which of the two record families a service manages.
///
/// Both families share one shape; the kind only decides routing segments and
/// where the backend keeps the records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Investor,
    Client,
}

impl EntityKind {
    /// Singular segment, e.g. `investor` (used by `/api/mq/<singular>`).
    pub fn singular(self) -> &'static str {
        match self {
            EntityKind::Investor => "investor",
            EntityKind::Client => "client",
        }
    }

    /// Plural segment, e.g. `investors`. Also the relational table name.
    pub fn plural(self) -> &'static str {
        match self {
            EntityKind::Investor => "investors",
            EntityKind::Client => "clients",
        }
    }

    /// Human label used in response messages.
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Investor => "Investor",
            EntityKind::Client => "Client",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.singular())
    }
}

impl core::str::FromStr for EntityKind {
    type Err = crate::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "investor" | "investors" => Ok(EntityKind::Investor),
            "client" | "clients" => Ok(EntityKind::Client),
            other => Err(crate::DomainError::validation(format!(
                "unknown entity kind: {other}"
            ))),
        }
    }
}

/// A record as submitted by a caller, before any store has seen it.
///
/// `cert` is opaque and is not inspected here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDraft {
    pub name: String,
    pub cert: String,
}

impl EntityDraft {
    pub fn new(name: impl Into<String>, cert: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cert: cert.into(),
        }
    }
}

/// A persisted record. Immutable once the gateway has assigned `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: RecordId,
    pub name: String,
    pub cert: String,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn from_draft(id: RecordId, draft: EntityDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name,
            cert: draft.cert,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_both_forms() {
        assert_eq!("Investors".parse::<EntityKind>().unwrap(), EntityKind::Investor);
        assert_eq!("client".parse::<EntityKind>().unwrap(), EntityKind::Client);
        assert!("supplier".parse::<EntityKind>().is_err());
    }

    #[test]
    fn draft_has_no_id_field() {
        let json = serde_json::to_value(EntityDraft::new("Jane", "abc")).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "Jane", "cert": "abc" }));
    }
}
