use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::Utc;

use intake_core::{Entity, EntityDraft, EntityKind, RecordId};

use super::{EntityGateway, GatewayError};

/// In-memory gateway for tests/dev.
///
/// Hands out numeric ids from a sequence starting at 1, like the relational
/// backend, and lists records in id order.
#[derive(Debug)]
pub struct InMemoryEntityGateway {
    kind: EntityKind,
    inner: RwLock<Records>,
}

#[derive(Debug, Default)]
struct Records {
    next_id: i64,
    rows: BTreeMap<i64, Entity>,
}

impl InMemoryEntityGateway {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            inner: RwLock::new(Records {
                next_id: 1,
                rows: BTreeMap::new(),
            }),
        }
    }
}

fn poisoned() -> GatewayError {
    GatewayError::Backend("in-memory gateway lock poisoned".to_string())
}

#[async_trait::async_trait]
impl EntityGateway for InMemoryEntityGateway {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn save(&self, draft: EntityDraft) -> Result<RecordId, GatewayError> {
        let mut records = self.inner.write().map_err(|_| poisoned())?;
        let id = records.next_id;
        records.next_id += 1;
        records
            .rows
            .insert(id, Entity::from_draft(RecordId::Numeric(id), draft, Utc::now()));
        Ok(RecordId::Numeric(id))
    }

    async fn find_all(&self) -> Result<Vec<Entity>, GatewayError> {
        let records = self.inner.read().map_err(|_| poisoned())?;
        Ok(records.rows.values().cloned().collect())
    }

    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Entity>, GatewayError> {
        let Some(n) = id.as_numeric() else {
            return Ok(None);
        };
        let records = self.inner.read().map_err(|_| poisoned())?;
        Ok(records.rows.get(&n).cloned())
    }

    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, GatewayError> {
        let Some(n) = id.as_numeric() else {
            return Ok(false);
        };
        let mut records = self.inner.write().map_err(|_| poisoned())?;
        Ok(records.rows.remove(&n).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_come_from_a_sequence_starting_at_one() {
        let gw = InMemoryEntityGateway::new(EntityKind::Investor);
        let a = gw.save(EntityDraft::new("Jane", "abc")).await.unwrap();
        let b = gw.save(EntityDraft::new("John", "def")).await.unwrap();

        assert_eq!(a, RecordId::Numeric(1));
        assert_eq!(b, RecordId::Numeric(2));

        let all = gw.find_all().await.unwrap();
        assert_eq!(all.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), vec!["Jane", "John"]);
    }

    #[tokio::test]
    async fn lookup_and_delete() {
        let gw = InMemoryEntityGateway::new(EntityKind::Client);
        let id = gw.save(EntityDraft::new("Jane", "abc")).await.unwrap();

        let found = gw.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.cert, "abc");
        assert!(gw.find_by_id(&RecordId::Text("nope".into())).await.unwrap().is_none());

        assert!(gw.delete_by_id(&id).await.unwrap());
        assert!(!gw.delete_by_id(&id).await.unwrap());
        assert!(gw.find_all().await.unwrap().is_empty());
    }
}
