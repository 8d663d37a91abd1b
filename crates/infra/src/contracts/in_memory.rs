use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use intake_core::{Contract, ContractFilter, ContractStage, NewContract, OfferAcceptance, RecordId};

use super::{ContractStore, ContractStoreError};

/// In-memory contract store for tests/dev. Ids are numeric, starting at 1.
#[derive(Debug)]
pub struct InMemoryContractStore {
    inner: RwLock<Contracts>,
}

#[derive(Debug)]
struct Contracts {
    next_id: i64,
    rows: BTreeMap<i64, Contract>,
}

impl Default for InMemoryContractStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContractStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Contracts {
                next_id: 1,
                rows: BTreeMap::new(),
            }),
        }
    }
}

fn poisoned() -> ContractStoreError {
    ContractStoreError::Backend("in-memory contract store lock poisoned".to_string())
}

#[async_trait::async_trait]
impl ContractStore for InMemoryContractStore {
    async fn list(&self, filter: &ContractFilter) -> Result<Vec<Contract>, ContractStoreError> {
        let contracts = self.inner.read().map_err(|_| poisoned())?;
        Ok(contracts
            .rows
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &RecordId) -> Result<Option<Contract>, ContractStoreError> {
        let Some(n) = id.as_numeric() else {
            return Ok(None);
        };
        let contracts = self.inner.read().map_err(|_| poisoned())?;
        Ok(contracts.rows.get(&n).cloned())
    }

    async fn insert(&self, contract: NewContract, created_at: DateTime<Utc>) -> Result<Contract, ContractStoreError> {
        let mut contracts = self.inner.write().map_err(|_| poisoned())?;
        let id = contracts.next_id;
        contracts.next_id += 1;
        let contract = contract.into_contract(RecordId::Numeric(id), created_at);
        contracts.rows.insert(id, contract.clone());
        Ok(contract)
    }

    async fn mark_signed(
        &self,
        id: &RecordId,
        offer: &OfferAcceptance,
    ) -> Result<Option<Contract>, ContractStoreError> {
        let Some(n) = id.as_numeric() else {
            return Ok(None);
        };
        let mut contracts = self.inner.write().map_err(|_| poisoned())?;
        let Some(contract) = contracts
            .rows
            .get_mut(&n)
            .filter(|c| c.stage == ContractStage::Open)
        else {
            return Ok(None);
        };

        contract.stage = ContractStage::Signed;
        contract.supplier_id = Some(offer.supplier_id.clone());
        contract.supplier_signature = Some(offer.supplier_signature.clone());
        contract.investor_signature = Some(offer.investor_signature.clone());
        Ok(Some(contract.clone()))
    }

    async fn delete_by_id(&self, id: &RecordId) -> Result<bool, ContractStoreError> {
        let Some(n) = id.as_numeric() else {
            return Ok(false);
        };
        let mut contracts = self.inner.write().map_err(|_| poisoned())?;
        Ok(contracts.rows.remove(&n).is_some())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use intake_core::ContractBody;

    use super::*;

    fn new_contract(investor: i64, title: &str) -> NewContract {
        NewContract {
            investor_id: RecordId::Numeric(investor),
            body: ContractBody::new(title, "", 100, Utc::now() + Duration::days(30)).unwrap(),
        }
    }

    fn offer() -> OfferAcceptance {
        OfferAcceptance {
            supplier_id: RecordId::Numeric(5),
            supplier_signature: "s".into(),
            investor_signature: "i".into(),
        }
    }

    #[tokio::test]
    async fn list_applies_the_filter_in_id_order() {
        let store = InMemoryContractStore::new();
        store.insert(new_contract(1, "Roof"), Utc::now()).await.unwrap();
        store.insert(new_contract(2, "Garden"), Utc::now()).await.unwrap();
        store.insert(new_contract(1, "Roof tiles"), Utc::now()).await.unwrap();

        let roofs = store
            .list(&ContractFilter {
                investor_id: Some(RecordId::Numeric(1)),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<_> = roofs.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, [RecordId::Numeric(1), RecordId::Numeric(3)]);
    }

    #[tokio::test]
    async fn only_open_contracts_can_be_signed() {
        let store = InMemoryContractStore::new();
        let contract = store.insert(new_contract(1, "Roof"), Utc::now()).await.unwrap();

        let signed = store.mark_signed(&contract.id, &offer()).await.unwrap().unwrap();
        assert_eq!(signed.stage, ContractStage::Signed);
        assert_eq!(signed.supplier_id, Some(RecordId::Numeric(5)));

        assert!(store.mark_signed(&contract.id, &offer()).await.unwrap().is_none());
        assert!(store.mark_signed(&RecordId::Numeric(99), &offer()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let store = InMemoryContractStore::new();
        let contract = store.insert(new_contract(1, "Roof"), Utc::now()).await.unwrap();

        assert!(store.delete_by_id(&contract.id).await.unwrap());
        assert!(!store.delete_by_id(&contract.id).await.unwrap());
        assert!(store.find_by_id(&contract.id).await.unwrap().is_none());
    }
}
