//! Accepting a supplier's offer: both signatures are checked against the
//! parties' stored keys before the contract is marked signed.

use thiserror::Error;
use tracing::{info, instrument, warn};

use intake_auth::{SignatureError, verify_signature};
use intake_core::{Contract, ContractStage, Entity, OfferAcceptance, RecordId};

use super::{ContractStore, ContractStoreError};
use crate::gateway::{EntityGateway, GatewayError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AcceptError {
    #[error("contract {0} not found")]
    ContractNotFound(RecordId),

    #[error("contract {0} is already signed")]
    AlreadySigned(RecordId),

    /// The investor or supplier is not a stored record.
    #[error("party {0} not found")]
    PartyNotFound(RecordId),

    #[error("{party} signature rejected: {source}")]
    SignatureRejected {
        party: &'static str,
        source: SignatureError,
    },

    #[error(transparent)]
    Store(#[from] ContractStoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

async fn party(parties: &dyn EntityGateway, id: &RecordId) -> Result<Entity, AcceptError> {
    parties
        .find_by_id(id)
        .await?
        .ok_or_else(|| AcceptError::PartyNotFound(id.clone()))
}

/// Verify an offer against contract `id` and sign the contract.
///
/// Parties are records of `parties`; each record's `cert` holds the party's
/// verifying key. Nothing is written unless both signatures verify.
#[instrument(skip_all, fields(contract = %id, supplier = %offer.supplier_id), err)]
pub async fn accept_offer(
    contracts: &dyn ContractStore,
    parties: &dyn EntityGateway,
    id: &RecordId,
    offer: OfferAcceptance,
) -> Result<Contract, AcceptError> {
    let contract = contracts
        .find_by_id(id)
        .await?
        .ok_or_else(|| AcceptError::ContractNotFound(id.clone()))?;
    if contract.stage == ContractStage::Signed {
        return Err(AcceptError::AlreadySigned(id.clone()));
    }

    let investor = party(parties, &contract.investor_id).await?;
    let supplier = party(parties, &offer.supplier_id).await?;
    let payload = contract.body.signing_payload();

    let checks = [
        ("supplier", &supplier, &offer.supplier_signature),
        ("investor", &investor, &offer.investor_signature),
    ];
    for (role, signer, signature) in checks {
        if let Err(source) = verify_signature(&signer.cert, signature, &payload) {
            warn!(party = role, signer = %signer.id, error = %source, "offer signature rejected");
            return Err(AcceptError::SignatureRejected { party: role, source });
        }
    }

    // Someone else may have signed or deleted it since the read above.
    match contracts.mark_signed(id, &offer).await? {
        Some(signed) => {
            info!("contract signed");
            Ok(signed)
        }
        None => match contracts.find_by_id(id).await? {
            Some(_) => Err(AcceptError::AlreadySigned(id.clone())),
            None => Err(AcceptError::ContractNotFound(id.clone())),
        },
    }
}

#[cfg(test)]
mod tests {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use chrono::{Duration, Utc};
    use ed25519_dalek::{Signer, SigningKey};
    use intake_core::{ContractBody, EntityDraft, EntityKind, NewContract};

    use super::*;
    use crate::contracts::InMemoryContractStore;
    use crate::gateway::InMemoryEntityGateway;

    struct Fixture {
        contracts: InMemoryContractStore,
        parties: InMemoryEntityGateway,
        investor_key: SigningKey,
        supplier_key: SigningKey,
        supplier_id: RecordId,
        contract: Contract,
    }

    async fn fixture() -> Fixture {
        let investor_key = SigningKey::from_bytes(&[1; 32]);
        let supplier_key = SigningKey::from_bytes(&[2; 32]);
        let parties = InMemoryEntityGateway::new(EntityKind::Investor);
        let public = |k: &SigningKey| STANDARD.encode(k.verifying_key().to_bytes());

        let investor_id = parties
            .save(EntityDraft::new("Jane", public(&investor_key)))
            .await
            .unwrap();
        let supplier_id = parties
            .save(EntityDraft::new("Acme", public(&supplier_key)))
            .await
            .unwrap();

        let contracts = InMemoryContractStore::new();
        let body = ContractBody::new("Roof", "tiles", 1500, Utc::now() + Duration::days(30)).unwrap();
        let contract = contracts
            .insert(NewContract { investor_id, body }, Utc::now())
            .await
            .unwrap();

        Fixture {
            contracts,
            parties,
            investor_key,
            supplier_key,
            supplier_id,
            contract,
        }
    }

    fn sign(key: &SigningKey, contract: &Contract) -> String {
        STANDARD.encode(key.sign(&contract.body.signing_payload()).to_bytes())
    }

    impl Fixture {
        fn offer(&self) -> OfferAcceptance {
            OfferAcceptance {
                supplier_id: self.supplier_id.clone(),
                supplier_signature: sign(&self.supplier_key, &self.contract),
                investor_signature: sign(&self.investor_key, &self.contract),
            }
        }

        async fn accept(&self, offer: OfferAcceptance) -> Result<Contract, AcceptError> {
            accept_offer(&self.contracts, &self.parties, &self.contract.id, offer).await
        }
    }

    #[tokio::test]
    async fn valid_signatures_sign_the_contract() {
        let f = fixture().await;

        let signed = f.accept(f.offer()).await.unwrap();
        assert_eq!(signed.stage, ContractStage::Signed);
        assert_eq!(signed.supplier_id, Some(f.supplier_id.clone()));

        assert_eq!(
            f.accept(f.offer()).await,
            Err(AcceptError::AlreadySigned(f.contract.id.clone()))
        );
    }

    #[tokio::test]
    async fn swapped_signatures_are_rejected_without_writing() {
        let f = fixture().await;
        let mut offer = f.offer();
        std::mem::swap(&mut offer.supplier_signature, &mut offer.investor_signature);

        let err = f.accept(offer).await.unwrap_err();
        assert!(matches!(
            err,
            AcceptError::SignatureRejected {
                party: "supplier",
                source: SignatureError::Mismatch
            }
        ));

        let stored = f.contracts.find_by_id(&f.contract.id).await.unwrap().unwrap();
        assert_eq!(stored.stage, ContractStage::Open);
        assert_eq!(stored.supplier_signature, None);
    }

    #[tokio::test]
    async fn unknown_supplier_or_contract_is_not_found() {
        let f = fixture().await;

        let mut offer = f.offer();
        offer.supplier_id = RecordId::Numeric(77);
        assert_eq!(
            f.accept(offer).await,
            Err(AcceptError::PartyNotFound(RecordId::Numeric(77)))
        );

        let missing = RecordId::Numeric(404);
        assert_eq!(
            accept_offer(&f.contracts, &f.parties, &missing, f.offer()).await,
            Err(AcceptError::ContractNotFound(missing))
        );
    }
}
