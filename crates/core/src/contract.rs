//! Contracts between an investor and a supplier.
//!
//! A contract is opened by an investor with its terms (`ContractBody`). It
//! becomes signed once a supplier's offer is accepted and both parties have
//! signed the exact bytes of `ContractBody::signing_payload`.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{DomainError, DomainResult, RecordId};

/// The signed part of a contract.
///
/// Field order is fixed and `must_be_done` carries whole seconds only, so the
/// signing payload survives a round trip through any store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractBody {
    pub title: String,
    pub description: String,
    pub amount: i64,
    pub must_be_done: DateTime<Utc>,
}

impl ContractBody {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        amount: i64,
        must_be_done: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let body = Self {
            title: title.into(),
            description: description.into(),
            amount,
            must_be_done: must_be_done.trunc_subsecs(0),
        };
        if body.title.trim().is_empty() {
            return Err(DomainError::validation("contract title must not be blank"));
        }
        if body.amount <= 0 {
            return Err(DomainError::validation(format!(
                "contract amount must be positive (got {})",
                body.amount
            )));
        }
        Ok(body)
    }

    /// Bytes both parties sign: the compact JSON of the body.
    pub fn signing_payload(&self) -> Vec<u8> {
        // Plain strings, an integer and a timestamp cannot fail to serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStage {
    /// Waiting for an accepted offer.
    Open,
    /// Both signatures verified and stored.
    Signed,
}

impl ContractStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ContractStage::Open => "open",
            ContractStage::Signed => "signed",
        }
    }
}

impl core::str::FromStr for ContractStage {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ContractStage::Open),
            "signed" => Ok(ContractStage::Signed),
            other => Err(DomainError::validation(format!("unknown contract stage: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: RecordId,
    pub investor_id: RecordId,
    /// Set when an offer is accepted.
    pub supplier_id: Option<RecordId>,
    pub stage: ContractStage,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub body: ContractBody,
    pub supplier_signature: Option<String>,
    pub investor_signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContract {
    pub investor_id: RecordId,
    pub body: ContractBody,
}

impl NewContract {
    pub fn into_contract(self, id: RecordId, created_at: DateTime<Utc>) -> Contract {
        Contract {
            id,
            investor_id: self.investor_id,
            supplier_id: None,
            stage: ContractStage::Open,
            created_at,
            body: self.body,
            supplier_signature: None,
            investor_signature: None,
        }
    }
}

/// A supplier's offer together with the investor's counter-signature.
///
/// Signatures are base64 strings over `ContractBody::signing_payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferAcceptance {
    pub supplier_id: RecordId,
    pub supplier_signature: String,
    pub investor_signature: String,
}

/// Listing filter; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractFilter {
    pub investor_id: Option<RecordId>,
    pub supplier_id: Option<RecordId>,
    /// Case-insensitive substring of the title.
    pub title: Option<String>,
}

impl ContractFilter {
    pub fn matches(&self, contract: &Contract) -> bool {
        if let Some(investor) = &self.investor_id {
            if &contract.investor_id != investor {
                return false;
            }
        }
        if let Some(supplier) = &self.supplier_id {
            if contract.supplier_id.as_ref() != Some(supplier) {
                return false;
            }
        }
        match &self.title {
            Some(needle) => contract
                .body
                .title
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            None => true,
        }
    }
}
