use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};

use intake_core::{ContractBody, DomainError, EntityDraft, NewContract, NewToken, RecordId};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    pub name: String,
    pub cert: String,
}

impl From<RecordRequest> for EntityDraft {
    fn from(req: RecordRequest) -> Self {
        EntityDraft::new(req.name, req.cert)
    }
}

/// Issue request. The issue time is always the server's clock.
#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub token: String,
    pub owner_id: RecordId,
}

impl From<IssueTokenRequest> for NewToken {
    fn from(req: IssueTokenRequest) -> Self {
        NewToken {
            value: req.token,
            owner_id: req.owner_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateContractRequest {
    pub investor_id: RecordId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub amount: i64,
    pub must_be_done: DateTime<Utc>,
}

impl TryFrom<CreateContractRequest> for NewContract {
    type Error = DomainError;

    fn try_from(req: CreateContractRequest) -> Result<Self, Self::Error> {
        Ok(NewContract {
            investor_id: req.investor_id,
            body: ContractBody::new(req.title, req.description, req.amount, req.must_be_done)?,
        })
    }
}

/// Contract listing filter. Ids arrive as raw query strings.
#[derive(Debug, Default, Deserialize)]
pub struct ContractQuery {
    pub investor_id: Option<String>,
    pub supplier_id: Option<String>,
    pub title: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: RecordId,
    pub message: String,
}
