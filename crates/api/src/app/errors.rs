use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use intake_auth::{ResolveError, TokenStoreError};
use intake_core::{DomainError, RecordId};
use intake_infra::{AcceptError, ContractStoreError, GatewayError, SubmitError};

pub fn gateway_error_to_response(err: GatewayError) -> axum::response::Response {
    match err {
        GatewayError::Backend(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg),
    }
}

pub fn token_store_error_to_response(err: TokenStoreError) -> axum::response::Response {
    match err {
        TokenStoreError::Backend(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg),
        // The value is a bearer secret; keep it out of the response.
        TokenStoreError::Conflict(_) => {
            json_error(StatusCode::CONFLICT, "conflict", "token value already issued")
        }
    }
}

pub fn resolve_error_to_response(err: ResolveError) -> axum::response::Response {
    match err {
        ResolveError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "token not found"),
        ResolveError::Store(e) => token_store_error_to_response(e),
    }
}

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::BrokerUnavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "broker_unavailable", msg)
        }
    }
}

pub fn contract_store_error_to_response(err: ContractStoreError) -> axum::response::Response {
    match err {
        ContractStoreError::Backend(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg),
    }
}

pub fn accept_error_to_response(err: AcceptError) -> axum::response::Response {
    match err {
        AcceptError::ContractNotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("Contract {id} not found"))
        }
        AcceptError::PartyNotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("party {id} not found"))
        }
        e @ AcceptError::AlreadySigned(_) => json_error(StatusCode::CONFLICT, "already_signed", e.to_string()),
        e @ AcceptError::SignatureRejected { .. } => {
            json_error(StatusCode::BAD_REQUEST, "signature_rejected", e.to_string())
        }
        AcceptError::Store(e) => contract_store_error_to_response(e),
        AcceptError::Gateway(e) => gateway_error_to_response(e),
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_record_id(raw: &str) -> Result<RecordId, axum::response::Response> {
    raw.parse::<RecordId>().map_err(domain_error_to_response)
}
