use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use intake_core::{ContractFilter, NewContract, OfferAcceptance, RecordId};
use intake_infra::{ContractStore, EntityGateway, accept_offer};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_contracts).post(create_contract))
        .route(
            "/:id",
            get(get_contract).patch(accept_contract_offer).delete(delete_contract),
        )
}

fn contract_not_found(id: &RecordId) -> axum::response::Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("Contract {id} not found"))
}

fn optional_id(raw: Option<String>) -> Result<Option<RecordId>, axum::response::Response> {
    raw.as_deref().map(errors::parse_record_id).transpose()
}

/// Unlike records, an empty listing is a plain `[]`.
pub async fn list_contracts(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ContractQuery>,
) -> axum::response::Response {
    let filter = match (optional_id(query.investor_id), optional_id(query.supplier_id)) {
        (Ok(investor_id), Ok(supplier_id)) => ContractFilter {
            investor_id,
            supplier_id,
            title: query.title,
        },
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };

    match services.contracts().list(&filter).await {
        Ok(contracts) => (StatusCode::OK, Json(contracts)).into_response(),
        Err(e) => errors::contract_store_error_to_response(e),
    }
}

pub async fn get_contract(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_record_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.contracts().find_by_id(&id).await {
        Ok(Some(contract)) => (StatusCode::OK, Json(contract)).into_response(),
        Ok(None) => contract_not_found(&id),
        Err(e) => errors::contract_store_error_to_response(e),
    }
}

/// Opens a contract for an investor stored by this service.
pub async fn create_contract(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateContractRequest>,
) -> axum::response::Response {
    let contract = match NewContract::try_from(body) {
        Ok(c) => c,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.gateway().find_by_id(&contract.investor_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return errors::json_error(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("party {} not found", contract.investor_id),
            );
        }
        Err(e) => return errors::gateway_error_to_response(e),
    }

    match services.contracts().insert(contract, Utc::now()).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(dto::PostResponse {
                id: created.id,
                message: "Contract was successfully created".to_string(),
            }),
        )
            .into_response(),
        Err(e) => errors::contract_store_error_to_response(e),
    }
}

/// Accepts a supplier's offer; the stored contract is returned signed.
pub async fn accept_contract_offer(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(offer): Json<OfferAcceptance>,
) -> axum::response::Response {
    let id = match errors::parse_record_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match accept_offer(
        services.contracts().as_ref(),
        services.gateway().as_ref(),
        &id,
        offer,
    )
    .await
    {
        Ok(signed) => (StatusCode::OK, Json(signed)).into_response(),
        Err(e) => errors::accept_error_to_response(e),
    }
}

pub async fn delete_contract(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_record_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.contracts().delete_by_id(&id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(dto::PostResponse {
                message: "Contract was deleted".to_string(),
                id,
            }),
        )
            .into_response(),
        Ok(false) => contract_not_found(&id),
        Err(e) => errors::contract_store_error_to_response(e),
    }
}
