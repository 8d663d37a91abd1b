use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use intake_infra::EntityGateway;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_record).get(list_records))
        .route("/:id", get(get_record).delete(delete_record))
}

pub async fn list_records(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let records = match services.gateway().find_all().await {
        Ok(r) => r,
        Err(e) => return errors::gateway_error_to_response(e),
    };

    if records.is_empty() {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no {} stored", services.kind().plural()),
        );
    }
    (StatusCode::OK, Json(records)).into_response()
}

pub async fn get_record(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_record_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.gateway().find_by_id(&id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("{} {id} not found", services.kind().label()),
        ),
        Err(e) => errors::gateway_error_to_response(e),
    }
}

/// Synchronous save, bypassing the queue.
pub async fn create_record(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RecordRequest>,
) -> axum::response::Response {
    match services.gateway().save(body.into()).await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(dto::PostResponse {
                id,
                message: format!("{} was successfully created", services.kind().label()),
            }),
        )
            .into_response(),
        Err(e) => errors::gateway_error_to_response(e),
    }
}

pub async fn delete_record(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_record_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.gateway().delete_by_id(&id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(dto::PostResponse {
                message: format!("{} was deleted", services.kind().label()),
                id,
            }),
        )
            .into_response(),
        Ok(false) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("{} {id} not found", services.kind().label()),
        ),
        Err(e) => errors::gateway_error_to_response(e),
    }
}
