use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Queue a record for asynchronous saving.
///
/// 202 only says the broker took the message; the record shows up in listings
/// once a consumer has saved it.
pub async fn submit(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RecordRequest>,
) -> axum::response::Response {
    match services.producer().submit(body.into()).await {
        Ok(_message_id) => StatusCode::ACCEPTED.into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}
