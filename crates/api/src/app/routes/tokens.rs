use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;

use intake_auth::TokenStore;
use intake_core::{DomainError, DomainResult, NewToken};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Static segment of the listing route; it shadows `/auth/:token`.
const LISTING_SEGMENT: &str = "tokens";

pub fn router() -> Router {
    Router::new()
        .route("/auth/tokens", get(list_tokens).post(issue_token))
        .route("/auth/tokens/:id", delete(revoke_token))
        .route("/auth/:token", get(resolve_token))
}

/// Owner id for a presented token; unknown and expired tokens both answer 404.
pub async fn resolve_token(
    Extension(services): Extension<Arc<AppServices>>,
    Path(token): Path<String>,
) -> axum::response::Response {
    match services.tokens().resolve(&token, Utc::now()).await {
        Ok(found) => (StatusCode::OK, Json(found.owner_id)).into_response(),
        Err(e) => errors::resolve_error_to_response(e),
    }
}

pub async fn list_tokens(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let tokens = match services.token_store().find_all().await {
        Ok(t) => t,
        Err(e) => return errors::token_store_error_to_response(e),
    };

    if tokens.is_empty() {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "no tokens issued");
    }
    (StatusCode::OK, Json(tokens)).into_response()
}

pub async fn issue_token(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::IssueTokenRequest>,
) -> axum::response::Response {
    let token: NewToken = body.into();
    if let Err(e) = check_issuable(&token) {
        return errors::domain_error_to_response(e);
    }

    match services.token_store().insert(token, Utc::now()).await {
        Ok(token) => (StatusCode::CREATED, Json(token)).into_response(),
        Err(e) => errors::token_store_error_to_response(e),
    }
}

/// Only values that `GET /auth/:token` can later resolve are issued.
fn check_issuable(token: &NewToken) -> DomainResult<()> {
    token.validate()?;
    if token.value == LISTING_SEGMENT {
        return Err(DomainError::validation(format!(
            "`{LISTING_SEGMENT}` is a reserved route segment"
        )));
    }
    Ok(())
}

pub async fn revoke_token(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_record_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.token_store().delete_by_id(&id).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("token {id} not found")),
        Err(e) => errors::token_store_error_to_response(e),
    }
}
