use axum::{Router, routing::post};

use intake_core::EntityKind;

pub mod contracts;
pub mod mq;
pub mod records;
pub mod system;
pub mod tokens;

/// Router for one service: `/api/<plural>/...`, its queue entry point and
/// the shared contracts.
pub fn router(kind: EntityKind) -> Router {
    Router::new()
        .nest(
            &format!("/api/{}", kind.plural()),
            records::router().merge(tokens::router()),
        )
        .route(&format!("/api/mq/{}", kind.singular()), post(mq::submit))
        .nest("/api/contracts", contracts::router())
}
