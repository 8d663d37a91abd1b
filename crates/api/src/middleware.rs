//! Request logging.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{info, warn};

/// One log line per request with method, path, status and latency.
///
/// Paths are logged without the query string, and presented token values are
/// redacted.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let latency_ms = started.elapsed().as_millis() as u64;
    let route = redact(&path);
    if response.status().is_server_error() {
        warn!(%method, path = %route, status, latency_ms, "request failed");
    } else {
        info!(%method, path = %route, status, latency_ms, "request served");
    }
    response
}

/// Hide the presented value in `/api/<plural>/auth/<token>`.
fn redact(path: &str) -> String {
    match path.split_once("/auth/") {
        Some((prefix, rest)) if !rest.is_empty() && rest != "tokens" && !rest.starts_with("tokens/") => {
            format!("{prefix}/auth/<redacted>")
        }
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::redact;

    #[test]
    fn presented_tokens_are_redacted() {
        assert_eq!(redact("/api/investors/auth/s3cret"), "/api/investors/auth/<redacted>");
        assert_eq!(redact("/api/investors/auth/tokens"), "/api/investors/auth/tokens");
        assert_eq!(redact("/api/investors/auth/tokens/4"), "/api/investors/auth/tokens/4");
        assert_eq!(redact("/api/investors/auth/tokensy"), "/api/investors/auth/<redacted>");
        assert_eq!(redact("/api/investors/12"), "/api/investors/12");
    }
}
