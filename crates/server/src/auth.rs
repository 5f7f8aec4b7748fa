//! Optional auth token middleware.
//!
//! When `--auth-token` is configured, requests to `/ws` and `/api/*` must
//! include `Authorization: Bearer <token>` (or `?token=<token>` for
//! WebSocket upgrades from a browser). `/api/health` and the static app
//! remain unauthenticated.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};

/// Whether `path` is behind the token at all
fn is_protected(path: &str) -> bool {
    if path == "/api/health" {
        return false;
    }
    path == "/ws" || path.starts_with("/api/")
}

fn presented_token<'a>(headers: &'a HeaderMap, query: Option<&'a str>) -> Option<&'a str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    bearer.or_else(|| {
        query?
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
    })
}

/// Axum middleware that checks for a valid auth token.
pub async fn auth_middleware(
    State(expected_token): State<String>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if !is_protected(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let authorized =
        presented_token(req.headers(), req.uri().query()) == Some(expected_token.as_str());
    if authorized {
        return Ok(next.run(req).await);
    }

    tracing::debug!(
        component = "auth",
        event = "auth.rejected",
        path = %req.uri().path(),
        "Rejected request without a valid token"
    );
    Err(StatusCode::UNAUTHORIZED)
}
