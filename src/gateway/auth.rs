use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::api::{ApiError, SharedState};

/// Require `Authorization: Bearer <token>` when an API token is configured.
pub async fn require_token(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(req).await;
    };
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| tokens_match(token.trim(), expected));

    if authorized {
        return next.run(req).await;
    }
    tracing::debug!(path = %req.uri().path(), "rejected unauthenticated API request");
    ApiError::Unauthorized.into_response()
}

/// Comparison whose running time does not depend on where the inputs differ.
fn tokens_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
