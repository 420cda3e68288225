//! Bearer-token authentication and the agent identity extractor.

use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use drover_types::{AGENT_HEADER, ErrorResponse};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::error::ServerError;
use crate::state::AppState;

/// Why a request failed authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing authorization token")]
    MissingToken,
    /// The header is not `Bearer <token>`.
    #[error("Invalid authorization format")]
    InvalidFormat,
    #[error("Invalid token")]
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            AuthError::InvalidFormat => (StatusCode::BAD_REQUEST, "bad_request"),
            AuthError::MissingToken | AuthError::InvalidToken => {
                (StatusCode::UNAUTHORIZED, "unauthorized")
            }
        };
        let body = ErrorResponse {
            code: code.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Token equality that does not short-circuit on the first differing byte.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (presented, expected) = (presented.as_bytes(), expected.as_bytes());
    // ct_eq on unequal lengths returns false without comparing; still do one
    // full comparison so timing does not depend on the length.
    let equal: bool = presented.ct_eq(expected).into();
    let _ = expected.ct_eq(expected);
    equal && presented.len() == expected.len()
}

/// The token from `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AuthError::InvalidFormat)
}

/// Bearer-token middleware; a no-op when no token is configured.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    if let Some(expected) = &state.config().auth_token
        && !tokens_match(bearer_token(request.headers())?, expected)
    {
        return Err(AuthError::InvalidToken);
    }
    Ok(next.run(request).await)
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent identity
// ─────────────────────────────────────────────────────────────────────────────

/// The calling agent, from the `X-Drover-Agent` header.
///
/// `None` when the header is absent. The hub then skips ownership checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentId(pub Option<i64>);

impl<S> FromRequestParts<S> for AgentId
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(AGENT_HEADER) else {
            return Ok(AgentId(None));
        };
        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|id| AgentId(Some(id)))
            .ok_or_else(|| ServerError::BadRequest(format!("invalid {AGENT_HEADER} header")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{Router, middleware, routing::get};
    use tower::ServiceExt;

    fn app(token: Option<&str>) -> Router {
        let state = AppState::new(ServerConfig::new(token.map(String::from)));
        Router::new()
            .route("/protected", get(|| async { "ok" }))
            .route(
                "/whoami",
                get(|AgentId(id): AgentId| async move { format!("{id:?}") }),
            )
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    fn get_request(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("abc", "abc"));
        assert!(!tokens_match("abc", "abd"));
        assert!(!tokens_match("abc", "abcd"));
        assert!(!tokens_match("", "abc"));
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), Err(AuthError::MissingToken));

        headers.insert(AUTHORIZATION, "Token abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Err(AuthError::InvalidFormat));

        headers.insert(AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Ok("abc"));
    }

    #[tokio::test]
    async fn test_valid_token() {
        let response = app(Some("secret"))
            .oneshot(get_request("/protected", &[("Authorization", "Bearer secret")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_and_wrong_token() {
        let response = app(Some("secret"))
            .oneshot(get_request("/protected", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(Some("secret"))
            .oneshot(get_request("/protected", &[("Authorization", "Bearer nope")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(Some("secret"))
            .oneshot(get_request("/protected", &[("Authorization", "Basic secret")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_no_token_configured() {
        let response = app(None)
            .oneshot(get_request("/protected", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_agent_header() {
        let response = app(None)
            .oneshot(get_request("/whoami", &[(AGENT_HEADER, "7")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(None)
            .oneshot(get_request("/whoami", &[(AGENT_HEADER, "seven")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
