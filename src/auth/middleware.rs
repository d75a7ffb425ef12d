//! Authentication middleware (spec.md §3/§6): every non-public endpoint
//! requires a valid session, extracted either from the `Authorization:
//! Bearer` header (ordinary HTTP) or a `token=` query parameter (the
//! WebSocket handshake can't set headers from a browser `EventSource`/`ws://`
//! client, so the fan-out connection manager accepts it positionally too).

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use super::session::SessionManager;

/// The authenticated user id, inserted into request extensions by
/// `auth_middleware` for downstream handlers to pull out.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .copied()
            .ok_or(AuthError::MissingToken)
    }
}

fn extract_token(req: &Request) -> Option<String> {
    let from_query = req.uri().query().and_then(|query| {
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("token="))
            .map(|t| t.to_string())
    });

    let from_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.to_string());

    from_header.or(from_query)
}

pub async fn auth_middleware(
    State(sessions): State<Arc<SessionManager>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_token(&req).ok_or(AuthError::MissingToken)?;

    let user_id = sessions
        .authenticate(&token)
        .await
        .map_err(|_| AuthError::InvalidToken)?
        .ok_or(AuthError::InvalidToken)?;

    req.extensions_mut().insert(AuthenticatedUser(user_id));
    Ok(next.run(req).await)
}

/// Allows the request through without a token, but attaches
/// `AuthenticatedUser` if a valid one was presented (used by endpoints whose
/// behavior only changes for logged-in callers, not the spec's endpoint
/// table as written -- kept for parity with the teacher's middleware shape).
pub async fn optional_auth_middleware(
    State(sessions): State<Arc<SessionManager>>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(token) = extract_token(&req) {
        if let Ok(Some(user_id)) = sessions.authenticate(&token).await {
            req.extensions_mut().insert(AuthenticatedUser(user_id));
        }
    }
    next.run(req).await
}

pub fn extract_user(req: &Request) -> Option<AuthenticatedUser> {
    req.extensions().get::<AuthenticatedUser>().copied()
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing authorization token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid or expired token"),
        };
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    #[test]
    fn prefers_header_over_query_token() {
        let req = HttpRequest::builder()
            .uri("/orders?token=from-query")
            .header("Authorization", "Bearer from-header")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_token(&req).as_deref(), Some("from-header"));
    }

    #[test]
    fn falls_back_to_query_token_for_websocket_handshakes() {
        let req = HttpRequest::builder()
            .uri("/ws?token=from-query")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_token(&req).as_deref(), Some("from-query"));
    }

    #[test]
    fn missing_token_response_is_401() {
        assert_eq!(
            AuthError::MissingToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
