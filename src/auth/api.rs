//! Auth HTTP handlers (spec.md §6: `/auth/register`, `/auth/login`,
//! `/auth/me`).

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Duration;

use crate::db::DurableStore;
use crate::error::{AppError, AppResult};

use super::middleware::AuthenticatedUser;
use super::models::{AuthResponse, LoginRequest, RegisterRequest, UserResponse};
use super::session::{SessionManager, DEFAULT_SESSION_TTL_HOURS};

#[derive(Clone)]
pub struct AuthState {
    pub db: Arc<dyn DurableStore>,
    pub sessions: Arc<SessionManager>,
}

pub async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<Json<AuthResponse>> {
    if payload.password.len() < 8 {
        return Err(AppError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }
    if state.db.get_user_by_email(&payload.email).await?.is_some() {
        return Err(AppError::Conflict("email already registered".into()));
    }

    let credential_hash = bcrypt::hash(&payload.password, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("failed to hash credential: {e}")))?;
    let user = state
        .db
        .create_user(&payload.email, &credential_hash)
        .await?;

    let token = state
        .sessions
        .issue(user.id, Duration::hours(DEFAULT_SESSION_TTL_HOURS))
        .await?;

    Ok(Json(AuthResponse {
        token,
        user: UserResponse::from(&user),
    }))
}

pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let user = state
        .db
        .get_user_by_email(&payload.email)
        .await?
        .ok_or_else(|| AppError::Unauthorized("invalid email or password".into()))?;

    let valid = bcrypt::verify(&payload.password, &user.credential_hash)
        .map_err(|e| AppError::Internal(format!("failed to verify credential: {e}")))?;
    if !valid {
        return Err(AppError::Unauthorized("invalid email or password".into()));
    }

    let token = state
        .sessions
        .issue(user.id, Duration::hours(DEFAULT_SESSION_TTL_HOURS))
        .await?;

    Ok(Json(AuthResponse {
        token,
        user: UserResponse::from(&user),
    }))
}

pub async fn me(
    State(state): State<AuthState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    let user = state
        .db
        .get_user_by_id(user.0)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    Ok(Json(UserResponse::from(&user)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::db::fake::FakeStore;
    use axum::extract::Json as AxumJson;

    fn state() -> AuthState {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let sessions = Arc::new(SessionManager::new(
            db.clone(),
            cache,
            "test-secret".to_string(),
        ));
        AuthState { db, sessions }
    }

    #[tokio::test]
    async fn register_then_login_round_trips() {
        let state = state();
        let reg = register(
            State(state.clone()),
            AxumJson(RegisterRequest {
                email: "trader@example.com".into(),
                password: "hunter22".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(reg.0.user.email, "trader@example.com");

        let login_resp = login(
            State(state),
            AxumJson(LoginRequest {
                email: "trader@example.com".into(),
                password: "hunter22".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(login_resp.0.user.email, "trader@example.com");
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let state = state();
        register(
            State(state.clone()),
            AxumJson(RegisterRequest {
                email: "trader@example.com".into(),
                password: "hunter22".into(),
            }),
        )
        .await
        .unwrap();

        let err = login(
            State(state),
            AxumJson(LoginRequest {
                email: "trader@example.com".into(),
                password: "wrong-password".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email() {
        let state = state();
        register(
            State(state.clone()),
            AxumJson(RegisterRequest {
                email: "trader@example.com".into(),
                password: "hunter22".into(),
            }),
        )
        .await
        .unwrap();

        let err = register(
            State(state),
            AxumJson(RegisterRequest {
                email: "trader@example.com".into(),
                password: "anotherpass".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
