//! Request/response bodies for the auth endpoints (spec.md §6: `/auth/register`,
//! `/auth/login`, `/auth/me`).

use serde::{Deserialize, Serialize};

use crate::domain::User;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Sanitized user view -- `credential_hash` never leaves `src/auth/` or
/// `src/db/` (spec.md §3: "Credential hash storage and format ... never
/// inspected outside `src/auth/`").
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: uuid::Uuid,
    pub email: String,
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            is_admin: user.is_admin,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

/// Claims embedded in the signed session token (spec.md §3's opaque token
/// is, concretely, a JWT here -- see `auth::session` for why the durable
/// `Session` row remains the actual source of validity truth).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}
