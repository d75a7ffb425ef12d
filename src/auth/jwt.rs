//! JWT signing/verification (spec.md §3 session token, concretely realized
//! as a signed token rather than a bare random string -- tamper-evidence is
//! free this way, though `auth::session::SessionManager` still treats the
//! durable `Session` row as the actual source of validity truth, since a
//! JWT alone can't be revoked).

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};

use crate::auth::models::Claims;

pub struct JwtHandler {
    secret: String,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    pub fn generate_token(&self, user_id: uuid::Uuid, expires_at: chrono::DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: expires_at.timestamp() as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("failed to sign session token")
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .context("invalid or expired session token")?;
        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_user_id() {
        let handler = JwtHandler::new("test-secret".to_string());
        let user_id = uuid::Uuid::new_v4();
        let token = handler
            .generate_token(user_id, Utc::now() + chrono::Duration::hours(1))
            .unwrap();
        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
    }

    #[test]
    fn rejects_token_signed_with_different_secret() {
        let a = JwtHandler::new("secret-a".to_string());
        let b = JwtHandler::new("secret-b".to_string());
        let token = a
            .generate_token(uuid::Uuid::new_v4(), Utc::now() + chrono::Duration::hours(1))
            .unwrap();
        assert!(b.validate_token(&token).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let handler = JwtHandler::new("test-secret".to_string());
        let token = handler
            .generate_token(uuid::Uuid::new_v4(), Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        assert!(handler.validate_token(&token).is_err());
    }
}
