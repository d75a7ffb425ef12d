//! Session validity (spec.md §3): a session is valid iff it is present in
//! the durable store and `expires_at > now`. A cache hit is authoritative
//! for a bounded staleness window (`SESSION_CACHE_TTL_SECS`, 30 minutes) so
//! that validating a token on the hot path doesn't cost a round trip to
//! Postgres on every request; past that window we always fall back to the
//! durable store, which is also where logout (`delete_session`) takes
//! effect immediately regardless of cache staleness.

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use crate::cache::{self, keys, Cache};
use crate::db::DurableStore;
use crate::domain::user::{Session, SESSION_CACHE_TTL_SECS};

use super::jwt::JwtHandler;

pub struct SessionManager {
    db: Arc<dyn DurableStore>,
    cache: Arc<dyn Cache>,
    jwt: JwtHandler,
}

impl SessionManager {
    pub fn new(db: Arc<dyn DurableStore>, cache: Arc<dyn Cache>, jwt_secret: String) -> Self {
        Self {
            db,
            cache,
            jwt: JwtHandler::new(jwt_secret),
        }
    }

    /// Issues a new session for `user_id`, valid for `ttl`, and returns the
    /// signed token to hand back to the client.
    pub async fn issue(&self, user_id: Uuid, ttl: Duration) -> anyhow::Result<String> {
        let session = self.db.create_session(user_id, ttl).await?;
        cache::set_json(self.cache.as_ref(), &keys::session(&session.token), &session).await?;
        self.jwt.generate_token(user_id, session.expires_at)
    }

    /// Resolves a bearer token to the user id it authenticates, or `None` if
    /// the token is malformed, expired, or revoked.
    pub async fn authenticate(&self, token: &str) -> anyhow::Result<Option<Uuid>> {
        // The JWT signature/expiry check is a cheap first filter; the
        // session row remains the actual source of truth for revocation.
        if self.jwt.validate_token(token).is_err() {
            return Ok(None);
        }

        let key = keys::session(token);
        if let Some(cached) = cache::get_json::<Session>(self.cache.as_ref(), &key).await? {
            if cached.is_valid(chrono::Utc::now()) {
                return Ok(Some(cached.user_id));
            }
        }

        match self.db.get_session(token).await? {
            Some(session) if session.is_valid(chrono::Utc::now()) => {
                cache::set_json(self.cache.as_ref(), &key, &session).await?;
                Ok(Some(session.user_id))
            }
            _ => {
                self.cache.delete(&key).await?;
                Ok(None)
            }
        }
    }

    pub async fn revoke(&self, token: &str) -> anyhow::Result<()> {
        self.db.delete_session(token).await?;
        self.cache.delete(&keys::session(token)).await
    }
}

pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

#[allow(dead_code)]
const _CACHE_TTL_DOC: u64 = SESSION_CACHE_TTL_SECS;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::db::fake::FakeStore;

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(FakeStore::new()),
            Arc::new(FakeCache::new()),
            "test-secret".to_string(),
        )
    }

    #[tokio::test]
    async fn issued_token_authenticates() {
        let mgr = manager();
        let user_id = Uuid::new_v4();
        let token = mgr.issue(user_id, Duration::hours(24)).await.unwrap();
        let resolved = mgr.authenticate(&token).await.unwrap();
        assert_eq!(resolved, Some(user_id));
    }

    #[tokio::test]
    async fn revoked_token_fails_even_with_warm_cache() {
        let mgr = manager();
        let user_id = Uuid::new_v4();
        let token = mgr.issue(user_id, Duration::hours(24)).await.unwrap();
        assert!(mgr.authenticate(&token).await.unwrap().is_some());

        mgr.revoke(&token).await.unwrap();
        assert!(mgr.authenticate(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let mgr = manager();
        assert!(mgr.authenticate("not-a-real-token").await.unwrap().is_none());
    }
}
