use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered platform user. Credential hash storage and format are
/// delegated to the `bcrypt` crate and never inspected outside `src/auth/`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// An opaque session token bound to a user, durable-store authoritative.
///
/// Invariant (spec.md §3): a session is valid iff present in the durable
/// store AND `expires_at > now`; a cache hit with `expires_at > now` is
/// authoritative for a bounded staleness of 30 minutes (`SESSION_CACHE_TTL`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

pub const SESSION_CACHE_TTL_SECS: u64 = 30 * 60;

impl Session {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
