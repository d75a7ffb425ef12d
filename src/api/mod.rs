//! HTTP command surface (spec.md §6): one handler module per endpoint
//! group, all sharing `AppState` -- the core binary's own collaborators
//! bundle plus the cross-cutting handles (`sessions`, `persistence_health`)
//! that don't belong on `sagas::Collaborators` because no saga touches
//! them.

pub mod admin;
pub mod assessments;
pub mod funded;
pub mod health;
pub mod purchases;
pub mod tiers;
pub mod trading;

use std::sync::Arc;

use crate::auth::SessionManager;
use crate::sagas::Collaborators;
use crate::workers::persistence::PersistenceHealth;

#[derive(Clone)]
pub struct AppState {
    pub collab: Collaborators,
    pub sessions: Arc<SessionManager>,
    pub persistence_health: Arc<PersistenceHealth>,
    pub node_id: String,
}
