//! `GET /tiers` (spec.md §6): the public, unauthenticated tier catalog.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::AppResult;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct TiersResponse {
    pub tiers: Vec<crate::domain::Tier>,
}

pub async fn list_tiers(State(state): State<AppState>) -> AppResult<Json<TiersResponse>> {
    let tiers = state.collab.db.list_tiers().await?;
    Ok(Json(TiersResponse { tiers }))
}
