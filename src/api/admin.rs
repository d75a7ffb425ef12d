//! `/admin/withdrawals/*` (spec.md §6): manual-review queue for
//! withdrawals that didn't qualify for auto-approval.

use axum::{
    async_trait,
    extract::{Extension, FromRequestParts, Path, State},
    http::request::Parts,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::domain::Withdrawal;
use crate::error::{AppError, AppResult, CorrelationId};
use crate::sagas::withdrawal;

use super::AppState;

/// `AuthenticatedUser` plus the durable `is_admin` check -- every
/// `/admin/*` handler takes this instead of `AuthenticatedUser` so a
/// missing admin flag rejects before the handler body runs.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(user_id) =
            AuthenticatedUser::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::Unauthorized("missing or invalid session".into()))?;
        let user = state
            .collab
            .db
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("missing or invalid session".into()))?;
        if !user.is_admin {
            return Err(AppError::Forbidden("admin privileges required".into()));
        }
        Ok(AdminUser(user_id))
    }
}

#[derive(Debug, Serialize)]
pub struct PendingWithdrawalsResponse {
    pub withdrawals: Vec<Withdrawal>,
}

pub async fn list_pending_withdrawals(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<Json<PendingWithdrawalsResponse>> {
    let withdrawals = state.collab.db.list_pending_withdrawals().await?;
    Ok(Json(PendingWithdrawalsResponse { withdrawals }))
}

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub withdrawal: Withdrawal,
}

// `impl From<withdrawal::WithdrawalError> for AppError` lives in `api::funded`.

pub async fn approve_withdrawal(
    State(state): State<AppState>,
    _admin: AdminUser,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<WithdrawalResponse>> {
    let withdrawal = withdrawal::admin_approve(&state.collab, id, &correlation_id).await?;
    Ok(Json(WithdrawalResponse { withdrawal }))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    "rejected by admin".to_string()
}

pub async fn reject_withdrawal(
    State(state): State<AppState>,
    _admin: AdminUser,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> AppResult<Json<WithdrawalResponse>> {
    let withdrawal =
        withdrawal::admin_reject(&state.collab, id, &payload.reason, &correlation_id).await?;
    Ok(Json(WithdrawalResponse { withdrawal }))
}
