//! `/funded-accounts`, `/funded-accounts/:id/withdraw` (spec.md §6).

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::domain::{FundedAccount, Withdrawal};
use crate::error::{AppError, AppResult, CorrelationId};
use crate::sagas::withdrawal::{self, WithdrawalError};

use super::AppState;

impl From<WithdrawalError> for AppError {
    fn from(e: WithdrawalError) -> Self {
        match e {
            WithdrawalError::NotFound(msg) => AppError::NotFound(msg),
            WithdrawalError::Forbidden(msg) => AppError::Forbidden(msg),
            WithdrawalError::Conflict(msg) => AppError::Conflict(msg),
            WithdrawalError::Internal(e) => AppError::Internal(e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FundedAccountView {
    #[serde(flatten)]
    pub account: FundedAccount,
    #[serde(rename = "withdrawableAmount")]
    pub withdrawable_amount: Decimal,
}

async fn view_of(state: &AppState, account: FundedAccount) -> AppResult<FundedAccountView> {
    let tier = state
        .collab
        .db
        .get_tier(account.tier_id)
        .await?
        .ok_or_else(|| AppError::NotFound("tier not found".into()))?;
    let fva = state
        .collab
        .db
        .get_funded_virtual_account(account.id)
        .await?
        .ok_or_else(|| AppError::NotFound("funded virtual account not found".into()))?;
    let withdrawable_amount = fva.withdrawable_amount(tier.profit_split_ratio);
    Ok(FundedAccountView {
        account,
        withdrawable_amount,
    })
}

#[derive(Debug, Serialize)]
pub struct FundedAccountListResponse {
    #[serde(rename = "fundedAccounts")]
    pub funded_accounts: Vec<FundedAccountView>,
}

pub async fn list_funded_accounts(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<FundedAccountListResponse>> {
    let accounts = state.collab.db.list_funded_accounts_for_user(user.0).await?;
    let mut views = Vec::with_capacity(accounts.len());
    for account in accounts {
        views.push(view_of(&state, account).await?);
    }
    Ok(Json(FundedAccountListResponse {
        funded_accounts: views,
    }))
}

pub async fn get_funded_account(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<FundedAccountView>> {
    let account = state
        .collab
        .db
        .get_funded_account(id)
        .await?
        .ok_or_else(|| AppError::NotFound("funded account not found".into()))?;
    if account.user_id != user.0 {
        return Err(AppError::Forbidden("not your funded account".into()));
    }
    Ok(Json(view_of(&state, account).await?))
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct WithdrawResponse {
    #[serde(rename = "withdrawalId")]
    pub withdrawal_id: Uuid,
    pub status: crate::domain::WithdrawalStatus,
    #[serde(rename = "requiresReview")]
    pub requires_review: bool,
}

pub async fn withdraw(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
    Json(payload): Json<WithdrawRequest>,
) -> AppResult<Json<WithdrawResponse>> {
    if payload.amount < Decimal::from(Withdrawal::MIN_AMOUNT) {
        return Err(AppError::Validation(format!(
            "amount must be at least {}",
            Withdrawal::MIN_AMOUNT
        )));
    }

    let withdrawal = withdrawal::request_withdrawal(
        &state.collab,
        id,
        user.0,
        payload.amount,
        &correlation_id,
    )
    .await?;

    Ok(Json(WithdrawResponse {
        withdrawal_id: withdrawal.id,
        requires_review: withdrawal.status == crate::domain::WithdrawalStatus::Pending,
        status: withdrawal.status,
    }))
}
