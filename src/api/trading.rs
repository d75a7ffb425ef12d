//! `/orders`, `/positions`, `/trades`, `/rules` (spec.md §6): the
//! assessment is addressed by an `assessmentId` carried in the request
//! body (orders) or query string (everything else) rather than the path,
//! matching the endpoint table as written.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::cache;
use crate::domain::{Position, RuleValue, Side, Trade};
use crate::error::{AppError, AppResult, CorrelationId};
use crate::sagas::order_placement::{self, OrderError, PlaceOrderInput, PlaceOrderOutcome};
use crate::sagas::position_close::{self, ClosePositionError};

use super::AppState;

impl From<OrderError> for AppError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::Validation(msg) => AppError::Validation(msg),
            OrderError::NotFound(msg) => AppError::NotFound(msg),
            OrderError::Forbidden(msg) => AppError::Forbidden(msg),
            OrderError::Conflict(msg) => AppError::Conflict(msg),
            OrderError::MarketDataUnavailable(market) => {
                AppError::UpstreamUnavailable(format!("no market data for {market}"))
            }
            OrderError::Internal(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<ClosePositionError> for AppError {
    fn from(e: ClosePositionError) -> Self {
        match e {
            ClosePositionError::NotFound(msg) => AppError::NotFound(msg),
            ClosePositionError::Forbidden(msg) => AppError::Forbidden(msg),
            ClosePositionError::Conflict(msg) => AppError::Conflict(msg),
            ClosePositionError::MarketDataUnavailable(market) => {
                AppError::UpstreamUnavailable(format!("no market data for {market}"))
            }
            ClosePositionError::Internal(e) => AppError::Internal(e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    #[serde(rename = "assessmentId")]
    pub assessment_id: Uuid,
    pub market: String,
    pub side: Side,
    pub quantity: rust_decimal::Decimal,
}

pub async fn place_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Json(payload): Json<PlaceOrderRequest>,
) -> AppResult<Json<PlaceOrderOutcome>> {
    let outcome = order_placement::place_order(
        &state.collab,
        PlaceOrderInput {
            assessment_id: payload.assessment_id,
            user_id: user.0,
            market: payload.market,
            side: payload.side,
            quantity: payload.quantity,
            correlation_id,
        },
    )
    .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct AssessmentScopedQuery {
    #[serde(rename = "assessmentId")]
    pub assessment_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PositionsResponse {
    pub positions: Vec<Position>,
}

async fn assert_owns_assessment(
    state: &AppState,
    assessment_id: Uuid,
    user_id: Uuid,
) -> AppResult<()> {
    let assessment = state
        .collab
        .db
        .get_assessment(assessment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("assessment not found".into()))?;
    if assessment.user_id != user_id {
        return Err(AppError::Forbidden("not your assessment".into()));
    }
    Ok(())
}

pub async fn list_positions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<AssessmentScopedQuery>,
) -> AppResult<Json<PositionsResponse>> {
    assert_owns_assessment(&state, query.assessment_id, user.0).await?;
    let positions = state
        .collab
        .db
        .list_positions_for_assessment(query.assessment_id)
        .await?;
    Ok(Json(PositionsResponse { positions }))
}

#[derive(Debug, Serialize)]
pub struct ClosePositionResponse {
    #[serde(rename = "positionId")]
    pub position_id: Uuid,
    #[serde(rename = "realizedPnl")]
    pub realized_pnl: rust_decimal::Decimal,
    pub balance: rust_decimal::Decimal,
}

pub async fn close_position(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Path(position_id): Path<Uuid>,
    Query(query): Query<AssessmentScopedQuery>,
) -> AppResult<Json<ClosePositionResponse>> {
    let outcome = position_close::close_position(
        &state.collab,
        query.assessment_id,
        user.0,
        position_id,
        &correlation_id,
    )
    .await?;
    Ok(Json(ClosePositionResponse {
        position_id: outcome.position_id,
        realized_pnl: outcome.realized_pnl,
        balance: outcome.balance,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    #[serde(rename = "assessmentId")]
    pub assessment_id: Uuid,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct TradesResponse {
    pub trades: Vec<Trade>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_trades(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<TradesQuery>,
) -> AppResult<Json<TradesResponse>> {
    assert_owns_assessment(&state, query.assessment_id, user.0).await?;
    let (trades, total) = state
        .collab
        .db
        .list_trades_for_assessment(query.assessment_id, query.limit, query.offset)
        .await?;
    Ok(Json(TradesResponse {
        trades,
        total,
        limit: query.limit,
        offset: query.offset,
    }))
}

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub drawdown: RuleValue,
    #[serde(rename = "tradeCount")]
    pub trade_count: RuleValue,
    #[serde(rename = "riskPerTrade")]
    pub risk_per_trade: RuleValue,
}

pub async fn get_rules(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<AssessmentScopedQuery>,
) -> AppResult<Json<RulesResponse>> {
    assert_owns_assessment(&state, query.assessment_id, user.0).await?;
    let rules = cache::get_rules(state.collab.cache.as_ref(), query.assessment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("no rules snapshot for assessment".into()))?;
    Ok(Json(RulesResponse {
        drawdown: rules.drawdown,
        trade_count: rules.trade_count,
        risk_per_trade: rules.risk_per_trade,
    }))
}
