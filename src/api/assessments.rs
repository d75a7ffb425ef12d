//! `/assessments` (spec.md §6): confirmation, listing, detail-with-hot-state,
//! and the lifecycle transition endpoints. The transitions themselves are
//! thin wrappers over `sagas::assessment_lifecycle`; this module's own job
//! is request/response shaping and ownership checks on the read paths.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::cache;
use crate::domain::{Assessment, HotSnapshot};
use crate::error::{AppError, AppResult, CorrelationId};
use crate::sagas::assessment_lifecycle::{self, LifecycleError};

use super::AppState;

impl From<LifecycleError> for AppError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::NotFound(msg) => AppError::NotFound(msg),
            LifecycleError::Forbidden(msg) => AppError::Forbidden(msg),
            LifecycleError::Conflict(msg) => AppError::Conflict(msg),
            LifecycleError::Internal(e) => AppError::Internal(e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmAssessmentRequest {
    #[serde(rename = "purchaseId")]
    pub purchase_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct AssessmentResponse {
    pub assessment: Assessment,
}

/// `POST /assessments`: confirms the `pending` assessment the
/// `/webhooks/stripe` `payment_intent.succeeded` path already created for
/// this purchase. Exists so a client polling after checkout has an
/// authenticated, purchase-scoped way to find the assessment id without a
/// dedicated `get_assessment_by_purchase_id` store method -- it filters the
/// caller's own assessments rather than widening `DurableStore`'s surface
/// for one convenience lookup.
pub async fn confirm_assessment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ConfirmAssessmentRequest>,
) -> AppResult<Json<AssessmentResponse>> {
    let purchase = state
        .collab
        .db
        .get_purchase(payload.purchase_id)
        .await?
        .ok_or_else(|| AppError::NotFound("purchase not found".into()))?;
    if purchase.user_id != user.0 {
        return Err(AppError::Forbidden("not your purchase".into()));
    }

    let assessments = state.collab.db.list_assessments_for_user(user.0).await?;
    let assessment = assessments
        .into_iter()
        .find(|a| a.purchase_id == purchase.id)
        .ok_or_else(|| {
            AppError::Conflict("purchase has not yet produced an assessment".into())
        })?;

    Ok(Json(AssessmentResponse { assessment }))
}

#[derive(Debug, Serialize)]
pub struct AssessmentListResponse {
    pub assessments: Vec<Assessment>,
}

pub async fn list_assessments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<AssessmentListResponse>> {
    let assessments = state.collab.db.list_assessments_for_user(user.0).await?;
    Ok(Json(AssessmentListResponse { assessments }))
}

#[derive(Debug, Serialize)]
pub struct AssessmentDetailResponse {
    pub assessment: Assessment,
    pub snapshot: Option<HotSnapshot>,
}

async fn owned_assessment(
    state: &AppState,
    id: Uuid,
    user_id: Uuid,
) -> AppResult<Assessment> {
    let assessment = state
        .collab
        .db
        .get_assessment(id)
        .await?
        .ok_or_else(|| AppError::NotFound("assessment not found".into()))?;
    if assessment.user_id != user_id {
        return Err(AppError::Forbidden("not your assessment".into()));
    }
    Ok(assessment)
}

pub async fn get_assessment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AssessmentDetailResponse>> {
    let assessment = owned_assessment(&state, id, user.0).await?;
    let snapshot = cache::get_snapshot(state.collab.cache.as_ref(), id).await?;
    Ok(Json(AssessmentDetailResponse {
        assessment,
        snapshot,
    }))
}

pub async fn start_assessment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AssessmentResponse>> {
    let assessment =
        assessment_lifecycle::start_assessment(&state.collab, id, user.0, &correlation_id).await?;
    Ok(Json(AssessmentResponse { assessment }))
}

pub async fn pause_assessment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AssessmentResponse>> {
    let assessment =
        assessment_lifecycle::pause_assessment(&state.collab, id, user.0, &correlation_id).await?;
    Ok(Json(AssessmentResponse { assessment }))
}

pub async fn resume_assessment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AssessmentResponse>> {
    let assessment =
        assessment_lifecycle::resume_assessment(&state.collab, id, user.0, &correlation_id)
            .await?;
    Ok(Json(AssessmentResponse { assessment }))
}

pub async fn abandon_assessment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AssessmentResponse>> {
    let assessment =
        assessment_lifecycle::abandon_assessment(&state.collab, id, user.0, &correlation_id)
            .await?;
    Ok(Json(AssessmentResponse { assessment }))
}
