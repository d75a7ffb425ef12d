//! `/purchases` and `/webhooks/stripe` (spec.md §6).
//!
//! The provider's webhook signature/body format is explicitly out of scope
//! (spec.md §1): this crate never re-implements Stripe's payload shape or
//! signature verification. `/webhooks/stripe` here accepts the minimal,
//! already-decoded event shape an upstream parser (external collaborator)
//! would have produced, matching the `PaymentProvider` port's
//! `PaymentIntent`/`Payout`/`PayoutEvent` types in `src/payment/mod.rs`.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, CorrelationId};
use crate::events::topics::Payload;
use crate::payment::PayoutEvent;
use crate::sagas::withdrawal;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseRequest {
    #[serde(rename = "tierId")]
    pub tier_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreatePurchaseResponse {
    #[serde(rename = "purchaseId")]
    pub purchase_id: Uuid,
    #[serde(rename = "paymentClientSecret")]
    pub payment_client_secret: String,
    pub amount: i64,
}

pub async fn create_purchase(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Json(payload): Json<CreatePurchaseRequest>,
) -> AppResult<Json<CreatePurchaseResponse>> {
    let tier = state
        .collab
        .db
        .get_tier(payload.tier_id)
        .await?
        .ok_or_else(|| AppError::NotFound("tier not found".into()))?;

    let reference = format!("purchase-{}", Uuid::new_v4());
    let intent = state
        .collab
        .payment
        .create_intent(tier.purchase_price_minor, &reference)
        .await
        .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

    let purchase = state
        .collab
        .db
        .create_purchase(user.0, tier.id, &intent.provider_reference)
        .await?;

    state
        .collab
        .events
        .publish(
            &correlation_id,
            Payload::PurchaseInitiated {
                purchase_id: purchase.id,
            },
        )
        .await
        .ok();

    Ok(Json(CreatePurchaseResponse {
        purchase_id: purchase.id,
        payment_client_secret: intent.client_secret,
        amount: tier.purchase_price_minor,
    }))
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub purchase: crate::domain::Purchase,
}

pub async fn get_purchase(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PurchaseResponse>> {
    let purchase = state
        .collab
        .db
        .get_purchase(id)
        .await?
        .ok_or_else(|| AppError::NotFound("purchase not found".into()))?;
    if purchase.user_id != user.0 {
        return Err(AppError::Forbidden("not your purchase".into()));
    }
    Ok(Json(PurchaseResponse { purchase }))
}

/// Minimal pre-decoded webhook shape (spec.md §1 Non-goals: "the payment-
/// provider webhook parser").
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StripeWebhookEvent {
    #[serde(rename = "payment_intent.succeeded")]
    PaymentIntentSucceeded { reference: String },
    #[serde(rename = "payment_intent.payment_failed")]
    PaymentIntentFailed { reference: String },
    #[serde(rename = "payout.paid")]
    PayoutPaid { reference: String },
    #[serde(rename = "payout.failed")]
    PayoutFailed { reference: String },
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    received: bool,
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    Json(event): Json<StripeWebhookEvent>,
) -> AppResult<Json<WebhookAck>> {
    match event {
        StripeWebhookEvent::PaymentIntentSucceeded { reference } => {
            let purchase = state
                .collab
                .db
                .get_purchase_by_payment_reference(&reference)
                .await?
                .ok_or_else(|| AppError::NotFound("no purchase for payment reference".into()))?;
            let assessment = state
                .collab
                .db
                .complete_purchase_and_create_assessment(purchase.id)
                .await?;
            state
                .collab
                .events
                .publish(
                    &correlation_id,
                    Payload::PurchaseCompleted {
                        purchase_id: purchase.id,
                        assessment_id: assessment.id,
                    },
                )
                .await
                .ok();
        }
        StripeWebhookEvent::PaymentIntentFailed { reference } => {
            if let Some(purchase) = state
                .collab
                .db
                .get_purchase_by_payment_reference(&reference)
                .await?
            {
                state
                    .collab
                    .events
                    .publish(&correlation_id, Payload::PurchaseFailed { purchase_id: purchase.id })
                    .await
                    .ok();
            }
        }
        StripeWebhookEvent::PayoutPaid { reference } => {
            withdrawal::handle_payout_event(
                &state.collab,
                PayoutEvent::Paid {
                    payout_reference: reference,
                },
                &correlation_id,
            )
            .await?;
        }
        StripeWebhookEvent::PayoutFailed { reference } => {
            withdrawal::handle_payout_event(
                &state.collab,
                PayoutEvent::Failed {
                    payout_reference: reference,
                },
                &correlation_id,
            )
            .await?;
        }
    }

    Ok(Json(WebhookAck { received: true }))
}
