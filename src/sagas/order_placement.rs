//! Order-placement saga (spec.md §4.3).

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::cache;
use crate::domain::{AssessmentStatus, HotSnapshot, RuleName, RuleValue, RulesSnapshot, Side, SnapshotPosition};
use crate::events::topics::Payload;
use crate::oracle::is_prediction_market;

use super::Collaborators;

#[derive(Debug, Clone)]
pub struct PlaceOrderInput {
    pub assessment_id: Uuid,
    pub user_id: Uuid,
    pub market: String,
    pub side: Side,
    pub quantity: Decimal,
    pub correlation_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PlaceOrderOutcome {
    Filled {
        #[serde(rename = "orderId")]
        order_id: Uuid,
        position: SnapshotPosition,
        balance: Decimal,
    },
    Failed {
        status: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("market data unavailable for {0}")]
    MarketDataUnavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Executes spec.md §4.3 steps 1-11, serialized per assessment id.
pub async fn place_order(
    collab: &Collaborators,
    input: PlaceOrderInput,
) -> Result<PlaceOrderOutcome, OrderError> {
    let _guard = collab.locks.lock(input.assessment_id).await;

    // Step 1: validate market+side.
    let is_prediction = is_prediction_market(&input.market);
    if is_prediction && !input.side.is_prediction_side() {
        return Err(OrderError::Validation(format!(
            "market {} requires side yes/no",
            input.market
        )));
    }
    if !is_prediction && !input.side.is_crypto_side() {
        return Err(OrderError::Validation(format!(
            "market {} requires side long/short",
            input.market
        )));
    }
    if input.quantity <= Decimal::ZERO {
        return Err(OrderError::Validation("quantity must be positive".into()));
    }

    // Step 2: load tier limits + hot snapshot.
    let assessment = collab
        .db
        .get_assessment(input.assessment_id)
        .await?
        .ok_or_else(|| OrderError::NotFound("assessment not found".into()))?;
    if assessment.user_id != input.user_id {
        return Err(OrderError::Forbidden("not your assessment".into()));
    }
    if assessment.status != AssessmentStatus::Active {
        return Err(OrderError::Conflict(format!(
            "assessment is {:?}, not active",
            assessment.status
        )));
    }
    let tier = collab
        .db
        .get_tier(assessment.tier_id)
        .await?
        .ok_or_else(|| OrderError::NotFound("tier not found".into()))?;
    let previous_snapshot = cache::get_snapshot(collab.cache.as_ref(), input.assessment_id)
        .await?
        .ok_or_else(|| OrderError::Conflict("no live state for assessment".into()))?;

    // Step 3: price.
    let quote = collab
        .oracle
        .price(&input.market)
        .await?
        .ok_or_else(|| OrderError::MarketDataUnavailable(input.market.clone()))?;
    let reference_price = quote
        .reference_for(input.side)
        .ok_or_else(|| OrderError::MarketDataUnavailable(input.market.clone()))?;

    let (slippage_rate, fee_rate) = collab.execution_rates.for_market(is_prediction);
    let mut execution_price = reference_price * (Decimal::ONE + slippage_rate);
    if is_prediction && execution_price > Decimal::ONE {
        execution_price = Decimal::ONE;
    }
    let slippage_amount = (execution_price - reference_price) * input.quantity;
    let fee_amount = execution_price * input.quantity * fee_rate;
    let total_cost = execution_price * input.quantity + fee_amount;

    // Step 4: risk gate.
    let risk = if previous_snapshot.current_balance > Decimal::ZERO {
        total_cost / previous_snapshot.current_balance
    } else {
        Decimal::MAX
    };
    if risk > tier.max_risk_per_trade_ratio {
        return Err(OrderError::Validation(format!(
            "risk {risk} exceeds max risk per trade {}",
            tier.max_risk_per_trade_ratio
        )));
    }

    // Step 5: balance check.
    let new_balance = previous_snapshot.current_balance - total_cost;
    if new_balance < Decimal::ZERO {
        return Err(OrderError::Validation("insufficient balance".into()));
    }

    // Step 6: mutate snapshot, write back.
    let mut snapshot = previous_snapshot.clone();
    let position_id = Uuid::new_v4();
    let opened_at = Utc::now();
    let snap_position = SnapshotPosition {
        id: position_id,
        market: input.market.clone(),
        side: input.side,
        quantity: input.quantity,
        entry_price: execution_price,
        current_price: execution_price,
        unrealized_pnl: Decimal::ZERO,
        opened_at,
        status: crate::domain::PositionStatus::Open,
    };
    snapshot.positions.push(snap_position.clone());
    snapshot.current_balance = new_balance;
    snapshot.trade_count += 1;
    cache::set_snapshot(collab.cache.as_ref(), input.assessment_id, &snapshot).await?;

    // Step 7: peak update.
    if snapshot.maybe_raise_peak() {
        cache::set_snapshot(collab.cache.as_ref(), input.assessment_id, &snapshot).await?;
    }

    // Step 8: drawdown gate.
    let drawdown = snapshot.drawdown();
    if drawdown > tier.max_drawdown_ratio {
        // Compensate: restore previous balance + positions.
        cache::set_snapshot(collab.cache.as_ref(), input.assessment_id, &previous_snapshot)
            .await?;
        collab
            .events
            .publish(
                &input.correlation_id,
                Payload::PositionClosed {
                    assessment_id: input.assessment_id,
                    position_id,
                    entry_price: execution_price,
                    exit_price: execution_price,
                    realized_pnl: Decimal::ZERO,
                },
            )
            .await
            .ok();

        collab
            .db
            .transition_assessment(input.assessment_id, AssessmentStatus::Failed)
            .await?;
        collab
            .db
            .create_violation(
                input.assessment_id,
                RuleName::Drawdown,
                drawdown,
                tier.max_drawdown_ratio,
            )
            .await?;
        collab
            .events
            .publish(
                &input.correlation_id,
                Payload::RulesViolationDetected {
                    assessment_id: input.assessment_id,
                    rule: RuleName::Drawdown,
                    value: drawdown,
                    threshold: tier.max_drawdown_ratio,
                },
            )
            .await
            .ok();

        return Ok(PlaceOrderOutcome::Failed {
            status: "failed",
            reason: "drawdown_violation",
        });
    }

    // Step 9: record trade (kind=open), best-effort.
    let trade_result = collab
        .db
        .create_trade(crate::db::NewTrade {
            assessment_id: input.assessment_id,
            position_id,
            kind: crate::domain::TradeKind::Open,
            market: input.market.clone(),
            side: input.side,
            quantity: input.quantity,
            price: execution_price,
            slippage_amount,
            fee_amount,
            realized_pnl: Decimal::ZERO,
        })
        .await;
    if let Err(e) = trade_result {
        tracing::warn!(correlation_id = %input.correlation_id, error = %e, "best-effort trade record failed");
    }

    // Step 10: emit events.
    let order_id = position_id; // see DESIGN.md: orderId is never persisted separately upstream.
    collab
        .events
        .publish(
            &input.correlation_id,
            Payload::OrderPlaced {
                assessment_id: input.assessment_id,
                order_id,
                market: input.market.clone(),
                side: input.side,
                quantity: input.quantity,
            },
        )
        .await
        .ok();
    collab
        .events
        .publish(
            &input.correlation_id,
            Payload::OrderFilled {
                assessment_id: input.assessment_id,
                position_id,
                execution_price,
                balance: new_balance,
            },
        )
        .await
        .ok();
    collab
        .events
        .publish(
            &input.correlation_id,
            Payload::PositionOpened {
                assessment_id: input.assessment_id,
                position_id,
                market: input.market.clone(),
                side: input.side,
                quantity: input.quantity,
                entry_price: execution_price,
            },
        )
        .await
        .ok();

    // Step 11: refresh rules snapshot, best-effort.
    if let Err(e) = refresh_rules_snapshot(collab, input.assessment_id, &snapshot, &tier).await {
        tracing::warn!(correlation_id = %input.correlation_id, error = %e, "best-effort rules refresh failed");
    }

    Ok(PlaceOrderOutcome::Filled {
        order_id,
        position: snap_position,
        balance: new_balance,
    })
}

pub(crate) async fn refresh_rules_snapshot(
    collab: &Collaborators,
    assessment_id: Uuid,
    snapshot: &HotSnapshot,
    tier: &crate::domain::Tier,
) -> anyhow::Result<()> {
    let rules = RulesSnapshot {
        drawdown: RuleValue::new(RuleName::Drawdown, snapshot.drawdown(), tier.max_drawdown_ratio),
        trade_count: RuleValue::new(
            RuleName::TradeCount,
            Decimal::from(snapshot.trade_count),
            Decimal::from(tier.min_trade_count),
        ),
        risk_per_trade: RuleValue::new(
            RuleName::RiskPerTrade,
            snapshot.max_risk_per_trade(),
            tier.max_risk_per_trade_ratio,
        ),
    };
    cache::set_rules(collab.cache.as_ref(), assessment_id, &rules).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::concurrency::AssessmentLocks;
    use crate::db::fake::FakeStore;
    use crate::events::fake::FakeEventBus;
    use crate::events::topics::topic;
    use crate::oracle::PriceQuote;
    use crate::payment::fake::FakePaymentProvider;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct FixedOracle(PriceQuote);
    #[async_trait]
    impl crate::oracle::Oracle for FixedOracle {
        async fn price(&self, _market: &str) -> anyhow::Result<Option<PriceQuote>> {
            Ok(Some(self.0))
        }
    }

    fn collab_with(oracle_quote: PriceQuote, rates: super::super::execution_rates::ExecutionRates) -> (Collaborators, Arc<FakeStore>, Arc<FakeCache>, Arc<FakeEventBus>) {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = Collaborators {
            cache: cache.clone(),
            db: db.clone(),
            events: events.clone(),
            oracle: Arc::new(FixedOracle(oracle_quote)),
            payment: Arc::new(FakePaymentProvider::new()),
            locks: Arc::new(AssessmentLocks::new()),
            execution_rates: rates,
        };
        (collab, db, cache, events)
    }

    fn seed_tier(db: &FakeStore, max_risk: Decimal, max_drawdown: Decimal) -> crate::domain::Tier {
        let tier = crate::domain::Tier {
            id: Uuid::new_v4(),
            name: "T0".into(),
            purchase_price_minor: 10_000,
            starting_balance: dec!(50000),
            max_drawdown_ratio: max_drawdown,
            min_trade_count: 10,
            max_risk_per_trade_ratio: max_risk,
            profit_split_ratio: dec!(0.8),
        };
        db.seed_tier(tier.clone());
        tier
    }

    async fn seed_active_assessment(
        db: &FakeStore,
        cache: &FakeCache,
        tier: &crate::domain::Tier,
        user_id: Uuid,
        starting_balance: Decimal,
    ) -> Uuid {
        let assessment_id = Uuid::new_v4();
        db.seed_assessment(crate::domain::Assessment {
            id: assessment_id,
            user_id,
            tier_id: tier.id,
            purchase_id: Uuid::new_v4(),
            status: AssessmentStatus::Active,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            soft_delete_at: None,
        });
        let snapshot = HotSnapshot::empty(starting_balance);
        cache::set_snapshot(cache, assessment_id, &snapshot).await.unwrap();
        assessment_id
    }

    #[tokio::test]
    async fn scenario_1_happy_order_rejects_then_accepts() {
        let (collab, db, cache, _events) =
            collab_with(PriceQuote::Scalar(dec!(50000)), super::super::execution_rates::ExecutionRates::default());
        let tier = seed_tier(&db, dec!(0.1), dec!(0.2));
        let user_id = Uuid::new_v4();
        let assessment_id = seed_active_assessment(&db, &cache, &tier, user_id, dec!(50000)).await;

        let big = place_order(
            &collab,
            PlaceOrderInput {
                assessment_id,
                user_id,
                market: "BTC/USD".into(),
                side: Side::Long,
                quantity: dec!(0.1),
                correlation_id: "corr-1".into(),
            },
        )
        .await;
        assert!(matches!(big, Err(OrderError::Validation(_))));

        let small = place_order(
            &collab,
            PlaceOrderInput {
                assessment_id,
                user_id,
                market: "BTC/USD".into(),
                side: Side::Long,
                quantity: dec!(0.05),
                correlation_id: "corr-2".into(),
            },
        )
        .await
        .unwrap();
        match small {
            PlaceOrderOutcome::Filled { .. } => {}
            other => panic!("expected fill, got {other:?}"),
        }

        let snapshot = cache::get_snapshot(cache.as_ref(), assessment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.positions.len(), 1);
    }

    #[tokio::test]
    async fn scenario_2_drawdown_trip_rolls_back_and_fails_assessment() {
        let (collab, db, cache, events) =
            collab_with(PriceQuote::Scalar(dec!(50000)), super::super::execution_rates::ExecutionRates {
                crypto_slippage_rate: dec!(0.20),
                crypto_fee_rate: dec!(0.001),
                ..Default::default()
            });
        let tier = seed_tier(&db, dec!(1.0), dec!(0.2));
        let user_id = Uuid::new_v4();
        let assessment_id = seed_active_assessment(&db, &cache, &tier, user_id, dec!(50000)).await;

        let outcome = place_order(
            &collab,
            PlaceOrderInput {
                assessment_id,
                user_id,
                market: "BTC/USD".into(),
                side: Side::Long,
                quantity: dec!(0.1),
                correlation_id: "corr-3".into(),
            },
        )
        .await
        .unwrap();

        match outcome {
            PlaceOrderOutcome::Failed { status, reason } => {
                assert_eq!(status, "failed");
                assert_eq!(reason, "drawdown_violation");
            }
            other => panic!("expected drawdown failure, got {other:?}"),
        }

        let snapshot = cache::get_snapshot(cache.as_ref(), assessment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.current_balance, dec!(50000));
        assert!(snapshot.positions.is_empty());

        let assessment = db.get_assessment(assessment_id).await.unwrap().unwrap();
        assert_eq!(assessment.status, AssessmentStatus::Failed);
        assert_eq!(events.count(topic::RULES_VIOLATION_DETECTED), 1);
    }

    #[tokio::test]
    async fn scenario_3_prediction_price_clamps_at_one() {
        let (collab, db, cache, _events) = collab_with(
            PriceQuote::Prediction {
                yes: dec!(0.99),
                no: dec!(0.01),
            },
            super::super::execution_rates::ExecutionRates {
                prediction_slippage_rate: dec!(0.02),
                prediction_fee_rate: dec!(0.0005),
                ..Default::default()
            },
        );
        let tier = seed_tier(&db, dec!(1.0), dec!(1.0));
        let user_id = Uuid::new_v4();
        let assessment_id = seed_active_assessment(&db, &cache, &tier, user_id, dec!(1000)).await;

        let outcome = place_order(
            &collab,
            PlaceOrderInput {
                assessment_id,
                user_id,
                market: "polymarket:E1".into(),
                side: Side::Yes,
                quantity: dec!(100),
                correlation_id: "corr-4".into(),
            },
        )
        .await
        .unwrap();

        match outcome {
            PlaceOrderOutcome::Filled { position, .. } => {
                assert_eq!(position.entry_price, dec!(1.0));
            }
            other => panic!("expected fill, got {other:?}"),
        }
    }
}
