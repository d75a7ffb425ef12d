//! Position close saga, manual or auto (spec.md §4.4).

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cache;
use crate::domain::{AssessmentStatus, PositionStatus};
use crate::events::topics::Payload;

use super::order_placement::refresh_rules_snapshot;
use super::Collaborators;

#[derive(Debug, thiserror::Error)]
pub enum ClosePositionError {
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

#[derive(Debug, Clone)]
pub struct ClosePositionOutcome {
    pub position_id: Uuid,
    pub realized_pnl: Decimal,
    pub balance: Decimal,
}

/// `fetch position (durable first, fall back to scanning cache snapshots)`
/// (spec.md §4.4) -- positions freshly opened by the order saga live only
/// in the snapshot until the persistence worker's next cycle creates the
/// durable row.
async fn find_open_position_in_snapshot(
    collab: &Collaborators,
    assessment_id: Uuid,
    position_id: Uuid,
) -> anyhow::Result<Option<crate::domain::SnapshotPosition>> {
    let snapshot = cache::get_snapshot(collab.cache.as_ref(), assessment_id).await?;
    Ok(snapshot.and_then(|s| {
        s.positions
            .into_iter()
            .find(|p| p.id == position_id && p.status == PositionStatus::Open)
    }))
}

pub async fn close_position(
    collab: &Collaborators,
    assessment_id: Uuid,
    user_id: Uuid,
    position_id: Uuid,
    correlation_id: &str,
) -> Result<ClosePositionOutcome, ClosePositionError> {
    let _guard = collab.locks.lock(assessment_id).await;

    let assessment = collab
        .db
        .get_assessment(assessment_id)
        .await?
        .ok_or_else(|| ClosePositionError::NotFound("assessment not found".into()))?;
    if assessment.user_id != user_id {
        return Err(ClosePositionError::Forbidden("not your assessment".into()));
    }
    if assessment.status != AssessmentStatus::Active {
        return Err(ClosePositionError::Conflict(format!(
            "assessment is {:?}, not active",
            assessment.status
        )));
    }

    // Durable-first lookup, falling back to the cache snapshot scan.
    let durable_position = collab.db.get_position(position_id).await?;
    let (market, side, quantity, entry_price) = match &durable_position {
        Some(p) if p.assessment_id == assessment_id && p.status == PositionStatus::Open => {
            (p.market.clone(), p.side, p.quantity, p.entry_price)
        }
        _ => {
            let snap_position = find_open_position_in_snapshot(collab, assessment_id, position_id)
                .await?
                .ok_or_else(|| ClosePositionError::NotFound("position not found".into()))?;
            (
                snap_position.market,
                snap_position.side,
                snap_position.quantity,
                snap_position.entry_price,
            )
        }
    };

    let tier = collab
        .db
        .get_tier(assessment.tier_id)
        .await?
        .ok_or_else(|| ClosePositionError::NotFound("tier not found".into()))?;

    let quote = collab
        .oracle
        .price(&market)
        .await?
        .ok_or_else(|| ClosePositionError::MarketDataUnavailable(market.clone()))?;
    let exit_price = quote
        .reference_for(side)
        .ok_or_else(|| ClosePositionError::MarketDataUnavailable(market.clone()))?;

    let realized_pnl = match side {
        crate::domain::Side::Long | crate::domain::Side::Yes => (exit_price - entry_price) * quantity,
        crate::domain::Side::Short | crate::domain::Side::No => (entry_price - exit_price) * quantity,
    };

    let mut snapshot = cache::get_snapshot(collab.cache.as_ref(), assessment_id)
        .await?
        .ok_or_else(|| ClosePositionError::Conflict("no live state for assessment".into()))?;
    snapshot.positions.retain(|p| p.id != position_id);
    let new_balance = snapshot.current_balance + quantity * entry_price + realized_pnl;
    snapshot.current_balance = new_balance;
    snapshot.realized_pnl += realized_pnl;
    snapshot.recompute_unrealized_pnl();
    cache::set_snapshot(collab.cache.as_ref(), assessment_id, &snapshot).await?;
    // Design Notes §9: the source writes the snapshot twice around the peak
    // update (once without, once with); events are preserved either way.
    if snapshot.maybe_raise_peak() {
        cache::set_snapshot(collab.cache.as_ref(), assessment_id, &snapshot).await?;
    }

    let closed_at = Utc::now();
    if durable_position.is_some() {
        collab.db.close_position(position_id, closed_at).await.ok();
    }
    let trade_result = collab
        .db
        .create_trade(crate::db::NewTrade {
            assessment_id,
            position_id,
            kind: crate::domain::TradeKind::Close,
            market: market.clone(),
            side,
            quantity,
            price: exit_price,
            slippage_amount: Decimal::ZERO,
            fee_amount: Decimal::ZERO,
            realized_pnl,
        })
        .await;
    let trade_id = match trade_result {
        Ok(t) => t.id,
        Err(e) => {
            tracing::warn!(correlation_id, error = %e, "best-effort close trade record failed");
            Uuid::new_v4()
        }
    };

    collab
        .events
        .publish(
            correlation_id,
            Payload::PositionClosed {
                assessment_id,
                position_id,
                entry_price,
                exit_price,
                realized_pnl,
            },
        )
        .await
        .ok();
    collab
        .events
        .publish(
            correlation_id,
            Payload::TradeCompleted {
                assessment_id,
                trade_id,
                realized_pnl,
            },
        )
        .await
        .ok();

    if let Err(e) = refresh_rules_snapshot(collab, assessment_id, &snapshot, &tier).await {
        tracing::warn!(correlation_id, error = %e, "best-effort rules refresh failed");
    }

    Ok(ClosePositionOutcome {
        position_id,
        realized_pnl,
        balance: new_balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::concurrency::AssessmentLocks;
    use crate::db::fake::FakeStore;
    use crate::domain::{HotSnapshot, Side, SnapshotPosition};
    use crate::events::fake::FakeEventBus;
    use crate::oracle::PriceQuote;
    use crate::payment::fake::FakePaymentProvider;
    use crate::sagas::execution_rates::ExecutionRates;
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

    #[tokio::test]
    async fn closes_long_position_and_credits_realized_pnl() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = Collaborators {
            cache: cache.clone(),
            db: db.clone(),
            events,
            oracle: Arc::new(FixedOracle(PriceQuote::Scalar(dec!(51000)))),
            payment: Arc::new(FakePaymentProvider::new()),
            locks: Arc::new(AssessmentLocks::new()),
            execution_rates: ExecutionRates::default(),
        };

        let tier = crate::domain::Tier {
            id: Uuid::new_v4(),
            name: "T0".into(),
            purchase_price_minor: 10_000,
            starting_balance: dec!(50000),
            max_drawdown_ratio: dec!(0.2),
            min_trade_count: 10,
            max_risk_per_trade_ratio: dec!(0.1),
            profit_split_ratio: dec!(0.8),
        };
        db.seed_tier(tier.clone());

        let user_id = Uuid::new_v4();
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

        let position_id = Uuid::new_v4();
        let mut snapshot = HotSnapshot::empty(dec!(44990));
        snapshot.positions.push(SnapshotPosition {
            id: position_id,
            market: "BTC/USD".into(),
            side: Side::Long,
            quantity: dec!(0.1),
            entry_price: dec!(50000),
            current_price: dec!(50000),
            unrealized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        });
        cache::set_snapshot(cache.as_ref(), assessment_id, &snapshot)
            .await
            .unwrap();

        let outcome = close_position(&collab, assessment_id, user_id, position_id, "corr-close")
            .await
            .unwrap();

        assert_eq!(outcome.realized_pnl, dec!(100));
        let final_snapshot = cache::get_snapshot(cache.as_ref(), assessment_id)
            .await
            .unwrap()
            .unwrap();
        assert!(final_snapshot.positions.is_empty());
        assert_eq!(final_snapshot.realized_pnl, dec!(100));
    }
}
