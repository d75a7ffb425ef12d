//! Event-cancellation handler (spec.md §4.9): a conservative scan over
//! every live assessment snapshot, refunding cost (not P&L) on any
//! position whose market identifies the cancelled event.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cache;
use crate::domain::PositionStatus;
use crate::events::topics::Payload;

use super::Collaborators;

pub async fn handle_event_cancelled(
    collab: &Collaborators,
    event_id: &str,
    correlation_id: &str,
) -> anyhow::Result<()> {
    for assessment_id in collab.db.list_active_assessment_ids().await? {
        let _guard = collab.locks.lock(assessment_id).await;

        let Some(mut snapshot) = cache::get_snapshot(collab.cache.as_ref(), assessment_id).await?
        else {
            continue;
        };

        let mut total_refund = Decimal::ZERO;
        let mut refunded_position_ids = Vec::new();
        for position in snapshot.positions.iter_mut() {
            if position.status != PositionStatus::Open {
                continue;
            }
            if !position.matches_cancelled_event(event_id) {
                continue;
            }
            let (_, fee_rate) = collab
                .execution_rates
                .for_market(position.side.is_prediction_side());
            let refund = position.quantity * position.entry_price
                + position.quantity * position.entry_price * fee_rate;
            position.status = PositionStatus::Cancelled;
            total_refund += refund;
            refunded_position_ids.push((position.id, refund));
        }

        if refunded_position_ids.is_empty() {
            continue;
        }

        snapshot.current_balance += total_refund;
        snapshot.recompute_unrealized_pnl();
        cache::set_snapshot(collab.cache.as_ref(), assessment_id, &snapshot).await?;

        for (position_id, refund_amount) in refunded_position_ids {
            collab
                .events
                .publish(
                    correlation_id,
                    Payload::PositionRefunded {
                        assessment_id,
                        position_id,
                        refund_amount,
                    },
                )
                .await
                .ok();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::concurrency::AssessmentLocks;
    use crate::db::fake::FakeStore;
    use crate::domain::{AssessmentStatus, HotSnapshot, Side, SnapshotPosition};
    use crate::events::fake::FakeEventBus;
    use crate::events::topics::topic;
    use crate::oracle::CacheOracle;
    use crate::payment::fake::FakePaymentProvider;
    use crate::sagas::execution_rates::ExecutionRates;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;

    fn make_collab(db: Arc<FakeStore>, cache: Arc<FakeCache>, events: Arc<FakeEventBus>) -> Collaborators {
        Collaborators {
            cache: cache.clone(),
            db,
            events,
            oracle: Arc::new(CacheOracle::new(cache)),
            payment: Arc::new(FakePaymentProvider::new()),
            locks: Arc::new(AssessmentLocks::new()),
            execution_rates: ExecutionRates::default(),
        }
    }

    #[tokio::test]
    async fn refunds_matching_position_and_is_idempotent_on_redelivery() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = make_collab(db.clone(), cache.clone(), events.clone());

        let user_id = Uuid::new_v4();
        let assessment_id = Uuid::new_v4();
        db.seed_assessment(crate::domain::Assessment {
            id: assessment_id,
            user_id,
            tier_id: Uuid::new_v4(),
            purchase_id: Uuid::new_v4(),
            status: AssessmentStatus::Active,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            soft_delete_at: None,
        });

        let position_id = Uuid::new_v4();
        let mut snapshot = HotSnapshot::empty(dec!(49000));
        snapshot.positions.push(SnapshotPosition {
            id: position_id,
            market: "polymarket:E1".into(),
            side: Side::Yes,
            quantity: dec!(10),
            entry_price: dec!(0.6),
            current_price: dec!(0.6),
            unrealized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
            status: crate::domain::PositionStatus::Open,
        });
        cache::set_snapshot(cache.as_ref(), assessment_id, &snapshot)
            .await
            .unwrap();

        handle_event_cancelled(&collab, "E1", "corr-cancel-1")
            .await
            .unwrap();

        let after_first = cache::get_snapshot(cache.as_ref(), assessment_id)
            .await
            .unwrap()
            .unwrap();
        let position = &after_first.positions[0];
        assert_eq!(position.status, crate::domain::PositionStatus::Cancelled);
        let expected_refund = dec!(10) * dec!(0.6) * (Decimal::ONE + ExecutionRates::default().prediction_fee_rate);
        assert_eq!(after_first.current_balance, dec!(49000) + expected_refund);
        assert_eq!(events.count(topic::POSITION_REFUNDED), 1);

        // Redelivery: the position is already cancelled, so the second pass
        // finds nothing `active` to refund.
        handle_event_cancelled(&collab, "E1", "corr-cancel-2")
            .await
            .unwrap();
        let after_second = cache::get_snapshot(cache.as_ref(), assessment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after_second.current_balance, after_first.current_balance);
        assert_eq!(events.count(topic::POSITION_REFUNDED), 1);
    }

    #[tokio::test]
    async fn does_not_touch_unrelated_markets() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = make_collab(db.clone(), cache.clone(), events.clone());

        let user_id = Uuid::new_v4();
        let assessment_id = Uuid::new_v4();
        db.seed_assessment(crate::domain::Assessment {
            id: assessment_id,
            user_id,
            tier_id: Uuid::new_v4(),
            purchase_id: Uuid::new_v4(),
            status: AssessmentStatus::Active,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            soft_delete_at: None,
        });

        let mut snapshot = HotSnapshot::empty(dec!(50000));
        snapshot.positions.push(SnapshotPosition {
            id: Uuid::new_v4(),
            market: "BTC/USD".into(),
            side: Side::Long,
            quantity: dec!(0.1),
            entry_price: dec!(50000),
            current_price: dec!(50000),
            unrealized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
            status: crate::domain::PositionStatus::Open,
        });
        cache::set_snapshot(cache.as_ref(), assessment_id, &snapshot)
            .await
            .unwrap();

        handle_event_cancelled(&collab, "unrelated-event", "corr-cancel-noop")
            .await
            .unwrap();

        let after = cache::get_snapshot(cache.as_ref(), assessment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.current_balance, dec!(50000));
        assert_eq!(events.count(topic::POSITION_REFUNDED), 0);
    }
}
