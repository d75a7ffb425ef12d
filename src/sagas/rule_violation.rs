//! Rule-violation failure handler (spec.md §4.6). Idempotent: guard-and-skip
//! at the first step if the assessment is already `failed`.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cache;
use crate::domain::{AssessmentStatus, RuleName};
use crate::events::topics::Payload;

use super::Collaborators;

pub async fn handle_violation(
    collab: &Collaborators,
    assessment_id: Uuid,
    rule: RuleName,
    value: Decimal,
    threshold: Decimal,
    correlation_id: &str,
) -> anyhow::Result<()> {
    let _guard = collab.locks.lock(assessment_id).await;

    // Step 1: guard-and-skip.
    let assessment = match collab.db.get_assessment(assessment_id).await? {
        Some(a) => a,
        None => return Ok(()),
    };
    if assessment.status == AssessmentStatus::Failed {
        return Ok(());
    }

    // Step 2: durably set status = failed.
    collab
        .db
        .transition_assessment(assessment_id, AssessmentStatus::Failed)
        .await?;

    // Step 3-4: close every open position in the hot snapshot, clear it.
    if let Some(mut snapshot) = cache::get_snapshot(collab.cache.as_ref(), assessment_id).await? {
        let now = Utc::now();
        for position in snapshot.positions.iter().filter(|p| {
            p.status == crate::domain::PositionStatus::Open
        }) {
            collab.db.close_position(position.id, now).await.ok();
            collab
                .events
                .publish(
                    correlation_id,
                    Payload::PositionClosed {
                        assessment_id,
                        position_id: position.id,
                        entry_price: position.entry_price,
                        exit_price: position.current_price,
                        realized_pnl: position.unrealized_pnl,
                    },
                )
                .await
                .ok();
        }
        snapshot.positions.clear();
        cache::set_snapshot(collab.cache.as_ref(), assessment_id, &snapshot).await?;
    }

    // Step 5: record a Violation row.
    collab
        .db
        .create_violation(assessment_id, rule, value, threshold)
        .await?;

    // Step 6: emit rules.violation-detected.
    collab
        .events
        .publish(
            correlation_id,
            Payload::RulesViolationDetected {
                assessment_id,
                rule,
                value,
                threshold,
            },
        )
        .await
        .ok();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::concurrency::AssessmentLocks;
    use crate::db::fake::FakeStore;
    use crate::domain::{HotSnapshot, PositionStatus, Side, SnapshotPosition};
    use crate::events::fake::FakeEventBus;
    use crate::events::topics::topic;
    use crate::oracle::CacheOracle;
    use crate::payment::fake::FakePaymentProvider;
    use crate::sagas::execution_rates::ExecutionRates;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[tokio::test]
    async fn is_idempotent_once_already_failed() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = Collaborators {
            cache: cache.clone(),
            db: db.clone(),
            events: events.clone(),
            oracle: Arc::new(CacheOracle::new(cache.clone())),
            payment: Arc::new(FakePaymentProvider::new()),
            locks: Arc::new(AssessmentLocks::new()),
            execution_rates: ExecutionRates::default(),
        };

        let user_id = Uuid::new_v4();
        let assessment_id = Uuid::new_v4();
        db.seed_assessment(crate::domain::Assessment {
            id: assessment_id,
            user_id,
            tier_id: Uuid::new_v4(),
            purchase_id: Uuid::new_v4(),
            status: AssessmentStatus::Failed,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            soft_delete_at: None,
        });

        handle_violation(
            &collab,
            assessment_id,
            RuleName::Drawdown,
            dec!(0.25),
            dec!(0.2),
            "corr-idempotent",
        )
        .await
        .unwrap();

        assert_eq!(events.count(topic::RULES_VIOLATION_DETECTED), 0);
        assert!(db.violations().is_empty());
    }

    #[tokio::test]
    async fn closes_open_positions_and_clears_snapshot() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = Collaborators {
            cache: cache.clone(),
            db: db.clone(),
            events: events.clone(),
            oracle: Arc::new(CacheOracle::new(cache.clone())),
            payment: Arc::new(FakePaymentProvider::new()),
            locks: Arc::new(AssessmentLocks::new()),
            execution_rates: ExecutionRates::default(),
        };

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

        let mut snapshot = HotSnapshot::empty(dec!(40000));
        snapshot.positions.push(SnapshotPosition {
            id: Uuid::new_v4(),
            market: "BTC/USD".into(),
            side: Side::Long,
            quantity: dec!(0.1),
            entry_price: dec!(50000),
            current_price: dec!(49000),
            unrealized_pnl: dec!(-100),
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        });
        cache::set_snapshot(cache.as_ref(), assessment_id, &snapshot)
            .await
            .unwrap();

        handle_violation(
            &collab,
            assessment_id,
            RuleName::Drawdown,
            dec!(0.25),
            dec!(0.2),
            "corr-close-all",
        )
        .await
        .unwrap();

        let assessment = db.get_assessment(assessment_id).await.unwrap().unwrap();
        assert_eq!(assessment.status, AssessmentStatus::Failed);
        let final_snapshot = cache::get_snapshot(cache.as_ref(), assessment_id)
            .await
            .unwrap()
            .unwrap();
        assert!(final_snapshot.positions.is_empty());
        assert_eq!(events.count(topic::POSITION_CLOSED), 1);
        assert_eq!(events.count(topic::RULES_VIOLATION_DETECTED), 1);
        assert_eq!(db.violations().len(), 1);
    }
}
