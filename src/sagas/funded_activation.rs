//! Funded-account activation saga, triggered by `assessment.completed`
//! events with `status = passed` (spec.md §4.7). Idempotent on
//! `sourceAssessmentId`.

use uuid::Uuid;

use crate::cache;
use crate::domain::{AssessmentStatus, FundedAccount, HotSnapshot, RulesSnapshot, RuleValue};
use crate::events::topics::Payload;

use super::Collaborators;

#[derive(Debug, thiserror::Error)]
pub enum FundedActivationError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub async fn activate_funded_account(
    collab: &Collaborators,
    assessment_id: Uuid,
    correlation_id: &str,
) -> Result<FundedAccount, FundedActivationError> {
    let _guard = collab.locks.lock(assessment_id).await;

    let assessment = collab
        .db
        .get_assessment(assessment_id)
        .await?
        .ok_or_else(|| FundedActivationError::NotFound("assessment not found".into()))?;
    if assessment.status != AssessmentStatus::Passed || assessment.completed_at.is_none() {
        return Err(FundedActivationError::Conflict(
            "assessment is not a completed pass".into(),
        ));
    }

    if let Some(existing) = collab
        .db
        .get_funded_account_by_assessment(assessment_id)
        .await?
    {
        return Ok(existing);
    }

    let tier = collab
        .db
        .get_tier(assessment.tier_id)
        .await?
        .ok_or_else(|| FundedActivationError::NotFound("tier not found".into()))?;

    let (funded_account, _funded_virtual_account) =
        match collab.db.create_funded_account(&assessment, &tier).await {
            Ok(pair) => pair,
            Err(e) => return Err(FundedActivationError::Internal(e)),
        };

    let snapshot = HotSnapshot::empty(tier.starting_balance);
    let rules = RulesSnapshot {
        drawdown: RuleValue::new(crate::domain::RuleName::Drawdown, 0.into(), tier.max_drawdown_ratio),
        trade_count: RuleValue::new(crate::domain::RuleName::TradeCount, 0.into(), tier.min_trade_count.into()),
        risk_per_trade: RuleValue::new(
            crate::domain::RuleName::RiskPerTrade,
            0.into(),
            tier.max_risk_per_trade_ratio,
        ),
    };

    if let Err(e) = cache::set_funded_snapshot(collab.cache.as_ref(), funded_account.id, &snapshot).await {
        collab.db.delete_funded_account(funded_account.id).await.ok();
        return Err(FundedActivationError::Internal(e));
    }
    if let Err(e) = cache::set_funded_rules(collab.cache.as_ref(), funded_account.id, &rules).await {
        collab.db.delete_funded_account(funded_account.id).await.ok();
        cache::delete_funded_snapshot(collab.cache.as_ref(), funded_account.id)
            .await
            .ok();
        return Err(FundedActivationError::Internal(e));
    }

    collab
        .events
        .publish(
            correlation_id,
            Payload::FundedAccountCreated {
                funded_account_id: funded_account.id,
                source_assessment_id: assessment_id,
            },
        )
        .await
        .ok();
    collab
        .events
        .publish(
            correlation_id,
            Payload::FundedAccountActivated {
                funded_account_id: funded_account.id,
            },
        )
        .await
        .ok();

    Ok(funded_account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::concurrency::AssessmentLocks;
    use crate::db::fake::FakeStore;
    use crate::events::fake::FakeEventBus;
    use crate::events::topics::topic;
    use crate::oracle::CacheOracle;
    use crate::payment::fake::FakePaymentProvider;
    use crate::sagas::execution_rates::ExecutionRates;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn collab(db: Arc<FakeStore>, cache: Arc<FakeCache>, events: Arc<FakeEventBus>) -> Collaborators {
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
    async fn activates_and_seeds_snapshots() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = collab(db.clone(), cache.clone(), events.clone());

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
            status: AssessmentStatus::Passed,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            soft_delete_at: None,
        });

        let funded = activate_funded_account(&collab, assessment_id, "corr-activate")
            .await
            .unwrap();
        assert_eq!(funded.source_assessment_id, assessment_id);

        let snapshot = cache::get_funded_snapshot(cache.as_ref(), funded.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.current_balance, dec!(50000));
        assert_eq!(events.count(topic::FUNDED_ACCOUNT_CREATED), 1);
        assert_eq!(events.count(topic::FUNDED_ACCOUNT_ACTIVATED), 1);
    }

    #[tokio::test]
    async fn is_idempotent_on_second_call() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = collab(db.clone(), cache.clone(), events.clone());

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
            status: AssessmentStatus::Passed,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            soft_delete_at: None,
        });

        let first = activate_funded_account(&collab, assessment_id, "corr-1")
            .await
            .unwrap();
        let second = activate_funded_account(&collab, assessment_id, "corr-2")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(events.count(topic::FUNDED_ACCOUNT_CREATED), 1);
    }
}
