//! Assessment lifecycle commands (spec.md §3/§6): `pending -> active` (plus
//! hot-state initialization), `active <-> paused`, and the two terminal
//! `-> abandoned` edges. Unlike the order/withdrawal/funded-activation
//! sagas these have no multi-step compensation of their own -- each is one
//! durable transition plus cache/event side effects -- but they still
//! serialize per assessment id (spec.md §5) so a concurrent order can never
//! observe a half-started assessment.

use uuid::Uuid;

use crate::cache;
use crate::domain::{AssessmentStatus, HotSnapshot, RuleValue, RulesSnapshot};
use crate::events::topics::Payload;

use super::Collaborators;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

async fn owned_assessment(
    collab: &Collaborators,
    assessment_id: Uuid,
    user_id: Uuid,
) -> Result<crate::domain::Assessment, LifecycleError> {
    let assessment = collab
        .db
        .get_assessment(assessment_id)
        .await?
        .ok_or_else(|| LifecycleError::NotFound("assessment not found".into()))?;
    if assessment.user_id != user_id {
        return Err(LifecycleError::Forbidden("not your assessment".into()));
    }
    Ok(assessment)
}

/// `pending -> active` (spec.md §3): creates the 1:1 `VirtualAccount` and
/// seeds both the hot snapshot and rules snapshot so the rules-monitoring
/// loop has something to read on its very next tick.
pub async fn start_assessment(
    collab: &Collaborators,
    assessment_id: Uuid,
    user_id: Uuid,
    correlation_id: &str,
) -> Result<crate::domain::Assessment, LifecycleError> {
    let _guard = collab.locks.lock(assessment_id).await;
    let assessment = owned_assessment(collab, assessment_id, user_id).await?;
    if !assessment.status.can_transition_to(AssessmentStatus::Active) {
        return Err(LifecycleError::Conflict(format!(
            "cannot start assessment in status {:?}",
            assessment.status
        )));
    }

    let tier = collab
        .db
        .get_tier(assessment.tier_id)
        .await?
        .ok_or_else(|| LifecycleError::NotFound("tier not found".into()))?;

    let started = collab.db.start_assessment(assessment_id, &tier).await?;

    let snapshot = HotSnapshot::empty(tier.starting_balance);
    let rules = RulesSnapshot {
        drawdown: RuleValue::new(crate::domain::RuleName::Drawdown, 0.into(), tier.max_drawdown_ratio),
        trade_count: RuleValue::new(
            crate::domain::RuleName::TradeCount,
            0.into(),
            tier.min_trade_count.into(),
        ),
        risk_per_trade: RuleValue::new(
            crate::domain::RuleName::RiskPerTrade,
            0.into(),
            tier.max_risk_per_trade_ratio,
        ),
    };
    cache::set_snapshot(collab.cache.as_ref(), assessment_id, &snapshot).await?;
    cache::set_rules(collab.cache.as_ref(), assessment_id, &rules).await?;

    collab
        .events
        .publish(correlation_id, Payload::AssessmentStarted { assessment_id })
        .await
        .ok();

    Ok(started)
}

pub async fn pause_assessment(
    collab: &Collaborators,
    assessment_id: Uuid,
    user_id: Uuid,
    correlation_id: &str,
) -> Result<crate::domain::Assessment, LifecycleError> {
    transition(
        collab,
        assessment_id,
        user_id,
        AssessmentStatus::Paused,
        Payload::AssessmentPaused { assessment_id },
        correlation_id,
    )
    .await
}

pub async fn resume_assessment(
    collab: &Collaborators,
    assessment_id: Uuid,
    user_id: Uuid,
    correlation_id: &str,
) -> Result<crate::domain::Assessment, LifecycleError> {
    transition(
        collab,
        assessment_id,
        user_id,
        AssessmentStatus::Active,
        Payload::AssessmentResumed { assessment_id },
        correlation_id,
    )
    .await
}

/// `active|paused -> abandoned` (spec.md §3): terminal, schedules the
/// soft-delete horizon `+90d` and fires `assessment.completed` exactly once
/// (spec.md §8 round-trip property) in addition to `assessment.abandoned`.
pub async fn abandon_assessment(
    collab: &Collaborators,
    assessment_id: Uuid,
    user_id: Uuid,
    correlation_id: &str,
) -> Result<crate::domain::Assessment, LifecycleError> {
    let _guard = collab.locks.lock(assessment_id).await;
    let assessment = owned_assessment(collab, assessment_id, user_id).await?;
    if !assessment.status.can_transition_to(AssessmentStatus::Abandoned) {
        return Err(LifecycleError::Conflict(format!(
            "cannot abandon assessment in status {:?}",
            assessment.status
        )));
    }

    let updated = collab
        .db
        .transition_assessment(assessment_id, AssessmentStatus::Abandoned)
        .await?;
    cache::delete_snapshot(collab.cache.as_ref(), assessment_id).await.ok();

    collab
        .events
        .publish(correlation_id, Payload::AssessmentAbandoned { assessment_id })
        .await
        .ok();
    collab
        .events
        .publish(
            correlation_id,
            Payload::AssessmentCompleted {
                assessment_id,
                status: AssessmentStatus::Abandoned,
            },
        )
        .await
        .ok();

    Ok(updated)
}

async fn transition(
    collab: &Collaborators,
    assessment_id: Uuid,
    user_id: Uuid,
    next: AssessmentStatus,
    event: Payload,
    correlation_id: &str,
) -> Result<crate::domain::Assessment, LifecycleError> {
    let _guard = collab.locks.lock(assessment_id).await;
    let assessment = owned_assessment(collab, assessment_id, user_id).await?;
    if !assessment.status.can_transition_to(next) {
        return Err(LifecycleError::Conflict(format!(
            "cannot transition assessment from {:?} to {next:?}",
            assessment.status
        )));
    }
    let updated = collab.db.transition_assessment(assessment_id, next).await?;
    collab.events.publish(correlation_id, event).await.ok();
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::concurrency::AssessmentLocks;
    use crate::db::fake::FakeStore;
    use crate::domain::{Assessment, Tier};
    use crate::events::fake::FakeEventBus;
    use crate::oracle::CacheOracle;
    use crate::payment::fake::FakePaymentProvider;
    use crate::sagas::execution_rates::ExecutionRates;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn collab_with_pending_assessment() -> (Collaborators, Uuid, Uuid) {
        let db = Arc::new(FakeStore::new());
        let cache: Arc<dyn crate::cache::Cache> = Arc::new(FakeCache::new());
        let tier_id = Uuid::new_v4();
        db.seed_tier(Tier {
            id: tier_id,
            name: "Standard".into(),
            purchase_price_minor: 10_000,
            starting_balance: dec!(50000),
            max_drawdown_ratio: dec!(0.2),
            min_trade_count: 10,
            max_risk_per_trade_ratio: dec!(0.1),
            profit_split_ratio: dec!(0.8),
        });
        let user_id = Uuid::new_v4();
        let purchase_id = Uuid::new_v4();
        let assessment_id = Uuid::new_v4();
        db.seed_assessment(Assessment {
            id: assessment_id,
            user_id,
            tier_id,
            purchase_id,
            status: AssessmentStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            soft_delete_at: None,
        });

        let collab = Collaborators {
            cache: cache.clone(),
            db: db.clone(),
            events: Arc::new(FakeEventBus::new()),
            oracle: Arc::new(CacheOracle::new(cache)),
            payment: Arc::new(FakePaymentProvider::new()),
            locks: Arc::new(AssessmentLocks::new()),
            execution_rates: ExecutionRates::default(),
        };
        (collab, assessment_id, user_id)
    }

    #[tokio::test]
    async fn start_seeds_snapshot_and_rules() {
        let (collab, assessment_id, user_id) = collab_with_pending_assessment();
        let started = start_assessment(&collab, assessment_id, user_id, "corr-1")
            .await
            .unwrap();
        assert_eq!(started.status, AssessmentStatus::Active);
        let snapshot = cache::get_snapshot(collab.cache.as_ref(), assessment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.current_balance, dec!(50000));
        let rules = cache::get_rules(collab.cache.as_ref(), assessment_id)
            .await
            .unwrap();
        assert!(rules.is_some());
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips() {
        let (collab, assessment_id, user_id) = collab_with_pending_assessment();
        start_assessment(&collab, assessment_id, user_id, "corr-1")
            .await
            .unwrap();
        let paused = pause_assessment(&collab, assessment_id, user_id, "corr-2")
            .await
            .unwrap();
        assert_eq!(paused.status, AssessmentStatus::Paused);
        let resumed = resume_assessment(&collab, assessment_id, user_id, "corr-3")
            .await
            .unwrap();
        assert_eq!(resumed.status, AssessmentStatus::Active);
    }

    #[tokio::test]
    async fn abandon_is_terminal() {
        let (collab, assessment_id, user_id) = collab_with_pending_assessment();
        start_assessment(&collab, assessment_id, user_id, "corr-1")
            .await
            .unwrap();
        abandon_assessment(&collab, assessment_id, user_id, "corr-2")
            .await
            .unwrap();
        let err = pause_assessment(&collab, assessment_id, user_id, "corr-3")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Conflict(_)));
    }

    #[tokio::test]
    async fn foreign_user_is_forbidden() {
        let (collab, assessment_id, _user_id) = collab_with_pending_assessment();
        let err = start_assessment(&collab, assessment_id, Uuid::new_v4(), "corr-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden(_)));
    }
}
