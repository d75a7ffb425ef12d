//! Rules-monitoring loop (spec.md §4.5): two 1.5s timers, one per
//! assessment-like snapshot and one for funded accounts, each independent
//! so a stall in one never blocks the other.

use std::time::Duration;

use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::{self, keys};
use crate::domain::{RuleName, RuleStatus, RuleValue, RulesSnapshot};
use crate::sagas::{rule_violation, Collaborators};

const TICK: Duration = Duration::from_millis(1500);

pub fn spawn(collab: Collaborators) -> (JoinHandle<()>, JoinHandle<()>) {
    let assessment_collab = collab.clone();
    let assessment_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK);
        loop {
            interval.tick().await;
            if let Err(e) = run_assessment_cycle(&assessment_collab).await {
                tracing::warn!(error = %e, "assessment rules-monitoring cycle failed");
            }
        }
    });

    let funded_collab = collab;
    let funded_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK);
        loop {
            interval.tick().await;
            if let Err(e) = run_funded_cycle(&funded_collab).await {
                tracing::warn!(error = %e, "funded rules-monitoring cycle failed");
            }
        }
    });

    (assessment_handle, funded_handle)
}

async fn run_assessment_cycle(collab: &Collaborators) -> anyhow::Result<()> {
    for key in collab.cache.scan_keys(keys::ASSESSMENT_STATE_PATTERN).await? {
        let Some(assessment_id) = keys::id_from_scanned_key(&key) else {
            continue;
        };
        if let Err(e) = check_assessment(collab, assessment_id).await {
            tracing::warn!(%assessment_id, error = %e, "rules check failed for assessment");
        }
    }
    Ok(())
}

async fn check_assessment(collab: &Collaborators, assessment_id: Uuid) -> anyhow::Result<()> {
    let assessment = match collab.db.get_assessment(assessment_id).await? {
        Some(a) => a,
        None => return Ok(()),
    };
    // Guard against repeated violation events.
    if assessment.status == crate::domain::AssessmentStatus::Failed {
        return Ok(());
    }

    let Some(snapshot) = cache::get_snapshot(collab.cache.as_ref(), assessment_id).await? else {
        return Ok(());
    };
    let tier = match collab.db.get_tier(assessment.tier_id).await? {
        Some(t) => t,
        None => return Ok(()),
    };

    let drawdown = snapshot.drawdown();
    let risk_per_trade = snapshot.max_risk_per_trade();
    let trade_count = Decimal::from(snapshot.trade_count);

    let drawdown_value = RuleValue::new(RuleName::Drawdown, drawdown, tier.max_drawdown_ratio);
    let risk_value = RuleValue::new(
        RuleName::RiskPerTrade,
        risk_per_trade,
        tier.max_risk_per_trade_ratio,
    );
    let trade_count_value = RuleValue::new(
        RuleName::TradeCount,
        trade_count,
        Decimal::from(tier.min_trade_count),
    );

    let rules = RulesSnapshot {
        drawdown: drawdown_value,
        trade_count: trade_count_value,
        risk_per_trade: risk_value,
    };
    cache::set_rules(collab.cache.as_ref(), assessment_id, &rules).await?;

    if drawdown_value.status == RuleStatus::Violation {
        rule_violation::handle_violation(
            collab,
            assessment_id,
            RuleName::Drawdown,
            drawdown,
            tier.max_drawdown_ratio,
            "rules-monitor",
        )
        .await?;
    } else if risk_value.status == RuleStatus::Violation {
        rule_violation::handle_violation(
            collab,
            assessment_id,
            RuleName::RiskPerTrade,
            risk_per_trade,
            tier.max_risk_per_trade_ratio,
            "rules-monitor",
        )
        .await?;
    }

    Ok(())
}

async fn run_funded_cycle(collab: &Collaborators) -> anyhow::Result<()> {
    for key in collab.cache.scan_keys(keys::FUNDED_STATE_PATTERN).await? {
        let Some(funded_id) = keys::id_from_scanned_key(&key) else {
            continue;
        };
        if let Err(e) = check_funded_account(collab, funded_id).await {
            tracing::warn!(funded_account_id = %funded_id, error = %e, "rules check failed for funded account");
        }
    }
    Ok(())
}

async fn check_funded_account(collab: &Collaborators, funded_account_id: Uuid) -> anyhow::Result<()> {
    let Some(funded_account) = collab.db.get_funded_account(funded_account_id).await? else {
        return Ok(());
    };
    if funded_account.status == crate::domain::FundedAccountStatus::Closed {
        return Ok(());
    }

    let Some(snapshot) =
        cache::get_funded_snapshot(collab.cache.as_ref(), funded_account_id).await?
    else {
        return Ok(());
    };
    let tier = match collab.db.get_tier(funded_account.tier_id).await? {
        Some(t) => t,
        None => return Ok(()),
    };
    let thresholds = tier.funded_thresholds();

    let drawdown = snapshot.drawdown();
    let risk_per_trade = snapshot.max_risk_per_trade();

    let drawdown_value = RuleValue::new(RuleName::Drawdown, drawdown, thresholds.max_drawdown_ratio);
    let risk_value = RuleValue::new(
        RuleName::RiskPerTrade,
        risk_per_trade,
        thresholds.max_risk_per_trade_ratio,
    );
    // No trade-count rule for funded accounts (spec.md §4.5).
    let rules = RulesSnapshot {
        drawdown: drawdown_value,
        trade_count: RuleValue::new(RuleName::TradeCount, Decimal::ZERO, Decimal::ZERO),
        risk_per_trade: risk_value,
    };
    cache::set_funded_rules(collab.cache.as_ref(), funded_account_id, &rules).await?;

    if drawdown_value.status == RuleStatus::Violation {
        close_funded_account(collab, funded_account_id, "drawdown limit breached").await?;
    } else if risk_value.status == RuleStatus::Violation {
        close_funded_account(collab, funded_account_id, "per-trade risk limit breached").await?;
    }

    Ok(())
}

async fn close_funded_account(
    collab: &Collaborators,
    funded_account_id: Uuid,
    reason: &str,
) -> anyhow::Result<()> {
    collab.db.close_funded_account(funded_account_id, reason).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::concurrency::AssessmentLocks;
    use crate::db::fake::FakeStore;
    use crate::domain::{AssessmentStatus, HotSnapshot, PositionStatus, Side, SnapshotPosition};
    use crate::events::fake::FakeEventBus;
    use crate::events::topics::topic;
    use crate::oracle::CacheOracle;
    use crate::payment::fake::FakePaymentProvider;
    use crate::sagas::execution_rates::ExecutionRates;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

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
    async fn drawdown_violation_triggers_failure_handler() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = make_collab(db.clone(), cache.clone(), events.clone());

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

        let mut snapshot = HotSnapshot::empty(dec!(50000));
        snapshot.current_balance = dec!(39000);
        snapshot.peak_balance = dec!(50000);
        snapshot.positions.push(SnapshotPosition {
            id: Uuid::new_v4(),
            market: "BTC/USD".into(),
            side: Side::Long,
            quantity: dec!(0.1),
            entry_price: dec!(39000),
            current_price: dec!(39000),
            unrealized_pnl: Decimal::ZERO,
            opened_at: Utc::now(),
            status: PositionStatus::Open,
        });
        cache::set_snapshot(cache.as_ref(), assessment_id, &snapshot)
            .await
            .unwrap();

        run_assessment_cycle(&collab).await.unwrap();

        let assessment = db.get_assessment(assessment_id).await.unwrap().unwrap();
        assert_eq!(assessment.status, AssessmentStatus::Failed);
        assert_eq!(events.count(topic::RULES_VIOLATION_DETECTED), 1);
    }

    #[tokio::test]
    async fn healthy_assessment_only_writes_rules_snapshot() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = make_collab(db.clone(), cache.clone(), events.clone());

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

        let snapshot = HotSnapshot::empty(dec!(50000));
        cache::set_snapshot(cache.as_ref(), assessment_id, &snapshot)
            .await
            .unwrap();

        run_assessment_cycle(&collab).await.unwrap();

        let assessment = db.get_assessment(assessment_id).await.unwrap().unwrap();
        assert_eq!(assessment.status, AssessmentStatus::Active);
        assert_eq!(events.count(topic::RULES_VIOLATION_DETECTED), 0);
        let rules = cache::get_rules(cache.as_ref(), assessment_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rules.drawdown.status, RuleStatus::Safe);
    }
}
