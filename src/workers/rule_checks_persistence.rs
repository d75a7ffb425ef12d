//! Companion rule-checks persistence worker (spec.md §4.10): every 12s,
//! scans `assessment:*:rules` and bulk-inserts one `RuleCheck` row per
//! rule-type per assessment, with `skipDuplicates` semantics left to the
//! durable store's `ON CONFLICT DO NOTHING` (see `DurableStore::bulk_insert_rule_checks`).

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::cache::keys;
use crate::domain::RuleCheck;
use crate::sagas::Collaborators;

const CYCLE_INTERVAL: Duration = Duration::from_secs(12);

pub fn spawn(collab: Collaborators) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CYCLE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = run_cycle(&collab).await {
                tracing::warn!(error = %e, "rule-checks persistence cycle failed");
            }
        }
    })
}

async fn run_cycle(collab: &Collaborators) -> anyhow::Result<()> {
    let mut checks = Vec::new();
    for key in collab.cache.scan_keys(keys::ASSESSMENT_RULES_PATTERN).await? {
        let Some(assessment_id) = keys::id_from_scanned_key(&key) else {
            continue;
        };
        let Some(rules) = crate::cache::get_rules(collab.cache.as_ref(), assessment_id).await? else {
            continue;
        };
        let checked_at = Utc::now();
        for (rule, rule_value) in [
            (crate::domain::RuleName::Drawdown, rules.drawdown),
            (crate::domain::RuleName::TradeCount, rules.trade_count),
            (crate::domain::RuleName::RiskPerTrade, rules.risk_per_trade),
        ] {
            checks.push(RuleCheck {
                id: uuid::Uuid::new_v4(),
                assessment_id,
                rule,
                value: rule_value.value,
                threshold: rule_value.threshold,
                status: rule_value.status,
                checked_at,
            });
        }
    }

    if checks.is_empty() {
        return Ok(());
    }
    let inserted = collab.db.bulk_insert_rule_checks(checks).await?;
    tracing::debug!(inserted, "bulk-inserted rule checks");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fake::FakeCache;
    use crate::concurrency::AssessmentLocks;
    use crate::db::fake::FakeStore;
    use crate::domain::{RuleName, RuleValue, RulesSnapshot};
    use crate::events::fake::FakeEventBus;
    use crate::oracle::CacheOracle;
    use crate::payment::fake::FakePaymentProvider;
    use crate::sagas::execution_rates::ExecutionRates;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn bulk_inserts_one_row_per_rule() {
        let db = Arc::new(FakeStore::new());
        let cache = Arc::new(FakeCache::new());
        let events = Arc::new(FakeEventBus::new());
        let collab = Collaborators {
            cache: cache.clone(),
            db: db.clone(),
            events,
            oracle: Arc::new(CacheOracle::new(cache.clone())),
            payment: Arc::new(FakePaymentProvider::new()),
            locks: Arc::new(AssessmentLocks::new()),
            execution_rates: ExecutionRates::default(),
        };

        let assessment_id = Uuid::new_v4();
        let rules = RulesSnapshot {
            drawdown: RuleValue::new(RuleName::Drawdown, dec!(0.05), dec!(0.2)),
            trade_count: RuleValue::new(RuleName::TradeCount, dec!(3), dec!(10)),
            risk_per_trade: RuleValue::new(RuleName::RiskPerTrade, dec!(0.02), dec!(0.1)),
        };
        crate::cache::set_rules(cache.as_ref(), assessment_id, &rules)
            .await
            .unwrap();

        run_cycle(&collab).await.unwrap();

        assert_eq!(db.rule_checks().len(), 3);
    }
}
